use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use traffic_core::types::AccountId;

use crate::app::AppState;

/// GET /v1/fleet — status counts across every account: "how many accounts
/// are in which state".
pub async fn fleet_overview_handler(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let counts = state.accounts.status_counts()?;
    let by_status: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(status, count)| (status.to_string(), json!(count)))
        .collect();
    Ok(Json(json!({ "status_counts": by_status })))
}

#[derive(Debug, Deserialize)]
pub struct AccountDetailParams {
    #[serde(default = "default_recent_limit")]
    recent_limit: u32,
}

fn default_recent_limit() -> u32 {
    20
}

/// GET /v1/accounts/{account_id} — one account's row plus its most recent
/// action records, a per-account drill-down.
pub async fn account_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(params): Query<AccountDetailParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = AccountId::from(account_id);
    let account = state.accounts.get(&account_id)?;
    let recent = state.records.recent_for_account(&account_id, params.recent_limit)?;
    Ok(Json(json!({
        "account": account,
        "recent_actions": recent,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ErrorDigestParams {
    #[serde(default = "default_digest_hours")]
    hours: u32,
}

fn default_digest_hours() -> u32 {
    24
}

/// GET /v1/errors — error counts by kind over the trailing window.
pub async fn error_digest_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ErrorDigestParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let digest = state.records.error_digest(params.hours)?;
    let by_kind: serde_json::Map<String, serde_json::Value> = digest
        .into_iter()
        .map(|(kind, count)| (kind.to_string(), json!(count)))
        .collect();
    Ok(Json(json!({ "hours": params.hours, "error_counts": by_kind })))
}

/// Thin error wrapper translating collaborator errors into HTTP responses —
/// this surface is read-only, so every failure is either "not found" or a
/// persistence fault, never a validation error.
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl From<traffic_accounts::AccountError> for ApiError {
    fn from(e: traffic_accounts::AccountError) -> Self {
        match e {
            traffic_accounts::AccountError::NotFound { id } => ApiError::NotFound(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<traffic_dispatcher::DispatcherError> for ApiError {
    fn from(e: traffic_dispatcher::DispatcherError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            ApiError::NotFound(id) => (StatusCode::NOT_FOUND, format!("account not found: {id}")),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (code, Json(json!({ "error": message }))).into_response()
    }
}
