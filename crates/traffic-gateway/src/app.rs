use axum::{routing::get, Router};
use std::sync::Arc;

use traffic_accounts::AccountStore;
use traffic_core::config::EngineConfig;
use traffic_dispatcher::records::ActionRecordStore;

/// Central shared state for the read-only admin surface.
///
/// This only borrows the two stores the three projections read from — the
/// engine binary is the only writer, the gateway is a passive observer
/// sharing the same SQLite file.
pub struct AppState {
    pub config: EngineConfig,
    pub accounts: Arc<AccountStore>,
    pub records: Arc<ActionRecordStore>,
}

impl AppState {
    pub fn new(config: EngineConfig, accounts: Arc<AccountStore>, records: Arc<ActionRecordStore>) -> Self {
        Self {
            config,
            accounts,
            records,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/v1/fleet", get(crate::http::fleet::fleet_overview_handler))
        .route(
            "/v1/accounts/{account_id}",
            get(crate::http::fleet::account_detail_handler),
        )
        .route("/v1/errors", get(crate::http::fleet::error_digest_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
