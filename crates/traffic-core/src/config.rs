use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::ActionKind;

/// Top-level config (traffic.toml + TRAFFIC_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub channel_monitor: ChannelMonitorConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub reply_poller: ReplyPollerConfig,
    #[serde(default)]
    pub invite: InviteConfig,
    #[serde(default)]
    pub quiet_hours: QuietHoursConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fleet: FleetConfig::default(),
            rate: RateConfig::default(),
            proxy: ProxyConfig::default(),
            channel_monitor: ChannelMonitorConfig::default(),
            supervisor: SupervisorConfig::default(),
            telegram: TelegramConfig::default(),
            strategy: StrategyConfig::default(),
            reply_poller: ReplyPollerConfig::default(),
            invite: InviteConfig::default(),
            quiet_hours: QuietHoursConfig::default(),
            shutdown: ShutdownConfig::default(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Cap on concurrent account workers.
    #[serde(default = "default_max_accounts")]
    pub max_accounts: u32,
    /// IANA zone name used when an account has no per-account override.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_accounts: default_max_accounts(),
            default_timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateConfig {
    /// Absolute per-day ceiling per action kind, regardless of the warmup
    /// planner's allocation. Missing entries mean "no additional ceiling".
    #[serde(default)]
    pub hard_ceilings: HashMap<ActionKind, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_cooldown_base")]
    pub cooldown_base_seconds: u64,
    #[serde(default = "default_cooldown_max")]
    pub cooldown_max_seconds: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cooldown_base_seconds: default_cooldown_base(),
            cooldown_max_seconds: default_cooldown_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_claim_horizon")]
    pub claim_horizon_seconds: u64,
    /// Account that holds the reader session the monitor polls public
    /// channels through.
    #[serde(default)]
    pub reader_account_id: String,
}

impl Default for ChannelMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            claim_horizon_seconds: default_claim_horizon(),
            reader_account_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_seconds: u64,
    /// Interval between spam-status sweeps over warming/active accounts.
    #[serde(default = "default_spam_check_interval")]
    pub spam_check_interval_seconds: u64,
    /// Interval between `RateLedger::compact` sweeps.
    #[serde(default = "default_ledger_compact_interval")]
    pub ledger_compact_interval_seconds: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            rescan_interval_seconds: default_rescan_interval(),
            spam_check_interval_seconds: default_spam_check_interval(),
            ledger_compact_interval_seconds: default_ledger_compact_interval(),
        }
    }
}

/// MTProto application credentials (my.telegram.org), shared across every
/// account's `grammers_client::Client`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub api_id: i32,
    #[serde(default)]
    pub api_hash: String,
    /// Flood-waits at or below this many seconds are slept through and
    /// retried once inside the Session Registry; longer ones are surfaced
    /// as `FloodExceeded` so the dispatcher can park the account instead.
    #[serde(default = "default_flood_wait_ceiling_seconds")]
    pub flood_wait_ceiling_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            flood_wait_ceiling_seconds: default_flood_wait_ceiling_seconds(),
        }
    }
}

fn default_flood_wait_ceiling_seconds() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_cold_start_threshold")]
    pub cold_start_threshold: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            cold_start_threshold: default_cold_start_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPollerConfig {
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_reply_poll_interval")]
    pub tick_interval_seconds: u64,
}

impl Default for ReplyPollerConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            tick_interval_seconds: default_reply_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteConfig {
    #[serde(default = "default_expire_hours")]
    pub default_expire_hours: u32,
    #[serde(default = "default_usage_limit")]
    pub default_usage_limit: u32,
    /// Account that administers the gated VIP channel and public teaser
    /// channels.
    #[serde(default)]
    pub publisher_account_id: String,
    #[serde(default)]
    pub vip_channel_id: String,
    #[serde(default)]
    pub public_channels: Vec<String>,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_join_poll_interval")]
    pub join_poll_interval_seconds: u64,
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            default_expire_hours: default_expire_hours(),
            default_usage_limit: default_usage_limit(),
            publisher_account_id: String::new(),
            vip_channel_id: String::new(),
            public_channels: Vec::new(),
            publish_interval_seconds: default_publish_interval(),
            sweep_interval_seconds: default_sweep_interval(),
            join_poll_interval_seconds: default_join_poll_interval(),
        }
    }
}

/// Account-default quiet hours; a per-account override may replace both
/// fields. `end < start` means the window spans midnight (e.g. 23:00-07:00).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    #[serde(default = "default_quiet_start")]
    pub start: String,
    #[serde(default = "default_quiet_end")]
    pub end: String,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            start: default_quiet_start(),
            end: default_quiet_end(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_max_accounts() -> u32 {
    200
}
fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}
fn default_cooldown_base() -> u64 {
    300
}
fn default_cooldown_max() -> u64 {
    7_200
}
fn default_poll_interval() -> u64 {
    30
}
fn default_claim_horizon() -> u64 {
    1_800
}
fn default_epsilon() -> f64 {
    0.2
}
fn default_cold_start_threshold() -> u32 {
    5
}
fn default_window_minutes() -> u32 {
    30
}
fn default_reply_poll_interval() -> u64 {
    60
}
fn default_rescan_interval() -> u64 {
    15
}
fn default_spam_check_interval() -> u64 {
    21_600
}
fn default_ledger_compact_interval() -> u64 {
    86_400
}
fn default_expire_hours() -> u32 {
    2
}
fn default_usage_limit() -> u32 {
    25
}
fn default_publish_interval() -> u64 {
    3_600
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_join_poll_interval() -> u64 {
    60
}
fn default_quiet_start() -> String {
    "23:00".to_string()
}
fn default_quiet_end() -> String {
    "07:00".to_string()
}
fn default_grace_seconds() -> u64 {
    30
}
fn default_port() -> u16 {
    8089
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.traffic-engine/traffic.db", home)
}

impl EngineConfig {
    /// Load config from a TOML file with TRAFFIC_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.traffic-engine/traffic.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: EngineConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TRAFFIC_").split("_"))
            .extract()
            .map_err(|e| crate::error::TrafficError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.traffic-engine/traffic.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_quiet_hours_wraparound() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.quiet_hours.start, "23:00");
        assert_eq!(cfg.quiet_hours.end, "07:00");
    }

    #[test]
    fn default_proxy_cooldown_matches_scenario_e() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.cooldown_base_seconds, 300);
        assert_eq!(cfg.cooldown_max_seconds, 7_200);
    }

    #[test]
    fn default_flood_wait_ceiling_matches_spec_4_3() {
        let cfg = TelegramConfig::default();
        assert_eq!(cfg.flood_wait_ceiling_seconds, 600);
    }
}
