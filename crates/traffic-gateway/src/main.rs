use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traffic_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > TRAFFIC_CONFIG env > ~/.traffic-engine/traffic.toml
    let config_path = std::env::var("TRAFFIC_CONFIG").ok();
    let config = traffic_core::config::EngineConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        traffic_core::config::EngineConfig::default()
    });

    // The gateway is a read-only observer of the same SQLite file the engine
    // binary writes to — two connections to one file, both WAL-mode.
    let conn = rusqlite::Connection::open(&config.database.path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=3000;")?;
    let accounts = Arc::new(traffic_accounts::AccountStore::new(conn)?);

    let records_conn = rusqlite::Connection::open(&config.database.path)?;
    records_conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=3000;")?;
    let records = Arc::new(traffic_dispatcher::ActionRecordStore::new(records_conn)?);

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, accounts, records));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("traffic gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
