use std::str::FromStr;
use std::sync::Arc;

use chrono_tz::Tz;
use clap::Parser;
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use traffic_accounts::{AccountStore, NewAccount, Persona};
use traffic_channels::ChannelMonitor;
use traffic_core::config::EngineConfig;
use traffic_core::types::{AccountId, Segment};
use traffic_dispatcher::{ActionRecordStore, ContentQueue, OutcomePendingStore, SpamChecker, Supervisor, TargetSource};
use traffic_funnel::{InviteLinkStore, InvitePublisher, InviteSweeper, JoinAttributor};
use traffic_ledger::{RateLedger, SystemClock};
use traffic_proxy::ProxyPool;
use traffic_sessions::SessionRegistry;
use traffic_strategy::StrategyOracle;
use traffic_telegram::{ApiCredentials, GrammersTelegramClient, TelegramClient};
use traffic_warmup::WarmupPlanner;

mod cli;
mod generator;

use cli::{AccountCommand, Cli, Command};
use generator::NullTextGenerator;

/// Opens a connection to the shared SQLite file. Every subsystem store gets
/// its own connection (matching the gateway's read side) rather than
/// sharing one `rusqlite::Connection`, which is `Send` but not `Sync`; WAL
/// mode lets the independent writers interleave without blocking readers.
fn open_conn(path: &str) -> anyhow::Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

fn load_config() -> EngineConfig {
    let config_path = std::env::var("TRAFFIC_CONFIG").ok();
    EngineConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        EngineConfig::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "traffic_engine=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_fleet(config).await,
        Command::Migrate => migrate(config),
        Command::Account { action } => account_command(config, action),
    }
}

/// Constructs every store exactly as `run_fleet` does. Each store's
/// constructor calls its crate's idempotent `init_db`, so simply building
/// and dropping every store brings the database up to date — no separate
/// migration DSL is needed.
fn migrate(config: EngineConfig) -> anyhow::Result<()> {
    let db_path = &config.database.path;
    let _accounts = AccountStore::new(open_conn(db_path)?)?;
    let _proxies = ProxyPool::new(open_conn(db_path)?, config.proxy.cooldown_base_seconds, config.proxy.cooldown_max_seconds)?;
    let clock: Arc<dyn traffic_ledger::Clock> = Arc::new(SystemClock);
    let _ledger = RateLedger::new(open_conn(db_path)?, Arc::clone(&clock))?;
    let accounts_for_warmup = Arc::new(AccountStore::new(open_conn(db_path)?)?);
    let _warmup = WarmupPlanner::new(open_conn(db_path)?, accounts_for_warmup, clock)?;
    let transport: Arc<dyn TelegramClient> = Arc::new(GrammersTelegramClient::new(ApiCredentials {
        api_id: config.telegram.api_id,
        api_hash: config.telegram.api_hash.clone(),
    }));
    let _sessions = SessionRegistry::with_flood_wait_ceiling(
        open_conn(db_path)?,
        Arc::clone(&transport),
        config.telegram.flood_wait_ceiling_seconds,
    );
    let _channels = ChannelMonitor::new(
        open_conn(db_path)?,
        transport,
        AccountId::from(config.channel_monitor.reader_account_id.as_str()),
        config.channel_monitor.poll_interval_seconds,
        config.channel_monitor.claim_horizon_seconds,
    )?;
    let _content = ContentQueue::new(open_conn(db_path)?)?;
    let _records = ActionRecordStore::new(open_conn(db_path)?)?;
    let _pending = OutcomePendingStore::new(open_conn(db_path)?)?;
    let _oracle = StrategyOracle::new(open_conn(db_path)?, config.strategy.epsilon, config.strategy.cold_start_threshold)?;
    let _invites = InviteLinkStore::new(open_conn(db_path)?)?;
    info!(path = %db_path, "schema up to date");
    Ok(())
}

fn account_command(config: EngineConfig, action: AccountCommand) -> anyhow::Result<()> {
    let accounts = AccountStore::new(open_conn(&config.database.path)?)?;
    match action {
        AccountCommand::Add(args) => {
            let segment = Segment::from_str(&args.segment)
                .map_err(|e| anyhow::anyhow!("invalid --segment: {e}"))?;
            let account = accounts.create(NewAccount {
                phone_identifier: args.phone_identifier,
                segment,
                persona: Persona {
                    display_name: args.display_name,
                    bio: args.bio,
                },
                timezone_override: args.timezone,
            })?;
            println!("created account {} (status={})", account.account_id, account.status);
            Ok(())
        }
        AccountCommand::List { status } => {
            let rows = match status {
                Some(s) => {
                    let status = traffic_core::types::AccountStatus::from_str(&s)
                        .map_err(|e| anyhow::anyhow!("invalid --status: {e}"))?;
                    accounts.list_by_status(status, None)?
                }
                None => {
                    use traffic_core::types::AccountStatus::*;
                    let mut all = Vec::new();
                    for status in [New, Warming, Active, Paused, Banned, Backup] {
                        all.extend(accounts.list_by_status(status, None)?);
                    }
                    all
                }
            };
            for account in &rows {
                println!(
                    "{}\t{}\t{}\tphase={} day={}\t{}",
                    account.account_id, account.status, account.segment, account.phase, account.day_in_phase,
                    account.persona.display_name
                );
            }
            println!("{} account(s)", rows.len());
            Ok(())
        }
    }
}

/// Wires every subsystem and runs until `ctrl_c`. This is the writer process
/// for the database; `traffic-gateway` observes the same file read-only.
async fn run_fleet(config: EngineConfig) -> anyhow::Result<()> {
    if config.telegram.api_id == 0 || config.telegram.api_hash.is_empty() {
        error!("telegram.api_id / telegram.api_hash are not configured — refusing to start");
        anyhow::bail!("missing Telegram API credentials");
    }

    let db_path = config.database.path.clone();
    let transport: Arc<dyn TelegramClient> = Arc::new(GrammersTelegramClient::new(ApiCredentials {
        api_id: config.telegram.api_id,
        api_hash: config.telegram.api_hash.clone(),
    }));
    let generator: Arc<dyn traffic_dispatcher::text::TextGenerator> = Arc::new(NullTextGenerator);
    let clock: Arc<dyn traffic_ledger::Clock> = Arc::new(SystemClock);
    let default_tz = Tz::from_str(&config.fleet.default_timezone).unwrap_or_else(|_| {
        warn!(
            "unrecognized fleet.default_timezone '{}', falling back to Europe/Moscow",
            config.fleet.default_timezone
        );
        Tz::Europe__Moscow
    });

    let accounts = Arc::new(AccountStore::new(open_conn(&db_path)?)?);
    let proxies = Arc::new(ProxyPool::new(
        open_conn(&db_path)?,
        config.proxy.cooldown_base_seconds,
        config.proxy.cooldown_max_seconds,
    )?);
    let ledger = Arc::new(RateLedger::new(open_conn(&db_path)?, Arc::clone(&clock))?);
    let warmup = Arc::new(WarmupPlanner::new(open_conn(&db_path)?, Arc::clone(&accounts), Arc::clone(&clock))?);
    let sessions = Arc::new(SessionRegistry::with_flood_wait_ceiling(
        open_conn(&db_path)?,
        Arc::clone(&transport),
        config.telegram.flood_wait_ceiling_seconds,
    ));

    let reader_account = AccountId::from(config.channel_monitor.reader_account_id.as_str());
    let channels = Arc::new(ChannelMonitor::new(
        open_conn(&db_path)?,
        Arc::clone(&transport),
        reader_account,
        config.channel_monitor.poll_interval_seconds,
        config.channel_monitor.claim_horizon_seconds,
    )?);
    let content = Arc::new(ContentQueue::new(open_conn(&db_path)?)?);
    let targets = Arc::new(TargetSource::new(open_conn(&db_path)?, Arc::clone(&channels), Arc::clone(&content))?);
    let records = Arc::new(ActionRecordStore::new(open_conn(&db_path)?)?);
    match records.reconcile_unfinished() {
        Ok(n) if n > 0 => info!(count = n, "reconciled action records left unfinished by a prior run"),
        Ok(_) => {}
        Err(e) => warn!("failed to reconcile unfinished action records: {e}"),
    }
    let pending = Arc::new(OutcomePendingStore::new(open_conn(&db_path)?)?);
    let oracle = Arc::new(StrategyOracle::new(
        open_conn(&db_path)?,
        config.strategy.epsilon,
        config.strategy.cold_start_threshold,
    )?);

    let invites = Arc::new(InviteLinkStore::new(open_conn(&db_path)?)?);
    let publisher_account = AccountId::from(config.invite.publisher_account_id.as_str());
    let publisher = InvitePublisher::new(
        Arc::clone(&invites),
        Arc::clone(&sessions),
        Arc::clone(&generator),
        publisher_account.clone(),
        config.invite.vip_channel_id.clone(),
        config.invite.public_channels.clone(),
        config.invite.default_expire_hours,
        config.invite.default_usage_limit,
        config.invite.publish_interval_seconds,
    );
    let sweeper = InviteSweeper::new(Arc::clone(&invites), Arc::clone(&sessions), config.invite.sweep_interval_seconds);
    let attributor = JoinAttributor::new(
        Arc::clone(&invites),
        Arc::clone(&sessions),
        publisher_account,
        config.invite.vip_channel_id.clone(),
        config.invite.join_poll_interval_seconds,
    );

    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&accounts),
        Arc::clone(&warmup),
        Arc::clone(&ledger),
        Arc::clone(&proxies),
        Arc::clone(&sessions),
        Arc::clone(&targets),
        Arc::clone(&records),
        Arc::clone(&pending),
        Arc::clone(&oracle),
        Arc::clone(&generator),
        default_tz,
        config.quiet_hours.start.clone(),
        config.quiet_hours.end.clone(),
        config.reply_poller.window_minutes,
        config.rate.hard_ceilings.clone(),
        config.supervisor.rescan_interval_seconds,
        config.fleet.max_accounts,
    ));
    let reply_poller = Arc::new(traffic_dispatcher::ReplyPoller::new(
        Arc::clone(&pending),
        Arc::clone(&records),
        Arc::clone(&sessions),
        Arc::clone(&oracle),
        config.reply_poller.window_minutes,
        config.reply_poller.tick_interval_seconds,
    ));
    let spam_checker = Arc::new(SpamChecker::new(
        Arc::clone(&accounts),
        Arc::clone(&sessions),
        config.supervisor.spam_check_interval_seconds,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (post_tx, mut post_rx) = mpsc::channel(256);

    let mut handles = Vec::new();
    handles.push(tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let rx = shutdown_rx.clone();
        async move { supervisor.run(rx).await }
    }));
    handles.push(tokio::spawn({
        let channels = Arc::clone(&channels);
        let rx = shutdown_rx.clone();
        async move { channels.run(post_tx, rx).await }
    }));
    // New-post events are already durably recorded by the monitor's own
    // claim table; this drain just keeps the bounded channel from filling
    // and gives an observable log line per fresh post.
    handles.push(tokio::spawn(async move {
        while let Some(post) = post_rx.recv().await {
            info!(channel = %post.channel, post_id = post.telegram_message_id, "new post observed");
        }
    }));
    handles.push(tokio::spawn({
        let poller = Arc::clone(&reply_poller);
        let rx = shutdown_rx.clone();
        async move { poller.run(rx).await }
    }));
    handles.push(tokio::spawn({
        let checker = Arc::clone(&spam_checker);
        let rx = shutdown_rx.clone();
        async move { checker.run(rx).await }
    }));
    handles.push(tokio::spawn({
        let ledger = Arc::clone(&ledger);
        let tz = default_tz;
        let interval = tokio::time::Duration::from_secs(config.supervisor.ledger_compact_interval_seconds);
        let mut rx = shutdown_rx.clone();
        async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                }
                if *rx.borrow() {
                    return;
                }
                match ledger.compact(tz) {
                    Ok(removed) if removed > 0 => info!(removed, "rate ledger compaction swept old counters"),
                    Ok(_) => {}
                    Err(e) => warn!("rate ledger compaction failed: {e}"),
                }
            }
        }
    }));
    handles.push(tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { publisher.run(rx).await }
    }));
    handles.push(tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { sweeper.run(rx).await }
    }));
    handles.push(tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { attributor.run(rx).await }
    }));

    info!("traffic engine started");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining workers ({}s grace)", config.shutdown.grace_seconds);
    let _ = shutdown_tx.send(true);

    let grace = tokio::time::Duration::from_secs(config.shutdown.grace_seconds);
    let drain = futures_util::future::join_all(handles);
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("shutdown grace period elapsed with workers still draining");
    }

    info!("traffic engine stopped");
    Ok(())
}
