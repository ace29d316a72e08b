use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, NotificationSink, Settings, SignalEvent};
use engine::{BinanceMarketData, Scheduler, SignalJournal};
use telegram_notify::{run_notifier, start_bot, BotDeps, TelegramSink};
use watchlist::WatchlistStateMachine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let settings = if Path::new(&cfg.signal_config_path).exists() {
        Settings::load(&cfg.signal_config_path)
            .with_context(|| format!("invalid signal config '{}'", cfg.signal_config_path))?
    } else {
        warn!(path = %cfg.signal_config_path, "Signal config not found, using defaults");
        Settings::default()
    };
    info!(
        symbols = settings.symbols.len(),
        interval = %settings.interval,
        utc_offset_hours = settings.utc_offset_hours,
        "SignalBot starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let journal = SignalJournal::connect(&cfg.database_url)
        .await
        .context("failed to open signal journal")?;
    let last_id = journal.last_id().await.context("failed to read last signal id")?;
    info!(last_id, "Database ready");

    // ── Watchlist ─────────────────────────────────────────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<SignalEvent>(256);
    let watchlist = Arc::new(Mutex::new(
        WatchlistStateMachine::new(settings.cooldown(), event_tx).with_first_id(last_id + 1),
    ));

    // ── Market data ───────────────────────────────────────────────────────────
    let fetch_timeout = Duration::from_secs(cfg.fetch_timeout_secs);
    let market = Arc::new(
        BinanceMarketData::new(&cfg.binance_base_url, fetch_timeout)
            .context("failed to build market data client")?,
    );

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let scheduler = Scheduler::new(settings, market, watchlist.clone(), fetch_timeout)?
        .with_journal(journal.clone());

    // ── Telegram ──────────────────────────────────────────────────────────────
    let bot = teloxide::Bot::new(&cfg.telegram_token);
    let sink: Arc<dyn NotificationSink> =
        Arc::new(TelegramSink::new(bot.clone(), &cfg.telegram_chat_ids));
    let bot_deps = BotDeps {
        watchlist: watchlist.clone(),
        chat_ids: Arc::new(cfg.telegram_chat_ids.clone()),
    };

    // ── Status API ────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        journal,
        watchlist,
        dashboard_token: cfg.dashboard_token.clone(),
        started_at: Instant::now(),
    };

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let port = cfg.dashboard_port;
    tokio::spawn(scheduler.run());
    tokio::spawn(run_notifier(event_rx, sink));
    tokio::spawn(start_bot(bot, bot_deps));
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Status API stopped");
        }
    });

    // Keep main alive
    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting.");
    Ok(())
}
