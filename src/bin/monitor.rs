use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use signal_watch::config::{AppConfig, CONFIG_PATH, Profile};
use signal_watch::extractor::Patterns;
use signal_watch::http::GatewayClient;
use signal_watch::ledger::DedupLedger;
use signal_watch::pool::AccountPool;
use signal_watch::publisher::{Publisher, RedisPublisher, StdoutPublisher};
use signal_watch::reporter;
use signal_watch::scheduler::{Scheduler, WatchPlan};
use signal_watch::session::SessionManager;
use signal_watch::store::{MemoryStore, SignalStore, SqliteStore};

#[derive(Parser)]
#[command(name = "monitor", about = "Watch accounts for contract addresses and keywords")]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Print signals to stdout instead of publishing, and keep no state on disk
    #[arg(long)]
    dry_run: bool,

    /// Override the timing profile from the config
    #[arg(long, value_enum)]
    profile: Option<Profile>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    config.apply_env();
    info!("Loaded config from {}", args.config.display());
    if let Some(profile) = args.profile {
        config.settings.profile = profile;
    }

    let settings = config.settings.resolve()?;
    let credentials = config.credentials()?;
    let targets = config.targets()?;
    let keywords = config.keywords()?;

    let patterns = match &settings.address_pattern {
        Some(pattern) => Patterns::with_address_pattern(pattern, &keywords)
            .with_context(|| format!("invalid address_pattern {pattern:?}"))?,
        None => Patterns::new(&keywords),
    };

    let mode = if args.dry_run { "dry-run" } else { "live" };
    info!(
        "Starting monitor ({mode}): profile={:?} credentials={} targets={} keywords={} poll={}-{}s",
        config.settings.profile,
        credentials.len(),
        targets.len(),
        keywords.len(),
        settings.poll_interval.min_secs,
        settings.poll_interval.max_secs,
    );

    let store: Arc<dyn SignalStore> = if args.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&config.store.path)?)
    };
    let ledger = Arc::new(DedupLedger::load(Arc::clone(&store))?);
    info!("Ledger holds {} previously seen signal(s)", ledger.len());
    info!("{} alert(s) archived so far", store.alert_count()?);

    let publisher: Box<dyn Publisher> = if args.dry_run {
        Box::new(StdoutPublisher)
    } else {
        Box::new(RedisPublisher::connect(&config.publisher.redis_url).await?)
    };

    let gateway = GatewayClient::new(
        &config.gateway.url,
        Duration::from_secs(config.gateway.request_timeout_secs),
    )?;
    let pool = AccountPool::new(credentials, settings.cooldown)?;
    let sessions = SessionManager::new(gateway.clone(), settings.reconnect_delay);

    let plan = WatchPlan {
        targets,
        patterns,
        topic: config.publisher.topic.clone(),
    };
    let scheduler = Scheduler::new(pool, sessions, gateway, publisher, ledger, store, plan, settings)?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, shutting down");
                signal.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {e}"),
        }
    });

    let summary = scheduler.run(cancel).await;
    info!(
        "Stopped after {} cycle(s): {} published, {} suppressed, {} publish failure(s)",
        summary.cycles, summary.signals_published, summary.signals_suppressed, summary.publish_failures
    );
    reporter::report_exit_summary(&summary);

    Ok(())
}
