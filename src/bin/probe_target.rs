//! Probe: one authenticated fetch against the gateway
//!
//! Logs in with a single configured credential, reads one target's recent
//! posts and prints each item with the signals it would produce. Nothing is
//! published and no state is written.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use signal_watch::config::{AppConfig, CONFIG_PATH};
use signal_watch::extractor::{Patterns, extract};
use signal_watch::http::GatewayClient;
use signal_watch::session::{PageFetcher, SessionProvider};

#[derive(Parser)]
#[command(name = "probe_target", about = "Fetch one target once and show extracted signals")]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Account to read (leading @ optional)
    #[arg(long)]
    target: String,

    /// Index of the configured credential to log in with
    #[arg(long, default_value_t = 0)]
    account: usize,

    /// Number of items to request; defaults to the configured batch size
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    config.apply_env();
    let settings = config.settings.resolve()?;
    let keywords = config.keywords()?;
    let credentials = config.credentials()?;
    let credential = credentials
        .get(args.account)
        .with_context(|| format!("no credential at index {} ({} configured)", args.account, credentials.len()))?;
    let patterns = match &settings.address_pattern {
        Some(pattern) => Patterns::with_address_pattern(pattern, &keywords)?,
        None => Patterns::new(&keywords),
    };
    let target = args.target.trim_start_matches('@');
    let limit = args.limit.unwrap_or(settings.batch_size);

    let gateway = GatewayClient::new(
        &config.gateway.url,
        Duration::from_secs(config.gateway.request_timeout_secs),
    )?;

    println!("=== Probe: {target} via {} ===", credential.handle);
    println!("Gateway: {}", config.gateway.url);
    println!();

    let start = Instant::now();
    let session = gateway.authenticate(credential).await?;
    println!("Authenticated in {:?} (session {})", start.elapsed(), session.id);

    let start = Instant::now();
    let fetched = gateway.fetch_recent(&session, target, limit).await;
    let latency = start.elapsed();

    // Close before surfacing any fetch error so the gateway does not leak the browser.
    if let Err(e) = gateway.close(session).await {
        eprintln!("Failed to close session: {e}");
    }
    let items = fetched?;

    println!("Fetched {} item(s) in {latency:?}", items.len());
    println!();
    for item in &items {
        println!("--- {} ---", item.id);
        println!("{}", serde_json::to_string_pretty(item)?);
        let signals = extract(item, &patterns);
        if signals.is_empty() {
            println!("Signals: none");
        }
        for signal in &signals {
            println!("Signal: [{}] {} (key {})", signal.kind, signal.value, signal.ledger_key());
        }
        println!();
    }

    Ok(())
}
