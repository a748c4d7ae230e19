mod backtest;
mod calibration;
mod config;
mod engine;
mod errors;
mod fetch;
mod ledger;
mod metar;
mod metrics;
mod polymarket;
mod prob;
mod registry;
mod resolve;
mod services;
mod sizing;
mod snapshot;
mod strategy;
mod timeutil;
mod toggles;
mod types;
mod units;
mod zeus;

use crate::engine::DynamicEngine;
use crate::services::Services;
use chrono::NaiveDate;
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Structured logging to stderr; RUST_LOG overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("tempest engine starting");

    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let services = match Services::init(cfg) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("startup error: {e}");
            std::process::exit(1);
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("dynamic");

    let result = match mode {
        "dynamic" => run_dynamic(&services).await,
        "backtest" => run_backtest(&services, &args[1..]).await,
        "resolve" => run_resolve(&services, &args[1..]).await,
        other => {
            eprintln!("unknown mode '{other}' (expected: dynamic | backtest <START> <END> | resolve <DATE>)");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        tracing::error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run_dynamic(services: &Services) -> errors::EngineResult<()> {
    let shutdown = Arc::new(AtomicBool::new(false));

    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current evaluation");
            flag.store(true, Ordering::SeqCst);
        }
    });

    DynamicEngine::new(services, shutdown)?.run().await
}

async fn run_backtest(services: &Services, args: &[String]) -> errors::EngineResult<()> {
    let (Some(start), Some(end)) = (args.first(), args.get(1)) else {
        return Err(errors::EngineError::Config(
            "backtest requires <START> <END> dates (YYYY-MM-DD)".into(),
        ));
    };
    let start = parse_date(start)?;
    let end = parse_date(end)?;

    let stations = services.config.active_stations.clone();
    let path = backtest::Backtester::new(services)
        .run(start, end, &stations)
        .await?;
    println!("{}", path.display());
    Ok(())
}

async fn run_resolve(services: &Services, args: &[String]) -> errors::EngineResult<()> {
    let Some(date) = args.first() else {
        return Err(errors::EngineError::Config(
            "resolve requires a <DATE> (YYYY-MM-DD)".into(),
        ));
    };
    let day = parse_date(date)?;

    let ledger = ledger::PaperLedger::new(&services.trades_dir());
    let engine = resolve::ResolutionEngine {
        discovery: &services.fetcher.discovery,
        registry: &services.registry,
        ledger: &ledger,
    };
    engine.resolve_day(day).await?;

    let rows = ledger.read_all()?;
    let report = metrics::report(
        &rows,
        &metrics::MetricsQuery::default(),
        chrono::Utc::now().date_naive(),
    );
    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
    Ok(())
}

fn parse_date(s: &str) -> errors::EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| errors::EngineError::Config(format!("invalid date '{s}': {e}")))
}
