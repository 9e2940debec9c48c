//! `daily-stock`: analyze a watchlist once and report the results

mod setup;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stock_data::{DataConfig, DataSourceManager};
use stock_engine::{DeliveryMode, LlmAnalyzer, RunConfig, Scheduler, TracingSink};
use stock_utils::{LogFormat, env_list, init_tracing_with};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::setup::{AiSettings, load_watchlist, news_service};

#[derive(Parser, Debug)]
#[command(name = "daily-stock")]
#[command(about = "Daily AI analysis of a stock watchlist", long_about = None)]
struct Args {
    /// Comma-separated stock codes (overrides STOCK_LIST)
    #[arg(short, long, value_delimiter = ',')]
    stocks: Vec<String>,

    /// Delivery mode: batch or stream (overrides DELIVERY_MODE)
    #[arg(short, long)]
    mode: Option<DeliveryMode>,

    /// Concurrent workers (overrides MAX_WORKERS)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    summary_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing_with(if args.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    });

    let entries = if args.stocks.is_empty() {
        env_list("STOCK_LIST")
    } else {
        args.stocks.clone()
    };
    let watchlist = load_watchlist(&entries)?;

    let mut run_config = RunConfig::from_env().context("Invalid run configuration")?;
    if let Some(mode) = args.mode {
        run_config.delivery = mode;
    }
    if let Some(workers) = args.workers {
        run_config.concurrency = workers;
    }

    let data_config = DataConfig::from_env().context("Invalid data configuration")?;
    info!(config = ?data_config, "Data sources configured");
    let data = Arc::new(
        DataSourceManager::from_config(&data_config).context("Failed to set up data sources")?,
    );

    let ai = AiSettings::from_env()?;
    info!(settings = ?ai, "Model access configured");
    let endpoints = ai.endpoints()?;

    let mut scheduler = Scheduler::new(data, Arc::new(LlmAnalyzer::new()), endpoints, run_config)
        .context("Failed to create scheduler")?;
    if let Some(news) = news_service()? {
        scheduler = scheduler.with_news(news);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight tasks");
            on_interrupt.cancel();
        }
    });

    let summary = scheduler.run_watchlist(&watchlist, &TracingSink, &cancel).await;

    if args.summary_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Analyzed {} stocks: {} succeeded, {} failed{} ({:.1}s)",
            summary.total,
            summary.succeeded,
            summary.failed(),
            if summary.cancelled { ", run cancelled" } else { "" },
            summary.elapsed.as_secs_f64()
        );
        for (symbol, reason) in &summary.failures {
            println!("  {symbol}: {reason}");
        }
        for entry in &summary.rejected {
            println!("  {entry}: not a stock code");
        }
    }

    Ok(())
}
