//! Balancer daemon entry point.
//!
//! Loads `CONFIG.json`, resolves each configured account against the
//! broker, and runs one scheduler task per account until shutdown.
//!
//! # Usage
//! ```sh
//! tinvest-balancer --config CONFIG.json
//! tinvest-balancer --run-once   # one tick per account, then exit
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tinvest_balancer::application::scheduler::AccountScheduler;
use tinvest_balancer::config::AppConfig;
use tinvest_balancer::domain::ports::{BrokerService, FundStatsService};
use tinvest_balancer::infrastructure::feeds::FundStatsClient;
use tinvest_balancer::infrastructure::metrics_store::MetricsStore;
use tinvest_balancer::infrastructure::tinvest::TInvestClient;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

const DEFAULT_STATS_URL: &str = "https://t-capital-funds.ru/api/funds/stats";
const DEFAULT_FUND_PAGES_URL: &str = "https://t-capital-funds.ru/funds";
const METRICS_DIR: &str = "etf_metrics";

#[derive(Debug, Parser)]
#[command(name = "tinvest-balancer", about = "Automated portfolio rebalancer")]
struct Args {
    /// Path to the accounts configuration file.
    #[arg(long, default_value = "CONFIG.json")]
    config: PathBuf,

    /// Perform exactly one tick per account, then exit.
    #[arg(long)]
    run_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let args = Args::parse();
    info!(
        "tinvest-balancer {} starting (config: {})",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    // Configuration problems are fatal before any task starts.
    let config = AppConfig::from_file(&args.config)?;
    info!(accounts = config.accounts.len(), "configuration loaded");

    let stats_url =
        std::env::var("FUND_STATS_URL").unwrap_or_else(|_| DEFAULT_STATS_URL.to_string());
    let pages_url =
        std::env::var("FUND_PAGES_URL").unwrap_or_else(|_| DEFAULT_FUND_PAGES_URL.to_string());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::new();
    for account in config.accounts {
        let broker: Arc<dyn BrokerService> =
            Arc::new(TInvestClient::new(account.t_invest_token.clone()));
        let stats: Arc<dyn FundStatsService> =
            Arc::new(FundStatsClient::new(stats_url.clone(), pages_url.clone()));
        let metrics = Some(MetricsStore::new(METRICS_DIR));
        let shutdown = shutdown_rx.clone();
        let run_once = args.run_once;

        // Accounts are isolated: a broker hiccup while resolving one
        // account's id must not take down the schedulers of the others.
        handles.push(tokio::spawn(async move {
            let account_id = match AccountScheduler::resolve_account_id(
                broker.as_ref(),
                &account.account_id,
            )
            .await
            {
                Ok(id) => id,
                Err(err) => {
                    error!(
                        account = account.id.as_str(),
                        error = %err,
                        "cannot resolve brokerage account, scheduler not started"
                    );
                    return;
                }
            };
            AccountScheduler::new(account, account_id, broker, stats, metrics, shutdown)
                .run(run_once)
                .await;
        }));
    }

    if !args.run_once {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received, finishing in-flight work");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    futures::future::join_all(handles).await;
    info!("all account schedulers finished");
    Ok(())
}
