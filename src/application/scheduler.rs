//! Per-account balancing loop.
//!
//! One long-lived task per configured account: gate on the exchange,
//! snapshot positions/prices/instruments, run the engine, submit the
//! resulting orders one by one, sleep, repeat. Accounts are fully
//! isolated; a failed tick is logged and retried at the next interval.

use crate::application::desired;
use crate::application::engine::{self, BalanceReport};
use crate::application::valuation;
use crate::application::exchange::{ExchangeGate, TickPermission, permission_for};
use crate::config::{AccountConfig, AccountSelector};
use crate::domain::errors::RpcError;
use crate::domain::market_data::MarketSnapshot;
use crate::domain::ports::{BrokerService, FundStatsService, OrderDirection, OrderRequest};
use crate::domain::ticker;
use crate::infrastructure::metrics_store::{MetricsStore, build_metrics};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What one tick did, for logging and tests.
#[derive(Debug)]
pub struct TickSummary {
    pub permission: TickPermission,
    pub orders_submitted: usize,
    pub report: Option<BalanceReport>,
}

pub struct AccountScheduler {
    account: AccountConfig,
    account_id: String,
    broker: Arc<dyn BrokerService>,
    stats: Arc<dyn FundStatsService>,
    gate: ExchangeGate,
    metrics: Option<MetricsStore>,
    shutdown: watch::Receiver<bool>,
}

impl AccountScheduler {
    pub fn new(
        account: AccountConfig,
        account_id: String,
        broker: Arc<dyn BrokerService>,
        stats: Arc<dyn FundStatsService>,
        metrics: Option<MetricsStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let gate = ExchangeGate::new(broker.clone(), account.exchange.clone());
        Self {
            account,
            account_id,
            broker,
            stats,
            gate,
            metrics,
            shutdown,
        }
    }

    /// Map the configured selector onto a concrete brokerage account id.
    pub async fn resolve_account_id(
        broker: &dyn BrokerService,
        selector: &AccountSelector,
    ) -> Result<String, RpcError> {
        match selector {
            AccountSelector::Literal(id) => Ok(id.clone()),
            AccountSelector::Index(n) => {
                let accounts = broker.accounts().await?;
                accounts
                    .get(*n)
                    .map(|a| a.id.clone())
                    .ok_or(RpcError::AccountNotFound {
                        selector: format!("INDEX:{n}"),
                    })
            }
        }
    }

    pub async fn run(mut self, run_once: bool) {
        info!(
            account = self.account.id.as_str(),
            account_id = self.account_id.as_str(),
            interval_ms = self.account.balance_interval,
            "account scheduler started"
        );
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.tick().await {
                Ok(summary) => {
                    info!(
                        account = self.account.id.as_str(),
                        permission = ?summary.permission,
                        orders = summary.orders_submitted,
                        "tick complete"
                    );
                }
                Err(err) => {
                    error!(
                        account = self.account.id.as_str(),
                        error = %err,
                        "tick failed, retrying at the next interval"
                    );
                }
            }
            if run_once {
                break;
            }

            let interval = Duration::from_millis(self.account.balance_interval);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = self.shutdown.changed() => {
                    // A dropped sender counts as shutdown too.
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(account = self.account.id.as_str(), "account scheduler stopped");
    }

    /// One full iteration: gate, snapshot, decide, submit.
    pub async fn tick(&self) -> Result<TickSummary> {
        let now = Utc::now();
        let state = self.gate.state_at(now).await;
        let permission = permission_for(state, self.account.exchange_closure_behavior.mode);
        if permission == TickPermission::Skip {
            info!(
                account = self.account.id.as_str(),
                state = ?state,
                "exchange closed, skipping iteration"
            );
            return Ok(TickSummary {
                permission,
                orders_submitted: 0,
                report: None,
            });
        }

        let catalog = self
            .broker
            .instruments()
            .await
            .context("instrument catalog fetch failed")?;
        let mut wallet = self
            .broker
            .portfolio(&self.account_id, &catalog)
            .await
            .context("portfolio fetch failed")?;

        let desired_tickers: Vec<String> = self
            .account
            .desired_wallet
            .keys()
            .filter_map(|raw| ticker::normalize(raw))
            .collect();

        let last_prices = self.fetch_last_prices(&desired_tickers, &catalog).await;

        let snapshot = if self.account.desired_mode.needs_market_data() {
            self.stats.snapshot(&desired_tickers, &last_prices).await
        } else {
            MarketSnapshot::new()
        };

        let desired = desired::resolve_desired(
            self.account.desired_mode,
            &self.account.desired_wallet,
            &snapshot,
        );
        let report = engine::balance(
            &mut wallet,
            &desired,
            &self.account,
            &catalog,
            &last_prices,
        );
        info!(
            account = self.account.id.as_str(),
            total = report.total_portfolio_value,
            planned = report.orders.len(),
            skipped = report.skipped.len(),
            underfunded = report.underfunded,
            "balancing pass finished"
        );
        let mut shares: Vec<(String, f64)> =
            valuation::security_shares(&wallet).into_iter().collect();
        shares.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (ticker, share) in shares {
            info!(
                account = self.account.id.as_str(),
                ticker = ticker.as_str(),
                share = %format_args!("{share:.2}"),
                "securities allocation"
            );
        }

        let orders_submitted = if permission == TickPermission::RunAndTrade {
            self.submit_orders(&report).await
        } else {
            info!(
                account = self.account.id.as_str(),
                "exchange closed, recording results without placing orders"
            );
            0
        };

        self.write_metrics(&desired_tickers, &snapshot, &last_prices, &catalog);

        Ok(TickSummary {
            permission,
            orders_submitted,
            report: Some(report),
        })
    }

    /// Desired tickers -> last trade price. Failures degrade to an empty
    /// map so the tick can still run on portfolio prices.
    async fn fetch_last_prices(
        &self,
        desired_tickers: &[String],
        catalog: &crate::domain::instrument::InstrumentCatalog,
    ) -> HashMap<String, f64> {
        let figis: Vec<String> = desired_tickers
            .iter()
            .filter_map(|t| catalog.find_by_ticker(t).map(|i| i.figi.clone()))
            .collect();
        if figis.is_empty() {
            return HashMap::new();
        }
        let by_figi = match self.broker.last_prices(&figis).await {
            Ok(prices) => prices,
            Err(err) => {
                warn!(
                    account = self.account.id.as_str(),
                    error = %err,
                    "last prices unavailable, continuing on portfolio data"
                );
                return HashMap::new();
            }
        };
        let mut by_ticker = HashMap::new();
        for (figi, price) in by_figi {
            if let Some(instrument) = catalog.find_by_figi(&figi) {
                if let Some(canonical) = ticker::normalize(&instrument.ticker) {
                    by_ticker.insert(canonical, price.to_f64());
                }
            }
        }
        by_ticker
    }

    async fn submit_orders(&self, report: &BalanceReport) -> usize {
        let mut submitted = 0;
        for (i, planned) in report.orders.iter().enumerate() {
            let Some(figi) = planned.figi.clone() else {
                warn!(ticker = planned.ticker.as_str(), "no figi, order dropped");
                continue;
            };
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.account.sleep_between_orders)).await;
            }
            let request = OrderRequest {
                account_id: self.account_id.clone(),
                figi,
                ticker: planned.ticker.clone(),
                lots: planned.lots.unsigned_abs() as u32,
                direction: if planned.lots > 0 {
                    OrderDirection::Buy
                } else {
                    OrderDirection::Sell
                },
                order_id: Uuid::new_v4(),
            };
            match self.broker.post_order(&request).await {
                Ok(()) => {
                    submitted += 1;
                    info!(
                        account = self.account.id.as_str(),
                        ticker = request.ticker.as_str(),
                        lots = planned.lots,
                        value = planned.value,
                        "order placed"
                    );
                }
                Err(err) => {
                    error!(
                        account = self.account.id.as_str(),
                        ticker = request.ticker.as_str(),
                        error = %err,
                        "order rejected"
                    );
                }
            }
        }
        submitted
    }

    fn write_metrics(
        &self,
        desired_tickers: &[String],
        snapshot: &MarketSnapshot,
        last_prices: &HashMap<String, f64>,
        catalog: &crate::domain::instrument::InstrumentCatalog,
    ) {
        let Some(store) = &self.metrics else {
            return;
        };
        let now = Utc::now();
        for ticker in desired_tickers {
            let metrics = build_metrics(
                ticker,
                catalog.find_by_ticker(ticker),
                snapshot,
                last_prices.get(ticker).copied(),
                now,
            );
            if let Err(err) = store.write(&metrics) {
                // Telemetry only; trading goes on.
                warn!(ticker = ticker.as_str(), error = %err, "metrics write failed");
            }
        }
    }
}
