//! In-memory broker and feed doubles for tests and mock mode.

use crate::domain::errors::RpcError;
use crate::domain::instrument::InstrumentCatalog;
use crate::domain::market_data::MarketSnapshot;
use crate::domain::money::Money;
use crate::domain::ports::{
    BrokerAccount, BrokerService, FundStatsService, OrderRequest, TradingDay,
};
use crate::domain::position::Wallet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Scripted broker: hand it the wallet, catalog, prices and schedule a
/// test needs, then inspect the orders it received.
#[derive(Clone, Default)]
pub struct MockBroker {
    accounts: Vec<BrokerAccount>,
    wallet: Wallet,
    catalog: InstrumentCatalog,
    last_prices: HashMap<String, Money>,
    schedule: Vec<TradingDay>,
    fail_schedule: bool,
    orders: Arc<RwLock<Vec<OrderRequest>>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, id: &str, name: &str) -> Self {
        self.accounts.push(BrokerAccount {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = wallet;
        self
    }

    pub fn with_catalog(mut self, catalog: InstrumentCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_last_price(mut self, figi: &str, price: Money) -> Self {
        self.last_prices.insert(figi.to_string(), price);
        self
    }

    pub fn with_schedule(mut self, days: Vec<TradingDay>) -> Self {
        self.schedule = days;
        self
    }

    pub fn with_failing_schedule(mut self) -> Self {
        self.fail_schedule = true;
        self
    }

    pub async fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.orders.read().await.clone()
    }
}

#[async_trait]
impl BrokerService for MockBroker {
    async fn accounts(&self) -> Result<Vec<BrokerAccount>, RpcError> {
        Ok(self.accounts.clone())
    }

    async fn instruments(&self) -> Result<InstrumentCatalog, RpcError> {
        Ok(self.catalog.clone())
    }

    async fn portfolio(
        &self,
        _account_id: &str,
        _catalog: &InstrumentCatalog,
    ) -> Result<Wallet, RpcError> {
        Ok(self.wallet.clone())
    }

    async fn last_prices(&self, figis: &[String]) -> Result<HashMap<String, Money>, RpcError> {
        Ok(figis
            .iter()
            .filter_map(|f| self.last_prices.get(f).map(|m| (f.clone(), *m)))
            .collect())
    }

    async fn post_order(&self, order: &OrderRequest) -> Result<(), RpcError> {
        self.orders.write().await.push(order.clone());
        Ok(())
    }

    async fn trading_schedule(
        &self,
        _exchange: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<TradingDay>, RpcError> {
        if self.fail_schedule {
            return Err(RpcError::Unavailable {
                reason: "mock schedule failure".into(),
            });
        }
        Ok(self.schedule.clone())
    }
}

/// Feed double returning a pre-built snapshot.
#[derive(Clone, Default)]
pub struct MockFundStats {
    snapshot: MarketSnapshot,
}

impl MockFundStats {
    pub fn new() -> Self {
        Self {
            snapshot: MarketSnapshot::new(),
        }
    }

    pub fn with_snapshot(mut self, snapshot: MarketSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }
}

#[async_trait]
impl FundStatsService for MockFundStats {
    async fn snapshot(
        &self,
        _tickers: &[String],
        _last_prices: &HashMap<String, f64>,
    ) -> MarketSnapshot {
        self.snapshot.clone()
    }
}
