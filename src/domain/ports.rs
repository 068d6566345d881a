use crate::domain::errors::RpcError;
use crate::domain::instrument::InstrumentCatalog;
use crate::domain::market_data::MarketSnapshot;
use crate::domain::money::Money;
use crate::domain::position::Wallet;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Buy,
    Sell,
}

/// Market order for a whole number of lots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: String,
    pub figi: String,
    pub ticker: String,
    pub lots: u32,
    pub direction: OrderDirection,
    /// Idempotency key forwarded to the broker.
    pub order_id: Uuid,
}

/// One day of an exchange trading schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingDay {
    pub date: NaiveDate,
    pub is_trading_day: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Brokerage RPC surface the balancer consumes. Implementations must
/// bound every call with a deadline; transient failures are retried
/// internally within a small backoff budget before being surfaced.
#[async_trait]
pub trait BrokerService: Send + Sync {
    async fn accounts(&self) -> Result<Vec<BrokerAccount>, RpcError>;

    /// Full instrument universe, snapshotted per tick.
    async fn instruments(&self) -> Result<InstrumentCatalog, RpcError>;

    /// Current positions (securities plus the cash position) for one
    /// account. The catalog supplies tickers and lot sizes for the
    /// FIGI-keyed RPC payload.
    async fn portfolio(
        &self,
        account_id: &str,
        catalog: &InstrumentCatalog,
    ) -> Result<Wallet, RpcError>;

    /// Last trade price per FIGI.
    async fn last_prices(&self, figis: &[String]) -> Result<HashMap<String, Money>, RpcError>;

    async fn post_order(&self, order: &OrderRequest) -> Result<(), RpcError>;

    async fn trading_schedule(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDay>, RpcError>;
}

/// Source of AUM / market-cap / shares-outstanding inputs for the
/// dynamic desired modes. Best effort by contract: malformed or missing
/// upstream data produces gaps in the snapshot, never an error, so a
/// feed outage degrades the affected modes instead of halting the tick.
#[async_trait]
pub trait FundStatsService: Send + Sync {
    async fn snapshot(
        &self,
        tickers: &[String],
        last_prices: &HashMap<String, f64>,
    ) -> MarketSnapshot;
}
