//! Exchange-open oracle.
//!
//! Interprets the broker's trading-schedule response to answer "is the
//! exchange open right now". An RPC failure or a day missing from the
//! response yields `Unknown`, which the closure policy then coerces.

use crate::config::ClosureMode;
use crate::domain::ports::BrokerService;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Open,
    Closed,
    Unknown,
}

/// What the scheduler may do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPermission {
    RunAndTrade,
    /// Run the engine for telemetry, place no orders.
    RunWithoutOrders,
    Skip,
}

/// Apply the configured closure behavior to the observed market state.
/// `Unknown` is treated as closed.
pub fn permission_for(state: MarketState, mode: ClosureMode) -> TickPermission {
    if state == MarketState::Open {
        return TickPermission::RunAndTrade;
    }
    match mode {
        ClosureMode::SkipIteration => TickPermission::Skip,
        ClosureMode::UpdateIterationResult => TickPermission::RunWithoutOrders,
        ClosureMode::ForceOrders => TickPermission::RunAndTrade,
    }
}

pub struct ExchangeGate {
    broker: Arc<dyn BrokerService>,
    exchange: String,
}

impl ExchangeGate {
    pub fn new(broker: Arc<dyn BrokerService>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }

    pub async fn state_at(&self, now: DateTime<Utc>) -> MarketState {
        let from = now - Duration::hours(12);
        let to = now + Duration::hours(24);
        let days = match self
            .broker
            .trading_schedule(&self.exchange, from, to)
            .await
        {
            Ok(days) => days,
            Err(err) => {
                warn!(exchange = self.exchange.as_str(), error = %err, "trading schedule unavailable");
                return MarketState::Unknown;
            }
        };

        let today = now.date_naive();
        let Some(day) = days.iter().find(|d| d.date == today) else {
            return MarketState::Unknown;
        };
        if !day.is_trading_day {
            return MarketState::Closed;
        }
        match (day.start_time, day.end_time) {
            (Some(start), Some(end)) if start <= now && now < end => MarketState::Open,
            (Some(_), Some(_)) => MarketState::Closed,
            // A trading day without session bounds cannot be judged.
            _ => MarketState::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::RpcError;
    use crate::domain::instrument::InstrumentCatalog;
    use crate::domain::money::Money;
    use crate::domain::ports::{BrokerAccount, OrderRequest, TradingDay};
    use crate::domain::position::Wallet;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct ScheduleBroker {
        days: Vec<TradingDay>,
        fail: bool,
    }

    #[async_trait]
    impl BrokerService for ScheduleBroker {
        async fn accounts(&self) -> Result<Vec<BrokerAccount>, RpcError> {
            Ok(vec![])
        }
        async fn instruments(&self) -> Result<InstrumentCatalog, RpcError> {
            Ok(InstrumentCatalog::default())
        }
        async fn portfolio(
            &self,
            _account_id: &str,
            _catalog: &InstrumentCatalog,
        ) -> Result<Wallet, RpcError> {
            Ok(Wallet::default())
        }
        async fn last_prices(
            &self,
            _figis: &[String],
        ) -> Result<HashMap<String, Money>, RpcError> {
            Ok(HashMap::new())
        }
        async fn post_order(&self, _order: &OrderRequest) -> Result<(), RpcError> {
            Ok(())
        }
        async fn trading_schedule(
            &self,
            _exchange: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<TradingDay>, RpcError> {
            if self.fail {
                return Err(RpcError::Unavailable {
                    reason: "down".into(),
                });
            }
            Ok(self.days.clone())
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    fn trading_day(start_h: u32, end_h: u32) -> TradingDay {
        TradingDay {
            date: noon().date_naive(),
            is_trading_day: true,
            start_time: Some(Utc.with_ymd_and_hms(2024, 6, 3, start_h, 0, 0).unwrap()),
            end_time: Some(Utc.with_ymd_and_hms(2024, 6, 3, end_h, 0, 0).unwrap()),
        }
    }

    async fn state_of(days: Vec<TradingDay>, fail: bool) -> MarketState {
        let gate = ExchangeGate::new(Arc::new(ScheduleBroker { days, fail }), "MOEX");
        gate.state_at(noon()).await
    }

    #[tokio::test]
    async fn test_open_within_session() {
        assert_eq!(state_of(vec![trading_day(7, 20)], false).await, MarketState::Open);
    }

    #[tokio::test]
    async fn test_closed_outside_session() {
        assert_eq!(
            state_of(vec![trading_day(13, 20)], false).await,
            MarketState::Closed
        );
    }

    #[tokio::test]
    async fn test_closed_on_non_trading_day() {
        let mut day = trading_day(7, 20);
        day.is_trading_day = false;
        assert_eq!(state_of(vec![day], false).await, MarketState::Closed);
    }

    #[tokio::test]
    async fn test_unknown_on_rpc_failure_or_missing_day() {
        assert_eq!(state_of(vec![], true).await, MarketState::Unknown);
        assert_eq!(state_of(vec![], false).await, MarketState::Unknown);
    }

    #[test]
    fn test_permission_matrix() {
        use ClosureMode::*;
        assert_eq!(
            permission_for(MarketState::Open, SkipIteration),
            TickPermission::RunAndTrade
        );
        assert_eq!(
            permission_for(MarketState::Closed, SkipIteration),
            TickPermission::Skip
        );
        assert_eq!(
            permission_for(MarketState::Closed, UpdateIterationResult),
            TickPermission::RunWithoutOrders
        );
        assert_eq!(
            permission_for(MarketState::Closed, ForceOrders),
            TickPermission::RunAndTrade
        );
        assert_eq!(
            permission_for(MarketState::Unknown, SkipIteration),
            TickPermission::Skip
        );
    }
}
