//! Scheduler behavior against the exchange gate, driven by the mock
//! broker.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tinvest_balancer::application::exchange::TickPermission;
use tinvest_balancer::application::scheduler::AccountScheduler;
use tinvest_balancer::config::AccountConfig;
use tinvest_balancer::domain::money::Money;
use tinvest_balancer::domain::ports::{OrderDirection, TradingDay};
use tinvest_balancer::domain::position::{Position, Wallet};
use tinvest_balancer::infrastructure::mock::{MockBroker, MockFundStats};
use tokio::sync::watch;

fn account(closure_mode: &str) -> AccountConfig {
    let raw = format!(
        r#"{{
            "id": "gate-test",
            "t_invest_token": "t.token",
            "account_id": "ACC-1",
            "desired_wallet": {{"TRUR": 100}},
            "sleep_between_orders": 0,
            "exchange_closure_behavior": {{"mode": "{closure_mode}"}}
        }}"#
    );
    serde_json::from_str(&raw).unwrap()
}

fn wallet() -> Wallet {
    Wallet::new(vec![
        Position {
            base: "TRUR".to_string(),
            quote: "RUB".to_string(),
            figi: Some("FIGI-TRUR".to_string()),
            amount: 0.0,
            lot_size: 1,
            price: Some(Money::from_units(100)),
            ..Position::default()
        },
        Position {
            base: "RUB".to_string(),
            quote: "RUB".to_string(),
            amount: 10_000.0,
            lot_size: 1,
            ..Position::default()
        },
    ])
}

fn day(open: bool) -> TradingDay {
    let now = Utc::now();
    TradingDay {
        date: now.date_naive(),
        is_trading_day: open,
        start_time: Some(now - Duration::hours(1)),
        end_time: Some(now + Duration::hours(1)),
    }
}

fn scheduler(closure_mode: &str, broker: MockBroker) -> (AccountScheduler, Arc<MockBroker>) {
    let broker = Arc::new(broker);
    let (_tx, rx) = watch::channel(false);
    let scheduler = AccountScheduler::new(
        account(closure_mode),
        "ACC-1".to_string(),
        broker.clone(),
        Arc::new(MockFundStats::new()),
        None,
        rx,
    );
    (scheduler, broker)
}

#[tokio::test]
async fn skip_iteration_on_closed_day_places_nothing() {
    let (scheduler, broker) =
        scheduler("skip_iteration", MockBroker::new().with_wallet(wallet()).with_schedule(vec![day(false)]));
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.permission, TickPermission::Skip);
    assert_eq!(summary.orders_submitted, 0);
    assert!(summary.report.is_none());
    assert!(broker.submitted_orders().await.is_empty());
}

#[tokio::test]
async fn update_iteration_result_runs_engine_without_orders() {
    let (scheduler, broker) = scheduler(
        "update_iteration_result",
        MockBroker::new().with_wallet(wallet()).with_schedule(vec![day(false)]),
    );
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.permission, TickPermission::RunWithoutOrders);
    assert_eq!(summary.orders_submitted, 0);
    // The engine still produced a plan for telemetry.
    let report = summary.report.unwrap();
    assert_eq!(report.orders.len(), 1);
    assert!(broker.submitted_orders().await.is_empty());
}

#[tokio::test]
async fn force_orders_trades_through_a_closed_exchange() {
    let (scheduler, broker) = scheduler(
        "force_orders",
        MockBroker::new().with_wallet(wallet()).with_schedule(vec![day(false)]),
    );
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.permission, TickPermission::RunAndTrade);
    assert_eq!(summary.orders_submitted, 1);
    let orders = broker.submitted_orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].ticker, "TRUR");
    assert_eq!(orders[0].lots, 100);
    assert_eq!(orders[0].direction, OrderDirection::Buy);
}

#[tokio::test]
async fn open_exchange_trades_normally() {
    let (scheduler, broker) = scheduler(
        "skip_iteration",
        MockBroker::new().with_wallet(wallet()).with_schedule(vec![day(true)]),
    );
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.permission, TickPermission::RunAndTrade);
    assert_eq!(summary.orders_submitted, 1);
    assert_eq!(broker.submitted_orders().await.len(), 1);
}

#[tokio::test]
async fn schedule_failure_counts_as_closed() {
    let (scheduler, broker) = scheduler(
        "skip_iteration",
        MockBroker::new().with_wallet(wallet()).with_failing_schedule(),
    );
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.permission, TickPermission::Skip);
    assert!(broker.submitted_orders().await.is_empty());
}

#[tokio::test]
async fn orders_honor_the_sell_first_ordering() {
    // Over-held TMOS must be sold before the TRUR buy goes out.
    let mut wallet = wallet();
    wallet.positions.insert(
        0,
        Position {
            base: "TMOS".to_string(),
            quote: "RUB".to_string(),
            figi: Some("FIGI-TMOS".to_string()),
            amount: 50.0,
            lot_size: 1,
            price: Some(Money::from_units(100)),
            ..Position::default()
        },
    );
    let raw = r#"{
        "id": "ordering",
        "t_invest_token": "t.token",
        "account_id": "ACC-1",
        "desired_wallet": {"TRUR": 90, "TMOS": 10},
        "sleep_between_orders": 0
    }"#;
    let account: AccountConfig = serde_json::from_str(raw).unwrap();
    let broker = Arc::new(
        MockBroker::new()
            .with_wallet(wallet)
            .with_schedule(vec![day(true)]),
    );
    let (_tx, rx) = watch::channel(false);
    let scheduler = AccountScheduler::new(
        account,
        "ACC-1".to_string(),
        broker.clone(),
        Arc::new(MockFundStats::new()),
        None,
        rx,
    );
    scheduler.tick().await.unwrap();

    let orders = broker.submitted_orders().await;
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].ticker, "TMOS");
    assert_eq!(orders[0].direction, OrderDirection::Sell);
    assert_eq!(orders[1].ticker, "TRUR");
    assert_eq!(orders[1].direction, OrderDirection::Buy);
}
