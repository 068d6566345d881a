//! Cross-cutting invariants of the balancing engine.

use std::collections::HashMap;
use tinvest_balancer::application::desired::normalize_desired;
use tinvest_balancer::application::engine::balance;
use tinvest_balancer::config::AccountConfig;
use tinvest_balancer::domain::instrument::InstrumentCatalog;
use tinvest_balancer::domain::money::Money;
use tinvest_balancer::domain::position::{DesiredWallet, Position, Wallet};

fn account(extra: &str) -> AccountConfig {
    let raw = format!(
        r#"{{
            "id": "props",
            "t_invest_token": "t.token",
            "account_id": 0,
            "desired_wallet": {{"TRUR": 100}}
            {extra}
        }}"#
    );
    serde_json::from_str(&raw).unwrap()
}

fn security(ticker: &str, amount: f64, lot: u32, price: f64, basis: Option<f64>) -> Position {
    Position {
        base: ticker.to_string(),
        quote: "RUB".to_string(),
        figi: Some(format!("FIGI-{ticker}")),
        amount,
        lot_size: lot,
        price: Money::from_decimal(rust_decimal::Decimal::try_from(price).unwrap()),
        average_position_price_fifo: basis
            .and_then(|b| Money::from_decimal(rust_decimal::Decimal::try_from(b).unwrap())),
        ..Position::default()
    }
}

fn cash(amount: f64) -> Position {
    Position {
        base: "RUB".to_string(),
        quote: "RUB".to_string(),
        amount,
        lot_size: 1,
        ..Position::default()
    }
}

fn desired(entries: &[(&str, f64)]) -> DesiredWallet {
    entries.iter().map(|(t, v)| (t.to_string(), *v)).collect()
}

fn plain_account() -> AccountConfig {
    account("")
}

/// Normalization always lands on 100 and ignores the input scale.
#[test]
fn normalization_sums_to_hundred_at_any_scale() {
    for scale in [1e-15, 1e-6, 1.0, 1e6, 1e15] {
        let normalized = normalize_desired(&desired(&[
            ("A", 1.0 * scale),
            ("B", 2.0 * scale),
            ("C", 5.0 * scale),
        ]));
        let sum: f64 = normalized.values().sum();
        assert!((sum - 100.0).abs() < 0.01, "scale {scale}: sum {sum}");
        assert!((normalized["A"] - 12.5).abs() < 0.01);
        assert!((normalized["C"] - 62.5).abs() < 0.01);
    }
}

/// Raising the held value of a ticker never raises its buy.
#[test]
fn plan_is_monotone_in_held_value() {
    let lots_for = |amount: f64| {
        let mut wallet = Wallet::new(vec![
            security("TRUR", amount, 1, 100.0, None),
            security("TMOS", 10.0, 1, 100.0, None),
            cash(50_000.0),
        ]);
        balance(
            &mut wallet,
            &desired(&[("TRUR", 60.0), ("TMOS", 40.0)]),
            &plain_account(),
            &InstrumentCatalog::default(),
            &HashMap::new(),
        );
        wallet.find("TRUR").unwrap().to_buy_lots.unwrap()
    };

    let mut previous = i64::MAX;
    for amount in [0.0, 5.0, 50.0, 200.0, 600.0] {
        let lots = lots_for(amount);
        assert!(lots <= previous, "amount {amount}: {lots} > {previous}");
        previous = lots;
    }
}

/// Every plan entry trades whole lots whose value is exactly
/// lots x lot price, never overshoots its target, and never sells more
/// than it holds.
#[test]
fn lot_integrality_no_overshoot_and_sell_bound() {
    let mut wallet = Wallet::new(vec![
        security("TRUR", 37.0, 3, 17.5, None),
        security("TMOS", 120.0, 10, 6.4, None),
        security("TGLD", 5.0, 1, 1_234.0, None),
        cash(40_000.0),
    ]);
    // TGLD is over-held at 10% so the plan includes a sell.
    let report = balance(
        &mut wallet,
        &desired(&[("TRUR", 20.0), ("TMOS", 70.0), ("TGLD", 10.0)]),
        &plain_account(),
        &InstrumentCatalog::default(),
        &HashMap::new(),
    );
    assert!(report.orders.iter().any(|o| o.lots < 0));

    for order in &report.orders {
        let position = wallet.find(&order.ticker).unwrap();
        let lot_price = position.lot_price_number.unwrap();
        let lots = position.to_buy_lots.unwrap();

        // Integrality.
        assert_eq!(position.to_buy_number.unwrap(), lots as f64 * lot_price);

        // No overshoot for buys.
        if lots > 0 {
            let final_value = (position.current_lots() + lots) as f64 * lot_price;
            assert!(final_value <= position.desired_amount_number.unwrap() + 1e-9);
        }

        // Sell bound: never sell more units than held.
        if lots < 0 {
            assert!((-lots) * position.lot_size as i64 <= position.amount as i64);
        }
    }
}

/// The threshold boundary itself is not suppressed (strict less-than).
#[test]
fn threshold_boundary_buy_survives() {
    let account = account(
        r#", "buy_requires_total_marginal_sell": {
              "enabled": false, "instruments": [], "mode": "none",
              "min_buy_rebalance_percent": 2}"#,
    );
    // Portfolio 10_000 -> threshold 200. A 200 RUB buy stays.
    let mut wallet = Wallet::new(vec![
        security("TGLD", 0.0, 1, 200.0, None),
        security("TMOS", 98.0, 1, 100.0, None),
        cash(200.0),
    ]);
    balance(
        &mut wallet,
        &desired(&[("TGLD", 2.0), ("TMOS", 98.0)]),
        &account,
        &InstrumentCatalog::default(),
        &HashMap::new(),
    );
    assert_eq!(wallet.find("TGLD").unwrap().to_buy_lots, Some(1));
    assert_eq!(wallet.find("TGLD").unwrap().to_buy_number, Some(200.0));
}

/// Running the whole pass twice from the same snapshot produces the
/// same plan (the funding subsystem included).
#[test]
fn balancing_is_deterministic_and_brs_idempotent() {
    let build_wallet = || {
        Wallet::new(vec![
            security("TMON", 0.0, 1, 100.0, None),
            security("TPAY", 10.0, 1, 100.0, Some(90.0)),
            security("TOFZ", 4.0, 1, 250.0, Some(200.0)),
            cash(50.0),
        ])
    };
    let account = account(
        r#", "buy_requires_total_marginal_sell": {
              "enabled": true,
              "instruments": ["TMON"],
              "mode": "only_positive_positions_sell",
              "min_buy_rebalance_percent": 0}"#,
    );
    let run = || {
        let mut wallet = build_wallet();
        let report = balance(
            &mut wallet,
            &desired(&[("TMON", 40.0), ("TPAY", 30.0), ("TOFZ", 30.0)]),
            &account,
            &InstrumentCatalog::default(),
            &HashMap::new(),
        );
        let plan: Vec<(String, i64, i64)> = report
            .orders
            .iter()
            .map(|o| (o.ticker.clone(), o.lots, o.value as i64))
            .collect();
        (plan, report.underfunded)
    };

    assert_eq!(run(), run());
}

/// Margin cap (`remove`): the overflowing target lands exactly on the
/// cap and the freed value flows to the other targets.
#[test]
fn margin_remove_clamps_and_renormalizes() {
    let account = account(
        r#", "margin_trading": {
              "enabled": true, "multiplier": 2,
              "max_margin_size": 500000,
              "balancing_strategy": "remove"}"#,
    );
    let mut wallet = Wallet::new(vec![
        security("A", 0.0, 1, 100.0, None),
        security("B", 0.0, 1, 100.0, None),
        cash(400_000.0),
    ]);
    balance(
        &mut wallet,
        &desired(&[("A", 75.0), ("B", 25.0)]),
        &account,
        &InstrumentCatalog::default(),
        &HashMap::new(),
    );

    // Baseline 800k: A wants 600k -> clamped to 500k; its 100k excess
    // moves to B (200k -> 300k).
    assert_eq!(wallet.find("A").unwrap().desired_amount_number, Some(500_000.0));
    assert_eq!(wallet.find("B").unwrap().desired_amount_number, Some(300_000.0));
}
