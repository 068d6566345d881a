//! The balancing decision engine.
//!
//! Pure orchestration of valuation, margin sizing, order generation and
//! buy-requires-sell funding over one wallet snapshot. Runs entirely
//! synchronously; the scheduler owns all I/O. By contract the engine
//! never fails on data quality: bad or missing inputs shrink the plan
//! and are recorded on the report instead.

use crate::application::funding::{self, FundingPlan};
use crate::application::margin::{self, MarginInfo};
use crate::application::planner::{self, SkippedTicker};
use crate::application::valuation;
use crate::config::{AccountConfig, DesiredMode};
use crate::domain::instrument::InstrumentCatalog;
use crate::domain::position::{DesiredWallet, Wallet};
use crate::domain::ticker;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// One lot-level trade the plan calls for. Negative `lots` sell.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedOrder {
    pub ticker: String,
    pub figi: Option<String>,
    pub lots: i64,
    /// Signed RUB value at the current lot price.
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub mode_used: DesiredMode,
    /// Normalized percentages the sizing ran against.
    pub final_percents: DesiredWallet,
    pub total_portfolio_value: f64,
    pub margin_info: Option<MarginInfo>,
    /// Portfolio-wide holdings could not fund the flagged purchases.
    pub underfunded: bool,
    pub skipped: Vec<SkippedTicker>,
    /// Sells first, then buys, tickers ascending within each group.
    pub orders: Vec<PlannedOrder>,
}

/// Run one full balancing pass over the wallet. `desired` must already
/// be resolved and normalized (see [`crate::application::desired`]).
pub fn balance(
    wallet: &mut Wallet,
    desired: &DesiredWallet,
    account: &AccountConfig,
    catalog: &InstrumentCatalog,
    last_prices: &HashMap<String, f64>,
) -> BalanceReport {
    valuation::valuate_wallet(wallet);
    let total_value = valuation::total_portfolio_value(wallet);

    let mut report = BalanceReport {
        mode_used: account.desired_mode,
        final_percents: desired.clone(),
        total_portfolio_value: total_value,
        margin_info: None,
        underfunded: false,
        skipped: Vec::new(),
        orders: Vec::new(),
    };

    let desired_sum: f64 = desired.values().sum();
    if !(desired_sum > 0.0) || total_value <= 0.0 {
        // Degenerate allocation or empty portfolio: do nothing.
        debug!(
            account = account.id.as_str(),
            desired_sum, total_value, "nothing to balance"
        );
        return report;
    }

    let cash_ticker = wallet
        .cash()
        .map(|p| p.base.clone())
        .unwrap_or_else(|| "RUB".to_string());

    let (targets, margin_info) = margin::compute_targets(
        desired,
        total_value,
        &account.margin_trading,
        &cash_ticker,
    );
    report.margin_info = margin_info;

    let brs = &account.buy_requires_total_marginal_sell;
    report.skipped = planner::generate_orders(
        wallet,
        &targets,
        total_value,
        brs.min_buy_rebalance_percent,
        catalog,
        last_prices,
    );

    let funding = funding::plan_required_sales(wallet, brs, total_value);
    if funding.deficit > 0.0 {
        report.underfunded = funding.underfunded;
        merge_funding(wallet, &funding);
        recap_funded_buys(wallet, &funding, brs.instruments.as_slice());
    }

    report.orders = collect_orders(wallet);
    report
}

/// The funding decision overrides whatever the first pass planned for
/// the sellers.
fn merge_funding(wallet: &mut Wallet, funding: &FundingPlan) {
    for (seller, sell) in &funding.sells {
        if let Some(position) = wallet.find_mut(seller) {
            position.to_buy_lots = Some(-sell.sell_lots);
            position.to_buy_number = Some(-sell.sell_amount);
        }
    }
}

/// Second pure pass over the funded targets: cap each buy at what free
/// cash plus the planned sale proceeds can actually settle, biggest
/// requirement first.
fn recap_funded_buys(wallet: &mut Wallet, funding: &FundingPlan, instruments: &[String]) {
    let mut available = wallet.free_cash() + funding.covered;

    let mut target_order: Vec<(String, f64)> = wallet
        .positions
        .iter()
        .filter(|p| {
            !p.is_cash()
                && p.to_buy_number.is_some_and(|n| n > 0.0)
                && instruments.iter().any(|t| ticker::equal(t, &p.base))
        })
        .map(|p| (p.base.clone(), p.to_buy_number.unwrap_or(0.0)))
        .collect();
    target_order.sort_by(|(ta, na), (tb, nb)| {
        nb.partial_cmp(na)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ta.cmp(tb))
    });

    for (target_ticker, _) in target_order {
        let Some(position) = wallet.find_mut(&target_ticker) else {
            continue;
        };
        let Some(lot_price) = position.lot_price_number else {
            continue;
        };
        if lot_price <= 0.0 {
            continue;
        }
        let planned = position.to_buy_lots.unwrap_or(0);
        let affordable = (available / lot_price).floor() as i64;
        let lots = planned.min(affordable).max(0);
        if lots != planned {
            debug!(
                ticker = target_ticker.as_str(),
                planned, lots, "buy reduced to funded amount"
            );
            position.to_buy_lots = Some(lots);
            position.to_buy_number = Some(lots as f64 * lot_price);
        }
        available -= lots as f64 * lot_price;
    }
}

fn collect_orders(wallet: &Wallet) -> Vec<PlannedOrder> {
    let mut orders: Vec<PlannedOrder> = wallet
        .positions
        .iter()
        .filter(|p| !p.is_cash())
        .filter_map(|p| {
            let lots = p.to_buy_lots?;
            if lots == 0 {
                return None;
            }
            Some(PlannedOrder {
                ticker: p.base.clone(),
                figi: p.figi.clone(),
                lots,
                value: p.to_buy_number.unwrap_or(0.0),
            })
        })
        .collect();
    // Sells release the cash the buys will spend.
    orders.sort_by(|a, b| {
        (a.lots >= 0)
            .cmp(&(b.lots >= 0))
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    orders
}
