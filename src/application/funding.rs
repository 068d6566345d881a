//! Buy-requires-sell planning.
//!
//! Non-marginal instruments settle against cash only. When the plan
//! wants to buy one and free RUB cannot cover it, other positions must
//! be reduced first. This module decides which positions to trim and by
//! how much; the engine merges the result back into the plan.

use crate::config::{BuyRequiresSellConfig, SellMode};
use crate::domain::position::{Position, Wallet};
use crate::domain::ticker;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SellPlan {
    pub sell_lots: i64,
    /// Proceeds at the current lot price: `sell_lots x lot_price`.
    pub sell_amount: f64,
}

/// Outcome of one funding pass. Empty `sells` with `underfunded ==
/// false` means free cash already covers the required purchases.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FundingPlan {
    pub sells: BTreeMap<String, SellPlan>,
    /// Cash the flagged purchases need in total.
    pub required_total: f64,
    /// Shortfall after counting free RUB (which may be negative).
    pub deficit: f64,
    /// Proceeds the planned sales would raise.
    pub covered: f64,
    /// Portfolio-wide holdings could not cover the deficit.
    pub underfunded: bool,
}

impl FundingPlan {
    pub fn is_empty(&self) -> bool {
        self.sells.is_empty()
    }
}

/// Decide which positions to reduce so the flagged non-marginal buys in
/// the current plan can settle. Pure over the wallet snapshot: calling
/// it twice with the same inputs yields the same plan.
pub fn plan_required_sales(
    wallet: &Wallet,
    config: &BuyRequiresSellConfig,
    total_value: f64,
) -> FundingPlan {
    let mut plan = FundingPlan::default();
    if !config.enabled || config.mode == SellMode::None {
        return plan;
    }

    let threshold = config.min_buy_rebalance_percent * total_value / 100.0;
    let target_tickers: Vec<&Position> = wallet
        .positions
        .iter()
        .filter(|p| is_funding_target(p, config, threshold))
        .collect();
    plan.required_total = target_tickers
        .iter()
        .filter_map(|p| p.to_buy_number)
        .sum();
    if plan.required_total <= 0.0 {
        return plan;
    }

    // Negative free cash (short margin) widens the gap.
    plan.deficit = plan.required_total - wallet.free_cash();
    if plan.deficit <= 0.0 {
        plan.deficit = 0.0;
        return plan;
    }

    let candidates: Vec<&Position> = wallet
        .positions
        .iter()
        .filter(|p| is_sell_candidate(p, config))
        .collect();

    match config.mode {
        SellMode::OnlyPositivePositionsSell => {
            sell_from_profitable(&mut plan, candidates);
        }
        SellMode::EqualInPercents => {
            sell_proportionally(&mut plan, candidates);
        }
        SellMode::None => unreachable!("handled above"),
    }

    plan.underfunded = plan.covered < plan.deficit - 1e-9;
    plan
}

fn is_funding_target(
    position: &Position,
    config: &BuyRequiresSellConfig,
    threshold: f64,
) -> bool {
    if position.is_cash() {
        return false;
    }
    let Some(to_buy) = position.to_buy_number else {
        return false;
    };
    if to_buy <= 0.0 {
        return false;
    }
    // Below-threshold buys are churn; strict less-than so the boundary
    // still triggers funding.
    if to_buy < threshold {
        return false;
    }
    config
        .instruments
        .iter()
        .any(|t| ticker::equal(t, &position.base))
}

fn is_sell_candidate(position: &Position, config: &BuyRequiresSellConfig) -> bool {
    if position.is_cash() || position.amount <= 0.0 {
        return false;
    }
    if config
        .instruments
        .iter()
        .any(|t| ticker::equal(t, &position.base))
    {
        return false;
    }
    // Lots cannot be sized against a non-positive lot price.
    if position.lot_price_number.is_none_or(|lp| lp <= 0.0) {
        return false;
    }
    position.total_price_number.is_some_and(|total| total > 0.0)
}

/// Walk profitable positions, largest realized gain first, each
/// absorbing as much of the remaining deficit as it is worth.
fn sell_from_profitable(plan: &mut FundingPlan, candidates: Vec<&Position>) {
    let mut profitable: Vec<(&Position, f64)> = candidates
        .into_iter()
        .filter_map(|p| {
            let profit = p.profit_per_unit()?;
            (profit > 0.0).then(|| (p, p.profit_amount().unwrap_or(0.0)))
        })
        .collect();
    profitable.sort_by(|(a, pa), (b, pb)| {
        pb.partial_cmp(pa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.base.cmp(&b.base))
    });

    let mut remaining = plan.deficit;
    for (position, _) in profitable {
        if remaining <= 0.0 {
            break;
        }
        let total = position.total_price_number.unwrap_or(0.0);
        let desired_value = remaining.min(total);
        if let Some(sell) = size_sale(position, desired_value) {
            remaining -= sell.sell_amount;
            plan.covered += sell.sell_amount;
            plan.sells.insert(position.base.clone(), sell);
        }
    }
}

/// Spread the deficit over every candidate proportionally to its value.
fn sell_proportionally(plan: &mut FundingPlan, candidates: Vec<&Position>) {
    let pool: f64 = candidates
        .iter()
        .filter_map(|p| p.total_price_number)
        .sum();
    if pool <= 0.0 {
        return;
    }
    for position in candidates {
        let total = position.total_price_number.unwrap_or(0.0);
        let desired_value = plan.deficit * total / pool;
        if let Some(sell) = size_sale(position, desired_value) {
            plan.covered += sell.sell_amount;
            plan.sells.insert(position.base.clone(), sell);
        }
    }
}

/// Value -> whole lots, rounded up so the sale actually raises the
/// requested amount, clamped to the holding.
fn size_sale(position: &Position, desired_value: f64) -> Option<SellPlan> {
    let lot_price = position.lot_price_number?;
    if lot_price <= 0.0 || desired_value <= 0.0 {
        return None;
    }
    let max_lots = position.current_lots();
    let sell_lots = ((desired_value / lot_price).ceil() as i64).min(max_lots);
    if sell_lots <= 0 {
        return None;
    }
    Some(SellPlan {
        sell_lots,
        sell_amount: sell_lots as f64 * lot_price,
    })
}
