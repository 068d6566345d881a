//! Margin-aware sizing.
//!
//! Expands the desired-value baseline by the configured leverage, then
//! caps each non-cash target at `max_margin_size` per the configured
//! strategy. Excess cut from capped targets is redistributed over the
//! remaining ones so the plan keeps spending the leveraged baseline.

use crate::config::{MarginConfig, MarginStrategy};
use crate::domain::position::DesiredWallet;
use crate::domain::ticker;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarginInfo {
    /// Portion of the final targets not covered by the account's own
    /// value, in RUB.
    pub total_margin_used: f64,
    pub within_limits: bool,
}

/// Convert normalized percentages into per-ticker RUB targets, applying
/// leverage and per-instrument caps when margin trading is enabled.
/// A desired entry for the cash ticker is never leveraged or capped.
pub fn compute_targets(
    desired: &DesiredWallet,
    portfolio_value: f64,
    margin: &MarginConfig,
    cash_ticker: &str,
) -> (HashMap<String, f64>, Option<MarginInfo>) {
    if !margin.enabled {
        let targets = desired
            .iter()
            .map(|(t, &pct)| (t.clone(), portfolio_value * pct / 100.0))
            .collect();
        return (targets, None);
    }

    let base = portfolio_value * margin.multiplier;
    let mut targets: HashMap<String, f64> = HashMap::new();
    let mut weights: HashMap<String, f64> = HashMap::new();
    for (t, &pct) in desired {
        if ticker::equal(t, cash_ticker) {
            targets.insert(t.clone(), portfolio_value * pct / 100.0);
        } else {
            targets.insert(t.clone(), base * pct / 100.0);
            weights.insert(t.clone(), pct);
        }
    }

    cap_and_redistribute(&mut targets, &weights, margin);

    let spent: f64 = targets.values().sum();
    let total_margin_used = (spent - portfolio_value).max(0.0);
    let info = MarginInfo {
        total_margin_used,
        within_limits: total_margin_used <= margin.max_margin_size,
    };
    (targets, Some(info))
}

fn overflows(target: f64, margin: &MarginConfig) -> bool {
    let excess = target - margin.max_margin_size;
    match margin.balancing_strategy {
        MarginStrategy::Remove => excess > 0.0,
        MarginStrategy::KeepIfSmall => excess > margin.free_threshold,
    }
}

/// Clamp overflowing targets and hand their excess to the still-open
/// ones, proportionally to their desired weights. Redistribution may
/// push another target over the cap, so iterate; each pass clamps at
/// least one more ticker, which bounds the loop.
fn cap_and_redistribute(
    targets: &mut HashMap<String, f64>,
    weights: &HashMap<String, f64>,
    margin: &MarginConfig,
) {
    let mut capped: HashMap<String, bool> =
        weights.keys().map(|t| (t.clone(), false)).collect();

    for _ in 0..weights.len().max(1) {
        let mut excess = 0.0;
        for (t, is_capped) in capped.iter_mut() {
            if *is_capped {
                continue;
            }
            let target = targets.get_mut(t).expect("weight implies target");
            if overflows(*target, margin) {
                excess += *target - margin.max_margin_size;
                *target = margin.max_margin_size;
                *is_capped = true;
            }
        }
        if excess <= 0.0 {
            break;
        }

        let open_weight: f64 = capped
            .iter()
            .filter(|(_, is_capped)| !**is_capped)
            .map(|(t, _)| weights[t])
            .sum();
        if open_weight <= 0.0 {
            // Everything is at the cap; the excess cannot be placed.
            break;
        }
        for (t, is_capped) in &capped {
            if *is_capped {
                continue;
            }
            *targets.get_mut(t).expect("weight implies target") +=
                excess * weights[t] / open_weight;
        }
    }
}
