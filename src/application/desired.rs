//! Desired-allocation mode resolution.
//!
//! Turns the account's configured allocation plus the per-tick market
//! snapshot into a normalized percentage vector. Every mode degrades
//! rather than fails: an empty or malformed data universe produces the
//! zero map, which the engine treats as "do nothing".

use crate::config::DesiredMode;
use crate::domain::market_data::MarketSnapshot;
use crate::domain::position::DesiredWallet;
use crate::domain::ticker;
use std::collections::HashMap;

/// Scale a weight vector to sum to 100. Non-finite weights are scrubbed
/// to 0 first; if nothing positive remains, every ticker maps to 0.
pub fn normalize_desired(desired: &DesiredWallet) -> DesiredWallet {
    let scrubbed: Vec<(&String, f64)> = desired
        .iter()
        .map(|(t, &v)| (t, if v.is_finite() && v > 0.0 { v } else { 0.0 }))
        .collect();

    let sum: f64 = scrubbed.iter().map(|(_, v)| v).sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return desired.keys().map(|t| (t.clone(), 0.0)).collect();
    }

    scrubbed
        .into_iter()
        .map(|(t, v)| (t.clone(), v / sum * 100.0))
        .collect()
}

/// Resolve the configured mode into concrete normalized percentages over
/// the configured tickers (canonicalized).
pub fn resolve_desired(
    mode: DesiredMode,
    configured: &DesiredWallet,
    snapshot: &MarketSnapshot,
) -> DesiredWallet {
    let configured = canonicalize(configured);
    let weights = match mode {
        DesiredMode::Manual => configured.clone(),
        DesiredMode::Default => fill_default(&configured),
        DesiredMode::MarketCap => market_cap_weights(&configured, snapshot),
        DesiredMode::Aum => aum_weights(&configured, snapshot),
        DesiredMode::Decorrelation => decorrelation_weights(&configured, snapshot),
        DesiredMode::MarketCapAum => mean_of(
            &normalize_desired(&market_cap_weights(&configured, snapshot)),
            &normalize_desired(&aum_weights(&configured, snapshot)),
        ),
        DesiredMode::AumDecorrelation => mean_of(
            &normalize_desired(&aum_weights(&configured, snapshot)),
            &normalize_desired(&decorrelation_weights(&configured, snapshot)),
        ),
        DesiredMode::DecorrelationMarketCap => decorrelation_then_cap(&configured, snapshot),
    };
    normalize_desired(&weights)
}

fn canonicalize(configured: &DesiredWallet) -> DesiredWallet {
    configured
        .iter()
        .filter_map(|(raw, &pct)| ticker::normalize(raw).map(|t| (t, pct)))
        .collect()
}

/// Configured weights verbatim; tickers without a set weight split the
/// remainder up to 100 equally.
fn fill_default(configured: &DesiredWallet) -> DesiredWallet {
    let unset: Vec<&String> = configured
        .iter()
        .filter(|&(_, &v)| !(v.is_finite() && v > 0.0))
        .map(|(t, _)| t)
        .collect();
    if unset.is_empty() {
        return configured.clone();
    }

    let set_sum: f64 = configured
        .values()
        .filter(|v| v.is_finite() && **v > 0.0)
        .sum();
    let remainder = (100.0 - set_sum).max(0.0);
    let share = remainder / unset.len() as f64;

    configured
        .iter()
        .map(|(t, &v)| {
            if v.is_finite() && v > 0.0 {
                (t.clone(), v)
            } else {
                (t.clone(), share)
            }
        })
        .collect()
}

fn market_cap_weights(configured: &DesiredWallet, snapshot: &MarketSnapshot) -> DesiredWallet {
    configured
        .keys()
        .filter_map(|t| {
            let cap = snapshot.market_cap.get(t).copied()?;
            (cap.is_finite() && cap > 0.0).then(|| (t.clone(), cap))
        })
        .collect()
}

fn aum_weights(configured: &DesiredWallet, snapshot: &MarketSnapshot) -> DesiredWallet {
    configured
        .keys()
        .filter_map(|t| snapshot.aum_rub(t).map(|aum| (t.clone(), aum)))
        .collect()
}

/// Per-ticker `market cap - AUM` over the tickers where both sides are
/// known. An empty result means the data universe is empty and the mode
/// must degrade to the zero plan, not to a fallback.
fn decorrelation_diffs(
    configured: &DesiredWallet,
    snapshot: &MarketSnapshot,
) -> HashMap<String, f64> {
    configured
        .keys()
        .filter_map(|t| {
            let cap = snapshot.market_cap.get(t).copied()?;
            let aum = snapshot.aum_rub(t)?;
            let diff = cap - aum;
            diff.is_finite().then(|| (t.clone(), diff))
        })
        .collect()
}

fn equal_weights(configured: &DesiredWallet) -> DesiredWallet {
    configured.keys().map(|t| (t.clone(), 1.0)).collect()
}

fn decorrelation_weights(configured: &DesiredWallet, snapshot: &MarketSnapshot) -> DesiredWallet {
    let diffs = decorrelation_diffs(configured, snapshot);
    if diffs.is_empty() {
        return HashMap::new();
    }
    let positive: DesiredWallet = diffs.into_iter().filter(|(_, d)| *d > 0.0).collect();
    if positive.is_empty() {
        // Data is present but nothing trades above its net assets.
        return equal_weights(configured);
    }
    positive
}

/// Tickers flagged positive by decorrelation, re-weighted by market cap.
fn decorrelation_then_cap(configured: &DesiredWallet, snapshot: &MarketSnapshot) -> DesiredWallet {
    let diffs = decorrelation_diffs(configured, snapshot);
    if diffs.is_empty() {
        return HashMap::new();
    }
    let positive: Vec<String> = diffs
        .into_iter()
        .filter(|(_, d)| *d > 0.0)
        .map(|(t, _)| t)
        .collect();
    if positive.is_empty() {
        return equal_weights(configured);
    }
    positive
        .into_iter()
        .filter_map(|t| {
            let cap = snapshot.market_cap.get(&t).copied()?;
            (cap.is_finite() && cap > 0.0).then_some((t, cap))
        })
        .collect()
}

/// Arithmetic mean of two normalized weight maps; tickers missing from
/// one side contribute 0 there.
fn mean_of(left: &DesiredWallet, right: &DesiredWallet) -> DesiredWallet {
    let mut out: DesiredWallet = HashMap::new();
    for (t, &v) in left.iter().chain(right.iter()) {
        *out.entry(t.clone()).or_insert(0.0) += v / 2.0;
    }
    out
}
