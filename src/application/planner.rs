//! Order generation.
//!
//! Translates per-ticker desired RUB values into whole-lot buy/sell
//! quantities against the current wallet. Pure: one pass reads the
//! wallet and targets, writes the plan fields, and reports what it had
//! to skip. Lot rounding is toward zero so a single pass never
//! overshoots the target.

use crate::domain::instrument::InstrumentCatalog;
use crate::domain::position::{Position, Wallet};
use crate::domain::ticker;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Neither a held position nor catalog/price data for the ticker.
    InstrumentUnknown,
    /// The instrument is known but no usable price arrived this tick.
    PriceMissing,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedTicker {
    pub ticker: String,
    pub reason: SkipReason,
}

/// Populate `to_buy_lots` / `to_buy_number` (and the intermediate plan
/// fields) for every ticker in `targets`. Returns the tickers that could
/// not be sized. Positions outside the target map are left untouched;
/// the cash position is implicit and never planned.
pub fn generate_orders(
    wallet: &mut Wallet,
    targets: &HashMap<String, f64>,
    total_value: f64,
    min_buy_rebalance_percent: f64,
    catalog: &InstrumentCatalog,
    last_prices: &HashMap<String, f64>,
) -> Vec<SkippedTicker> {
    let mut skipped = Vec::new();

    // Deterministic pass order regardless of map iteration.
    let mut tickers: Vec<&String> = targets.keys().collect();
    tickers.sort();

    let cash_ticker = wallet.cash().map(|p| p.base.clone());

    for raw_ticker in tickers {
        let desired_value = targets[raw_ticker];
        if cash_ticker
            .as_deref()
            .is_some_and(|cash| ticker::equal(cash, raw_ticker))
        {
            continue;
        }

        if wallet.find(raw_ticker).is_none() {
            match synthesize_position(raw_ticker, catalog, last_prices) {
                Ok(position) => wallet.positions.push(position),
                Err(reason) => {
                    debug!("skipping {}: {:?}", raw_ticker, reason);
                    skipped.push(SkippedTicker {
                        ticker: raw_ticker.clone(),
                        reason,
                    });
                    continue;
                }
            }
        }

        let position = wallet
            .find_mut(raw_ticker)
            .expect("position present or just synthesized");

        let (Some(lot_price), Some(_)) = (position.lot_price_number, position.price_number)
        else {
            skipped.push(SkippedTicker {
                ticker: raw_ticker.clone(),
                reason: SkipReason::PriceMissing,
            });
            continue;
        };

        position.desired_amount_number = Some(desired_value);
        position.before_diff_number =
            Some(desired_value - position.total_price_number.unwrap_or(0.0));

        if lot_price <= 0.0 {
            // Cannot size lots against a non-positive lot price.
            position.can_buy_before_target_lots = Some(0);
            position.to_buy_lots = Some(0);
            position.to_buy_number = Some(0.0);
            continue;
        }

        let desired_lots_fractional = desired_value / lot_price;
        if !desired_lots_fractional.is_finite() {
            position.can_buy_before_target_lots = Some(0);
            position.to_buy_lots = Some(0);
            position.to_buy_number = Some(0.0);
            continue;
        }

        // Toward zero: never overshoot the target within one pass.
        let can_buy = desired_lots_fractional.trunc() as i64;
        position.can_buy_before_target_lots = Some(can_buy);

        let to_buy_lots = can_buy - position.current_lots();
        let to_buy_number = to_buy_lots as f64 * lot_price;

        let threshold = min_buy_rebalance_percent * total_value / 100.0;
        if to_buy_number > 0.0 && to_buy_number < threshold {
            // Drift too small to act on. Sells are never suppressed.
            position.to_buy_lots = Some(0);
            position.to_buy_number = Some(0.0);
            continue;
        }

        position.to_buy_lots = Some(to_buy_lots);
        position.to_buy_number = Some(to_buy_number);
    }

    skipped
}

fn synthesize_position(
    raw_ticker: &str,
    catalog: &InstrumentCatalog,
    last_prices: &HashMap<String, f64>,
) -> Result<Position, SkipReason> {
    let canonical = ticker::normalize(raw_ticker).ok_or(SkipReason::InstrumentUnknown)?;
    let price = last_prices.get(&canonical).copied();
    let instrument = catalog.find_by_ticker(&canonical);

    match (instrument, price) {
        (Some(instrument), Some(price)) if price > 0.0 => {
            let lot = instrument.lot.max(1);
            Ok(Position {
                base: canonical,
                quote: instrument.currency.clone(),
                figi: Some(instrument.figi.clone()),
                amount: 0.0,
                lot_size: lot,
                price_number: Some(price),
                lot_price_number: Some(price * lot as f64),
                total_price_number: Some(0.0),
                ..Position::default()
            })
        }
        (Some(_), _) => Err(SkipReason::PriceMissing),
        (None, _) => Err(SkipReason::InstrumentUnknown),
    }
}
