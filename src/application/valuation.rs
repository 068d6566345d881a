//! Portfolio valuation.
//!
//! Derives the per-position doubles from the fixed-point wire values,
//! exactly once per tick. A position whose price never arrived keeps its
//! derived fields absent; downstream sizing must treat that as "cannot
//! value", not as zero.

use crate::domain::money::Money;
use crate::domain::position::{Position, Wallet};
use std::collections::HashMap;

/// Fill `price_number` / `lot_price_number` / `total_price_number` (and
/// the FIFO cost-basis double) for every position that has usable price
/// data. The cash position values at par.
pub fn valuate_wallet(wallet: &mut Wallet) {
    for position in &mut wallet.positions {
        valuate_position(position);
    }
}

fn valuate_position(position: &mut Position) {
    if position.is_cash() {
        // Non-RUB cash carries the broker's conversion rate as its
        // price; RUB (or a missing rate) values at par.
        let rate = position
            .price
            .map(|m| m.to_f64())
            .filter(|r| *r > 0.0)
            .unwrap_or(1.0);
        if position.price.is_none() {
            position.price = Some(Money::from_units(1));
        }
        position.price_number = Some(rate);
        position.lot_price_number = Some(rate);
        position.total_price_number = Some(position.amount * rate);
        return;
    }

    position.average_position_price_fifo_number = position
        .average_position_price_fifo
        .map(|money| money.to_f64());

    let Some(price) = position.price else {
        // No price this tick: leave every derived field absent.
        return;
    };
    let price_number = price.to_f64();
    position.price_number = Some(price_number);

    let lot = position.lot_size.max(1) as f64;
    position.lot_price_number = match position.lot_price {
        Some(lot_price) => Some(lot_price.to_f64()),
        None => Some(price_number * lot),
    };
    position.total_price_number = match position.total_price {
        Some(total) => Some(total.to_f64()),
        None => Some(price_number * position.amount),
    };
}

/// Total portfolio value: every valued position including cash.
pub fn total_portfolio_value(wallet: &Wallet) -> f64 {
    wallet
        .positions
        .iter()
        .filter_map(|p| p.total_price_number)
        .sum()
}

/// Securities-only allocation shares in percent, for telemetry. The
/// cash position (`base == quote`) is excluded from both the numerator
/// and the denominator.
pub fn security_shares(wallet: &Wallet) -> HashMap<String, f64> {
    let securities_total: f64 = wallet
        .positions
        .iter()
        .filter(|p| !p.is_cash())
        .filter_map(|p| p.total_price_number)
        .sum();

    let mut shares = HashMap::new();
    if securities_total <= 0.0 {
        return shares;
    }
    for position in &wallet.positions {
        if position.is_cash() {
            continue;
        }
        if let Some(total) = position.total_price_number {
            shares.insert(position.base.clone(), total / securities_total * 100.0);
        }
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security(ticker: &str, amount: f64, lot: u32, price: Option<Money>) -> Position {
        Position {
            base: ticker.to_string(),
            quote: "RUB".to_string(),
            amount,
            lot_size: lot,
            price,
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

    #[test]
    fn test_valuation_derives_doubles_from_money() {
        let mut wallet = Wallet::new(vec![security(
            "TRUR",
            7.0,
            10,
            Some(Money::new(5, 500_000_000)),
        )]);
        valuate_wallet(&mut wallet);
        let p = &wallet.positions[0];
        assert_eq!(p.price_number, Some(5.5));
        assert_eq!(p.lot_price_number, Some(55.0));
        assert_eq!(p.total_price_number, Some(38.5));
    }

    #[test]
    fn test_missing_price_stays_absent() {
        let mut wallet = Wallet::new(vec![security("TMOS", 3.0, 1, None)]);
        valuate_wallet(&mut wallet);
        let p = &wallet.positions[0];
        assert_eq!(p.price_number, None);
        assert_eq!(p.lot_price_number, None);
        assert_eq!(p.total_price_number, None);
    }

    #[test]
    fn test_cash_values_at_par() {
        let mut wallet = Wallet::new(vec![cash(10_000.0)]);
        valuate_wallet(&mut wallet);
        let p = &wallet.positions[0];
        assert_eq!(p.price_number, Some(1.0));
        assert_eq!(p.total_price_number, Some(10_000.0));
    }

    #[test]
    fn test_total_includes_cash_and_skips_unvalued() {
        let mut wallet = Wallet::new(vec![
            security("TRUR", 10.0, 1, Some(Money::from_units(100))),
            security("TMOS", 5.0, 1, None),
            cash(500.0),
        ]);
        valuate_wallet(&mut wallet);
        assert_eq!(total_portfolio_value(&wallet), 1500.0);
    }

    #[test]
    fn test_security_shares_exclude_cash() {
        let mut wallet = Wallet::new(vec![
            security("TRUR", 10.0, 1, Some(Money::from_units(100))),
            security("TGLD", 30.0, 1, Some(Money::from_units(100))),
            cash(6_000.0),
        ]);
        valuate_wallet(&mut wallet);
        let shares = security_shares(&wallet);
        assert!((shares["TRUR"] - 25.0).abs() < 1e-9);
        assert!((shares["TGLD"] - 75.0).abs() < 1e-9);
        assert!(!shares.contains_key("RUB"));
    }

    #[test]
    fn test_explicit_totals_win_over_derived() {
        // When the broker already reports a position total, trust it.
        let mut position = security("TPAY", 10.0, 1, Some(Money::from_units(100)));
        position.total_price = Some(Money::from_units(999));
        let mut wallet = Wallet::new(vec![position]);
        valuate_wallet(&mut wallet);
        assert_eq!(wallet.positions[0].total_price_number, Some(999.0));
    }
}
