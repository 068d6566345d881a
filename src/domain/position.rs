use crate::domain::money::Money;
use crate::domain::ticker;
use serde::Serialize;
use std::collections::HashMap;

/// Desired allocation: ticker -> percentage. Normalized iff the values
/// sum to 100 within tolerance.
pub type DesiredWallet = HashMap<String, f64>;

/// One holding inside a wallet. `Money` fields are the sole stored price
/// representation; the `*_number` doubles are derived from them by the
/// valuator exactly once per tick, and the plan fields are filled by the
/// order generator. Absent data stays `None` and is never conflated with
/// zero.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Position {
    /// Ticker of the held asset. For the cash position `base == quote`.
    pub base: String,
    /// Settlement currency, conventionally RUB.
    pub quote: String,
    pub figi: Option<String>,
    /// Units currently held. Fractional for currency.
    pub amount: f64,
    pub lot_size: u32,
    pub is_margin: bool,

    pub price: Option<Money>,
    pub lot_price: Option<Money>,
    pub total_price: Option<Money>,
    /// Per-unit cost basis (FIFO), used for profit detection.
    pub average_position_price_fifo: Option<Money>,

    // Derived by the valuator.
    pub price_number: Option<f64>,
    pub lot_price_number: Option<f64>,
    pub total_price_number: Option<f64>,
    pub average_position_price_fifo_number: Option<f64>,

    // Filled during a balancing pass.
    pub desired_amount_number: Option<f64>,
    pub can_buy_before_target_lots: Option<i64>,
    pub before_diff_number: Option<f64>,
    pub to_buy_lots: Option<i64>,
    pub to_buy_number: Option<f64>,
}

impl Position {
    pub fn is_cash(&self) -> bool {
        !self.base.is_empty() && self.base == self.quote
    }

    /// Whole lots currently held.
    pub fn current_lots(&self) -> i64 {
        let lot = self.lot_size.max(1) as f64;
        (self.amount / lot).floor() as i64
    }

    /// Per-unit profit against the FIFO cost basis. `None` when either
    /// side of the comparison is missing or the price is not positive.
    pub fn profit_per_unit(&self) -> Option<f64> {
        let price = self.price_number?;
        if price <= 0.0 {
            return None;
        }
        let basis = self.average_position_price_fifo_number?;
        Some(price - basis)
    }

    pub fn profit_amount(&self) -> Option<f64> {
        Some(self.profit_per_unit()? * self.amount)
    }
}

/// Ordered set of positions for one account at one instant. At most one
/// position per base ticker; exactly one cash position.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Wallet {
    pub positions: Vec<Position>,
}

impl Wallet {
    pub fn new(positions: Vec<Position>) -> Self {
        Self { positions }
    }

    /// The settlement cash position. RUB wins when several currencies
    /// are held.
    pub fn cash(&self) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.is_cash() && p.base == "RUB")
            .or_else(|| self.positions.iter().find(|p| p.is_cash()))
    }

    pub fn cash_mut(&mut self) -> Option<&mut Position> {
        let idx = self.positions.iter().position(|p| p.is_cash() && p.base == "RUB")
            .or_else(|| self.positions.iter().position(|p| p.is_cash()))?;
        self.positions.get_mut(idx)
    }

    /// Free cash units at tick start. May be negative on margin accounts.
    pub fn free_cash(&self) -> f64 {
        self.cash().map(|p| p.amount).unwrap_or(0.0)
    }

    pub fn find(&self, raw_ticker: &str) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| ticker::equal(&p.base, raw_ticker))
    }

    pub fn find_mut(&mut self, raw_ticker: &str) -> Option<&mut Position> {
        self.positions
            .iter_mut()
            .find(|p| ticker::equal(&p.base, raw_ticker))
    }

    pub fn contains(&self, raw_ticker: &str) -> bool {
        self.find(raw_ticker).is_some()
    }
}
