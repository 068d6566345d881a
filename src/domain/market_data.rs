use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Net asset value of a fund as published, before FX conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AumEntry {
    pub amount: f64,
    pub currency: CurrencyCode,
}

pub type CurrencyCode = [u8; 3];

pub fn currency_code(iso: &str) -> CurrencyCode {
    let mut code = [b' '; 3];
    for (slot, byte) in code.iter_mut().zip(iso.to_uppercase().bytes()) {
        *slot = byte;
    }
    code
}

pub const RUB: CurrencyCode = *b"RUB";

/// Per-tick snapshot of the auxiliary market data the desired-mode
/// resolver consumes. Keys are canonical tickers. Gaps are legitimate:
/// a ticker missing from a map simply lacks that datum this tick.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    /// Market capitalization in RUB.
    pub market_cap: HashMap<String, f64>,
    /// Published AUM with its source currency.
    pub aum: HashMap<String, AumEntry>,
    /// Shares (units) outstanding.
    pub shares: HashMap<String, u64>,
    /// Where the shares count was scraped from, for the metrics files.
    pub shares_url: HashMap<String, String>,
    /// RUB per one unit of foreign currency. RUB itself maps to 1.
    pub fx: HashMap<CurrencyCode, f64>,
}

impl MarketSnapshot {
    pub fn new() -> Self {
        let mut snapshot = Self::default();
        snapshot.fx.insert(RUB, 1.0);
        snapshot
    }

    /// AUM converted to RUB, when both the entry and its FX rate are
    /// known and positive.
    pub fn aum_rub(&self, ticker: &str) -> Option<f64> {
        let entry = self.aum.get(ticker)?;
        let rate = self.fx.get(&entry.currency).copied()?;
        let rub = entry.amount * rate;
        (rub.is_finite() && rub > 0.0).then_some(rub)
    }
}
