use crate::domain::ticker;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static metadata for one tradable instrument, as published by the
/// broker catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub ticker: String,
    pub figi: String,
    pub uid: String,
    pub class_code: String,
    pub exchange: String,
    /// Indivisible order quantity. Always >= 1.
    pub lot: u32,
    /// ISO currency the instrument settles in.
    pub currency: String,
    pub api_trade_available: bool,
}

/// Immutable per-tick snapshot of the instrument universe, indexed by
/// canonical ticker and by FIGI.
#[derive(Debug, Clone, Default)]
pub struct InstrumentCatalog {
    instruments: Vec<Instrument>,
    by_ticker: HashMap<String, usize>,
    by_figi: HashMap<String, usize>,
}

impl InstrumentCatalog {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let mut catalog = Self::default();
        for instrument in instruments {
            catalog.insert(instrument);
        }
        catalog
    }

    pub fn insert(&mut self, instrument: Instrument) {
        let idx = self.instruments.len();
        if let Some(canonical) = ticker::normalize(&instrument.ticker) {
            self.by_ticker.entry(canonical).or_insert(idx);
        }
        self.by_figi.entry(instrument.figi.clone()).or_insert(idx);
        self.instruments.push(instrument);
    }

    pub fn find_by_ticker(&self, raw: &str) -> Option<&Instrument> {
        let canonical = ticker::normalize(raw)?;
        self.by_ticker
            .get(&canonical)
            .map(|&idx| &self.instruments[idx])
    }

    pub fn find_by_figi(&self, figi: &str) -> Option<&Instrument> {
        self.by_figi.get(figi).map(|&idx| &self.instruments[idx])
    }

    pub fn lot_for(&self, raw_ticker: &str) -> Option<u32> {
        self.find_by_ticker(raw_ticker).map(|i| i.lot.max(1))
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }
}
