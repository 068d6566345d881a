//! Persisted per-ticker ETF metrics.
//!
//! After each tick the scheduler drops a JSON snapshot per desired
//! ticker under `etf_metrics/`. These files feed dashboards only; a
//! write failure is logged by the caller and never affects trading.

use crate::domain::instrument::Instrument;
use crate::domain::market_data::MarketSnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtfMetrics {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub shares_count: Option<u64>,
    pub price: Option<f64>,
    /// `shares_count x price` when both are known.
    pub market_cap: Option<f64>,
    /// AUM in RUB.
    pub aum: Option<f64>,
    /// `(market_cap - aum) / aum x 100` for positive AUM.
    pub decorrelation_pct: Option<f64>,
    pub figi: Option<String>,
    pub uid: Option<String>,
    pub shares_search_url: Option<String>,
}

pub fn build_metrics(
    ticker: &str,
    instrument: Option<&Instrument>,
    snapshot: &MarketSnapshot,
    price: Option<f64>,
    timestamp: DateTime<Utc>,
) -> EtfMetrics {
    let shares_count = snapshot.shares.get(ticker).copied();
    let market_cap = match (shares_count, price) {
        (Some(shares), Some(price)) => Some(shares as f64 * price),
        _ => snapshot.market_cap.get(ticker).copied(),
    };
    let aum = snapshot.aum_rub(ticker);
    let decorrelation_pct = match (market_cap, aum) {
        (Some(cap), Some(aum)) if aum > 0.0 => Some((cap - aum) / aum * 100.0),
        _ => None,
    };

    EtfMetrics {
        symbol: ticker.to_string(),
        timestamp,
        shares_count,
        price,
        market_cap,
        aum,
        decorrelation_pct,
        figi: instrument.map(|i| i.figi.clone()),
        uid: instrument.map(|i| i.uid.clone()),
        shares_search_url: snapshot.shares_url.get(ticker).cloned(),
    }
}

pub struct MetricsStore {
    dir: PathBuf,
}

impl MetricsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn write(&self, metrics: &EtfMetrics) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}.json", metrics.symbol));
        let body = serde_json::to_string_pretty(metrics)?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn read(&self, ticker: &str) -> Result<EtfMetrics> {
        let path = self.dir.join(format!("{ticker}.json"));
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).context("malformed metrics file")
    }
}
