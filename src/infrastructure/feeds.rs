//! Fund statistics feeds.
//!
//! Pulls the inputs the dynamic desired modes need: published AUM from
//! a JSON stats endpoint and shares outstanding scraped out of the fund
//! page HTML. Everything here is best effort; a ticker whose data
//! cannot be fetched or parsed simply stays out of the snapshot and the
//! affected mode degrades on its own terms.

use crate::domain::market_data::{AumEntry, CurrencyCode, MarketSnapshot, RUB, currency_code};
use crate::domain::money::parse_money_display;
use crate::domain::ports::FundStatsService;
use crate::infrastructure::http_client_factory::ClientProfile;
use async_trait::async_trait;
use regex::Regex;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

pub struct FundStatsClient {
    client: ClientWithMiddleware,
    stats_base_url: String,
    shares_base_url: String,
    /// RUB per unit of foreign currency, for AUM published in USD/EUR.
    fx_rates: HashMap<CurrencyCode, f64>,
    shares_pattern: Regex,
}

impl FundStatsClient {
    pub fn new(stats_base_url: impl Into<String>, shares_base_url: impl Into<String>) -> Self {
        Self {
            client: ClientProfile::feed().build(),
            stats_base_url: stats_base_url.into(),
            shares_base_url: shares_base_url.into(),
            fx_rates: HashMap::from([(RUB, 1.0)]),
            shares_pattern: shares_count_pattern(),
        }
    }

    pub fn with_fx_rate(mut self, currency: &str, rub_per_unit: f64) -> Self {
        self.fx_rates.insert(currency_code(currency), rub_per_unit);
        self
    }

    fn shares_url(&self, ticker: &str) -> String {
        format!("{}/{}", self.shares_base_url.trim_end_matches('/'), ticker)
    }

    async fn fetch_aum(&self, ticker: &str) -> Option<AumEntry> {
        let url = format!("{}/{}", self.stats_base_url.trim_end_matches('/'), ticker);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(err) => {
                warn!(ticker, error = %err, "aum feed unreachable");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(ticker, status = %response.status(), "aum feed refused");
            return None;
        }
        let body: FundStatsDto = match response.json().await {
            Ok(b) => b,
            Err(err) => {
                warn!(ticker, error = %err, "malformed aum payload");
                return None;
            }
        };
        parse_aum(&body)
    }

    async fn fetch_shares(&self, ticker: &str) -> Option<u64> {
        let url = self.shares_url(ticker);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(err) => {
                warn!(ticker, error = %err, "shares page unreachable");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(ticker, status = %response.status(), "shares page refused");
            return None;
        }
        let html = response.text().await.ok()?;
        extract_shares_count(&self.shares_pattern, &html)
    }
}

#[derive(Debug, Deserialize)]
struct FundStatsDto {
    /// Either `{"amount": ..., "currency": "..."}` or a display string
    /// like `"1 234 567,89 руб"`.
    aum: Option<serde_json::Value>,
}

fn parse_aum(dto: &FundStatsDto) -> Option<AumEntry> {
    #[derive(Debug, Deserialize)]
    struct Structured {
        amount: f64,
        #[serde(default)]
        currency: String,
    }

    let value = dto.aum.as_ref()?;
    if let Ok(structured) = serde_json::from_value::<Structured>(value.clone()) {
        if structured.amount.is_finite() && structured.amount > 0.0 {
            let currency = if structured.currency.is_empty() {
                RUB
            } else {
                currency_code(&structured.currency)
            };
            return Some(AumEntry {
                amount: structured.amount,
                currency,
            });
        }
        return None;
    }
    let display = value.as_str()?;
    let parsed = parse_money_display(display)?;
    Some(AumEntry {
        amount: parsed.value,
        currency: currency_code(parsed.currency.iso()),
    })
}

fn shares_count_pattern() -> Regex {
    // "Количество паёв в обращении: 35 800 000" and close variants.
    Regex::new(r"(?i)(?:количество\s+па[её]в[^0-9]{0,80}|shares\s+outstanding[^0-9]{0,80})([\d\s\u{a0}\u{202f}]{1,30})")
        .expect("shares pattern is valid")
}

fn extract_shares_count(pattern: &Regex, html: &str) -> Option<u64> {
    let capture = pattern.captures(html)?.get(1)?;
    let digits: String = capture
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok().filter(|n| *n > 0)
}

#[async_trait]
impl FundStatsService for FundStatsClient {
    async fn snapshot(
        &self,
        tickers: &[String],
        last_prices: &HashMap<String, f64>,
    ) -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::new();
        snapshot.fx.extend(self.fx_rates.iter().map(|(k, v)| (*k, *v)));

        for ticker in tickers {
            if let Some(aum) = self.fetch_aum(ticker).await {
                snapshot.aum.insert(ticker.clone(), aum);
            }
            if let Some(shares) = self.fetch_shares(ticker).await {
                snapshot.shares.insert(ticker.clone(), shares);
                snapshot
                    .shares_url
                    .insert(ticker.clone(), self.shares_url(ticker));
                if let Some(price) = last_prices.get(ticker) {
                    let cap = shares as f64 * price;
                    if cap.is_finite() && cap > 0.0 {
                        snapshot.market_cap.insert(ticker.clone(), cap);
                    }
                }
            }
            debug!(
                ticker = ticker.as_str(),
                aum = snapshot.aum.contains_key(ticker.as_str()),
                shares = snapshot.shares.contains_key(ticker.as_str()),
                "fund stats gathered"
            );
        }
        snapshot
    }
}
