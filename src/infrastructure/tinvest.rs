//! T-Invest REST adapter.
//!
//! Talks to the public REST gateway (`tinkoff.public.invest.api.
//! contract.v1.*` service methods, POST + JSON + Bearer auth) and maps
//! the wire payloads onto the domain model. The gateway renders int64
//! quotation fields as strings, so numeric fields are parsed tolerantly.

use crate::domain::errors::RpcError;
use crate::domain::instrument::{Instrument, InstrumentCatalog};
use crate::domain::money::Money;
use crate::domain::ports::{
    BrokerAccount, BrokerService, OrderDirection, OrderRequest, TradingDay,
};
use crate::domain::position::{Position, Wallet};
use crate::infrastructure::http_client_factory::ClientProfile;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://invest-public-api.tinkoff.ru/rest";

pub struct TInvestClient {
    client: ClientWithMiddleware,
    base_url: String,
    token: String,
    call_timeout_ms: u64,
}

impl TInvestClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let profile = ClientProfile::broker();
        Self {
            client: profile.build(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            call_timeout_ms: profile.call_timeout_ms(),
        }
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<R, RpcError> {
        let url = format!(
            "{}/tinkoff.public.invest.api.contract.v1.{}",
            self.base_url, method
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|err| classify_transport_error(err, self.call_timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, method, &text));
        }

        response.json::<R>().await.map_err(|err| {
            warn!(method, error = %err, "undecodable broker response");
            RpcError::Unavailable {
                reason: format!("{method}: bad response body"),
            }
        })
    }
}

fn classify_transport_error(err: reqwest_middleware::Error, deadline_ms: u64) -> RpcError {
    let timed_out = match &err {
        reqwest_middleware::Error::Reqwest(e) => e.is_timeout(),
        reqwest_middleware::Error::Middleware(_) => false,
    };
    if timed_out {
        RpcError::Timeout {
            duration_ms: deadline_ms,
        }
    } else {
        RpcError::Unavailable {
            reason: err.to_string(),
        }
    }
}

fn classify_status(
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    method: &str,
    body: &str,
) -> RpcError {
    match status.as_u16() {
        401 | 403 => RpcError::Unauthorized {
            reason: format!("{method}: {status}"),
        },
        429 => RpcError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        },
        _ => RpcError::Unavailable {
            reason: format!("{method}: {status} {}", body.chars().take(200).collect::<String>()),
        },
    }
}

// ---------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------

/// The REST gateway serializes int64 as JSON strings.
fn flexible_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Str(s) => s.parse::<i64>().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct QuotationDto {
    #[serde(default, deserialize_with = "flexible_i64")]
    units: i64,
    #[serde(default)]
    nano: i32,
}

impl QuotationDto {
    fn money(self) -> Money {
        Money::from_parts(Some(self.units), Some(self.nano))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MoneyValueDto {
    #[serde(default, deserialize_with = "flexible_i64")]
    units: i64,
    #[serde(default)]
    nano: i32,
    #[serde(default)]
    currency: String,
}

impl MoneyValueDto {
    fn money(&self) -> Money {
        Money::from_parts(Some(self.units), Some(self.nano))
    }
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    accounts: Vec<AccountDto>,
}

#[derive(Debug, Deserialize)]
struct AccountDto {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResponse {
    #[serde(default)]
    instruments: Vec<InstrumentDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentDto {
    figi: String,
    ticker: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    class_code: String,
    #[serde(default)]
    exchange: String,
    #[serde(default = "default_lot")]
    lot: u32,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    api_trade_available_flag: bool,
}

fn default_lot() -> u32 {
    1
}

impl InstrumentDto {
    fn into_domain(self) -> Instrument {
        Instrument {
            ticker: self.ticker,
            figi: self.figi,
            uid: self.uid,
            class_code: self.class_code,
            exchange: self.exchange,
            lot: self.lot.max(1),
            currency: self.currency.to_uppercase(),
            api_trade_available: self.api_trade_available_flag,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PortfolioResponse {
    #[serde(default)]
    positions: Vec<PortfolioPositionDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioPositionDto {
    figi: String,
    #[serde(default)]
    instrument_type: String,
    #[serde(default)]
    quantity: QuotationDto,
    average_position_price_fifo: Option<MoneyValueDto>,
    current_price: Option<MoneyValueDto>,
}

#[derive(Debug, Deserialize)]
struct LastPricesResponse {
    #[serde(default, rename = "lastPrices")]
    last_prices: Vec<LastPriceDto>,
}

#[derive(Debug, Deserialize)]
struct LastPriceDto {
    figi: String,
    price: Option<QuotationDto>,
}

#[derive(Debug, Deserialize)]
struct SchedulesResponse {
    #[serde(default)]
    exchanges: Vec<ScheduleDto>,
}

#[derive(Debug, Deserialize)]
struct ScheduleDto {
    #[serde(default)]
    days: Vec<TradingDayDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradingDayDto {
    date: String,
    #[serde(default)]
    is_trading_day: bool,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------
// Wire -> domain mapping (pure, unit-tested)
// ---------------------------------------------------------------------

fn wallet_from_positions(
    positions: Vec<PortfolioPositionDto>,
    catalog: &InstrumentCatalog,
) -> Wallet {
    let mut wallet = Wallet::default();
    for dto in positions {
        let amount = dto.quantity.money().to_f64();
        if dto.instrument_type.eq_ignore_ascii_case("currency") {
            let iso = dto
                .current_price
                .as_ref()
                .map(|p| p.currency.to_uppercase())
                .filter(|c| !c.is_empty())
                .or_else(|| {
                    catalog
                        .find_by_figi(&dto.figi)
                        .map(|i| i.currency.clone())
                })
                .unwrap_or_else(|| "RUB".to_string());
            wallet.positions.push(Position {
                base: iso.clone(),
                quote: iso,
                figi: Some(dto.figi),
                amount,
                lot_size: 1,
                price: dto.current_price.as_ref().map(|p| p.money()),
                ..Position::default()
            });
            continue;
        }

        let Some(instrument) = catalog.find_by_figi(&dto.figi) else {
            // A holding the catalog no longer lists cannot be sized.
            debug!(figi = dto.figi.as_str(), "position without catalog entry");
            continue;
        };
        wallet.positions.push(Position {
            base: instrument.ticker.clone(),
            quote: instrument.currency.clone(),
            figi: Some(dto.figi),
            amount,
            lot_size: instrument.lot.max(1),
            price: dto.current_price.as_ref().map(|p| p.money()),
            average_position_price_fifo: dto
                .average_position_price_fifo
                .as_ref()
                .map(|p| p.money()),
            ..Position::default()
        });
    }

    // Exactly one cash position, even when the broker omits an empty
    // RUB balance.
    if wallet.cash().is_none() {
        wallet.positions.push(Position {
            base: "RUB".to_string(),
            quote: "RUB".to_string(),
            amount: 0.0,
            lot_size: 1,
            ..Position::default()
        });
    }
    wallet
}

fn days_from_response(response: SchedulesResponse) -> Vec<TradingDay> {
    response
        .exchanges
        .into_iter()
        .flat_map(|s| s.days)
        .filter_map(|day| {
            let date = day
                .date
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())?;
            Some(TradingDay {
                date,
                is_trading_day: day.is_trading_day,
                start_time: day.start_time,
                end_time: day.end_time,
            })
        })
        .collect()
}

#[async_trait]
impl BrokerService for TInvestClient {
    async fn accounts(&self) -> Result<Vec<BrokerAccount>, RpcError> {
        let response: AccountsResponse = self
            .call("UsersService/GetAccounts", json!({}))
            .await?;
        Ok(response
            .accounts
            .into_iter()
            .map(|a| BrokerAccount {
                id: a.id,
                name: a.name,
            })
            .collect())
    }

    async fn instruments(&self) -> Result<InstrumentCatalog, RpcError> {
        let mut catalog = InstrumentCatalog::default();
        for kind in ["Etfs", "Shares", "Bonds", "Currencies"] {
            let response: InstrumentsResponse = self
                .call(
                    &format!("InstrumentsService/{kind}"),
                    json!({"instrumentStatus": "INSTRUMENT_STATUS_BASE"}),
                )
                .await?;
            for dto in response.instruments {
                catalog.insert(dto.into_domain());
            }
        }
        debug!(instruments = catalog.len(), "catalog refreshed");
        Ok(catalog)
    }

    async fn portfolio(
        &self,
        account_id: &str,
        catalog: &InstrumentCatalog,
    ) -> Result<Wallet, RpcError> {
        let response: PortfolioResponse = self
            .call(
                "OperationsService/GetPortfolio",
                json!({"accountId": account_id, "currency": "RUB"}),
            )
            .await?;
        Ok(wallet_from_positions(response.positions, catalog))
    }

    async fn last_prices(&self, figis: &[String]) -> Result<HashMap<String, Money>, RpcError> {
        let response: LastPricesResponse = self
            .call(
                "MarketDataService/GetLastPrices",
                json!({"figi": figis, "instrumentId": figis}),
            )
            .await?;
        Ok(response
            .last_prices
            .into_iter()
            .filter_map(|p| p.price.map(|q| (p.figi, q.money())))
            .collect())
    }

    async fn post_order(&self, order: &OrderRequest) -> Result<(), RpcError> {
        let direction = match order.direction {
            OrderDirection::Buy => "ORDER_DIRECTION_BUY",
            OrderDirection::Sell => "ORDER_DIRECTION_SELL",
        };
        let _: serde_json::Value = self
            .call(
                "OrdersService/PostOrder",
                json!({
                    "accountId": order.account_id,
                    "instrumentId": order.figi,
                    "quantity": order.lots.to_string(),
                    "direction": direction,
                    "orderType": "ORDER_TYPE_MARKET",
                    "orderId": order.order_id.to_string(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn trading_schedule(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDay>, RpcError> {
        let response: SchedulesResponse = self
            .call(
                "InstrumentsService/TradingSchedules",
                json!({
                    "exchange": exchange,
                    "from": from.to_rfc3339(),
                    "to": to.to_rfc3339(),
                }),
            )
            .await?;
        Ok(days_from_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotation_accepts_string_and_numeric_units() {
        let q: QuotationDto = serde_json::from_str(r#"{"units": "114", "nano": 250000000}"#).unwrap();
        assert_eq!(q.money().to_f64(), 114.25);

        let q: QuotationDto = serde_json::from_str(r#"{"units": 7}"#).unwrap();
        assert_eq!(q.money().to_f64(), 7.0);

        // Absent units read as zero.
        let q: QuotationDto = serde_json::from_str(r#"{"nano": 500000000}"#).unwrap();
        assert_eq!(q.money().to_f64(), 0.5);
    }

    fn catalog() -> InstrumentCatalog {
        InstrumentCatalog::new(vec![Instrument {
            ticker: "TRUR".to_string(),
            figi: "BBG000000TRUR".to_string(),
            uid: "uid-trur".to_string(),
            class_code: "TQTF".to_string(),
            exchange: "MOEX".to_string(),
            lot: 10,
            currency: "RUB".to_string(),
            api_trade_available: true,
        }])
    }

    #[test]
    fn test_wallet_mapping_links_catalog_metadata() {
        let positions: Vec<PortfolioPositionDto> = serde_json::from_str(
            r#"[
                {"figi": "BBG000000TRUR", "instrumentType": "etf",
                 "quantity": {"units": "30"},
                 "currentPrice": {"units": "6", "nano": 500000000, "currency": "rub"},
                 "averagePositionPriceFifo": {"units": "5", "currency": "rub"}},
                {"figi": "RUB000UTSTOM", "instrumentType": "currency",
                 "quantity": {"units": "1500", "nano": 250000000},
                 "currentPrice": {"units": "1", "currency": "rub"}}
            ]"#,
        )
        .unwrap();
        let wallet = wallet_from_positions(positions, &catalog());

        let trur = wallet.find("TRUR").unwrap();
        assert_eq!(trur.amount, 30.0);
        assert_eq!(trur.lot_size, 10);
        assert_eq!(trur.price.unwrap().to_f64(), 6.5);
        assert_eq!(trur.average_position_price_fifo.unwrap().to_f64(), 5.0);

        let cash = wallet.cash().unwrap();
        assert_eq!(cash.base, "RUB");
        assert_eq!(cash.amount, 1500.25);
    }

    #[test]
    fn test_wallet_mapping_synthesizes_missing_cash() {
        let wallet = wallet_from_positions(vec![], &catalog());
        let cash = wallet.cash().unwrap();
        assert_eq!(cash.base, "RUB");
        assert_eq!(cash.amount, 0.0);
    }

    #[test]
    fn test_wallet_mapping_drops_uncataloged_security() {
        let positions: Vec<PortfolioPositionDto> = serde_json::from_str(
            r#"[{"figi": "BBG_UNKNOWN", "instrumentType": "etf",
                 "quantity": {"units": "5"}}]"#,
        )
        .unwrap();
        let wallet = wallet_from_positions(positions, &catalog());
        assert_eq!(wallet.positions.len(), 1); // just the synthetic cash
        assert!(wallet.cash().is_some());
    }

    #[test]
    fn test_schedule_days_parse() {
        let response: SchedulesResponse = serde_json::from_str(
            r#"{"exchanges": [{"exchange": "MOEX", "days": [
                {"date": "2024-06-03T00:00:00Z", "isTradingDay": true,
                 "startTime": "2024-06-03T06:50:00Z",
                 "endTime": "2024-06-03T15:39:00Z"},
                {"date": "2024-06-04", "isTradingDay": false}
            ]}]}"#,
        )
        .unwrap();
        let days = days_from_response(response);
        assert_eq!(days.len(), 2);
        assert!(days[0].is_trading_day);
        assert!(days[0].start_time.is_some());
        assert!(!days[1].is_trading_day);
        assert_eq!(days[1].start_time, None);
    }

    #[test]
    fn test_status_classification() {
        let err = classify_status(reqwest::StatusCode::UNAUTHORIZED, None, "m", "");
        assert!(matches!(err, RpcError::Unauthorized { .. }));
        let err = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, Some(7), "m", "");
        assert!(matches!(err, RpcError::RateLimited { retry_after_secs: 7 }));
        let err = classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, None, "m", "");
        assert!(matches!(err, RpcError::Unavailable { .. }));
    }
}
