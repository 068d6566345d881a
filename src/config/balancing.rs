use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy that turns the configured allocation into concrete
/// percentages each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DesiredMode {
    /// Use configured weights verbatim.
    #[default]
    #[serde(rename = "manual")]
    Manual,
    /// Configured weights, with unset tickers splitting the remainder.
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "marketcap")]
    MarketCap,
    #[serde(rename = "aum")]
    Aum,
    /// Weight by `market cap - AUM` where positive.
    #[serde(rename = "decorrelation")]
    Decorrelation,
    #[serde(rename = "marketcap_aum")]
    MarketCapAum,
    #[serde(rename = "aum_decorrelation")]
    AumDecorrelation,
    /// Decorrelation-positive universe, re-weighted by market cap.
    #[serde(rename = "decorrelation_marketcap")]
    DecorrelationMarketCap,
}

impl DesiredMode {
    /// Whether resolving this mode requires the fund-stats snapshot.
    pub fn needs_market_data(self) -> bool {
        !matches!(self, DesiredMode::Manual | DesiredMode::Default)
    }
}

impl fmt::Display for DesiredMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DesiredMode::Manual => "manual",
            DesiredMode::Default => "default",
            DesiredMode::MarketCap => "marketcap",
            DesiredMode::Aum => "aum",
            DesiredMode::Decorrelation => "decorrelation",
            DesiredMode::MarketCapAum => "marketcap_aum",
            DesiredMode::AumDecorrelation => "aum_decorrelation",
            DesiredMode::DecorrelationMarketCap => "decorrelation_marketcap",
        };
        write!(f, "{name}")
    }
}

/// What to do with a per-instrument target that overflows
/// `max_margin_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginStrategy {
    /// Keep the overflow when it is within `free_threshold`.
    KeepIfSmall,
    /// Hard-clamp to the cap.
    #[default]
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginConfig {
    pub enabled: bool,
    /// Leverage applied to the desired-value baseline, 1 to 4.
    pub multiplier: f64,
    pub free_threshold: f64,
    /// Per-instrument target cap in RUB.
    pub max_margin_size: f64,
    pub balancing_strategy: MarginStrategy,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            multiplier: 1.0,
            free_threshold: 0.0,
            max_margin_size: 0.0,
            balancing_strategy: MarginStrategy::Remove,
        }
    }
}

/// How to raise cash when a non-marginal instrument must be bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellMode {
    OnlyPositivePositionsSell,
    EqualInPercents,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyRequiresSellConfig {
    pub enabled: bool,
    /// Non-marginal tickers whose purchases must be cash-funded.
    pub instruments: Vec<String>,
    pub mode: SellMode,
    /// Buys below this percentage of portfolio value are churn and get
    /// suppressed (strict less-than).
    pub min_buy_rebalance_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureMode {
    /// Sleep through the iteration.
    #[default]
    SkipIteration,
    /// Run the engine on stale prices for telemetry, place no orders.
    UpdateIterationResult,
    /// Attempt orders regardless.
    ForceOrders,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosureBehavior {
    pub mode: ClosureMode,
}
