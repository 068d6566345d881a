//! Configuration for the balancer daemon.
//!
//! Accounts are declared in a JSON file (`CONFIG.json` by default), one
//! entry per brokerage account, each carrying its token, its desired
//! allocation and the balancing knobs. Tokens may reference environment
//! variables with the literal `${NAME}` form.

mod balancing;

pub use balancing::{
    BuyRequiresSellConfig, ClosureBehavior, ClosureMode, DesiredMode, MarginConfig, MarginStrategy,
    SellMode,
};

use anyhow::{Context, Result, bail};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::Path;

/// Which brokerage account an entry drives: a literal account id, or an
/// index into the token's account list (`INDEX:n` or a bare integer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AccountSelector {
    Literal(String),
    Index(usize),
}

impl<'de> Deserialize<'de> for AccountSelector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => {
                let idx = n.as_u64().ok_or_else(|| {
                    de::Error::custom("account_id index must be a non-negative integer")
                })?;
                Ok(AccountSelector::Index(idx as usize))
            }
            serde_json::Value::String(s) => {
                if let Some(rest) = s.strip_prefix("INDEX:") {
                    let idx = rest
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| de::Error::custom(format!("bad account index: {s}")))?;
                    Ok(AccountSelector::Index(idx))
                } else {
                    Ok(AccountSelector::Literal(s))
                }
            }
            other => Err(de::Error::custom(format!(
                "account_id must be a string or integer, got {other}"
            ))),
        }
    }
}

fn default_exchange() -> String {
    "MOEX".to_string()
}

fn default_balance_interval() -> u64 {
    3_600_000
}

fn default_sleep_between_orders() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Broker API token, or `${ENV_VAR}` resolved at load time.
    pub t_invest_token: String,
    pub account_id: AccountSelector,
    /// Ticker -> percent. Interpretation depends on `desired_mode`.
    pub desired_wallet: HashMap<String, f64>,
    #[serde(default)]
    pub desired_mode: DesiredMode,
    /// Milliseconds between ticks.
    #[serde(default = "default_balance_interval")]
    pub balance_interval: u64,
    /// Milliseconds between consecutive order submissions.
    #[serde(default = "default_sleep_between_orders")]
    pub sleep_between_orders: u64,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default)]
    pub margin_trading: MarginConfig,
    #[serde(default)]
    pub buy_requires_total_marginal_sell: BuyRequiresSellConfig,
    #[serde(default)]
    pub exchange_closure_behavior: ClosureBehavior,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub accounts: Vec<AccountConfig>,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: AppConfig =
            serde_json::from_str(raw).context("failed to parse config JSON")?;
        for account in &mut config.accounts {
            account.t_invest_token = substitute_env(&account.t_invest_token)
                .with_context(|| format!("account {}: token", account.id))?;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.accounts.is_empty() {
            bail!("config must declare at least one account");
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.id.is_empty() {
                bail!("account id must not be empty");
            }
            if !seen.insert(account.id.as_str()) {
                bail!("duplicate account id: {}", account.id);
            }
            if account.t_invest_token.is_empty() {
                bail!("account {}: empty broker token", account.id);
            }
            if account.desired_wallet.is_empty() {
                bail!("account {}: desired_wallet must not be empty", account.id);
            }
            for (ticker, percent) in &account.desired_wallet {
                if !percent.is_finite() || *percent < 0.0 {
                    bail!(
                        "account {}: desired weight for {} must be a non-negative number, got {}",
                        account.id,
                        ticker,
                        percent
                    );
                }
            }
            if account.balance_interval == 0 {
                bail!("account {}: balance_interval must be positive", account.id);
            }

            let margin = &account.margin_trading;
            if margin.enabled {
                if !(1.0..=4.0).contains(&margin.multiplier) {
                    bail!(
                        "account {}: margin multiplier must be within [1, 4], got {}",
                        account.id,
                        margin.multiplier
                    );
                }
                if margin.max_margin_size < 0.0 || margin.free_threshold < 0.0 {
                    bail!(
                        "account {}: margin thresholds must be non-negative",
                        account.id
                    );
                }
            }

            let brs = &account.buy_requires_total_marginal_sell;
            if brs.min_buy_rebalance_percent < 0.0 || !brs.min_buy_rebalance_percent.is_finite() {
                bail!(
                    "account {}: min_buy_rebalance_percent must be non-negative",
                    account.id
                );
            }
            if brs.enabled && brs.instruments.is_empty() && brs.mode != SellMode::None {
                bail!(
                    "account {}: buy_requires_total_marginal_sell enabled without instruments",
                    account.id
                );
            }
        }
        Ok(())
    }
}

/// Literal `${NAME}` -> environment lookup. Anything else passes through
/// untouched.
fn substitute_env(value: &str) -> Result<String> {
    let Some(name) = value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Ok(value.to_string());
    };
    env::var(name).with_context(|| format!("environment variable {name} is not set"))
}
