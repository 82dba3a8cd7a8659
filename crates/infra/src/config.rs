//! Ledger configuration.
//!
//! Every setting has a default; environment variables override them:
//!
//! | variable | default |
//! |----------|---------|
//! | `MANUERP_NEGATIVE_STOCK_POLICY` | `reject` (or `clamp`) |
//! | `MANUERP_MAX_CONCURRENCY_RETRIES` | `16` |
//! | `MANUERP_DEFAULT_LEAD_TIME_DAYS` | `14` |
//! | `MANUERP_FORECAST_LOOKBACK_MONTHS` | `12` |
//! | `MANUERP_FORECAST_VALIDITY_MONTHS` | `3` |

use std::str::FromStr;

use anyhow::Context;
use thiserror::Error;

use manuerp_inventory::NegativeStockPolicy;

use crate::command_dispatcher::DEFAULT_MAX_RETRIES;

pub const ENV_NEGATIVE_STOCK_POLICY: &str = "MANUERP_NEGATIVE_STOCK_POLICY";
pub const ENV_MAX_CONCURRENCY_RETRIES: &str = "MANUERP_MAX_CONCURRENCY_RETRIES";
pub const ENV_DEFAULT_LEAD_TIME_DAYS: &str = "MANUERP_DEFAULT_LEAD_TIME_DAYS";
pub const ENV_FORECAST_LOOKBACK_MONTHS: &str = "MANUERP_FORECAST_LOOKBACK_MONTHS";
pub const ENV_FORECAST_VALIDITY_MONTHS: &str = "MANUERP_FORECAST_VALIDITY_MONTHS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Policy for outbound movements that exceed stock, when a request does not pick one.
    pub negative_stock_policy: NegativeStockPolicy,
    /// Reload-and-retry budget after a stale stream version.
    pub max_concurrency_retries: u32,
    /// Lead time for items without a supplier, or whose supplier has none on file.
    pub default_lead_time_days: u32,
    pub forecast_lookback_months: u32,
    pub forecast_validity_months: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            negative_stock_policy: NegativeStockPolicy::Reject,
            max_concurrency_retries: DEFAULT_MAX_RETRIES,
            default_lead_time_days: 14,
            forecast_lookback_months: 12,
            forecast_validity_months: 3,
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup(ENV_NEGATIVE_STOCK_POLICY) {
            cfg.negative_stock_policy = parse(ENV_NEGATIVE_STOCK_POLICY, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_CONCURRENCY_RETRIES) {
            cfg.max_concurrency_retries = parse(ENV_MAX_CONCURRENCY_RETRIES, &v)?;
        }
        if let Some(v) = lookup(ENV_DEFAULT_LEAD_TIME_DAYS) {
            cfg.default_lead_time_days = parse(ENV_DEFAULT_LEAD_TIME_DAYS, &v)?;
        }
        if let Some(v) = lookup(ENV_FORECAST_LOOKBACK_MONTHS) {
            cfg.forecast_lookback_months = positive(ENV_FORECAST_LOOKBACK_MONTHS, &v)?;
        }
        if let Some(v) = lookup(ENV_FORECAST_VALIDITY_MONTHS) {
            cfg.forecast_validity_months = positive(ENV_FORECAST_VALIDITY_MONTHS, &v)?;
        }

        Ok(cfg)
    }

    /// `from_env`, logging the effective settings. For binaries.
    pub fn load() -> anyhow::Result<Self> {
        let cfg = Self::from_env().context("invalid ledger configuration")?;
        tracing::info!(
            negative_stock_policy = ?cfg.negative_stock_policy,
            max_concurrency_retries = cfg.max_concurrency_retries,
            default_lead_time_days = cfg.default_lead_time_days,
            forecast_lookback_months = cfg.forecast_lookback_months,
            forecast_validity_months = cfg.forecast_validity_months,
            "ledger configuration loaded"
        );
        Ok(cfg)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn positive(var: &'static str, value: &str) -> Result<u32, ConfigError> {
    match parse::<u32>(var, value)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        }),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = LedgerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, LedgerConfig::default());
        assert_eq!(cfg.negative_stock_policy, NegativeStockPolicy::Reject);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = LedgerConfig::from_lookup(lookup(&[
            (ENV_NEGATIVE_STOCK_POLICY, "clamp"),
            (ENV_MAX_CONCURRENCY_RETRIES, " 40 "),
            (ENV_DEFAULT_LEAD_TIME_DAYS, "7"),
            (ENV_FORECAST_LOOKBACK_MONTHS, "6"),
            (ENV_FORECAST_VALIDITY_MONTHS, "1"),
        ]))
        .unwrap();

        assert_eq!(cfg.negative_stock_policy, NegativeStockPolicy::ClampToZero);
        assert_eq!(cfg.max_concurrency_retries, 40);
        assert_eq!(cfg.default_lead_time_days, 7);
        assert_eq!(cfg.forecast_lookback_months, 6);
        assert_eq!(cfg.forecast_validity_months, 1);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = LedgerConfig::from_lookup(lookup(&[(ENV_MAX_CONCURRENCY_RETRIES, "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: ENV_MAX_CONCURRENCY_RETRIES, .. }
        ));

        assert!(LedgerConfig::from_lookup(lookup(&[(ENV_NEGATIVE_STOCK_POLICY, "maybe")])).is_err());
        assert!(LedgerConfig::from_lookup(lookup(&[(ENV_FORECAST_VALIDITY_MONTHS, "0")])).is_err());
    }
}
