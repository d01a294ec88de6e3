//! Risk configuration (limits + blacklist).
//!
//! Built once at startup and held immutably by the risk checker. There is
//! no file loading here — the caller constructs the struct and runs
//! `validate()` before wiring it in.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-symbol position limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLimits {
    /// Hard cap on |position| after any order. Must be ≥ 1.
    pub max_position_size: i64,
    /// Max share of portfolio value a single order's notional may take,
    /// as a fraction in [0.01, 1.00].
    pub max_position_pct: f64,
}

/// Portfolio-wide exposure limits, in account currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioLimits {
    pub max_total_notional: f64,
    pub max_long_exposure: f64,
    pub max_short_exposure: f64,
}

/// Loss thresholds consumed by the (external) loss evaluator when it
/// decides to trip the breaker. Held and validated here; no P&L math in
/// this subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossLimits {
    /// Positive threshold; the evaluator trips when pnl < −limit.
    pub daily_loss_limit: f64,
    /// Fraction in [0.01, 0.50].
    pub max_drawdown_pct: f64,
}

/// Full risk configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub position: PositionLimits,
    pub portfolio: PortfolioLimits,
    pub loss: LossLimits,
    /// Symbols that are never tradable.
    pub blacklist: BTreeSet<String>,
}

impl RiskConfig {
    pub fn sane_defaults() -> Self {
        Self {
            position: PositionLimits {
                max_position_size: 1_000,
                max_position_pct: 0.10,
            },
            portfolio: PortfolioLimits {
                max_total_notional: 1_000_000.0,
                max_long_exposure: 500_000.0,
                max_short_exposure: 500_000.0,
            },
            loss: LossLimits {
                daily_loss_limit: 10_000.0,
                max_drawdown_pct: 0.20,
            },
            blacklist: BTreeSet::new(),
        }
    }

    pub fn is_blacklisted(&self, symbol: &str) -> bool {
        self.blacklist.contains(symbol)
    }

    /// Range checks per the documented contract. Run once at startup;
    /// a config that fails here must never reach the checker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.position.max_position_size < 1 {
            return Err(ConfigError::NonPositive {
                field: "position.max_position_size",
                value: self.position.max_position_size,
            });
        }
        check_fraction(
            "position.max_position_pct",
            self.position.max_position_pct,
            0.01,
            1.00,
        )?;
        check_currency("portfolio.max_total_notional", self.portfolio.max_total_notional)?;
        check_currency("portfolio.max_long_exposure", self.portfolio.max_long_exposure)?;
        check_currency("portfolio.max_short_exposure", self.portfolio.max_short_exposure)?;
        check_currency("loss.daily_loss_limit", self.loss.daily_loss_limit)?;
        check_fraction("loss.max_drawdown_pct", self.loss.max_drawdown_pct, 0.01, 0.50)?;
        Ok(())
    }
}

fn check_fraction(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_currency(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::BadCurrency { field, value });
    }
    Ok(())
}

/// A limit value outside its documented range.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NonPositive { field: &'static str, value: i64 },
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    BadCurrency { field: &'static str, value: f64 },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NonPositive { field, value } => {
                write!(f, "config {field}: {value} must be >= 1")
            }
            ConfigError::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(f, "config {field}: {value} outside [{min}, {max}]"),
            ConfigError::BadCurrency { field, value } => {
                write!(f, "config {field}: {value} must be a finite amount >= 0")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sane_defaults_validate() {
        RiskConfig::sane_defaults().validate().unwrap();
    }

    #[test]
    fn zero_position_size_rejected() {
        let mut cfg = RiskConfig::sane_defaults();
        cfg.position.max_position_size = 0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::NonPositive { field, .. }
            if field == "position.max_position_size"));
    }

    #[test]
    fn fraction_bounds_enforced() {
        let mut cfg = RiskConfig::sane_defaults();
        cfg.position.max_position_pct = 1.5;
        assert!(cfg.validate().is_err());

        cfg.position.max_position_pct = 0.009;
        assert!(cfg.validate().is_err());

        cfg.position.max_position_pct = 1.0;
        cfg.validate().unwrap();
    }

    #[test]
    fn nan_currency_rejected() {
        let mut cfg = RiskConfig::sane_defaults();
        cfg.portfolio.max_total_notional = f64::NAN;
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::BadCurrency { .. }
        ));
    }

    #[test]
    fn blacklist_lookup() {
        let mut cfg = RiskConfig::sane_defaults();
        cfg.blacklist.insert("GME".to_string());
        assert!(cfg.is_blacklisted("GME"));
        assert!(!cfg.is_blacklisted("AAPL"));
    }
}
