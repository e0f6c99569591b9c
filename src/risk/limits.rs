//! Hard account-level risk limits
//!
//! Validated once at construction and immutable afterwards. All
//! percent-like fields are fractional (0.02 = 2%).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{GambitError, Result};

/// Limit set the risk gate enforces on every proposed entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Worst-case loss a single trade may put at risk
    #[serde(default = "default_max_loss_per_trade_pct")]
    pub max_loss_per_trade_pct: Decimal,
    /// Largest stake relative to balance
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: Decimal,
    /// Smallest meaningful stake relative to balance
    #[serde(default = "default_min_position_size_pct")]
    pub min_position_size_pct: Decimal,
    /// Drawdown at which trading halts until an operator resumes
    #[serde(default = "default_max_total_drawdown_pct")]
    pub max_total_drawdown_pct: Decimal,
    /// Drawdown at which warnings start without denying entries
    #[serde(default = "default_warning_drawdown_pct")]
    pub warning_drawdown_pct: Decimal,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,
    #[serde(default = "default_max_positions_per_pair")]
    pub max_positions_per_pair: u32,
    /// Leverage ceiling the execution layer may apply; entry checks here
    /// treat stakes as unlevered
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,
}

fn default_max_loss_per_trade_pct() -> Decimal {
    dec!(0.02)
}

fn default_max_position_size_pct() -> Decimal {
    dec!(0.10)
}

fn default_min_position_size_pct() -> Decimal {
    dec!(0.01)
}

fn default_max_total_drawdown_pct() -> Decimal {
    dec!(0.25)
}

fn default_warning_drawdown_pct() -> Decimal {
    dec!(0.10)
}

fn default_max_concurrent_positions() -> u32 {
    5
}

fn default_max_positions_per_pair() -> u32 {
    1
}

fn default_max_leverage() -> Decimal {
    Decimal::ONE
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_loss_per_trade_pct: default_max_loss_per_trade_pct(),
            max_position_size_pct: default_max_position_size_pct(),
            min_position_size_pct: default_min_position_size_pct(),
            max_total_drawdown_pct: default_max_total_drawdown_pct(),
            warning_drawdown_pct: default_warning_drawdown_pct(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_positions_per_pair: default_max_positions_per_pair(),
            max_leverage: default_max_leverage(),
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<()> {
        let fraction_fields = [
            ("max_loss_per_trade_pct", self.max_loss_per_trade_pct),
            ("max_position_size_pct", self.max_position_size_pct),
            ("max_total_drawdown_pct", self.max_total_drawdown_pct),
        ];
        for (name, value) in fraction_fields {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(GambitError::InvalidConfig(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.min_position_size_pct < Decimal::ZERO {
            return Err(GambitError::InvalidConfig(format!(
                "min_position_size_pct cannot be negative, got {}",
                self.min_position_size_pct
            )));
        }
        if self.min_position_size_pct > self.max_position_size_pct {
            return Err(GambitError::InvalidConfig(format!(
                "min_position_size_pct {} exceeds max_position_size_pct {}",
                self.min_position_size_pct, self.max_position_size_pct
            )));
        }
        if self.warning_drawdown_pct < Decimal::ZERO
            || self.warning_drawdown_pct >= self.max_total_drawdown_pct
        {
            return Err(GambitError::InvalidConfig(format!(
                "warning_drawdown_pct {} must be below max_total_drawdown_pct {}",
                self.warning_drawdown_pct, self.max_total_drawdown_pct
            )));
        }
        if self.max_concurrent_positions == 0 {
            return Err(GambitError::InvalidConfig(
                "max_concurrent_positions must be at least 1".to_string(),
            ));
        }
        if self.max_positions_per_pair == 0 {
            return Err(GambitError::InvalidConfig(
                "max_positions_per_pair must be at least 1".to_string(),
            ));
        }
        if self.max_leverage < Decimal::ONE {
            return Err(GambitError::InvalidConfig(format!(
                "max_leverage must be at least 1, got {}",
                self.max_leverage
            )));
        }
        Ok(())
    }
}
