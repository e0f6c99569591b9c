//! Position sizing
//!
//! Turns an approved signal into a stake through one of five methods,
//! dispatched by a closed enum:
//! - fixed_fraction: flat fraction of balance
//! - risk_based: fixed risk amount translated through the stop distance
//! - kelly: half-Kelly from trailing trade statistics
//! - ai_weighted: risk_based scaled by model confidence
//! - atr_based: risk_based with the stop derived from ATR
//!
//! Positive stakes funnel through one shared [min, max] clamp. An exact
//! zero means "do not trade" and bypasses the clamp; the floor exists
//! to make approved trades meaningful, not to force declined ones.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GambitError, Result};
use crate::risk::RiskLimits;

/// Half-Kelly damping applied to the raw Kelly fraction
const KELLY_DAMPING: f64 = 0.5;

// ============================================================================
// Method and Configuration
// ============================================================================

/// Closed set of sizing methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    FixedFraction,
    RiskBased,
    Kelly,
    AiWeighted,
    AtrBased,
}

impl SizingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMethod::FixedFraction => "fixed_fraction",
            SizingMethod::RiskBased => "risk_based",
            SizingMethod::Kelly => "kelly",
            SizingMethod::AiWeighted => "ai_weighted",
            SizingMethod::AtrBased => "atr_based",
        }
    }
}

impl std::fmt::Display for SizingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sizing parameters shared by every method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Fraction of balance put at risk per trade
    #[serde(default = "default_base_risk_pct")]
    pub base_risk_pct: Decimal,
    /// ai_weighted returns a zero stake below this confidence
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Multiplier applied at exactly min_confidence
    #[serde(default = "default_low_confidence_multiplier")]
    pub low_confidence_multiplier: f64,
    /// Multiplier applied at confidence 1.0
    #[serde(default = "default_high_confidence_multiplier")]
    pub high_confidence_multiplier: f64,
    /// Stop distance in ATR units for atr_based sizing
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: Decimal,
}

fn default_base_risk_pct() -> Decimal {
    dec!(0.02)
}

fn default_min_confidence() -> f64 {
    0.55
}

fn default_low_confidence_multiplier() -> f64 {
    0.5
}

fn default_high_confidence_multiplier() -> f64 {
    1.5
}

fn default_atr_multiplier() -> Decimal {
    dec!(2.0)
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_risk_pct: default_base_risk_pct(),
            min_confidence: default_min_confidence(),
            low_confidence_multiplier: default_low_confidence_multiplier(),
            high_confidence_multiplier: default_high_confidence_multiplier(),
            atr_multiplier: default_atr_multiplier(),
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_risk_pct <= Decimal::ZERO || self.base_risk_pct > Decimal::ONE {
            return Err(GambitError::InvalidConfig(format!(
                "base_risk_pct must be in (0, 1], got {}",
                self.base_risk_pct
            )));
        }
        if !self.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(GambitError::InvalidConfig(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        for (name, value) in [
            ("low_confidence_multiplier", self.low_confidence_multiplier),
            ("high_confidence_multiplier", self.high_confidence_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(GambitError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.low_confidence_multiplier > self.high_confidence_multiplier {
            return Err(GambitError::InvalidConfig(format!(
                "low_confidence_multiplier {} exceeds high_confidence_multiplier {}",
                self.low_confidence_multiplier, self.high_confidence_multiplier
            )));
        }
        if self.atr_multiplier <= Decimal::ZERO {
            return Err(GambitError::InvalidConfig(format!(
                "atr_multiplier must be positive, got {}",
                self.atr_multiplier
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Context
// ============================================================================

/// Trailing outcome statistics backing Kelly sizing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradeStats {
    /// Fraction of winning trades in [0, 1]
    pub win_rate: f64,
    /// Mean win amount, in account currency
    pub avg_win: f64,
    /// Mean loss amount (positive), in account currency
    pub avg_loss: f64,
}

/// Optional inputs individual methods draw on
#[derive(Debug, Clone, Default)]
pub struct SizingContext {
    /// Signal confidence for ai_weighted
    pub confidence: Option<f64>,
    /// Trade statistics for kelly
    pub stats: Option<TradeStats>,
    /// ATR in price units for atr_based
    pub atr: Option<Decimal>,
}

impl SizingContext {
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_stats(mut self, stats: TradeStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_atr(mut self, atr: Decimal) -> Self {
        self.atr = Some(atr);
        self
    }
}

// ============================================================================
// Sizer
// ============================================================================

/// Stateless stake calculator; all state arrives through arguments
pub struct PositionSizer {
    config: SizingConfig,
    min_position_size_pct: Decimal,
    max_position_size_pct: Decimal,
}

impl PositionSizer {
    /// Build a sizer over validated sizing params and the stake bounds
    /// from the risk limits
    pub fn new(config: SizingConfig, limits: &RiskLimits) -> Result<Self> {
        config.validate()?;
        limits.validate()?;
        Ok(Self {
            config,
            min_position_size_pct: limits.min_position_size_pct,
            max_position_size_pct: limits.max_position_size_pct,
        })
    }

    /// Compute the stake for one proposed entry.
    ///
    /// Returns a zero stake when the chosen method declines the trade
    /// (negative Kelly edge, confidence below the floor); errors are
    /// reserved for malformed inputs.
    pub fn size(
        &self,
        balance: Decimal,
        entry_price: Decimal,
        stop_loss_price: Decimal,
        method: SizingMethod,
        context: &SizingContext,
    ) -> Result<Decimal> {
        if balance <= Decimal::ZERO {
            return Err(GambitError::InvalidInput(format!(
                "balance must be positive, got {}",
                balance
            )));
        }
        if entry_price <= Decimal::ZERO {
            return Err(GambitError::InvalidInput(format!(
                "entry price must be positive, got {}",
                entry_price
            )));
        }

        let raw = match method {
            SizingMethod::FixedFraction => balance * self.config.base_risk_pct,
            SizingMethod::RiskBased => self.risk_based(balance, entry_price, stop_loss_price)?,
            SizingMethod::Kelly => self.kelly(balance, context)?,
            SizingMethod::AiWeighted => {
                self.ai_weighted(balance, entry_price, stop_loss_price, context)?
            }
            SizingMethod::AtrBased => self.atr_based(balance, entry_price, context)?,
        };

        let stake = self.clamp_stake(raw, balance);
        debug!(
            method = %method,
            balance = %balance,
            raw = %raw,
            stake = %stake,
            "position sized"
        );
        Ok(stake)
    }

    /// Canonical formula: fixed risk amount translated through the
    /// stop distance into a stake.
    fn risk_based(&self, balance: Decimal, entry: Decimal, stop: Decimal) -> Result<Decimal> {
        if stop < Decimal::ZERO {
            return Err(GambitError::InvalidInput(format!(
                "stop price cannot be negative, got {}",
                stop
            )));
        }
        if entry == stop {
            return Err(GambitError::InvalidInput(
                "entry and stop prices must differ".to_string(),
            ));
        }
        let risk_amount = balance * self.config.base_risk_pct;
        let per_unit_risk = (entry - stop).abs();
        Ok(risk_amount / per_unit_risk * entry)
    }

    fn kelly(&self, balance: Decimal, context: &SizingContext) -> Result<Decimal> {
        let stats = context.stats.ok_or_else(|| {
            GambitError::InvalidInput("kelly sizing requires trade statistics".to_string())
        })?;
        if !stats.win_rate.is_finite() || !(0.0..=1.0).contains(&stats.win_rate) {
            return Err(GambitError::InvalidInput(format!(
                "win_rate must be within [0, 1], got {}",
                stats.win_rate
            )));
        }
        if stats.avg_loss <= 0.0 {
            return Err(GambitError::InvalidInput(format!(
                "kelly sizing requires avg_loss > 0, got {}",
                stats.avg_loss
            )));
        }
        // No winning trades means no measurable edge
        if stats.avg_win <= 0.0 {
            return Ok(Decimal::ZERO);
        }

        let payoff = stats.avg_win / stats.avg_loss;
        let kelly_pct = (stats.win_rate * payoff - (1.0 - stats.win_rate)) / payoff;
        // Negative edge floors at zero; the shared clamp enforces the
        // position-size cap on the way out.
        let damped = (kelly_pct * KELLY_DAMPING).max(0.0);

        Ok(balance * Decimal::from_f64_retain(damped).unwrap_or(Decimal::ZERO))
    }

    fn ai_weighted(
        &self,
        balance: Decimal,
        entry: Decimal,
        stop: Decimal,
        context: &SizingContext,
    ) -> Result<Decimal> {
        let confidence = context.confidence.ok_or_else(|| {
            GambitError::InvalidInput("ai_weighted sizing requires a confidence value".to_string())
        })?;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(GambitError::InvalidInput(format!(
                "confidence must be within [0, 1], got {}",
                confidence
            )));
        }

        let base = self.risk_based(balance, entry, stop)?;
        if confidence < self.config.min_confidence {
            debug!(
                confidence,
                min_confidence = self.config.min_confidence,
                "confidence below sizing floor, declining trade"
            );
            return Ok(Decimal::ZERO);
        }

        let span = 1.0 - self.config.min_confidence;
        let multiplier = if span <= f64::EPSILON {
            self.config.high_confidence_multiplier
        } else {
            let t = (confidence - self.config.min_confidence) / span;
            self.config.low_confidence_multiplier
                + (self.config.high_confidence_multiplier - self.config.low_confidence_multiplier)
                    * t
        };

        Ok(base * Decimal::from_f64_retain(multiplier).unwrap_or(Decimal::ZERO))
    }

    fn atr_based(&self, balance: Decimal, entry: Decimal, context: &SizingContext) -> Result<Decimal> {
        let atr = context.atr.ok_or_else(|| {
            GambitError::InvalidInput("atr_based sizing requires an ATR value".to_string())
        })?;
        if atr <= Decimal::ZERO {
            return Err(GambitError::InvalidInput(format!(
                "ATR must be positive, got {}",
                atr
            )));
        }
        let stop = entry - atr * self.config.atr_multiplier;
        self.risk_based(balance, entry, stop)
    }

    /// Shared final clamp; zero passes through untouched
    fn clamp_stake(&self, raw: Decimal, balance: Decimal) -> Decimal {
        if raw <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let min_stake = balance * self.min_position_size_pct;
        let max_stake = balance * self.max_position_size_pct;
        raw.clamp(min_stake, max_stake)
    }
}
