//! Market regime classification from indicator snapshots
//!
//! Maps a precomputed [`IndicatorSnapshot`] onto one of five regimes:
//! - TrendingUp / TrendingDown: strong trend with a directional spread
//! - Volatile: elevated volatility and wide bands
//! - Ranging: weak trend inside a narrow spread
//! - Uncertain: none of the above with conviction
//!
//! Classification is a pure function of the snapshot: the same inputs
//! always produce the same regime and confidence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, IndicatorSnapshot};
use crate::error::{GambitError, Result};

// ==================== Regime Types ====================

/// Market regime labels, ordered by classification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Uncertain,
}

impl MarketRegime {
    /// Every regime, for building complete per-regime tables.
    pub fn all() -> [MarketRegime; 5] {
        [
            MarketRegime::TrendingUp,
            MarketRegime::TrendingDown,
            MarketRegime::Ranging,
            MarketRegime::Volatile,
            MarketRegime::Uncertain,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::TrendingUp => "trending_up",
            MarketRegime::TrendingDown => "trending_down",
            MarketRegime::Ranging => "ranging",
            MarketRegime::Volatile => "volatile",
            MarketRegime::Uncertain => "uncertain",
        }
    }

    /// True for either trending variant.
    pub fn is_trending(&self) -> bool {
        matches!(self, MarketRegime::TrendingUp | MarketRegime::TrendingDown)
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a single classification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: MarketRegime,
    /// Classifier confidence in \[0.0, 1.0\].
    pub confidence: f64,
    /// The indicator values the decision was based on.
    pub indicators: HashMap<String, f64>,
    pub computed_at: DateTime<Utc>,
}

// ==================== Configuration ====================

/// Thresholds for the classification tree.
///
/// All percent fields are in percent units (3.0 = 3%), matching the
/// convention of [`IndicatorSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Trend strength above which a market counts as trending.
    #[serde(default = "default_trend_strength_threshold")]
    pub trend_strength_threshold: f64,
    /// Minimum absolute directional spread for a trend call.
    #[serde(default = "default_trend_spread_pct")]
    pub trend_spread_pct: f64,
    /// Volatility above which a market counts as volatile.
    #[serde(default = "default_volatility_pct_threshold")]
    pub volatility_pct_threshold: f64,
    /// Minimum band width for a volatile call.
    #[serde(default = "default_band_width_pct_threshold")]
    pub band_width_pct_threshold: f64,
    /// Trend strength below which a market can count as ranging.
    #[serde(default = "default_ranging_strength_threshold")]
    pub ranging_strength_threshold: f64,
    /// Maximum absolute directional spread for a ranging call.
    #[serde(default = "default_ranging_spread_pct")]
    pub ranging_spread_pct: f64,
    /// Confidence multiplier applied when an external directional hint
    /// agrees with a trending classification.
    #[serde(default = "default_hint_boost")]
    pub hint_boost: f64,
}

fn default_trend_strength_threshold() -> f64 {
    25.0
}

fn default_trend_spread_pct() -> f64 {
    3.0
}

fn default_volatility_pct_threshold() -> f64 {
    2.5
}

fn default_band_width_pct_threshold() -> f64 {
    4.0
}

fn default_ranging_strength_threshold() -> f64 {
    20.0
}

fn default_ranging_spread_pct() -> f64 {
    2.0
}

fn default_hint_boost() -> f64 {
    1.15
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            trend_strength_threshold: default_trend_strength_threshold(),
            trend_spread_pct: default_trend_spread_pct(),
            volatility_pct_threshold: default_volatility_pct_threshold(),
            band_width_pct_threshold: default_band_width_pct_threshold(),
            ranging_strength_threshold: default_ranging_strength_threshold(),
            ranging_spread_pct: default_ranging_spread_pct(),
            hint_boost: default_hint_boost(),
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            ("trend_strength_threshold", self.trend_strength_threshold),
            ("trend_spread_pct", self.trend_spread_pct),
            ("volatility_pct_threshold", self.volatility_pct_threshold),
            ("band_width_pct_threshold", self.band_width_pct_threshold),
            (
                "ranging_strength_threshold",
                self.ranging_strength_threshold,
            ),
            ("ranging_spread_pct", self.ranging_spread_pct),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || value <= 0.0 {
                return Err(GambitError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.ranging_strength_threshold > self.trend_strength_threshold {
            return Err(GambitError::InvalidConfig(format!(
                "ranging_strength_threshold ({}) must not exceed trend_strength_threshold ({})",
                self.ranging_strength_threshold, self.trend_strength_threshold
            )));
        }
        if !self.hint_boost.is_finite() || self.hint_boost < 1.0 {
            return Err(GambitError::InvalidConfig(format!(
                "hint_boost must be >= 1.0, got {}",
                self.hint_boost
            )));
        }
        Ok(())
    }
}

// ==================== Classifier ====================

/// Deterministic regime classifier.
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Classify a snapshot without any external hint.
    pub fn classify(&self, snapshot: &IndicatorSnapshot) -> RegimeSnapshot {
        self.classify_with_hint(snapshot, None)
    }

    /// Classify a snapshot, optionally boosting confidence with an
    /// external directional hint.
    ///
    /// The hint is advisory: it can raise confidence (capped at 1.0)
    /// when it agrees with a trending classification, but it never
    /// changes the regime itself. Hints on non-trending regimes and
    /// neutral hints are ignored.
    pub fn classify_with_hint(
        &self,
        snapshot: &IndicatorSnapshot,
        hint: Option<Direction>,
    ) -> RegimeSnapshot {
        let (regime, base_confidence) = self.decide(snapshot);

        let agrees = matches!(
            (hint, regime),
            (Some(Direction::Long), MarketRegime::TrendingUp)
                | (Some(Direction::Short), MarketRegime::TrendingDown)
        );
        let confidence = if agrees {
            (base_confidence * self.config.hint_boost).min(1.0)
        } else {
            base_confidence
        };

        let mut indicators = HashMap::new();
        indicators.insert("trend_strength".to_string(), snapshot.trend_strength);
        indicators.insert(
            "directional_spread_pct".to_string(),
            snapshot.directional_spread_pct,
        );
        indicators.insert("volatility_pct".to_string(), snapshot.volatility_pct);
        indicators.insert("band_width_pct".to_string(), snapshot.band_width_pct);

        RegimeSnapshot {
            regime,
            confidence,
            indicators,
            computed_at: Utc::now(),
        }
    }

    /// Classification priority: trending > volatile > ranging > uncertain.
    /// All threshold comparisons are strict, so values exactly at a
    /// threshold fall through to the next branch.
    fn decide(&self, snapshot: &IndicatorSnapshot) -> (MarketRegime, f64) {
        let spread_abs = snapshot.directional_spread_pct.abs();

        if snapshot.trend_strength > self.config.trend_strength_threshold
            && spread_abs > self.config.trend_spread_pct
        {
            let regime = if snapshot.directional_spread_pct > 0.0 {
                MarketRegime::TrendingUp
            } else {
                MarketRegime::TrendingDown
            };
            let excess = (snapshot.trend_strength - self.config.trend_strength_threshold)
                / self.config.trend_strength_threshold;
            return (regime, excess.min(0.9).max(0.5));
        }

        if snapshot.volatility_pct > self.config.volatility_pct_threshold
            && snapshot.band_width_pct > self.config.band_width_pct_threshold
        {
            let excess = (snapshot.volatility_pct - self.config.volatility_pct_threshold)
                / self.config.volatility_pct_threshold;
            return (MarketRegime::Volatile, excess.min(0.8).max(0.5));
        }

        if snapshot.trend_strength < self.config.ranging_strength_threshold
            && spread_abs < self.config.ranging_spread_pct
        {
            // Confidence grows as trend strength falls further below the
            // ranging threshold.
            let slack = (self.config.ranging_strength_threshold - snapshot.trend_strength)
                / self.config.ranging_strength_threshold;
            return (MarketRegime::Ranging, slack.min(0.7).max(0.4));
        }

        (MarketRegime::Uncertain, 0.3)
    }
}
