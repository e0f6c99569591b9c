use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction claimed by an analysis source or a fused signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    /// Fixed order used whenever direction scores tie exactly.
    /// A later entry only displaces an earlier one with a strictly
    /// greater score.
    pub fn priority_order() -> [Direction; 3] {
        [Direction::Long, Direction::Short, Direction::Neutral]
    }

    /// Get the opposite direction (Neutral has none)
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Neutral => Direction::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Candle timeframe an analysis request refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(untagged)]
    Other(String),
}

impl Timeframe {
    pub fn as_str(&self) -> &str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Precomputed indicator bundle for one pair/timeframe.
///
/// Indicator computation lives upstream; the pipeline only reads these
/// values. Percent fields are expressed in percent units (2.5 = 2.5%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub pair: String,
    pub timeframe: Timeframe,
    /// Last traded price, also used as the entry price candidate
    pub last_price: Decimal,
    /// Average true range in price units
    pub atr: Decimal,
    /// Trend strength (ADX-like, 0-100)
    pub trend_strength: f64,
    /// Signed fast/slow moving-average spread as a percent of price
    pub directional_spread_pct: f64,
    /// ATR as a percent of price
    pub volatility_pct: f64,
    /// Volatility band width as a percent of price
    pub band_width_pct: f64,
    pub computed_at: DateTime<Utc>,
}

impl IndicatorSnapshot {
    /// Seconds since the snapshot was computed
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.computed_at).num_seconds().max(0)
    }
}
