use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::market::Direction;
use crate::error::GambitError;

/// Account snapshot the risk gate evaluates entries against.
///
/// Percent-like quantities derived here are fractional (0.25 = 25%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub balance: Decimal,
    /// Highest balance seen; the drawdown reference
    pub peak_balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_positions: u32,
    /// One entry per open position, pair repeated when stacked
    pub position_pairs: Vec<String>,
}

impl PortfolioState {
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance,
            peak_balance: balance,
            unrealized_pnl: Decimal::ZERO,
            open_positions: 0,
            position_pairs: Vec::new(),
        }
    }

    /// Drawdown from peak as a fraction, floored at zero.
    /// A non-positive peak yields zero rather than a division error.
    pub fn drawdown_pct(&self) -> Decimal {
        if self.peak_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_balance - self.balance) / self.peak_balance).max(Decimal::ZERO)
    }

    /// Number of open positions on a specific pair
    pub fn positions_for_pair(&self, pair: &str) -> u32 {
        self.position_pairs.iter().filter(|p| *p == pair).count() as u32
    }
}

/// Executable order side derived from a non-neutral direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<Direction> for OrderSide {
    type Error = GambitError;

    fn try_from(direction: Direction) -> Result<Self, Self::Error> {
        match direction {
            Direction::Long => Ok(OrderSide::Buy),
            Direction::Short => Ok(OrderSide::Sell),
            Direction::Neutral => Err(GambitError::InvalidInput(
                "neutral direction cannot be converted to an order side".to_string(),
            )),
        }
    }
}

/// Sized, risk-checked order request handed to the execution engine.
/// The pipeline never places orders itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Intent ID (for downstream tracking)
    pub intent_id: Uuid,
    /// Strategy the stake is attributed to, when known
    pub strategy_id: Option<String>,
    pub pair: String,
    pub side: OrderSide,
    pub stake_amount: Decimal,
    pub entry_price: Decimal,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    pub fn new(
        pair: impl Into<String>,
        side: OrderSide,
        stake_amount: Decimal,
        entry_price: Decimal,
        stop_loss_price: Decimal,
        take_profit_price: Decimal,
    ) -> Self {
        Self {
            intent_id: Uuid::new_v4(),
            strategy_id: None,
            pair: pair.into(),
            side,
            stake_amount,
            entry_price,
            stop_loss_price,
            take_profit_price,
            created_at: Utc::now(),
        }
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    /// Distance between entry and stop as a fraction of entry
    pub fn stop_distance_pct(&self) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.entry_price - self.stop_loss_price).abs() / self.entry_price).max(Decimal::ZERO)
    }
}
