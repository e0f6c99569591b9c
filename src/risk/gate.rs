//! Risk gate for proposed entries
//!
//! Every entry passes this gate after sizing:
//! - Ordered limit checks, first failure wins
//! - Drawdown warning band plus a sticky halt on critical breach
//! - Halt persists across evaluations until an operator resumes
//! - Bounded event history for audit

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::domain::PortfolioState;
use crate::error::{GambitError, Result};
use crate::risk::limits::RiskLimits;

const MAX_RISK_EVENTS: usize = 100;

// ============================================================================
// States and Verdicts
// ============================================================================

/// Drawdown severity relative to the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskState {
    Normal,
    Warning,
    Critical,
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskState::Normal => write!(f, "normal"),
            RiskState::Warning => write!(f, "warning"),
            RiskState::Critical => write!(f, "critical"),
        }
    }
}

/// Outcome of one entry evaluation
#[derive(Debug, Clone)]
pub enum RiskVerdict {
    Approved,
    Denied(DenyReason),
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approved)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, RiskVerdict::Denied(_))
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            RiskVerdict::Approved => None,
            RiskVerdict::Denied(reason) => Some(reason),
        }
    }
}

/// Why an entry was denied; every variant names the limit it tripped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DenyReason {
    TradingHalted {
        reason: String,
    },
    DrawdownExceeded {
        current: Decimal,
        limit: Decimal,
    },
    TooManyOpenPositions {
        limit: u32,
        current: u32,
    },
    PairPositionLimit {
        pair: String,
        limit: u32,
        current: u32,
    },
    StakeExceedsPositionLimit {
        limit_pct: Decimal,
        requested_pct: Decimal,
    },
    RiskPerTradeExceeded {
        limit_pct: Decimal,
        risk_pct: Decimal,
    },
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::TradingHalted { reason } => {
                write!(f, "Trading halted: {}", reason)
            }
            DenyReason::DrawdownExceeded { current, limit } => {
                write!(
                    f,
                    "Drawdown {} breached max_total_drawdown_pct {}",
                    current, limit
                )
            }
            DenyReason::TooManyOpenPositions { limit, current } => {
                write!(
                    f,
                    "Open positions {} at max_concurrent_positions {}",
                    current, limit
                )
            }
            DenyReason::PairPositionLimit {
                pair,
                limit,
                current,
            } => {
                write!(
                    f,
                    "{} has {} open positions, max_positions_per_pair is {}",
                    pair, current, limit
                )
            }
            DenyReason::StakeExceedsPositionLimit {
                limit_pct,
                requested_pct,
            } => {
                write!(
                    f,
                    "Stake is {} of balance, max_position_size_pct is {}",
                    requested_pct, limit_pct
                )
            }
            DenyReason::RiskPerTradeExceeded {
                limit_pct,
                risk_pct,
            } => {
                write!(
                    f,
                    "Trade risks {} of balance, max_loss_per_trade_pct is {}",
                    risk_pct, limit_pct
                )
            }
        }
    }
}

/// Halt/warning transitions for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: RiskEventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskEventKind {
    Warning,
    Halt,
    Resume,
}

#[derive(Debug, Default)]
struct HaltState {
    halted: bool,
    reason: Option<String>,
    halted_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Risk Gate
// ============================================================================

/// Sticky entry gate over one account's limits.
///
/// Owned and injected by the caller; clone the surrounding `Arc` to
/// share one halt flag across concurrently evaluated pairs.
pub struct RiskGate {
    limits: RiskLimits,
    halt: RwLock<HaltState>,
    /// Fast-path mirror of the halt flag, written under the halt lock
    halted_flag: AtomicBool,
    events: RwLock<Vec<RiskEvent>>,
}

impl RiskGate {
    /// Build a gate over validated limits; invalid limits fail fast
    pub fn new(limits: RiskLimits) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            limits,
            halt: RwLock::new(HaltState::default()),
            halted_flag: AtomicBool::new(false),
            events: RwLock::new(Vec::new()),
        })
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    // ==================== Queries ====================

    /// Drawdown severity as a pure function of the portfolio
    pub fn drawdown_state(&self, portfolio: &PortfolioState) -> RiskState {
        let drawdown = portfolio.drawdown_pct();
        if drawdown >= self.limits.max_total_drawdown_pct {
            RiskState::Critical
        } else if drawdown >= self.limits.warning_drawdown_pct {
            RiskState::Warning
        } else {
            RiskState::Normal
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted_flag.load(Ordering::SeqCst)
    }

    pub async fn halt_reason(&self) -> Option<String> {
        self.halt.read().await.reason.clone()
    }

    pub async fn halted_at(&self) -> Option<DateTime<Utc>> {
        self.halt.read().await.halted_at
    }

    /// Error out when halted, for callers that want `?` flow
    pub async fn ensure_active(&self) -> Result<()> {
        if !self.is_halted() {
            return Ok(());
        }
        let reason = self
            .halt_reason()
            .await
            .unwrap_or_else(|| "halted".to_string());
        Err(GambitError::TradingHalted { reason })
    }

    pub async fn events(&self) -> Vec<RiskEvent> {
        self.events.read().await.clone()
    }

    // ==================== Entry Evaluation ====================

    /// Run a proposed entry through every limit in order, returning the
    /// first failure. Malformed inputs error out before any check runs
    /// or state changes.
    pub async fn evaluate_entry(
        &self,
        pair: &str,
        proposed_stake: Decimal,
        portfolio: &PortfolioState,
        stop_loss_pct: Decimal,
    ) -> Result<RiskVerdict> {
        Self::validate_inputs(portfolio, stop_loss_pct)?;
        if proposed_stake < Decimal::ZERO {
            return Err(GambitError::InvalidInput(format!(
                "proposed stake cannot be negative, got {}",
                proposed_stake
            )));
        }

        if self.is_halted() {
            let reason = self
                .halt_reason()
                .await
                .unwrap_or_else(|| "halted".to_string());
            return Ok(self.deny(pair, DenyReason::TradingHalted { reason }));
        }

        let drawdown = portfolio.drawdown_pct();
        if drawdown >= self.limits.max_total_drawdown_pct {
            // The breach itself trips the halt before the denial goes
            // out; a concurrent breach keeps the first reason.
            self.halt(format!(
                "drawdown {} breached max_total_drawdown_pct {}",
                drawdown, self.limits.max_total_drawdown_pct
            ))
            .await;
            return Ok(self.deny(
                pair,
                DenyReason::DrawdownExceeded {
                    current: drawdown,
                    limit: self.limits.max_total_drawdown_pct,
                },
            ));
        }
        if drawdown >= self.limits.warning_drawdown_pct {
            warn!(
                pair = %pair,
                drawdown = %drawdown,
                warning_threshold = %self.limits.warning_drawdown_pct,
                "drawdown inside warning band"
            );
            self.push_event(
                RiskEventKind::Warning,
                format!(
                    "drawdown {} above warning_drawdown_pct {}",
                    drawdown, self.limits.warning_drawdown_pct
                ),
            )
            .await;
        }

        if portfolio.open_positions >= self.limits.max_concurrent_positions {
            return Ok(self.deny(
                pair,
                DenyReason::TooManyOpenPositions {
                    limit: self.limits.max_concurrent_positions,
                    current: portfolio.open_positions,
                },
            ));
        }

        let pair_positions = portfolio.positions_for_pair(pair);
        if pair_positions >= self.limits.max_positions_per_pair {
            return Ok(self.deny(
                pair,
                DenyReason::PairPositionLimit {
                    pair: pair.to_string(),
                    limit: self.limits.max_positions_per_pair,
                    current: pair_positions,
                },
            ));
        }

        let stake_pct = proposed_stake / portfolio.balance;
        if stake_pct > self.limits.max_position_size_pct {
            return Ok(self.deny(
                pair,
                DenyReason::StakeExceedsPositionLimit {
                    limit_pct: self.limits.max_position_size_pct,
                    requested_pct: stake_pct,
                },
            ));
        }

        let risk_pct = proposed_stake * stop_loss_pct / portfolio.balance;
        if risk_pct > self.limits.max_loss_per_trade_pct {
            return Ok(self.deny(
                pair,
                DenyReason::RiskPerTradeExceeded {
                    limit_pct: self.limits.max_loss_per_trade_pct,
                    risk_pct,
                },
            ));
        }

        debug!(pair = %pair, stake = %proposed_stake, "entry approved by risk gate");
        Ok(RiskVerdict::Approved)
    }

    /// Largest stake the limits allow for the given stop distance:
    /// the loss-per-trade cap translated through the stop, bounded by
    /// the position-size cap.
    pub fn max_allowed_stake(
        &self,
        portfolio: &PortfolioState,
        stop_loss_pct: Decimal,
    ) -> Result<Decimal> {
        Self::validate_inputs(portfolio, stop_loss_pct)?;
        let by_loss_limit = portfolio.balance * self.limits.max_loss_per_trade_pct / stop_loss_pct;
        let by_position_limit = portfolio.balance * self.limits.max_position_size_pct;
        Ok(by_loss_limit.min(by_position_limit))
    }

    // ==================== Halt Control ====================

    /// Trip the halt. Idempotent: the first reason wins and later calls
    /// leave it untouched.
    pub async fn halt(&self, reason: impl Into<String>) {
        let mut halt = self.halt.write().await;
        if halt.halted {
            return;
        }
        let reason = reason.into();
        error!(reason = %reason, "TRADING HALTED");
        halt.halted = true;
        halt.reason = Some(reason.clone());
        halt.halted_at = Some(Utc::now());
        self.halted_flag.store(true, Ordering::SeqCst);
        drop(halt);

        self.push_event(RiskEventKind::Halt, reason).await;
    }

    /// Operator-level resume: clears the halt flag, its reason, and the
    /// accumulated warning history.
    pub async fn resume(&self) {
        let mut halt = self.halt.write().await;
        let was_halted = halt.halted;
        halt.halted = false;
        halt.reason = None;
        halt.halted_at = None;
        self.halted_flag.store(false, Ordering::SeqCst);
        drop(halt);

        self.events.write().await.clear();
        info!(was_halted, "trading resumed, risk state cleared");
        self.push_event(RiskEventKind::Resume, "operator resume".to_string())
            .await;
    }

    // ==================== Helpers ====================

    fn validate_inputs(portfolio: &PortfolioState, stop_loss_pct: Decimal) -> Result<()> {
        if stop_loss_pct <= Decimal::ZERO {
            return Err(GambitError::InvalidInput(format!(
                "stop_loss_pct must be positive, got {}",
                stop_loss_pct
            )));
        }
        if portfolio.balance <= Decimal::ZERO {
            return Err(GambitError::InvalidInput(format!(
                "portfolio balance must be positive, got {}",
                portfolio.balance
            )));
        }
        Ok(())
    }

    fn deny(&self, pair: &str, reason: DenyReason) -> RiskVerdict {
        warn!(pair = %pair, reason = %reason, "entry denied by risk gate");
        RiskVerdict::Denied(reason)
    }

    async fn push_event(&self, kind: RiskEventKind, detail: String) {
        let mut events = self.events.write().await;
        events.push(RiskEvent {
            timestamp: Utc::now(),
            kind,
            detail,
        });
        if events.len() > MAX_RISK_EVENTS {
            let drain = events.len() - MAX_RISK_EVENTS;
            events.drain(0..drain);
        }
    }
}
