//! Capital allocation across registered strategies
//!
//! Maintains a weight table over strategies and rebalances it based on:
//! - Configured allocation method (equal, performance, regime-adaptive, hybrid)
//! - Trailing trade returns per strategy (bounded window)
//! - Per-strategy regime suitability scores and the current regime
//!
//! Enabled weights sum to 1.0 (within float tolerance) after every
//! allocation pass. Bounds are applied with a clamp pass followed by a
//! renormalization pass; when the configured bounds are infeasible for the
//! number of enabled strategies, the sum invariant wins and individual
//! weights may land outside the bounds.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{GambitError, Result};

use super::regime::{MarketRegime, RegimeSnapshot};

/// Suitability assigned to every regime a strategy was not scored for.
const DEFAULT_SUITABILITY: f64 = 0.5;

/// Floor added to shifted performance scores so the worst performer
/// still receives a sliver of weight.
const SCORE_EPSILON: f64 = 1e-6;

// ==================== Allocation Types ====================

/// How capital is split across enabled strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    /// Every enabled strategy gets the same share.
    Equal,
    /// Shares proportional to trailing average return, floor-shifted
    /// so the worst performer stays non-negative.
    Performance,
    /// Shares proportional to regime suitability scaled by the
    /// classifier's confidence.
    RegimeAdaptive,
    /// Regime-adaptive shares, each multiplied by a bounded
    /// performance factor.
    Hybrid,
}

impl AllocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMethod::Equal => "equal",
            AllocationMethod::Performance => "performance",
            AllocationMethod::RegimeAdaptive => "regime_adaptive",
            AllocationMethod::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Public snapshot of one strategy's allocation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAllocation {
    pub strategy_id: String,
    /// Current share of total capital in \[0.0, 1.0\]. Disabled
    /// strategies hold zero.
    pub weight: f64,
    pub enabled: bool,
    /// Trailing mean return, refreshed on every allocation pass.
    pub performance_score: f64,
    /// Per-regime suitability in \[0.0, 1.0\].
    pub suitability: HashMap<MarketRegime, f64>,
}

struct StrategyEntry {
    weight: f64,
    enabled: bool,
    performance_score: f64,
    suitability: HashMap<MarketRegime, f64>,
    /// Trailing window of per-trade returns (fractional, 0.05 = +5%).
    outcomes: VecDeque<f64>,
}

struct AllocatorState {
    strategies: HashMap<String, StrategyEntry>,
    last_rebalance: Option<DateTime<Utc>>,
}

// ==================== Configuration ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    #[serde(default = "default_method")]
    pub method: AllocationMethod,
    /// Lower bound for any single enabled strategy's weight.
    #[serde(default = "default_min_allocation_pct")]
    pub min_allocation_pct: f64,
    /// Upper bound for any single enabled strategy's weight.
    #[serde(default = "default_max_allocation_pct")]
    pub max_allocation_pct: f64,
    /// Maximum trade returns retained per strategy.
    #[serde(default = "default_outcome_window")]
    pub outcome_window: usize,
    /// Minimum seconds between rebalances.
    #[serde(default = "default_rebalance_interval_secs")]
    pub rebalance_interval_secs: u64,
}

fn default_method() -> AllocationMethod {
    AllocationMethod::Hybrid
}

fn default_min_allocation_pct() -> f64 {
    0.05
}

fn default_max_allocation_pct() -> f64 {
    0.50
}

fn default_outcome_window() -> usize {
    50
}

fn default_rebalance_interval_secs() -> u64 {
    3600
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            min_allocation_pct: default_min_allocation_pct(),
            max_allocation_pct: default_max_allocation_pct(),
            outcome_window: default_outcome_window(),
            rebalance_interval_secs: default_rebalance_interval_secs(),
        }
    }
}

impl AllocationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_allocation_pct.is_finite() || self.min_allocation_pct < 0.0 {
            return Err(GambitError::InvalidConfig(format!(
                "min_allocation_pct must be >= 0, got {}",
                self.min_allocation_pct
            )));
        }
        if !self.max_allocation_pct.is_finite()
            || self.max_allocation_pct <= 0.0
            || self.max_allocation_pct > 1.0
        {
            return Err(GambitError::InvalidConfig(format!(
                "max_allocation_pct must be in (0, 1], got {}",
                self.max_allocation_pct
            )));
        }
        if self.min_allocation_pct > self.max_allocation_pct {
            return Err(GambitError::InvalidConfig(format!(
                "min_allocation_pct ({}) must not exceed max_allocation_pct ({})",
                self.min_allocation_pct, self.max_allocation_pct
            )));
        }
        if self.outcome_window == 0 {
            return Err(GambitError::InvalidConfig(
                "outcome_window must be at least 1".to_string(),
            ));
        }
        if self.rebalance_interval_secs == 0 {
            return Err(GambitError::InvalidConfig(
                "rebalance_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Allocator ====================

/// Tracks strategy weights and trailing returns behind a single lock,
/// so reads between rebalances always observe a complete table.
pub struct PortfolioAllocator {
    config: AllocationConfig,
    state: RwLock<AllocatorState>,
}

impl PortfolioAllocator {
    pub fn new(config: AllocationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: RwLock::new(AllocatorState {
                strategies: HashMap::new(),
                last_rebalance: None,
            }),
        })
    }

    /// Register a strategy with the neutral suitability for every regime.
    ///
    /// With `initial_weight: None`, all registered strategies are reset
    /// to an equal split. An explicit weight (clamped to \[0, 1\]) is
    /// assigned as-is and leaves the others untouched until the next
    /// allocation pass.
    pub async fn register(&self, strategy_id: &str, initial_weight: Option<f64>) -> Result<()> {
        self.register_with_suitability(strategy_id, initial_weight, HashMap::new())
            .await
    }

    /// Register a strategy with explicit per-regime suitability scores.
    /// Regimes not present in the map get the neutral 0.5.
    pub async fn register_with_suitability(
        &self,
        strategy_id: &str,
        initial_weight: Option<f64>,
        suitability: HashMap<MarketRegime, f64>,
    ) -> Result<()> {
        if strategy_id.trim().is_empty() {
            return Err(GambitError::InvalidInput(
                "strategy id must not be empty".to_string(),
            ));
        }
        if let Some(weight) = initial_weight {
            if !weight.is_finite() {
                return Err(GambitError::InvalidInput(format!(
                    "initial weight for {} must be finite, got {}",
                    strategy_id, weight
                )));
            }
        }
        let mut table = neutral_suitability();
        for (regime, score) in suitability {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(GambitError::InvalidInput(format!(
                    "suitability of {} for {} must be in [0, 1], got {}",
                    strategy_id, regime, score
                )));
            }
            table.insert(regime, score);
        }

        let mut state = self.state.write().await;
        if state.strategies.contains_key(strategy_id) {
            return Err(GambitError::InvalidInput(format!(
                "strategy {} is already registered",
                strategy_id
            )));
        }
        state.strategies.insert(
            strategy_id.to_string(),
            StrategyEntry {
                weight: initial_weight.map(|w| w.clamp(0.0, 1.0)).unwrap_or(0.0),
                enabled: true,
                performance_score: 0.0,
                suitability: table,
            },
        );

        if initial_weight.is_none() {
            reset_to_equal(&mut state.strategies);
        }

        info!(
            strategy_id,
            strategies = state.strategies.len(),
            "registered strategy"
        );
        Ok(())
    }

    /// Enable or disable a strategy. Disabling zeroes its weight and
    /// rescales the remaining enabled strategies; re-enabling leaves the
    /// weight at zero until the next allocation pass.
    pub async fn set_enabled(&self, strategy_id: &str, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.strategies.get_mut(strategy_id).ok_or_else(|| {
            GambitError::InvalidInput(format!("strategy {} is not registered", strategy_id))
        })?;
        if entry.enabled == enabled {
            return Ok(());
        }
        entry.enabled = enabled;
        if !enabled {
            entry.weight = 0.0;
            rescale_enabled(&mut state.strategies);
        }
        info!(strategy_id, enabled, "strategy enablement changed");
        Ok(())
    }

    /// Remove a strategy and rescale the remaining enabled weights so
    /// reads stay coherent until the next allocation pass.
    pub async fn deregister(&self, strategy_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.strategies.remove(strategy_id).is_none() {
            return Err(GambitError::InvalidInput(format!(
                "strategy {} is not registered",
                strategy_id
            )));
        }
        rescale_enabled(&mut state.strategies);
        info!(
            strategy_id,
            strategies = state.strategies.len(),
            "deregistered strategy"
        );
        Ok(())
    }

    /// Record a closed-trade return (fractional, 0.05 = +5%) into the
    /// strategy's trailing window.
    pub async fn record_outcome(&self, strategy_id: &str, return_pct: f64) -> Result<()> {
        if !return_pct.is_finite() {
            return Err(GambitError::InvalidInput(format!(
                "return_pct must be finite, got {}",
                return_pct
            )));
        }
        let window = self.config.outcome_window;
        let mut state = self.state.write().await;
        let entry = state.strategies.get_mut(strategy_id).ok_or_else(|| {
            GambitError::InvalidInput(format!("strategy {} is not registered", strategy_id))
        })?;

        entry.outcomes.push_back(return_pct);
        while entry.outcomes.len() > window {
            entry.outcomes.pop_front();
        }
        Ok(())
    }

    /// Recompute all enabled weights for the configured method and the
    /// given regime. Disabled strategies hold weight zero and are left
    /// out of the returned table.
    pub async fn allocate(&self, regime: &RegimeSnapshot) -> HashMap<String, f64> {
        let mut state = self.state.write().await;

        let enabled_ids: Vec<String> = state
            .strategies
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(id, _)| id.clone())
            .collect();
        if enabled_ids.is_empty() {
            warn!("allocation pass with no enabled strategies");
            state.last_rebalance = Some(Utc::now());
            return HashMap::new();
        }
        let n = enabled_ids.len();

        // Trailing mean return per enabled strategy; 0.0 with no history.
        let means: HashMap<String, f64> = enabled_ids
            .iter()
            .map(|id| (id.clone(), mean_return(&state.strategies[id].outcomes)))
            .collect();

        let raw: HashMap<String, f64> = match self.config.method {
            AllocationMethod::Equal => {
                enabled_ids.iter().map(|id| (id.clone(), 1.0)).collect()
            }
            AllocationMethod::Performance => floor_shift(&means),
            AllocationMethod::RegimeAdaptive => enabled_ids
                .iter()
                .map(|id| (id.clone(), self.regime_score(&state.strategies[id], regime)))
                .collect(),
            AllocationMethod::Hybrid => enabled_ids
                .iter()
                .map(|id| {
                    // Bounded performance factor on top of the regime score:
                    // +25% trailing return maxes it out, -25% bottoms it out.
                    let factor = (1.0 + 2.0 * means[id]).clamp(0.5, 1.5);
                    (
                        id.clone(),
                        self.regime_score(&state.strategies[id], regime) * factor,
                    )
                })
                .collect(),
        };

        let normalized = normalize_or_equal(raw, n);

        // Clamp into bounds, then renormalize so enabled weights sum to 1.0.
        let clamped: HashMap<String, f64> = normalized
            .into_iter()
            .map(|(id, w)| {
                (
                    id,
                    w.clamp(self.config.min_allocation_pct, self.config.max_allocation_pct),
                )
            })
            .collect();
        let total: f64 = clamped.values().sum();
        let weights: HashMap<String, f64> = if total > f64::EPSILON {
            clamped.into_iter().map(|(id, w)| (id, w / total)).collect()
        } else {
            clamped
                .into_keys()
                .map(|id| (id, 1.0 / n as f64))
                .collect()
        };

        for (id, new_weight) in &weights {
            if let Some(entry) = state.strategies.get_mut(id) {
                let old_weight = entry.weight;
                entry.weight = *new_weight;
                entry.performance_score = means[id];
                info!(
                    strategy_id = %id,
                    old_weight,
                    new_weight,
                    method = %self.config.method,
                    regime = %regime.regime,
                    "rebalanced strategy allocation"
                );
            }
        }
        state.last_rebalance = Some(Utc::now());

        weights
    }

    /// True once the configured interval has elapsed since the last
    /// allocation pass; always true before the first one.
    pub async fn should_rebalance(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.read().await;
        match state.last_rebalance {
            None => true,
            Some(at) => {
                (now - at).num_seconds() >= self.config.rebalance_interval_secs as i64
            }
        }
    }

    /// Current weight table, disabled strategies included at zero.
    pub async fn weights(&self) -> HashMap<String, f64> {
        let state = self.state.read().await;
        state
            .strategies
            .iter()
            .map(|(id, entry)| (id.clone(), entry.weight))
            .collect()
    }

    /// Snapshot of every strategy, ordered by id.
    pub async fn allocations(&self) -> Vec<StrategyAllocation> {
        let state = self.state.read().await;
        let mut out: Vec<StrategyAllocation> = state
            .strategies
            .iter()
            .map(|(id, entry)| StrategyAllocation {
                strategy_id: id.clone(),
                weight: entry.weight,
                enabled: entry.enabled,
                performance_score: entry.performance_score,
                suitability: entry.suitability.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id));
        out
    }

    /// Capital available to one strategy at the current weight.
    /// Unknown strategies get zero.
    pub async fn get_strategy_capital(
        &self,
        strategy_id: &str,
        total_balance: Decimal,
    ) -> Decimal {
        let state = self.state.read().await;
        let weight = state
            .strategies
            .get(strategy_id)
            .map(|entry| entry.weight)
            .unwrap_or(0.0);
        total_balance * Decimal::from_f64_retain(weight).unwrap_or(Decimal::ZERO)
    }

    pub async fn strategy_count(&self) -> usize {
        self.state.read().await.strategies.len()
    }

    fn regime_score(&self, entry: &StrategyEntry, regime: &RegimeSnapshot) -> f64 {
        let suitability = entry
            .suitability
            .get(&regime.regime)
            .copied()
            .unwrap_or(DEFAULT_SUITABILITY);
        suitability * regime.confidence
    }
}

// ==================== Scoring ====================

fn neutral_suitability() -> HashMap<MarketRegime, f64> {
    MarketRegime::all()
        .into_iter()
        .map(|regime| (regime, DEFAULT_SUITABILITY))
        .collect()
}

fn mean_return(outcomes: &VecDeque<f64>) -> f64 {
    if outcomes.is_empty() {
        0.0
    } else {
        outcomes.iter().sum::<f64>() / outcomes.len() as f64
    }
}

/// Shift scores so the worst lands at the epsilon floor, keeping every
/// weight positive while preserving the ordering.
fn floor_shift(means: &HashMap<String, f64>) -> HashMap<String, f64> {
    let floor = means.values().cloned().fold(f64::INFINITY, f64::min);
    means
        .iter()
        .map(|(id, mean)| (id.clone(), mean - floor + SCORE_EPSILON))
        .collect()
}

/// Scale scores to sum to 1.0, falling back to an equal split when the
/// total is zero or every score is unusable.
fn normalize_or_equal(scores: HashMap<String, f64>, n: usize) -> HashMap<String, f64> {
    let sanitized: HashMap<String, f64> = scores
        .into_iter()
        .map(|(id, s)| (id, if s.is_finite() && s > 0.0 { s } else { 0.0 }))
        .collect();
    let total: f64 = sanitized.values().sum();
    if total > f64::EPSILON {
        sanitized.into_iter().map(|(id, s)| (id, s / total)).collect()
    } else {
        warn!("allocation scores sum to zero, falling back to equal split");
        sanitized
            .into_keys()
            .map(|id| (id, 1.0 / n as f64))
            .collect()
    }
}

/// Reset every strategy to an equal split over the enabled set.
fn reset_to_equal(strategies: &mut HashMap<String, StrategyEntry>) {
    let enabled = strategies.values().filter(|e| e.enabled).count();
    if enabled == 0 {
        return;
    }
    let equal = 1.0 / enabled as f64;
    for entry in strategies.values_mut() {
        entry.weight = if entry.enabled { equal } else { 0.0 };
    }
}

/// Rescale enabled weights to sum to 1.0 after a removal or disable.
fn rescale_enabled(strategies: &mut HashMap<String, StrategyEntry>) {
    let total: f64 = strategies
        .values()
        .filter(|e| e.enabled)
        .map(|e| e.weight)
        .sum();
    if total > f64::EPSILON {
        for entry in strategies.values_mut() {
            if entry.enabled {
                entry.weight /= total;
            }
        }
    } else {
        reset_to_equal(strategies);
    }
}
