//! Decision engine orchestrating one evaluation cycle per pair
//!
//! Wires the full pipeline: consensus signal (cache first), regime
//! classification, cadence-driven rebalancing, position sizing, and the
//! risk gate. Produces an [`OrderIntent`] toward the execution layer;
//! this crate never places orders itself.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allocation::{PortfolioAllocator, RegimeClassifier};
use crate::config::PipelineConfig;
use crate::consensus::{AnalysisSource, ConsensusAggregator, SignalCache};
use crate::domain::{IndicatorSnapshot, OrderIntent, OrderSide, PortfolioState, Timeframe};
use crate::error::{GambitError, Result};
use crate::risk::{RiskGate, RiskVerdict};
use crate::sizing::{PositionSizer, SizingContext, SizingMethod};

// ==================== Configuration ====================

/// Orchestration parameters for the per-tick pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum confidence and consensus score for a tradeable signal.
    #[serde(default = "default_signal_threshold")]
    pub signal_threshold: f64,
    /// Stop-loss distance in ATR multiples.
    #[serde(default = "default_stop_loss_atr_multiplier")]
    pub stop_loss_atr_multiplier: Decimal,
    /// Take-profit distance in ATR multiples.
    #[serde(default = "default_take_profit_atr_multiplier")]
    pub take_profit_atr_multiplier: Decimal,
    /// How long a consensus signal may be served from cache.
    #[serde(default = "default_signal_cache_ttl_secs")]
    pub signal_cache_ttl_secs: u64,
    /// Sizing method applied to every approved signal.
    #[serde(default = "default_sizing_method")]
    pub sizing_method: SizingMethod,
}

fn default_signal_threshold() -> f64 {
    0.65
}

fn default_stop_loss_atr_multiplier() -> Decimal {
    dec!(2.0)
}

fn default_take_profit_atr_multiplier() -> Decimal {
    dec!(3.0)
}

fn default_signal_cache_ttl_secs() -> u64 {
    300
}

fn default_sizing_method() -> SizingMethod {
    SizingMethod::AiWeighted
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signal_threshold: default_signal_threshold(),
            stop_loss_atr_multiplier: default_stop_loss_atr_multiplier(),
            take_profit_atr_multiplier: default_take_profit_atr_multiplier(),
            signal_cache_ttl_secs: default_signal_cache_ttl_secs(),
            sizing_method: default_sizing_method(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.signal_threshold.is_finite()
            || self.signal_threshold <= 0.0
            || self.signal_threshold > 1.0
        {
            return Err(GambitError::InvalidConfig(format!(
                "signal_threshold must be in (0, 1], got {}",
                self.signal_threshold
            )));
        }
        if self.stop_loss_atr_multiplier <= Decimal::ZERO {
            return Err(GambitError::InvalidConfig(format!(
                "stop_loss_atr_multiplier must be positive, got {}",
                self.stop_loss_atr_multiplier
            )));
        }
        if self.take_profit_atr_multiplier <= Decimal::ZERO {
            return Err(GambitError::InvalidConfig(format!(
                "take_profit_atr_multiplier must be positive, got {}",
                self.take_profit_atr_multiplier
            )));
        }
        Ok(())
    }
}

// ==================== Decision ====================

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone)]
pub enum TickDecision {
    /// Every check passed; an intent is ready for the execution layer.
    Trade(OrderIntent),
    /// No tradeable signal this tick.
    NoTrade { reason: String },
    /// A proposed trade was denied by the risk gate.
    Rejected { reason: String },
}

impl TickDecision {
    pub fn is_trade(&self) -> bool {
        matches!(self, TickDecision::Trade(_))
    }

    pub fn intent(&self) -> Option<&OrderIntent> {
        match self {
            TickDecision::Trade(intent) => Some(intent),
            _ => None,
        }
    }
}

// ==================== Engine ====================

/// Main decision engine orchestrating all pipeline components
pub struct DecisionEngine {
    config: EngineConfig,
    classifier: RegimeClassifier,
    aggregator: ConsensusAggregator,
    cache: SignalCache,
    gate: Arc<RiskGate>,
    sizer: PositionSizer,
    allocator: Arc<PortfolioAllocator>,
}

impl DecisionEngine {
    /// Build the full pipeline from one validated configuration.
    pub fn new(config: PipelineConfig, sources: Vec<Arc<dyn AnalysisSource>>) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| GambitError::InvalidConfig(errors.join("; ")))?;

        let classifier = RegimeClassifier::new(config.regime.clone())?;
        let aggregator = ConsensusAggregator::new(config.consensus.clone(), sources)?;
        let cache = SignalCache::new(config.engine.signal_cache_ttl_secs);
        let gate = Arc::new(RiskGate::new(config.risk.clone())?);
        let sizer = PositionSizer::new(config.sizing.clone(), &config.risk)?;
        let allocator = Arc::new(PortfolioAllocator::new(config.allocation.clone())?);

        Ok(Self {
            config: config.engine,
            classifier,
            aggregator,
            cache,
            gate,
            sizer,
            allocator,
        })
    }

    /// Risk gate handle for operator halt/resume and external queries.
    pub fn risk_gate(&self) -> Arc<RiskGate> {
        Arc::clone(&self.gate)
    }

    /// Allocator handle for strategy registration and outcome feeds.
    pub fn allocator(&self) -> Arc<PortfolioAllocator> {
        Arc::clone(&self.allocator)
    }

    /// Run one full evaluation cycle for a pair.
    ///
    /// Consensus comes from the cache while fresh, otherwise from a live
    /// fan-out. The regime (hinted by the consensus direction) drives a
    /// cadence-gated rebalance before the trade decision is made.
    pub async fn evaluate_pair(
        &self,
        pair: &str,
        timeframe: Timeframe,
        snapshot: &IndicatorSnapshot,
        portfolio: &PortfolioState,
    ) -> Result<TickDecision> {
        if snapshot.atr <= Decimal::ZERO {
            return Err(GambitError::InvalidInput(format!(
                "atr must be positive to derive exit prices, got {}",
                snapshot.atr
            )));
        }

        // A halted book never spends source quota.
        if self.gate.is_halted() {
            let reason = self
                .gate
                .halt_reason()
                .await
                .unwrap_or_else(|| "trading halted".to_string());
            return Ok(TickDecision::Rejected { reason });
        }

        let signal = match self.cache.get(pair, &timeframe).await {
            Some(cached) => {
                debug!(pair = %pair, "serving cached consensus signal");
                cached
            }
            None => {
                let fresh = self
                    .aggregator
                    .evaluate(pair, timeframe.clone(), snapshot)
                    .await;
                self.cache.insert(fresh.clone()).await;
                fresh
            }
        };

        let regime = self
            .classifier
            .classify_with_hint(snapshot, Some(signal.direction));
        if self.allocator.should_rebalance(Utc::now()).await {
            let weights = self.allocator.allocate(&regime).await;
            self.cache.purge_expired().await;
            debug!(
                strategies = weights.len(),
                regime = %regime.regime,
                "portfolio rebalanced on cadence"
            );
        }

        if !signal.should_trade(self.config.signal_threshold) {
            return Ok(TickDecision::NoTrade {
                reason: format!(
                    "signal not tradeable: direction {}, confidence {:.3}, consensus {:.3}, threshold {:.2}",
                    signal.direction,
                    signal.confidence,
                    signal.consensus_score,
                    self.config.signal_threshold
                ),
            });
        }

        let side = OrderSide::try_from(signal.direction)?;
        let entry_price = snapshot.last_price;
        let stop_distance = snapshot.atr * self.config.stop_loss_atr_multiplier;
        let take_distance = snapshot.atr * self.config.take_profit_atr_multiplier;
        let (stop_loss_price, take_profit_price) = match side {
            OrderSide::Buy => (entry_price - stop_distance, entry_price + take_distance),
            OrderSide::Sell => (entry_price + stop_distance, entry_price - take_distance),
        };
        if stop_loss_price <= Decimal::ZERO || take_profit_price <= Decimal::ZERO {
            return Ok(TickDecision::NoTrade {
                reason: format!(
                    "ATR exit distances swallow the entry price (atr {}, entry {})",
                    snapshot.atr, entry_price
                ),
            });
        }

        let context = SizingContext::default()
            .with_confidence(signal.confidence)
            .with_atr(snapshot.atr);
        let stake = self.sizer.size(
            portfolio.balance,
            entry_price,
            stop_loss_price,
            self.config.sizing_method,
            &context,
        )?;
        if stake.is_zero() {
            return Ok(TickDecision::NoTrade {
                reason: format!(
                    "confidence {:.3} below the sizing floor",
                    signal.confidence
                ),
            });
        }

        let stop_loss_pct = (entry_price - stop_loss_price).abs() / entry_price;
        let max_allowed = self.gate.max_allowed_stake(portfolio, stop_loss_pct)?;
        let stake = stake.min(max_allowed);

        match self
            .gate
            .evaluate_entry(pair, stake, portfolio, stop_loss_pct)
            .await?
        {
            RiskVerdict::Approved => {
                let intent = OrderIntent::new(
                    pair,
                    side,
                    stake,
                    entry_price,
                    stop_loss_price,
                    take_profit_price,
                );
                info!(
                    pair = %pair,
                    side = %side,
                    stake = %stake,
                    entry = %entry_price,
                    stop = %stop_loss_price,
                    confidence = signal.confidence,
                    regime = %regime.regime,
                    "trade intent created"
                );
                Ok(TickDecision::Trade(intent))
            }
            RiskVerdict::Denied(reason) => Ok(TickDecision::Rejected {
                reason: reason.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{AnalysisRequest, ProviderAnalysis};
    use crate::domain::Direction;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source that always answers the same verdict and counts calls.
    struct StaticSource {
        id: String,
        direction: Direction,
        confidence: f64,
        calls: AtomicUsize,
    }

    impl StaticSource {
        fn new(id: &str, direction: Direction, confidence: f64) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                direction,
                confidence,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AnalysisSource for StaticSource {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn model(&self) -> String {
            format!("static-{}", self.id)
        }

        async fn analyze(&self, _request: &AnalysisRequest) -> Result<ProviderAnalysis> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderAnalysis::new(
                self.id.clone(),
                self.direction,
                self.confidence,
                "static verdict",
            )
            .with_model(self.model()))
        }
    }

    fn weighted_config(weights: &[(&str, f64)]) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        for (id, weight) in weights {
            config
                .consensus
                .source_weights
                .insert(id.to_string(), *weight);
        }
        config
    }

    fn make_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            pair: "BTC/USDT".to_string(),
            timeframe: Timeframe::H1,
            last_price: dec!(50000),
            atr: dec!(500),
            trend_strength: 30.0,
            directional_spread_pct: 3.5,
            volatility_pct: 1.5,
            band_width_pct: 3.0,
            computed_at: Utc::now(),
        }
    }

    fn healthy_portfolio() -> PortfolioState {
        PortfolioState::new(dec!(10000))
    }

    #[tokio::test]
    async fn test_strong_consensus_produces_trade_intent() {
        let sources: Vec<Arc<dyn AnalysisSource>> = vec![
            StaticSource::new("alpha", Direction::Long, 0.9),
            StaticSource::new("bravo", Direction::Long, 0.85),
        ];
        let config = weighted_config(&[("alpha", 0.6), ("bravo", 0.4)]);
        let engine = DecisionEngine::new(config, sources).unwrap();

        let decision = engine
            .evaluate_pair(
                "BTC/USDT",
                Timeframe::H1,
                &make_snapshot(),
                &healthy_portfolio(),
            )
            .await
            .unwrap();

        let intent = decision.intent().expect("strong consensus must trade");
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.entry_price, dec!(50000));
        // Stop and take-profit sit 2 and 3 ATRs away from entry.
        assert_eq!(intent.stop_loss_price, dec!(49000));
        assert_eq!(intent.take_profit_price, dec!(51500));
        // The stake rides the position-size cap after confidence scaling.
        assert_eq!(intent.stake_amount, dec!(1000));
    }

    #[tokio::test]
    async fn test_short_consensus_flips_exit_prices() {
        let sources: Vec<Arc<dyn AnalysisSource>> =
            vec![StaticSource::new("alpha", Direction::Short, 0.9)];
        let config = weighted_config(&[("alpha", 1.0)]);
        let engine = DecisionEngine::new(config, sources).unwrap();

        let decision = engine
            .evaluate_pair(
                "BTC/USDT",
                Timeframe::H1,
                &make_snapshot(),
                &healthy_portfolio(),
            )
            .await
            .unwrap();

        let intent = decision.intent().expect("short consensus must trade");
        assert_eq!(intent.side, OrderSide::Sell);
        assert_eq!(intent.stop_loss_price, dec!(51000));
        assert_eq!(intent.take_profit_price, dec!(48500));
    }

    #[tokio::test]
    async fn test_weak_signal_is_no_trade() {
        let sources: Vec<Arc<dyn AnalysisSource>> = vec![
            StaticSource::new("alpha", Direction::Long, 0.5),
            StaticSource::new("bravo", Direction::Short, 0.5),
        ];
        let config = weighted_config(&[("alpha", 0.5), ("bravo", 0.5)]);
        let engine = DecisionEngine::new(config, sources).unwrap();

        let decision = engine
            .evaluate_pair(
                "BTC/USDT",
                Timeframe::H1,
                &make_snapshot(),
                &healthy_portfolio(),
            )
            .await
            .unwrap();

        match decision {
            TickDecision::NoTrade { reason } => {
                assert!(
                    reason.contains("not tradeable"),
                    "reason should explain the filter: {}",
                    reason
                );
            }
            other => panic!("split vote must not trade, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_halted_gate_rejects_before_sources_run() {
        let source = StaticSource::new("alpha", Direction::Long, 0.9);
        let sources: Vec<Arc<dyn AnalysisSource>> = vec![source.clone()];
        let config = weighted_config(&[("alpha", 1.0)]);
        let engine = DecisionEngine::new(config, sources).unwrap();

        engine.risk_gate().halt("manual operator stop").await;
        let decision = engine
            .evaluate_pair(
                "BTC/USDT",
                Timeframe::H1,
                &make_snapshot(),
                &healthy_portfolio(),
            )
            .await
            .unwrap();

        match decision {
            TickDecision::Rejected { reason } => {
                assert!(reason.contains("manual operator stop"));
            }
            other => panic!("halted gate must reject, got {:?}", other),
        }
        assert_eq!(
            source.calls.load(Ordering::SeqCst),
            0,
            "no source should be queried while halted"
        );
    }

    #[tokio::test]
    async fn test_confidence_below_sizing_floor_is_no_trade() {
        let sources: Vec<Arc<dyn AnalysisSource>> =
            vec![StaticSource::new("alpha", Direction::Long, 0.6)];
        let mut config = weighted_config(&[("alpha", 1.0)]);
        // Pass the signal filter but land under the sizing floor.
        config.engine.signal_threshold = 0.2;
        config.sizing.min_confidence = 0.9;
        let engine = DecisionEngine::new(config, sources).unwrap();

        let decision = engine
            .evaluate_pair(
                "BTC/USDT",
                Timeframe::H1,
                &make_snapshot(),
                &healthy_portfolio(),
            )
            .await
            .unwrap();

        match decision {
            TickDecision::NoTrade { reason } => {
                assert!(
                    reason.contains("sizing floor"),
                    "zero stake must read as declined sizing: {}",
                    reason
                );
            }
            other => panic!("sub-floor confidence must not trade, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_evaluation_serves_cached_signal() {
        let source = StaticSource::new("alpha", Direction::Long, 0.9);
        let sources: Vec<Arc<dyn AnalysisSource>> = vec![source.clone()];
        let config = weighted_config(&[("alpha", 1.0)]);
        let engine = DecisionEngine::new(config, sources).unwrap();

        let snapshot = make_snapshot();
        let portfolio = healthy_portfolio();
        engine
            .evaluate_pair("BTC/USDT", Timeframe::H1, &snapshot, &portfolio)
            .await
            .unwrap();
        engine
            .evaluate_pair("BTC/USDT", Timeframe::H1, &snapshot, &portfolio)
            .await
            .unwrap();

        assert_eq!(
            source.calls.load(Ordering::SeqCst),
            1,
            "the second tick must reuse the cached signal"
        );
    }

    #[tokio::test]
    async fn test_full_position_book_is_rejected() {
        let sources: Vec<Arc<dyn AnalysisSource>> =
            vec![StaticSource::new("alpha", Direction::Long, 0.9)];
        let config = weighted_config(&[("alpha", 1.0)]);
        let engine = DecisionEngine::new(config, sources).unwrap();

        let mut portfolio = healthy_portfolio();
        portfolio.open_positions = 5;
        let decision = engine
            .evaluate_pair("BTC/USDT", Timeframe::H1, &make_snapshot(), &portfolio)
            .await
            .unwrap();

        match decision {
            TickDecision::Rejected { reason } => {
                assert!(
                    reason.contains("max_concurrent_positions"),
                    "denial should name the limit: {}",
                    reason
                );
            }
            other => panic!("full book must reject, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unweighted_source_fails_construction() {
        let sources: Vec<Arc<dyn AnalysisSource>> =
            vec![StaticSource::new("alpha", Direction::Long, 0.9)];
        let config = PipelineConfig::default();
        assert!(
            DecisionEngine::new(config, sources).is_err(),
            "sources without configured weights must be rejected"
        );
    }

    #[tokio::test]
    async fn test_zero_atr_is_an_input_error() {
        let sources: Vec<Arc<dyn AnalysisSource>> =
            vec![StaticSource::new("alpha", Direction::Long, 0.9)];
        let config = weighted_config(&[("alpha", 1.0)]);
        let engine = DecisionEngine::new(config, sources).unwrap();

        let mut snapshot = make_snapshot();
        snapshot.atr = Decimal::ZERO;
        let result = engine
            .evaluate_pair("BTC/USDT", Timeframe::H1, &snapshot, &healthy_portfolio())
            .await;
        assert!(matches!(result, Err(GambitError::InvalidInput(_))));
    }

    #[test]
    fn test_engine_config_validation() {
        let mut config = EngineConfig::default();
        config.signal_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.stop_loss_atr_multiplier = dec!(0);
        assert!(config.validate().is_err());

        assert!(EngineConfig::default().validate().is_ok());
    }
}
