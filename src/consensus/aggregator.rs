//! Weighted consensus across independent analysis sources
//!
//! Fans one request out to every wired source in parallel with:
//! - A bounded per-source timeout
//! - Failure absorption (a dead source never aborts the cycle)
//! - Weight rescaling so surviving sources keep full voting power
//! - A fixed tie-break when direction scores land exactly equal

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::consensus::source::{AnalysisRequest, AnalysisSource};
use crate::domain::{Direction, IndicatorSnapshot, Timeframe};
use crate::error::{GambitError, Result};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ============================================================================
// Configuration
// ============================================================================

/// Consensus aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Hard deadline per source; a slower source counts as failed
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    /// Static weight per source id; must cover every wired source and
    /// sum to 1.0 when non-empty
    #[serde(default)]
    pub source_weights: HashMap<String, f64>,
}

fn default_source_timeout_ms() -> u64 {
    10_000
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            source_weights: HashMap::new(),
        }
    }
}

impl ConsensusConfig {
    /// Validate settings; weights are only checked when configured so an
    /// empty config stays loadable before sources are wired.
    pub fn validate(&self) -> Result<()> {
        if self.source_timeout_ms == 0 {
            return Err(GambitError::InvalidConfig(
                "source_timeout_ms must be positive".to_string(),
            ));
        }
        if self.source_weights.is_empty() {
            return Ok(());
        }
        for (source_id, weight) in &self.source_weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(GambitError::InvalidConfig(format!(
                    "weight for analysis source '{}' must be positive (got {})",
                    source_id, weight
                )));
            }
        }
        let sum: f64 = self.source_weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(GambitError::InvalidConfig(format!(
                "source weights must sum to 1.0 (got {:.6})",
                sum
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Consensus Signal
// ============================================================================

/// Fused verdict for one pair/timeframe evaluation.
///
/// Immutable once produced; callers may cache it with a bounded TTL but
/// the aggregator itself recomputes fresh every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSignal {
    pub pair: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    /// Weighted mean conviction of the responding sources, in [0, 1]
    pub confidence: f64,
    /// Rescaled weight share behind the majority direction, in [0, 1]
    pub consensus_score: f64,
    pub active_sources: Vec<String>,
    pub failed_sources: Vec<String>,
    /// Model identifier per responding source
    pub source_models: HashMap<String, String>,
    pub rationale: String,
    pub generated_at: DateTime<Utc>,
}

impl ConsensusSignal {
    /// Neutral zero-signal used when no source responded
    fn no_consensus(pair: impl Into<String>, timeframe: Timeframe, failed: Vec<String>) -> Self {
        Self {
            pair: pair.into(),
            timeframe,
            direction: Direction::Neutral,
            confidence: 0.0,
            consensus_score: 0.0,
            active_sources: Vec::new(),
            failed_sources: failed,
            source_models: HashMap::new(),
            rationale: "no sources responded".to_string(),
            generated_at: Utc::now(),
        }
    }

    /// Entry filter: a trade is only warranted when the direction is
    /// non-neutral and both conviction measures reach the threshold.
    /// Boundary equality passes.
    pub fn should_trade(&self, threshold: f64) -> bool {
        self.direction != Direction::Neutral
            && self.confidence >= threshold
            && self.consensus_score >= threshold
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Fans analysis requests out to weighted sources and fuses the replies
pub struct ConsensusAggregator {
    config: ConsensusConfig,
    sources: Vec<Arc<dyn AnalysisSource>>,
}

impl ConsensusAggregator {
    /// Build an aggregator over the wired sources. Fails fast when a
    /// source has no configured weight or the weights do not sum to 1.0.
    pub fn new(config: ConsensusConfig, sources: Vec<Arc<dyn AnalysisSource>>) -> Result<Self> {
        config.validate()?;
        if sources.is_empty() {
            return Err(GambitError::InvalidConfig(
                "at least one analysis source is required".to_string(),
            ));
        }
        for source in &sources {
            let id = source.id();
            if !config.source_weights.contains_key(&id) {
                return Err(GambitError::InvalidConfig(format!(
                    "no weight configured for analysis source '{}'",
                    id
                )));
            }
        }
        Ok(Self { config, sources })
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Evaluate one pair/timeframe across all sources concurrently.
    ///
    /// Never fails: source errors, timeouts, panics and malformed
    /// replies are recorded in `failed_sources` and the surviving
    /// weights are rescaled to keep full voting power. When every
    /// source fails the result is a neutral zero-signal.
    pub async fn evaluate(
        &self,
        pair: &str,
        timeframe: Timeframe,
        snapshot: &IndicatorSnapshot,
    ) -> ConsensusSignal {
        let request = Arc::new(AnalysisRequest::new(pair, timeframe.clone(), snapshot.clone()));
        let timeout = Duration::from_millis(self.config.source_timeout_ms);

        let source_ids: Vec<String> = self.sources.iter().map(|s| s.id()).collect();
        let mut tasks = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let source = Arc::clone(source);
            let request = Arc::clone(&request);
            tasks.push(tokio::spawn(async move {
                let model = source.model();
                let outcome = tokio::time::timeout(timeout, source.analyze(&request)).await;
                (model, outcome)
            }));
        }

        let results = futures::future::join_all(tasks).await;

        let mut direction_scores: HashMap<Direction, f64> = HashMap::new();
        let mut weighted_confidence = 0.0;
        let mut total_weight = 0.0;
        let mut active_sources = Vec::new();
        let mut failed_sources = Vec::new();
        let mut source_models = HashMap::new();
        let mut rationales = Vec::new();

        for (source_id, result) in source_ids.into_iter().zip(results) {
            let weight = self
                .config
                .source_weights
                .get(&source_id)
                .copied()
                .unwrap_or(0.0);
            match result {
                Ok((model, Ok(Ok(analysis)))) if analysis.has_valid_confidence() => {
                    debug!(
                        source = %source_id,
                        direction = %analysis.direction,
                        confidence = analysis.confidence,
                        "analysis source responded"
                    );
                    *direction_scores.entry(analysis.direction).or_insert(0.0) += weight;
                    weighted_confidence += analysis.confidence * weight;
                    total_weight += weight;
                    active_sources.push(source_id.clone());
                    source_models.insert(source_id.clone(), model);
                    rationales.push(format!("{}: {}", source_id, analysis.rationale));
                }
                Ok((_, Ok(Ok(analysis)))) => {
                    warn!(
                        source = %source_id,
                        confidence = analysis.confidence,
                        "discarding analysis with out-of-range confidence"
                    );
                    failed_sources.push(source_id);
                }
                Ok((_, Ok(Err(e)))) => {
                    warn!(source = %source_id, error = %e, "analysis source failed");
                    failed_sources.push(source_id);
                }
                Ok((_, Err(_))) => {
                    warn!(
                        source = %source_id,
                        timeout_ms = self.config.source_timeout_ms,
                        "analysis source timed out"
                    );
                    failed_sources.push(source_id);
                }
                Err(e) => {
                    error!(source = %source_id, error = %e, "analysis task panicked");
                    failed_sources.push(source_id);
                }
            }
        }

        if active_sources.is_empty() {
            warn!(pair = %pair, "consensus evaluation got no responses");
            return ConsensusSignal::no_consensus(pair, timeframe, failed_sources);
        }

        // Surviving sources absorb the failed weight so the score scale
        // stays comparable across cycles.
        if total_weight > 0.0 && total_weight < 1.0 {
            let factor = 1.0 / total_weight;
            for score in direction_scores.values_mut() {
                *score *= factor;
            }
            weighted_confidence *= factor;
            info!(
                pair = %pair,
                reweight_factor = factor,
                failed = ?failed_sources,
                "rescaled consensus weights around failed sources"
            );
        }

        let mut direction = Direction::Neutral;
        let mut consensus_score = f64::MIN;
        for candidate in Direction::priority_order() {
            let score = direction_scores.get(&candidate).copied().unwrap_or(0.0);
            if score > consensus_score {
                consensus_score = score;
                direction = candidate;
            }
        }

        let signal = ConsensusSignal {
            pair: pair.to_string(),
            timeframe,
            direction,
            confidence: weighted_confidence,
            consensus_score,
            active_sources,
            failed_sources,
            source_models,
            rationale: rationales.join("; "),
            generated_at: Utc::now(),
        };

        info!(
            pair = %signal.pair,
            timeframe = %signal.timeframe,
            direction = %signal.direction,
            confidence = signal.confidence,
            consensus_score = signal.consensus_score,
            active = signal.active_sources.len(),
            failed = signal.failed_sources.len(),
            "consensus evaluation complete"
        );

        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::source::ProviderAnalysis;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    /// Deterministic source double: replies with a fixed verdict,
    /// errors out, or sleeps past the timeout.
    struct ScriptedSource {
        id: String,
        reply: Option<(Direction, f64)>,
        delay_ms: u64,
    }

    impl ScriptedSource {
        fn replying(id: &str, direction: Direction, confidence: f64) -> Arc<dyn AnalysisSource> {
            Arc::new(Self {
                id: id.to_string(),
                reply: Some((direction, confidence)),
                delay_ms: 0,
            })
        }

        fn failing(id: &str) -> Arc<dyn AnalysisSource> {
            Arc::new(Self {
                id: id.to_string(),
                reply: None,
                delay_ms: 0,
            })
        }

        fn slow(id: &str, direction: Direction, confidence: f64, delay_ms: u64) -> Arc<dyn AnalysisSource> {
            Arc::new(Self {
                id: id.to_string(),
                reply: Some((direction, confidence)),
                delay_ms,
            })
        }
    }

    #[async_trait]
    impl AnalysisSource for ScriptedSource {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn model(&self) -> String {
            format!("scripted-{}", self.id)
        }

        async fn analyze(&self, _request: &AnalysisRequest) -> Result<ProviderAnalysis> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            match self.reply {
                Some((direction, confidence)) => Ok(ProviderAnalysis::new(
                    &self.id,
                    direction,
                    confidence,
                    "scripted verdict",
                )
                .with_model(self.model())),
                None => Err(GambitError::source_unavailable(&self.id, "scripted outage")),
            }
        }
    }

    fn make_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            pair: "BTC/USDT".to_string(),
            timeframe: Timeframe::M15,
            last_price: dec!(50000),
            atr: dec!(400),
            trend_strength: 28.0,
            directional_spread_pct: 3.2,
            volatility_pct: 0.8,
            band_width_pct: 2.1,
            computed_at: Utc::now(),
        }
    }

    fn three_way_config() -> ConsensusConfig {
        let mut weights = HashMap::new();
        weights.insert("alpha".to_string(), 0.40);
        weights.insert("beta".to_string(), 0.35);
        weights.insert("gamma".to_string(), 0.25);
        ConsensusConfig {
            source_timeout_ms: 1_000,
            source_weights: weights,
        }
    }

    #[tokio::test]
    async fn test_unanimous_long_consensus() {
        let aggregator = ConsensusAggregator::new(
            three_way_config(),
            vec![
                ScriptedSource::replying("alpha", Direction::Long, 0.8),
                ScriptedSource::replying("beta", Direction::Long, 0.7),
                ScriptedSource::replying("gamma", Direction::Long, 0.75),
            ],
        )
        .unwrap();

        let signal = aggregator
            .evaluate("BTC/USDT", Timeframe::M15, &make_snapshot())
            .await;

        assert_eq!(signal.direction, Direction::Long);
        assert!(
            (signal.consensus_score - 1.0).abs() < 1e-9,
            "consensus_score={} should be 1.0 for a unanimous vote",
            signal.consensus_score
        );
        assert!(
            (signal.confidence - 0.7525).abs() < 1e-9,
            "confidence={} should be the weighted mean 0.7525",
            signal.confidence
        );
        assert_eq!(signal.active_sources.len(), 3);
        assert!(signal.failed_sources.is_empty());
        assert_eq!(
            signal.source_models.get("beta").map(String::as_str),
            Some("scripted-beta")
        );
    }

    #[tokio::test]
    async fn test_failed_source_is_reweighted_around() {
        let aggregator = ConsensusAggregator::new(
            three_way_config(),
            vec![
                ScriptedSource::failing("alpha"),
                ScriptedSource::replying("beta", Direction::Long, 0.7),
                ScriptedSource::replying("gamma", Direction::Long, 0.6),
            ],
        )
        .unwrap();

        let signal = aggregator
            .evaluate("BTC/USDT", Timeframe::M15, &make_snapshot())
            .await;

        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.failed_sources, vec!["alpha".to_string()]);
        assert_eq!(signal.active_sources.len(), 2);
        // 0.35 and 0.25 rescale to 0.5833/0.4167; weighted mean of
        // (0.7, 0.6) under those weights is 0.6583.
        assert!(
            (signal.confidence - 0.6583333333).abs() < 1e-6,
            "confidence={} should be ~0.658 after reweighting",
            signal.confidence
        );
        assert!(
            (signal.consensus_score - 1.0).abs() < 1e-9,
            "consensus_score={} should rescale back to 1.0",
            signal.consensus_score
        );
    }

    #[tokio::test]
    async fn test_all_sources_failed_yields_neutral_zero() {
        let aggregator = ConsensusAggregator::new(
            three_way_config(),
            vec![
                ScriptedSource::failing("alpha"),
                ScriptedSource::failing("beta"),
                ScriptedSource::failing("gamma"),
            ],
        )
        .unwrap();

        let signal = aggregator
            .evaluate("BTC/USDT", Timeframe::M15, &make_snapshot())
            .await;

        assert_eq!(signal.direction, Direction::Neutral);
        assert_eq!(signal.confidence, 0.0);
        assert_eq!(signal.consensus_score, 0.0);
        assert_eq!(signal.failed_sources.len(), 3);
        assert!(signal.rationale.contains("no sources responded"));
    }

    #[tokio::test]
    async fn test_slow_source_counts_as_failed() {
        let mut config = three_way_config();
        config.source_timeout_ms = 50;
        let aggregator = ConsensusAggregator::new(
            config,
            vec![
                ScriptedSource::slow("alpha", Direction::Short, 0.9, 300),
                ScriptedSource::replying("beta", Direction::Long, 0.7),
                ScriptedSource::replying("gamma", Direction::Long, 0.65),
            ],
        )
        .unwrap();

        let signal = aggregator
            .evaluate("BTC/USDT", Timeframe::M15, &make_snapshot())
            .await;

        assert_eq!(signal.failed_sources, vec!["alpha".to_string()]);
        assert_eq!(signal.direction, Direction::Long);
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_counts_as_failed() {
        let aggregator = ConsensusAggregator::new(
            three_way_config(),
            vec![
                ScriptedSource::replying("alpha", Direction::Short, 1.7),
                ScriptedSource::replying("beta", Direction::Long, 0.7),
                ScriptedSource::replying("gamma", Direction::Long, 0.6),
            ],
        )
        .unwrap();

        let signal = aggregator
            .evaluate("BTC/USDT", Timeframe::M15, &make_snapshot())
            .await;

        assert_eq!(signal.failed_sources, vec!["alpha".to_string()]);
        assert_eq!(signal.direction, Direction::Long);
        assert!(
            (signal.consensus_score - 1.0).abs() < 1e-9,
            "malformed reply must not dilute the surviving vote"
        );
    }

    #[tokio::test]
    async fn test_split_vote_keeps_majority_share() {
        let aggregator = ConsensusAggregator::new(
            three_way_config(),
            vec![
                ScriptedSource::replying("alpha", Direction::Long, 0.6),
                ScriptedSource::replying("beta", Direction::Long, 0.7),
                ScriptedSource::replying("gamma", Direction::Short, 0.9),
            ],
        )
        .unwrap();

        let signal = aggregator
            .evaluate("BTC/USDT", Timeframe::M15, &make_snapshot())
            .await;

        assert_eq!(signal.direction, Direction::Long);
        assert!(
            (signal.consensus_score - 0.75).abs() < 1e-9,
            "consensus_score={} should be the long share 0.75",
            signal.consensus_score
        );
        assert!(
            (signal.confidence - 0.71).abs() < 1e-9,
            "confidence={} should stay the weighted mean over all respondents",
            signal.confidence
        );
    }

    #[tokio::test]
    async fn test_exact_tie_breaks_long_over_short() {
        let mut weights = HashMap::new();
        weights.insert("alpha".to_string(), 0.5);
        weights.insert("beta".to_string(), 0.5);
        let aggregator = ConsensusAggregator::new(
            ConsensusConfig {
                source_timeout_ms: 1_000,
                source_weights: weights,
            },
            vec![
                ScriptedSource::replying("alpha", Direction::Short, 0.8),
                ScriptedSource::replying("beta", Direction::Long, 0.8),
            ],
        )
        .unwrap();

        let signal = aggregator
            .evaluate("BTC/USDT", Timeframe::M15, &make_snapshot())
            .await;

        assert_eq!(signal.direction, Direction::Long);
        assert!((signal.consensus_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_should_trade_boundary_equality_passes() {
        let mut signal =
            ConsensusSignal::no_consensus("BTC/USDT", Timeframe::M15, Vec::new());
        signal.direction = Direction::Long;
        signal.confidence = 0.6;
        signal.consensus_score = 0.6;
        assert!(signal.should_trade(0.6));

        signal.confidence = 0.5999;
        assert!(!signal.should_trade(0.6));

        signal.confidence = 0.9;
        signal.consensus_score = 0.9;
        signal.direction = Direction::Neutral;
        assert!(!signal.should_trade(0.6), "neutral never trades");
    }

    #[test]
    fn test_config_rejects_bad_weights() {
        let mut weights = HashMap::new();
        weights.insert("alpha".to_string(), 0.6);
        weights.insert("beta".to_string(), 0.6);
        let config = ConsensusConfig {
            source_timeout_ms: 1_000,
            source_weights: weights,
        };
        assert!(matches!(
            config.validate(),
            Err(GambitError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_new_rejects_unweighted_source() {
        let mut weights = HashMap::new();
        weights.insert("alpha".to_string(), 1.0);
        let result = ConsensusAggregator::new(
            ConsensusConfig {
                source_timeout_ms: 1_000,
                source_weights: weights,
            },
            vec![
                ScriptedSource::replying("alpha", Direction::Long, 0.8),
                ScriptedSource::replying("rogue", Direction::Long, 0.8),
            ],
        );
        assert!(matches!(result, Err(GambitError::InvalidConfig(_))));
    }
}
