//! Analysis source interface
//!
//! Capability interface implemented by external market analysts (LLM
//! clients, statistical models, third-party signal APIs). The pipeline
//! only ever sees this trait; concrete clients live outside the crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, IndicatorSnapshot, Timeframe};
use crate::error::Result;

#[cfg(test)]
use mockall::automock;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Request handed to every analysis source in one fan-out cycle
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub pair: String,
    pub timeframe: Timeframe,
    /// Precomputed indicators for the pair/timeframe
    pub snapshot: IndicatorSnapshot,
    /// Free-form extra context (news digest, session notes)
    pub context: Option<String>,
}

impl AnalysisRequest {
    pub fn new(pair: impl Into<String>, timeframe: Timeframe, snapshot: IndicatorSnapshot) -> Self {
        Self {
            pair: pair.into(),
            timeframe,
            snapshot,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// One analyst's verdict for a single request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAnalysis {
    /// Source that produced the verdict
    pub source_id: String,
    pub direction: Direction,
    /// Conviction in [0.0, 1.0]
    pub confidence: f64,
    /// Short human-readable justification
    pub rationale: String,
    /// Model or version the source consulted
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

impl ProviderAnalysis {
    pub fn new(
        source_id: impl Into<String>,
        direction: Direction,
        confidence: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            direction,
            confidence,
            rationale: rationale.into(),
            model: String::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Confidence must be a finite value in [0.0, 1.0] to count toward
    /// consensus; anything else marks the source failed for the cycle.
    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

// ============================================================================
// Source Trait
// ============================================================================

/// Capability interface for one independent market analyst
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    /// Stable identifier; must match a configured source weight
    fn id(&self) -> String;

    /// Model or version this source consults, for diagnostics
    fn model(&self) -> String;

    /// Produce an analysis for the request. Runs under the aggregator's
    /// per-source timeout; any error counts as source-unavailable for
    /// the cycle and never aborts consensus.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<ProviderAnalysis>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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

    #[test]
    fn test_confidence_validity_bounds() {
        let mut analysis = ProviderAnalysis::new("alpha", Direction::Long, 0.75, "breakout");
        assert!(analysis.has_valid_confidence());

        analysis.confidence = 0.0;
        assert!(analysis.has_valid_confidence());
        analysis.confidence = 1.0;
        assert!(analysis.has_valid_confidence());

        analysis.confidence = 1.3;
        assert!(!analysis.has_valid_confidence());
        analysis.confidence = -0.1;
        assert!(!analysis.has_valid_confidence());
        analysis.confidence = f64::NAN;
        assert!(!analysis.has_valid_confidence());
    }

    #[test]
    fn test_request_builder_carries_context() {
        let request = AnalysisRequest::new("BTC/USDT", Timeframe::M15, make_snapshot())
            .with_context("fed minutes at 18:00 UTC");
        assert_eq!(request.context.as_deref(), Some("fed minutes at 18:00 UTC"));
    }

    #[tokio::test]
    async fn test_mock_source_round_trip() {
        let mut source = MockAnalysisSource::new();
        source.expect_id().return_const("alpha".to_string());
        source.expect_model().return_const("gpt-test".to_string());
        source.expect_analyze().returning(|request| {
            Ok(
                ProviderAnalysis::new("alpha", Direction::Long, 0.8, "trend continuation")
                    .with_model(format!("model-for-{}", request.pair)),
            )
        });

        let request = AnalysisRequest::new("BTC/USDT", Timeframe::M15, make_snapshot());
        let analysis = source.analyze(&request).await.unwrap();
        assert_eq!(analysis.direction, Direction::Long);
        assert_eq!(analysis.model, "model-for-BTC/USDT");
    }
}
