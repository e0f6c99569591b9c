use thiserror::Error;

/// Main error type for the decision pipeline
#[derive(Error, Debug)]
pub enum GambitError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Caller-supplied values rejected before any state changes
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Analysis source failures; absorbed by the aggregator, surfaced
    // only in per-source diagnostics
    #[error("Analysis source '{source}' unavailable: {reason}")]
    SourceUnavailable { source: String, reason: String },

    // Risk management errors
    #[error("Trading halted: {reason}")]
    TradingHalted { reason: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GambitError
pub type Result<T> = std::result::Result<T, GambitError>;

impl GambitError {
    /// True when the error should abort construction rather than a
    /// single request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GambitError::Config(_) | GambitError::InvalidConfig(_)
        )
    }

    /// Shorthand for a source failure with a displayable reason.
    pub fn source_unavailable(source: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        GambitError::SourceUnavailable {
            source: source.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_covers_config_errors() {
        assert!(GambitError::InvalidConfig("weights must sum to 1.0".into()).is_fatal());
        assert!(!GambitError::InvalidInput("stop_loss_pct must be positive".into()).is_fatal());
        assert!(!GambitError::TradingHalted {
            reason: "drawdown breach".into()
        }
        .is_fatal());
    }

    #[test]
    fn source_unavailable_message_names_the_source() {
        let err = GambitError::source_unavailable("alpha", "timeout after 5000ms");
        assert_eq!(
            err.to_string(),
            "Analysis source 'alpha' unavailable: timeout after 5000ms"
        );
    }
}
