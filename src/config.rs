use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::allocation::{AllocationConfig, RegimeConfig};
use crate::consensus::ConsensusConfig;
use crate::engine::EngineConfig;
use crate::risk::RiskLimits;
use crate::sizing::SizingConfig;

/// Main configuration structure
///
/// Every section carries complete defaults, so an empty source yields a
/// valid configuration (no sources wired, paper-safe limits).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl PipelineConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("GAMBIT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (GAMBIT_RISK__MAX_TOTAL_DRAWDOWN_PCT, etc.)
            .add_source(
                Environment::with_prefix("GAMBIT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate every section, collecting all failures instead of
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.consensus.validate() {
            errors.push(format!("consensus: {e}"));
        }
        if let Err(e) = self.risk.validate() {
            errors.push(format!("risk: {e}"));
        }
        if let Err(e) = self.sizing.validate() {
            errors.push(format!("sizing: {e}"));
        }
        if let Err(e) = self.regime.validate() {
            errors.push(format!("regime: {e}"));
        }
        if let Err(e) = self.allocation.validate() {
            errors.push(format!("allocation: {e}"));
        }
        if let Err(e) = self.engine.validate() {
            errors.push(format!("engine: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
