pub mod allocation;
pub mod config;
pub mod consensus;
pub mod domain;
pub mod engine;
pub mod error;
pub mod risk;
pub mod sizing;

pub use allocation::{
    AllocationConfig, AllocationMethod, MarketRegime, PortfolioAllocator, RegimeClassifier,
    RegimeConfig, RegimeSnapshot, StrategyAllocation,
};
pub use config::PipelineConfig;
pub use consensus::{
    AnalysisRequest, AnalysisSource, ConsensusAggregator, ConsensusConfig, ConsensusSignal,
    ProviderAnalysis, SignalCache,
};
pub use domain::{
    Direction, IndicatorSnapshot, OrderIntent, OrderSide, PortfolioState, Timeframe,
};
pub use engine::{DecisionEngine, EngineConfig, TickDecision};
pub use error::{GambitError, Result};
pub use risk::{
    DenyReason, RiskEvent, RiskEventKind, RiskGate, RiskLimits, RiskState, RiskVerdict,
};
pub use sizing::{PositionSizer, SizingConfig, SizingContext, SizingMethod, TradeStats};
