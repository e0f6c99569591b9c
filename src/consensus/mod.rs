pub mod aggregator;
pub mod cache;
pub mod source;

pub use aggregator::{ConsensusAggregator, ConsensusConfig, ConsensusSignal};
pub use cache::SignalCache;
pub use source::{AnalysisRequest, AnalysisSource, ProviderAnalysis};
