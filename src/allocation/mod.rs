//! Regime classification and capital allocation

pub mod allocator;
pub mod regime;

pub use allocator::{
    AllocationConfig, AllocationMethod, PortfolioAllocator, StrategyAllocation,
};
pub use regime::{MarketRegime, RegimeClassifier, RegimeConfig, RegimeSnapshot};
