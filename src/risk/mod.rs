pub mod gate;
pub mod limits;

pub use gate::{DenyReason, RiskEvent, RiskEventKind, RiskGate, RiskState, RiskVerdict};
pub use limits::RiskLimits;
