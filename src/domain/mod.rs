pub mod market;
pub mod portfolio;

pub use market::*;
pub use portfolio::*;
