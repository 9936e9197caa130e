//! Pre-trade risk checks, position accounting and cooldowns

pub mod limits;
pub mod manager;

pub use limits::{RiskLimits, Violation, ViolationKind};
pub use manager::{PortfolioStats, RiskManager};
