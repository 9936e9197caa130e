//! Risk limit configuration and violation reporting

use crate::core::types::{Duration, Price, Volume};
use serde::{Deserialize, Serialize};

/// Per-run (or per-strategy override) risk configuration.
///
/// Each `enable_*` switch turns its whole group on or off independently.
/// Loss limits are expressed as negative numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    // Position limits
    pub max_position_size: Volume,
    pub max_order_size: Volume,

    // Exposure limits
    pub max_notional_exposure: Price,
    pub max_portfolio_exposure: Price,

    // Loss limits
    pub max_daily_loss: Price,
    pub max_total_loss: Price,
    /// Maximum drawdown from the P&L high-water mark, as a negative fraction
    pub max_drawdown: Price,
    /// A single trade losing more than this arms the loss cooldown
    pub significant_loss_threshold: Price,

    // Rate limits
    pub max_orders_per_minute: u32,
    pub max_orders_per_day: u32,

    // Cooldown periods
    pub loss_cooldown: Duration,
    pub drawdown_cooldown: Duration,

    pub enable_position_limits: bool,
    pub enable_exposure_limits: bool,
    pub enable_loss_limits: bool,
    pub enable_rate_limiting: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: 1_000_000,
            max_order_size: 10_000,
            max_notional_exposure: 10_000_000.0,
            max_portfolio_exposure: 50_000_000.0,
            max_daily_loss: -10_000.0,
            max_total_loss: -50_000.0,
            max_drawdown: -0.1,
            significant_loss_threshold: -1_000.0,
            max_orders_per_minute: 100,
            max_orders_per_day: 10_000,
            loss_cooldown: Duration::from_mins(30),
            drawdown_cooldown: Duration::from_mins(60),
            enable_position_limits: true,
            enable_exposure_limits: true,
            enable_loss_limits: true,
            enable_rate_limiting: true,
        }
    }
}

/// Closed set of pre-trade rejection reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    Position,
    Exposure,
    Loss,
    OrderSize,
    Rate,
    Cooldown,
}

/// A failed pre-trade check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    pub current: Price,
    pub limit: Price,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>, current: Price, limit: Price) -> Self {
        Self {
            kind,
            message: message.into(),
            current,
            limit,
        }
    }
}
