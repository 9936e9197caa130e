//! Pre-trade risk gates and fill-time accounting
//!
//! The manager keeps per-(strategy, instrument) positions and exposures plus
//! per-strategy P&L, order rate windows and cooldowns. `check` is
//! side-effect-free against a state snapshot; mutation happens only through
//! `on_order_submitted`, `on_fill`, `mark_to_market` and `reset_daily`.

use crate::core::types::{Duration, InstrumentId, Order, Position, Price, StrategyId, Timestamp};
use crate::core::Fill;
use crate::risk::limits::{RiskLimits, Violation, ViolationKind};
use hashbrown::HashMap;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Rolling window for order rate limiting
const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct RiskState {
    order_times: VecDeque<Timestamp>,
    daily_orders: u32,
    daily_pnl: Price,
    total_pnl: Price,
    /// High-water mark of total P&L, for drawdown tracking
    peak_pnl: Price,
    cooldown_until: Option<Timestamp>,
}

type PositionKey = (StrategyId, InstrumentId);

/// Pre-trade checks, position tracking and cooldowns
pub struct RiskManager {
    limits: RiskLimits,
    strategy_limits: HashMap<StrategyId, RiskLimits>,
    positions: HashMap<PositionKey, Position>,
    exposures: HashMap<PositionKey, Price>,
    state: HashMap<StrategyId, RiskState>,
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new(RiskLimits::default())
    }
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            strategy_limits: HashMap::new(),
            positions: HashMap::new(),
            exposures: HashMap::new(),
            state: HashMap::new(),
        }
    }

    pub fn set_limits(&mut self, limits: RiskLimits) {
        self.limits = limits;
    }

    /// Strategy-specific limits override the global defaults
    pub fn set_strategy_limits(&mut self, strategy: impl Into<StrategyId>, limits: RiskLimits) {
        self.strategy_limits.insert(strategy.into(), limits);
    }

    fn limits_for(&self, strategy: &str) -> &RiskLimits {
        self.strategy_limits.get(strategy).unwrap_or(&self.limits)
    }

    /// Run the enabled pre-trade checks in order: order size, rate, position
    /// delta, exposure, loss thresholds, cooldown. The first failure is
    /// returned. Pure with respect to risk state.
    pub fn check(&self, order: &Order, now: Timestamp) -> Option<Violation> {
        let limits = self.limits_for(&order.strategy);

        if limits.enable_position_limits && order.quantity > limits.max_order_size {
            return Some(Violation::new(
                ViolationKind::OrderSize,
                "order size exceeds maximum allowed",
                order.quantity as Price,
                limits.max_order_size as Price,
            ));
        }

        let state = self.state.get(&order.strategy);

        if limits.enable_rate_limiting {
            if let Some(state) = state {
                let window_start = now - RATE_WINDOW;
                let recent = state.order_times.iter().filter(|&&t| t >= window_start).count();
                if recent as u32 >= limits.max_orders_per_minute {
                    return Some(Violation::new(
                        ViolationKind::Rate,
                        "order rate limit exceeded",
                        recent as Price,
                        limits.max_orders_per_minute as Price,
                    ));
                }
                if state.daily_orders >= limits.max_orders_per_day {
                    return Some(Violation::new(
                        ViolationKind::Rate,
                        "daily order limit exceeded",
                        state.daily_orders as Price,
                        limits.max_orders_per_day as Price,
                    ));
                }
            }
        }

        if limits.enable_position_limits {
            let key = (order.strategy.clone(), order.instrument.clone());
            let current = self.positions.get(&key).map_or(0, |p| p.quantity);
            let new_position = current + order.side.sign() * order.quantity as i64;
            if new_position.unsigned_abs() > limits.max_position_size {
                return Some(Violation::new(
                    ViolationKind::Position,
                    "position size limit exceeded",
                    new_position.unsigned_abs() as Price,
                    limits.max_position_size as Price,
                ));
            }
        }

        if limits.enable_exposure_limits {
            let notional = order.notional();
            if notional > limits.max_notional_exposure {
                return Some(Violation::new(
                    ViolationKind::Exposure,
                    "notional exposure limit exceeded",
                    notional,
                    limits.max_notional_exposure,
                ));
            }
            let portfolio: Price = self.exposures.values().map(|e| e.abs()).sum();
            if portfolio + notional > limits.max_portfolio_exposure {
                return Some(Violation::new(
                    ViolationKind::Exposure,
                    "portfolio exposure limit exceeded",
                    portfolio + notional,
                    limits.max_portfolio_exposure,
                ));
            }
        }

        if limits.enable_loss_limits {
            if let Some(state) = state {
                if state.daily_pnl < limits.max_daily_loss {
                    return Some(Violation::new(
                        ViolationKind::Loss,
                        "daily loss limit exceeded",
                        state.daily_pnl,
                        limits.max_daily_loss,
                    ));
                }
                if state.total_pnl < limits.max_total_loss {
                    return Some(Violation::new(
                        ViolationKind::Loss,
                        "total loss limit exceeded",
                        state.total_pnl,
                        limits.max_total_loss,
                    ));
                }
                if let Some(until) = state.cooldown_until {
                    if until > now {
                        let remaining_mins = (until - now).nanos() as f64 / 60e9;
                        return Some(Violation::new(
                            ViolationKind::Cooldown,
                            format!("strategy in cooldown, {remaining_mins:.1} minutes remaining"),
                            0.0,
                            0.0,
                        ));
                    }
                }
            }
        }

        None
    }

    /// Record an approved submission into the rate window
    pub fn on_order_submitted(&mut self, order: &Order) {
        let limits = self.limits_for(&order.strategy);
        if !limits.enable_rate_limiting {
            return;
        }
        let state = self.state.entry(order.strategy.clone()).or_default();
        let window_start = order.timestamp - RATE_WINDOW;
        while state.order_times.front().is_some_and(|&t| t < window_start) {
            state.order_times.pop_front();
        }
        state.order_times.push_back(order.timestamp);
        state.daily_orders += 1;
    }

    /// Apply a fill: position and exposure bookkeeping, trade P&L, cooldowns.
    ///
    /// Trade P&L uses the weighted-average-entry convention: the closing
    /// quantity realizes against the average entry price, minus the fill's
    /// commission; an opening fill realizes `-commission`.
    pub fn on_fill(&mut self, fill: &Fill) {
        let key = (fill.strategy.clone(), fill.instrument.clone());
        let position = self
            .positions
            .entry(key.clone())
            .or_insert_with(|| Position::new(fill.instrument.clone(), fill.strategy.clone()));
        let trade_pnl = position.apply_fill(fill);

        let position_quantity = position.quantity;
        self.exposures
            .insert(key, position.quantity.abs() as Price * position.average_price);

        let limits_enable_loss = self.limits_for(&fill.strategy).enable_loss_limits;
        let significant_loss = self.limits_for(&fill.strategy).significant_loss_threshold;
        let loss_cooldown = self.limits_for(&fill.strategy).loss_cooldown;
        let max_drawdown = self.limits_for(&fill.strategy).max_drawdown;
        let drawdown_cooldown = self.limits_for(&fill.strategy).drawdown_cooldown;

        let state = self.state.entry(fill.strategy.clone()).or_default();
        state.daily_pnl += trade_pnl;
        state.total_pnl += trade_pnl;
        state.peak_pnl = state.peak_pnl.max(state.total_pnl);

        if limits_enable_loss {
            if trade_pnl < significant_loss {
                let until = fill.timestamp + loss_cooldown;
                warn!(
                    strategy = %fill.strategy,
                    trade_pnl,
                    "significant loss, cooling down until {until}"
                );
                state.cooldown_until = Some(until);
            } else if state.peak_pnl > 0.0 {
                let drawdown = (state.total_pnl - state.peak_pnl) / state.peak_pnl;
                if drawdown < max_drawdown {
                    let until = fill.timestamp + drawdown_cooldown;
                    warn!(
                        strategy = %fill.strategy,
                        drawdown,
                        "drawdown threshold breached, cooling down until {until}"
                    );
                    state.cooldown_until = Some(until);
                }
            }
        }

        debug!(
            strategy = %fill.strategy,
            instrument = %fill.instrument,
            quantity = position_quantity,
            trade_pnl,
            "fill applied"
        );
    }

    /// Refresh unrealized P&L for every open position in `instrument`
    pub fn mark_to_market(&mut self, instrument: &str, price: Price) {
        for ((_, inst), position) in self.positions.iter_mut() {
            if inst == instrument && !position.is_flat() {
                position.mark_to_market(price);
            }
        }
    }

    /// Wipe all positions, exposures and per-strategy state for a fresh run.
    /// Configured limits (global and per-strategy) survive.
    pub fn reset(&mut self) {
        self.positions.clear();
        self.exposures.clear();
        self.state.clear();
    }

    /// Clear per-day counters and P&L. Cumulative totals and any active
    /// cooldown survive.
    pub fn reset_daily(&mut self) {
        for state in self.state.values_mut() {
            state.daily_orders = 0;
            state.order_times.clear();
            state.daily_pnl = 0.0;
        }
    }

    pub fn positions(&self) -> Vec<&Position> {
        self.positions.values().collect()
    }

    pub fn position(&self, strategy: &str, instrument: &str) -> Option<&Position> {
        self.positions.get(&(strategy.to_string(), instrument.to_string()))
    }

    /// Cumulative realized trade P&L for one strategy
    pub fn strategy_pnl(&self, strategy: &str) -> Price {
        self.state.get(strategy).map_or(0.0, |s| s.total_pnl)
    }

    pub fn portfolio_stats(&self) -> PortfolioStats {
        let mut stats = PortfolioStats::default();
        for state in self.state.values() {
            stats.total_pnl += state.total_pnl;
            stats.max_drawdown = stats.max_drawdown.max(state.peak_pnl - state.total_pnl);
        }
        stats.total_exposure = self.exposures.values().map(|e| e.abs()).sum();
        stats.active_positions = self.positions.values().filter(|p| !p.is_flat()).count();
        stats
    }
}

/// Aggregate view across strategies
#[derive(Debug, Clone, Default)]
pub struct PortfolioStats {
    pub total_pnl: Price,
    pub total_exposure: Price,
    pub active_positions: usize,
    /// Largest peak-to-trough decline of any strategy's P&L
    pub max_drawdown: Price,
}
