//! The strategy callback contract

use crate::core::events::{FillEvent, MarketEvent, RiskEvent, TimerEvent};
use crate::strategy::context::StrategyContext;

/// A trading strategy driven by the engine.
///
/// `on_market_data` is the only required callback; everything else has a
/// default no-op body. Strategies emit orders and timers exclusively through
/// the [`StrategyContext`] they are handed.
pub trait Strategy: Send {
    fn id(&self) -> &str;

    /// Called once before the run starts
    fn initialize(&mut self, _ctx: &mut StrategyContext) {}

    fn on_start(&mut self, _ctx: &mut StrategyContext) {}

    fn on_stop(&mut self, _ctx: &mut StrategyContext) {}

    fn on_pause(&mut self, _ctx: &mut StrategyContext) {}

    fn on_resume(&mut self, _ctx: &mut StrategyContext) {}

    /// Called for every tick of every instrument while the strategy is active
    fn on_market_data(&mut self, event: &MarketEvent, ctx: &mut StrategyContext);

    fn on_fill(&mut self, _event: &FillEvent, _ctx: &mut StrategyContext) {}

    fn on_risk_event(&mut self, _event: &RiskEvent, _ctx: &mut StrategyContext) {}

    fn on_timer(&mut self, _event: &TimerEvent, _ctx: &mut StrategyContext) {}
}
