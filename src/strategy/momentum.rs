//! Momentum strategy on trailing returns

use crate::core::events::MarketEvent;
use crate::core::types::{InstrumentId, Price, StrategyId};
use crate::strategy::context::StrategyContext;
use crate::strategy::traits::Strategy;
use hashbrown::HashMap;

#[derive(Debug, Clone)]
pub struct MomentumConfig {
    pub lookback: usize,
    /// Fractional return over the lookback required to enter
    pub threshold: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback: 10,
            threshold: 0.02,
        }
    }
}

pub struct MomentumStrategy {
    id: StrategyId,
    config: MomentumConfig,
    prices: HashMap<InstrumentId, Vec<Price>>,
}

impl MomentumStrategy {
    pub fn new(id: impl Into<StrategyId>, config: MomentumConfig) -> Self {
        Self {
            id: id.into(),
            config,
            prices: HashMap::new(),
        }
    }
}

impl Strategy for MomentumStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_market_data(&mut self, event: &MarketEvent, ctx: &mut StrategyContext) {
        let tick = &event.tick;
        let prices = self.prices.entry(tick.instrument.clone()).or_default();
        prices.push(tick.last_price);
        if prices.len() <= self.config.lookback {
            return;
        }
        if prices.len() > self.config.lookback * 2 {
            prices.drain(..self.config.lookback);
        }

        let base = prices[prices.len() - 1 - self.config.lookback];
        if base == 0.0 {
            return;
        }
        let momentum = (tick.last_price - base) / base;

        let position = ctx.position(&tick.instrument);
        if momentum > self.config.threshold && position <= 0 {
            if position < 0 {
                ctx.close_position(&tick.instrument);
            }
            ctx.buy(&tick.instrument, 1.0);
        } else if momentum < -self.config.threshold && position >= 0 {
            if position > 0 {
                ctx.close_position(&tick.instrument);
            }
            ctx.sell(&tick.instrument, 1.0);
        }
    }
}
