//! Simple moving average crossover strategy
//!
//! Goes long when the short average crosses above the long average and flips
//! short on the opposite cross. Position is reversed through a close signal
//! followed by an entry in the new direction.

use crate::core::events::MarketEvent;
use crate::core::types::{InstrumentId, Price, StrategyId, Tick};
use crate::strategy::context::StrategyContext;
use crate::strategy::traits::Strategy;
use hashbrown::HashMap;
use tracing::debug;

/// Which tick field feeds the averages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceMode {
    Close,
    Open,
    High,
    Low,
    /// (high + low + close) / 3
    Hlc3,
    /// (open + high + low + close) / 4
    Ohlc4,
}

impl PriceMode {
    fn extract(self, tick: &Tick) -> Price {
        match self {
            PriceMode::Close => tick.close,
            PriceMode::Open => tick.open,
            PriceMode::High => tick.high,
            PriceMode::Low => tick.low,
            PriceMode::Hlc3 => (tick.high + tick.low + tick.close) / 3.0,
            PriceMode::Ohlc4 => (tick.open + tick.high + tick.low + tick.close) / 4.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmaConfig {
    pub short_period: usize,
    pub long_period: usize,
    pub price_mode: PriceMode,
}

impl Default for SmaConfig {
    fn default() -> Self {
        Self {
            short_period: 12,
            long_period: 26,
            price_mode: PriceMode::Close,
        }
    }
}

#[derive(Debug, Default)]
struct History {
    prices: Vec<Price>,
    /// true when short > long on the previous tick
    short_above: Option<bool>,
}

pub struct SmaCrossoverStrategy {
    id: StrategyId,
    config: SmaConfig,
    histories: HashMap<InstrumentId, History>,
}

impl SmaCrossoverStrategy {
    pub fn new(id: impl Into<StrategyId>, config: SmaConfig) -> Self {
        Self {
            id: id.into(),
            config,
            histories: HashMap::new(),
        }
    }

    fn average(prices: &[Price], period: usize) -> Price {
        let window = &prices[prices.len() - period..];
        window.iter().sum::<Price>() / period as Price
    }
}

impl Strategy for SmaCrossoverStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_market_data(&mut self, event: &MarketEvent, ctx: &mut StrategyContext) {
        let tick = &event.tick;
        let price = self.config.price_mode.extract(tick);
        let history = self.histories.entry(tick.instrument.clone()).or_default();
        history.prices.push(price);

        if history.prices.len() < self.config.long_period {
            return;
        }
        // Bound the retained history to what the long window needs
        if history.prices.len() > self.config.long_period * 2 {
            history.prices.drain(..self.config.long_period);
        }

        let short = Self::average(&history.prices, self.config.short_period);
        let long = Self::average(&history.prices, self.config.long_period);
        let above = short > long;

        if let Some(was_above) = history.short_above {
            if above != was_above {
                debug!(instrument = %tick.instrument, short, long, "sma cross");
                let position = ctx.position(&tick.instrument);
                if position != 0 {
                    ctx.close_position(&tick.instrument);
                }
                if above {
                    ctx.buy(&tick.instrument, 1.0);
                } else {
                    ctx.sell(&tick.instrument, 1.0);
                }
            }
        }
        history.short_above = Some(above);
    }
}
