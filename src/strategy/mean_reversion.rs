//! Mean reversion strategy on a rolling z-score

use crate::core::events::MarketEvent;
use crate::core::types::{InstrumentId, Price, StrategyId};
use crate::strategy::context::StrategyContext;
use crate::strategy::traits::Strategy;
use hashbrown::HashMap;

#[derive(Debug, Clone)]
pub struct MeanReversionConfig {
    pub lookback: usize,
    /// Entry when |z| exceeds this many standard deviations
    pub entry_threshold: f64,
    /// Exit once |z| falls back inside this band
    pub exit_threshold: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            entry_threshold: 2.0,
            exit_threshold: 0.5,
        }
    }
}

#[derive(Debug, Default)]
struct Window {
    prices: Vec<Price>,
}

impl Window {
    fn push(&mut self, price: Price, lookback: usize) {
        self.prices.push(price);
        if self.prices.len() > lookback {
            self.prices.remove(0);
        }
    }

    fn z_score(&self, price: Price) -> Option<f64> {
        if self.prices.len() < 2 {
            return None;
        }
        let n = self.prices.len() as f64;
        let mean = self.prices.iter().sum::<Price>() / n;
        let variance = self.prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        (std_dev > 0.0).then(|| (price - mean) / std_dev)
    }
}

pub struct MeanReversionStrategy {
    id: StrategyId,
    config: MeanReversionConfig,
    windows: HashMap<InstrumentId, Window>,
}

impl MeanReversionStrategy {
    pub fn new(id: impl Into<StrategyId>, config: MeanReversionConfig) -> Self {
        Self {
            id: id.into(),
            config,
            windows: HashMap::new(),
        }
    }
}

impl Strategy for MeanReversionStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_market_data(&mut self, event: &MarketEvent, ctx: &mut StrategyContext) {
        let tick = &event.tick;
        let window = self.windows.entry(tick.instrument.clone()).or_default();

        let z = window.z_score(tick.last_price);
        window.push(tick.last_price, self.config.lookback);
        let Some(z) = z else { return };

        let position = ctx.position(&tick.instrument);
        if position == 0 {
            if z < -self.config.entry_threshold {
                // Oversold: expect a bounce
                ctx.buy(&tick.instrument, z.abs().min(3.0) / 3.0);
            } else if z > self.config.entry_threshold {
                ctx.sell(&tick.instrument, z.abs().min(3.0) / 3.0);
            }
        } else if z.abs() < self.config.exit_threshold {
            ctx.close_position(&tick.instrument);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SignalKind, Tick, Timestamp};
    use chrono::NaiveDate;

    fn tick(secs: i64, price: Price) -> MarketEvent {
        MarketEvent {
            tick: Tick {
                timestamp: Timestamp::from_secs(secs),
                instrument: "ES".to_string(),
                bid_price: price,
                ask_price: price,
                bid_size: 1,
                ask_size: 1,
                last_price: price,
                volume: 1,
                open: price,
                high: price,
                low: price,
                close: price,
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            },
        }
    }

    #[test]
    fn dislocation_below_mean_triggers_buy() {
        let mut strategy = MeanReversionStrategy::new(
            "mr",
            MeanReversionConfig {
                lookback: 10,
                entry_threshold: 2.0,
                exit_threshold: 0.5,
            },
        );
        let mut ctx = StrategyContext::new("mr");

        // Stable prices with slight noise, then a sharp drop
        for i in 0..10 {
            let noise = if i % 2 == 0 { 0.1 } else { -0.1 };
            strategy.on_market_data(&tick(i, 100.0 + noise), &mut ctx);
        }
        assert!(ctx.take_signals().is_empty());

        strategy.on_market_data(&tick(10, 95.0), &mut ctx);
        let signals = ctx.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Buy);
    }

    #[test]
    fn reverted_price_closes_the_position() {
        let mut strategy = MeanReversionStrategy::new("mr", MeanReversionConfig::default());
        let mut ctx = StrategyContext::new("mr");
        ctx.set_position("ES", 1);

        for i in 0..20 {
            strategy.on_market_data(&tick(i, 100.0 + (i % 2) as Price * 0.2), &mut ctx);
        }
        // Price at the mean while holding a position: exit
        strategy.on_market_data(&tick(20, 100.1), &mut ctx);
        let signals = ctx.take_signals();
        assert!(signals.iter().any(|s| s.kind == SignalKind::Close));
    }
}
