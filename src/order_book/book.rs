//! Limit order book with price-time priority matching
//!
//! Two price-indexed maps per book: bids read highest-first, asks
//! lowest-first. Each level keeps a FIFO of resting `(order, quantity)`
//! entries plus a cached total, and is removed the moment it drains. Matching
//! re-queries the best level on every iteration so removal never invalidates
//! a live cursor.

use crate::core::types::{Fill, InstrumentId, Order, OrderId, Price, Side, Timestamp, Volume};
use crate::error::{EngineError, Result};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// How crossing orders are allocated against resting quantity.
///
/// Only `PriceTime` is implemented; the others are declared for configuration
/// compatibility and rejected at match time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchingAlgorithm {
    PriceTime,
    ProRata,
    PriceSizeTime,
}

type LevelKey = OrderedFloat<Price>;
type LevelQueue = SmallVec<[(OrderId, Volume); 8]>;

/// One price tick of the book
#[derive(Debug, Clone, Default)]
pub struct BookLevel {
    pub price: Price,
    pub total_volume: Volume,
    orders: LevelQueue,
}

impl BookLevel {
    fn new(price: Price) -> Self {
        Self {
            price,
            total_volume: 0,
            orders: LevelQueue::new(),
        }
    }

    /// Append at the back of the FIFO
    fn add(&mut self, order_id: OrderId, quantity: Volume) {
        self.orders.push((order_id, quantity));
        self.total_volume += quantity;
    }

    /// Remove up to `quantity` belonging to `order_id`; returns the amount removed
    fn remove(&mut self, order_id: OrderId, quantity: Volume) -> Volume {
        let mut removed = 0;
        let mut i = 0;
        while i < self.orders.len() && removed < quantity {
            if self.orders[i].0 == order_id {
                let take = self.orders[i].1.min(quantity - removed);
                self.orders[i].1 -= take;
                removed += take;
                if self.orders[i].1 == 0 {
                    self.orders.remove(i);
                    continue;
                }
            }
            i += 1;
        }
        self.total_volume -= removed;
        removed
    }

    /// Drain `quantity` from the front of the FIFO
    fn consume(&mut self, quantity: Volume) {
        let mut remaining = quantity.min(self.total_volume);
        self.total_volume -= remaining;
        while remaining > 0 {
            let front = &mut self.orders[0];
            let take = front.1.min(remaining);
            front.1 -= take;
            remaining -= take;
            if front.1 == 0 {
                self.orders.remove(0);
            }
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

/// Depth query entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub volume: Volume,
}

/// Aggregate book snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookStats {
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub total_bid_volume: Volume,
    pub total_ask_volume: Volume,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<Price>,
}

/// Two-sided resting order collection for one instrument
#[derive(Debug)]
pub struct OrderBook {
    instrument: InstrumentId,
    algorithm: MatchingAlgorithm,
    bids: BTreeMap<LevelKey, BookLevel>,
    asks: BTreeMap<LevelKey, BookLevel>,
}

impl OrderBook {
    pub fn new(instrument: impl Into<InstrumentId>) -> Self {
        Self::with_algorithm(instrument, MatchingAlgorithm::PriceTime)
    }

    pub fn with_algorithm(instrument: impl Into<InstrumentId>, algorithm: MatchingAlgorithm) -> Self {
        Self {
            instrument: instrument.into(),
            algorithm,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn algorithm(&self) -> MatchingAlgorithm {
        self.algorithm
    }

    fn side_levels_mut(&mut self, side: Side) -> &mut BTreeMap<LevelKey, BookLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Rest an order's remaining quantity at its limit price
    pub fn add(&mut self, order: &Order) {
        let price = order.price;
        let quantity = order.remaining();
        if quantity == 0 {
            return;
        }
        self.side_levels_mut(order.side)
            .entry(OrderedFloat(price))
            .or_insert_with(|| BookLevel::new(price))
            .add(order.id, quantity);
    }

    /// Remove up to `quantity` of `order_id` at `price`; drained levels go away
    pub fn remove(&mut self, order_id: OrderId, side: Side, price: Price, quantity: Volume) -> Volume {
        let levels = self.side_levels_mut(side);
        let key = OrderedFloat(price);
        let Some(level) = levels.get_mut(&key) else {
            return 0;
        };
        let removed = level.remove(order_id, quantity);
        if level.total_volume == 0 {
            levels.remove(&key);
        }
        removed
    }

    fn check_implemented(&self) -> Result<()> {
        match self.algorithm {
            MatchingAlgorithm::PriceTime => Ok(()),
            other => Err(EngineError::NotImplemented(other)),
        }
    }

    /// Best opposite price still crossable by `order`, if any
    fn crossable_price(&self, side: Side, limit: Option<Price>) -> Option<Price> {
        let best = match side {
            Side::Buy => self.asks.keys().next().map(|k| k.0),
            Side::Sell => self.bids.keys().next_back().map(|k| k.0),
        }?;
        match (side, limit) {
            (_, None) => Some(best),
            (Side::Buy, Some(px)) if best <= px => Some(best),
            (Side::Sell, Some(px)) if best >= px => Some(best),
            _ => None,
        }
    }

    fn match_against(&mut self, order: &Order, timestamp: Timestamp, limit: Option<Price>) -> Vec<Fill> {
        let mut fills = Vec::new();
        let mut remaining = order.remaining();

        while remaining > 0 {
            let Some(price) = self.crossable_price(order.side, limit) else {
                break;
            };
            let opposite = self.side_levels_mut(order.side.opposite());
            let key = OrderedFloat(price);
            let level = opposite.get_mut(&key).expect("crossable level present");

            let fill_qty = remaining.min(level.total_volume);
            level.consume(fill_qty);
            if level.total_volume == 0 {
                opposite.remove(&key);
            }

            fills.push(Fill {
                order_id: order.id,
                timestamp,
                instrument: self.instrument.clone(),
                strategy: order.strategy.clone(),
                side: order.side,
                price,
                quantity: fill_qty,
                commission: 0.0,
            });
            remaining -= fill_qty;
        }
        fills
    }

    /// Match a market order against the opposite side until it is exhausted
    /// or the book empties. Each fill takes the whole crossable quantity of
    /// one level at that level's price.
    pub fn match_market(&mut self, order: &Order, timestamp: Timestamp) -> Result<Vec<Fill>> {
        self.check_implemented()?;
        Ok(self.match_against(order, timestamp, None))
    }

    /// Match a limit order while the best opposite price satisfies the limit;
    /// any residual quantity rests on the order's own side.
    pub fn match_limit(&mut self, order: &Order, timestamp: Timestamp) -> Result<Vec<Fill>> {
        self.check_implemented()?;
        let fills = self.match_against(order, timestamp, Some(order.price));

        let matched: Volume = fills.iter().map(|f| f.quantity).sum();
        let residual = order.remaining() - matched;
        if residual > 0 {
            let mut rest = order.clone();
            rest.filled_quantity = order.filled_quantity + matched;
            self.add(&rest);
        }
        Ok(fills)
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().map(|k| k.0)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().map(|k| k.0)
    }

    pub fn spread(&self) -> Option<Price> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    pub fn mid_price(&self) -> Option<Price> {
        Some((self.best_ask()? + self.best_bid()?) / 2.0)
    }

    /// Top `levels` bid levels, best first
    pub fn bids(&self, levels: usize) -> Vec<DepthLevel> {
        self.bids
            .values()
            .rev()
            .take(levels)
            .map(|l| DepthLevel {
                price: l.price,
                volume: l.total_volume,
            })
            .collect()
    }

    /// Top `levels` ask levels, best first
    pub fn asks(&self, levels: usize) -> Vec<DepthLevel> {
        self.asks
            .values()
            .take(levels)
            .map(|l| DepthLevel {
                price: l.price,
                volume: l.total_volume,
            })
            .collect()
    }

    pub fn volume_at(&self, side: Side, price: Price) -> Volume {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels.get(&OrderedFloat(price)).map_or(0, |l| l.total_volume)
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    pub fn stats(&self) -> BookStats {
        BookStats {
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
            total_bid_volume: self.bids.values().map(|l| l.total_volume).sum(),
            total_ask_volume: self.asks.values().map(|l| l.total_volume).sum(),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spread: self.spread(),
        }
    }
}
