//! # tickforge
//!
//! Event-driven backtesting engine for historical market data. Recorded tick
//! series replay through user strategies under a deterministic simulated
//! clock; orders match against per-instrument limit order books subject to
//! commission, slippage and pre-trade risk; results aggregate realized P&L,
//! trades and performance statistics.
//!
//! ```no_run
//! use tickforge::engine::BacktestEngine;
//! use tickforge::strategy::{SmaConfig, SmaCrossoverStrategy};
//!
//! let mut engine = BacktestEngine::new();
//! // engine.add_ticks("ES", &ticks);
//! engine.add_strategy(Box::new(SmaCrossoverStrategy::new(
//!     "sma-cross",
//!     SmaConfig::default(),
//! )));
//! engine.run().unwrap();
//! println!("{:#?}", engine.results());
//! ```

pub mod core;
pub mod data;
pub mod engine;
pub mod error;
pub mod execution;
pub mod logging;
pub mod order_book;
pub mod risk;
pub mod strategy;

pub use crate::core::{
    Duration, Event, EventBus, EventKind, Fill, InstrumentId, Order, OrderId, OrderStatus,
    OrderType, Position, Price, Side, SignalKind, SimClock, StrategyId, Tick, Timestamp, Volume,
};
pub use crate::data::TickStore;
pub use crate::engine::{BacktestEngine, BacktestResults, EngineStats};
pub use crate::error::{EngineError, Result};
pub use crate::execution::{CommissionTable, CostModel, OrderSizer};
pub use crate::order_book::{MatchingAlgorithm, OrderBook};
pub use crate::risk::{RiskLimits, RiskManager, Violation, ViolationKind};
pub use crate::strategy::{Strategy, StrategyContext};
