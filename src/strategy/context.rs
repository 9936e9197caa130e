//! Execution context handed to strategy callbacks
//!
//! Strategies never hold references into the engine; everything they emit is
//! buffered here and drained by the engine after the callback returns.

use crate::core::events::SignalEvent;
use crate::core::types::{InstrumentId, Price, SignalKind, StrategyId, Timestamp};
use hashbrown::HashMap;

/// A timer requested by a strategy
#[derive(Debug, Clone)]
pub struct TimerRequest {
    pub at: Timestamp,
    pub timer_id: String,
}

/// Per-strategy context: current time, a position snapshot, and buffers for
/// emitted signals and timer requests.
#[derive(Debug)]
pub struct StrategyContext {
    strategy_id: StrategyId,
    now: Timestamp,
    positions: HashMap<InstrumentId, i64>,
    signals: Vec<SignalEvent>,
    timers: Vec<TimerRequest>,
}

impl StrategyContext {
    pub fn new(strategy_id: impl Into<StrategyId>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            now: Timestamp::default(),
            positions: HashMap::new(),
            signals: Vec::new(),
            timers: Vec::new(),
        }
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    /// Current simulated time
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Signed position for `instrument` as of the last engine update
    pub fn position(&self, instrument: &str) -> i64 {
        self.positions.get(instrument).copied().unwrap_or(0)
    }

    /// Emit a signal with an explicit kind and strength
    pub fn signal(&mut self, instrument: impl Into<InstrumentId>, kind: SignalKind, strength: Price) {
        self.signals.push(SignalEvent {
            timestamp: self.now,
            instrument: instrument.into(),
            strategy: self.strategy_id.clone(),
            kind,
            strength,
        });
    }

    pub fn buy(&mut self, instrument: impl Into<InstrumentId>, strength: Price) {
        self.signal(instrument, SignalKind::Buy, strength);
    }

    pub fn sell(&mut self, instrument: impl Into<InstrumentId>, strength: Price) {
        self.signal(instrument, SignalKind::Sell, strength);
    }

    /// Request the current position be flattened
    pub fn close_position(&mut self, instrument: impl Into<InstrumentId>) {
        self.signal(instrument, SignalKind::Close, 1.0);
    }

    /// Ask the engine for an `on_timer` callback once the clock reaches `at`
    pub fn schedule_timer(&mut self, at: Timestamp, timer_id: impl Into<String>) {
        self.timers.push(TimerRequest {
            at,
            timer_id: timer_id.into(),
        });
    }

    pub(crate) fn set_now(&mut self, now: Timestamp) {
        self.now = now;
    }

    pub(crate) fn set_position(&mut self, instrument: &str, quantity: i64) {
        self.positions.insert(instrument.to_string(), quantity);
    }

    pub(crate) fn take_signals(&mut self) -> Vec<SignalEvent> {
        std::mem::take(&mut self.signals)
    }

    pub(crate) fn take_timers(&mut self) -> Vec<TimerRequest> {
        std::mem::take(&mut self.timers)
    }
}
