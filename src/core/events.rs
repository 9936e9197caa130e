//! Event types flowing through the simulation

use crate::core::types::{
    Fill, InstrumentId, Order, OrderId, Price, SignalKind, StrategyId, Tick, Timestamp,
};
use crate::risk::ViolationKind;
use serde::{Deserialize, Serialize};

/// Reason carried by a [`RiskEvent`]: a pre-trade violation or a routing
/// rejection for an instrument with no book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskKind {
    Violation(ViolationKind),
    UnknownInstrument,
}

impl From<ViolationKind> for RiskKind {
    fn from(kind: ViolationKind) -> Self {
        RiskKind::Violation(kind)
    }
}

/// Closed set of event kinds, used for subscription routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Market,
    Signal,
    Order,
    Fill,
    Risk,
    Timer,
}

/// Events delivered through the bus
#[derive(Debug, Clone)]
pub enum Event {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
    Risk(RiskEvent),
    Timer(TimerEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Market(_) => EventKind::Market,
            Self::Signal(_) => EventKind::Signal,
            Self::Order(_) => EventKind::Order,
            Self::Fill(_) => EventKind::Fill,
            Self::Risk(_) => EventKind::Risk,
            Self::Timer(_) => EventKind::Timer,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Market(e) => e.tick.timestamp,
            Self::Signal(e) => e.timestamp,
            Self::Order(e) => e.order.timestamp,
            Self::Fill(e) => e.fill.timestamp,
            Self::Risk(e) => e.timestamp,
            Self::Timer(e) => e.timestamp,
        }
    }
}

/// A tick becoming visible to subscribers
#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub tick: Tick,
}

/// Trading intent emitted by a strategy
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub timestamp: Timestamp,
    pub instrument: InstrumentId,
    pub strategy: StrategyId,
    pub kind: SignalKind,
    /// Signal conviction, used by strength-scaled sizers
    pub strength: Price,
}

/// An order accepted into the execution pipeline
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub order: Order,
}

/// An execution against the book
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub fill: Fill,
}

/// A risk rejection or limit breach notification
#[derive(Debug, Clone)]
pub struct RiskEvent {
    pub timestamp: Timestamp,
    pub strategy: StrategyId,
    pub kind: RiskKind,
    pub message: String,
    /// The order the event refers to, when there is one
    pub order_id: Option<OrderId>,
}

/// A scheduled timer firing for a strategy
#[derive(Debug, Clone)]
pub struct TimerEvent {
    pub timestamp: Timestamp,
    pub strategy: StrategyId,
    pub timer_id: String,
}
