use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

/// Price as a signed real number
pub type Price = f64;

/// Traded size
pub type Volume = u64;

/// Order identifier, unique and strictly increasing within a run
pub type OrderId = u64;

/// Strategy identifier
pub type StrategyId = String;

/// Instrument identifier
pub type InstrumentId = String;

/// Exchange identifier
pub type ExchangeId = String;

/// Simulation time in nanoseconds from an arbitrary epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros * 1_000)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.0))
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

/// Signed span of simulation time, same base unit as [`Timestamp`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros * 1_000)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    pub const fn from_mins(mins: i64) -> Self {
        Self(mins * 60 * 1_000_000_000)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0 + rhs.0)
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl Neg for Duration {
    type Output = Duration;

    fn neg(self) -> Duration {
        Duration(-self.0)
    }
}

/// Side of the market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Signed direction: +1 for buys, -1 for sells
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartialFill,
    Filled,
    Cancelled,
    Rejected,
}

/// Trading signal emitted by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
    Close,
}

/// One record of market state for a single instrument at a single instant.
/// Immutable after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: Timestamp,
    pub instrument: InstrumentId,
    pub bid_price: Price,
    pub ask_price: Price,
    pub bid_size: Volume,
    pub ask_size: Volume,
    pub last_price: Price,
    pub volume: Volume,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub date: NaiveDate,
}

impl Tick {
    pub fn mid_price(&self) -> Price {
        (self.bid_price + self.ask_price) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub timestamp: Timestamp,
    pub instrument: InstrumentId,
    pub strategy: StrategyId,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price; carries the reference price for market orders
    pub price: Price,
    pub stop_price: Option<Price>,
    pub quantity: Volume,
    pub filled_quantity: Volume,
    pub status: OrderStatus,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OrderId,
        timestamp: Timestamp,
        instrument: InstrumentId,
        strategy: StrategyId,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Volume,
    ) -> Self {
        Self {
            id,
            timestamp,
            instrument,
            strategy,
            side,
            order_type,
            price,
            stop_price: None,
            quantity,
            filled_quantity: 0,
            status: OrderStatus::Pending,
        }
    }

    pub fn remaining(&self) -> Volume {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    /// Notional value of the full requested quantity at the order price
    pub fn notional(&self) -> Price {
        self.quantity as Price * self.price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub timestamp: Timestamp,
    pub instrument: InstrumentId,
    pub strategy: StrategyId,
    pub side: Side,
    pub price: Price,
    pub quantity: Volume,
    pub commission: Price,
}

impl Fill {
    /// Signed quantity: positive for buys, negative for sells
    pub fn signed_quantity(&self) -> i64 {
        self.side.sign() * self.quantity as i64
    }

    pub fn notional(&self) -> Price {
        self.quantity as Price * self.price
    }
}

/// Net holding of one instrument by one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: InstrumentId,
    pub strategy: StrategyId,
    /// Positive for long, negative for short
    pub quantity: i64,
    pub average_price: Price,
    pub realized_pnl: Price,
    pub unrealized_pnl: Price,
}

impl Position {
    pub fn new(instrument: InstrumentId, strategy: StrategyId) -> Self {
        Self {
            instrument,
            strategy,
            quantity: 0,
            average_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    /// Apply a fill and return the realized trade P&L, commission included.
    ///
    /// Closing quantity realizes against the weighted-average entry price;
    /// opening or extending quantity updates the average. An opening fill
    /// therefore realizes exactly `-commission`.
    pub fn apply_fill(&mut self, fill: &Fill) -> Price {
        let fill_qty = fill.signed_quantity();
        let mut trade_pnl = -fill.commission;

        let closing = self.quantity != 0 && self.quantity.signum() != fill_qty.signum();
        if closing {
            let closed = fill_qty.abs().min(self.quantity.abs());
            let direction = self.quantity.signum() as Price;
            let realized = (fill.price - self.average_price) * closed as Price * direction;
            trade_pnl += realized;
            self.realized_pnl += realized;
        }

        let new_quantity = self.quantity + fill_qty;
        if new_quantity == 0 {
            self.average_price = 0.0;
        } else if !closing {
            // Opening or extending: volume-weighted average entry
            let old_notional = self.average_price * self.quantity.abs() as Price;
            let add_notional = fill.price * fill_qty.abs() as Price;
            self.average_price = (old_notional + add_notional) / new_quantity.abs() as Price;
        } else if self.quantity.signum() != new_quantity.signum() {
            // Reversed through flat: remainder opens at the fill price
            self.average_price = fill.price;
        }

        self.realized_pnl -= fill.commission;
        self.quantity = new_quantity;
        trade_pnl
    }

    /// Mark the open quantity against a reference price
    pub fn mark_to_market(&mut self, price: Price) {
        self.unrealized_pnl = (price - self.average_price) * self.quantity as Price;
    }

    pub fn total_pnl(&self) -> Price {
        self.realized_pnl + self.unrealized_pnl
    }
}
