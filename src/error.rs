//! Crate-level error taxonomy
//!
//! Recoverable conditions (risk rejections, empty matches) are modelled as
//! data, not errors; only states the engine cannot continue from end up here.

use crate::core::types::{InstrumentId, Timestamp};
use crate::order_book::MatchingAlgorithm;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The simulated clock was asked to move backwards. Fatal for the run.
    #[error("clock cannot move backwards: target {target} is before current {current}")]
    ClockRewind { current: Timestamp, target: Timestamp },

    /// An order referenced an instrument with no order book.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),

    /// A matching algorithm was configured that the book does not implement.
    #[error("matching algorithm {0:?} is not implemented")]
    NotImplemented(MatchingAlgorithm),

    /// `run` was called with no tick data loaded.
    #[error("no tick data loaded")]
    NoData,

    /// `run` was called with no strategies registered.
    #[error("no strategies registered")]
    NoStrategies,
}

pub type Result<T> = std::result::Result<T, EngineError>;
