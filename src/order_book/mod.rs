pub mod book;

pub use book::{BookLevel, BookStats, DepthLevel, MatchingAlgorithm, OrderBook};
