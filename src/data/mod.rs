pub mod store;

pub use store::{StoreStats, TickSeries, TickStore};
