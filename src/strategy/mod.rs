//! Strategy callback contract, execution context and built-in strategies

pub mod context;
pub mod mean_reversion;
pub mod momentum;
pub mod sma;
pub mod traits;

pub use context::{StrategyContext, TimerRequest};
pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
pub use momentum::{MomentumConfig, MomentumStrategy};
pub use sma::{PriceMode, SmaConfig, SmaCrossoverStrategy};
pub use traits::Strategy;
