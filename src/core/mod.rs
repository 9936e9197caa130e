pub mod bus;
pub mod clock;
pub mod events;
pub mod types;

pub use bus::{EventBus, SubscriptionHandle};
pub use clock::SimClock;
pub use events::*;
pub use types::*;
