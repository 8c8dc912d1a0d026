pub mod bus;

pub use bus::{RunEventBus, RunSubscription};
