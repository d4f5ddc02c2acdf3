pub mod bus;

pub use bus::{BusEvent, EventBus, EventKind, Subscription};
