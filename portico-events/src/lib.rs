//! Registry/health broadcast events and the process-local fan-out bus.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventStream};
pub use event::BroadcastEvent;
