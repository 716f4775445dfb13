use std::time::Duration;

/// In-process publish/subscribe hub for status events
pub mod event_bus;

/// Bounded drop-oldest queue backing each subscriber
pub mod queue;

pub use event_bus::{callback, EventBus, EventCallback, EventStream, Subscription};
pub use queue::EventQueue;

/// Default number of events buffered per subscriber
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How long one subscriber callback may run before it is abandoned
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
