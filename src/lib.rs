/// Error types for feeds, configuration and the registry
pub mod error;

/// Incident model and status events
pub mod events;

/// Snapshot diffing
pub mod diff;

/// Per-provider status polling
pub mod poller;

/// Publish/subscribe event bus with drop-oldest backpressure
pub mod bus;

/// Monitor registry
pub mod registry;

/// Configuration management
pub mod config;

/// Console output
pub mod render;

// Re-export commonly used types
pub use bus::{EventBus, EventStream, Subscription};
pub use config::{Config, ProviderConfig};
pub use error::{ConfigError, FeedError, RegistryError};
pub use events::{EventType, Incident, StatusEvent, StatusSummary};
pub use registry::MonitorRegistry;
