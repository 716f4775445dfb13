/// Lifecycle coordination and summary queries across all pollers
pub mod monitor_registry;

pub use monitor_registry::MonitorRegistry;
