/// Configuration management
pub mod config;

pub use config::{
    validate_poll_interval, Config, PoolConfig, ProviderConfig, MAX_POLL_INTERVAL_SECONDS,
    MAX_WAIT_SECONDS,
};
