use std::any::Any;
use thiserror::Error;

/// Errors that can occur while fetching a provider's status feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status: {0}")]
    UnexpectedStatus(u16),

    #[error("Request timeout")]
    Timeout,

    #[error("Connection pool has been shut down")]
    PoolClosed,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Whether the failure happened at the network layer rather than in the payload
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::Http(_)
                | FeedError::UnexpectedStatus(_)
                | FeedError::Timeout
                | FeedError::PoolClosed
        )
    }
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors raised by the monitor registry lifecycle
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Monitors have already been started")]
    AlreadyStarted,

    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
