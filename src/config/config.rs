use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest accepted poll interval, one day
pub const MAX_POLL_INTERVAL_SECONDS: f64 = 86_400.0;

/// Longest accepted request timeout or stop grace period, one hour
pub const MAX_WAIT_SECONDS: u64 = 3_600;

/// Configuration for a single status-page provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Display name, unique across providers
    pub name: String,
    /// API root of the status page, e.g. `https://status.openai.com/api/v2`
    pub base_url: String,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: f64,
}

impl ProviderConfig {
    /// Create a provider entry
    ///
    /// # Arguments
    ///
    /// * `name` - Display name used in events and logs
    /// * `base_url` - API root; a trailing `/` is stripped
    /// * `poll_interval` - Sleep between the end of one tick and the start of the next
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            name: name.into(),
            base_url: trim_base_url(&base_url.into()),
            poll_interval_seconds: poll_interval.as_secs_f64(),
        }
    }

    /// Poll interval as a `Duration`, clamped to `MAX_POLL_INTERVAL_SECONDS`
    ///
    /// Values that bypassed validation and are not positive (including NaN)
    /// fall back to the default.
    pub fn poll_interval(&self) -> Duration {
        let seconds = if self.poll_interval_seconds > 0.0 {
            self.poll_interval_seconds.min(MAX_POLL_INTERVAL_SECONDS)
        } else {
            default_poll_interval_seconds()
        };
        Duration::from_secs_f64(seconds)
    }

    pub fn incidents_url(&self) -> String {
        format!("{}/incidents.json", trim_base_url(&self.base_url))
    }

    pub fn summary_url(&self) -> String {
        format!("{}/summary.json", trim_base_url(&self.base_url))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "provider name must not be empty".to_string(),
            ));
        }

        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "provider '{}' has an invalid base_url '{}': {}",
                self.name, self.base_url, e
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::ValidationError(format!(
                "provider '{}' base_url must use http or https",
                self.name
            )));
        }

        validate_poll_interval(self.poll_interval_seconds).map_err(|e| {
            ConfigError::ValidationError(format!("provider '{}': {}", self.name, e))
        })
    }
}

/// Limits for the HTTP connection pool shared by every poller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of requests in flight across all providers
    pub max_connections: usize,
    /// Maximum number of idle keep-alive connections per host
    pub max_idle_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 200,
            max_idle_connections: 50,
        }
    }
}

/// Application configuration, built once at startup and never mutated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub providers: Vec<ProviderConfig>,
    /// Replaces every provider's poll interval when set
    pub poll_interval_override_seconds: Option<f64>,
    /// Events buffered per bus subscriber before the oldest is dropped
    pub queue_capacity: usize,
    /// Upper bound on every HTTP request a poller makes
    pub request_timeout_seconds: u64,
    /// How long `stop_all` waits for a poller before cancelling it
    pub stop_grace_seconds: u64,
    pub pool: PoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig::new(
                "OpenAI",
                "https://status.openai.com/api/v2",
                Duration::from_secs(30),
            )],
            poll_interval_override_seconds: None,
            queue_capacity: crate::bus::DEFAULT_QUEUE_CAPACITY,
            request_timeout_seconds: 30,
            stop_grace_seconds: 5,
            pool: PoolConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Return a copy with the global poll interval override set
    pub fn with_poll_interval_override(mut self, seconds: Option<f64>) -> Self {
        if seconds.is_some() {
            self.poll_interval_override_seconds = seconds;
        }
        self
    }

    /// Providers with the global override applied to their poll interval
    pub fn effective_providers(&self) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .map(|provider| {
                let mut provider = provider.clone();
                provider.base_url = trim_base_url(&provider.base_url);
                if let Some(seconds) = self.poll_interval_override_seconds {
                    provider.poll_interval_seconds = seconds;
                }
                provider
            })
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    /// Check every value for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one provider must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }

        if let Some(seconds) = self.poll_interval_override_seconds {
            validate_poll_interval(seconds).map_err(|e| {
                ConfigError::ValidationError(format!("poll_interval_override_seconds: {}", e))
            })?;
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 || self.request_timeout_seconds > MAX_WAIT_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "request_timeout_seconds must be between 1 and {}",
                MAX_WAIT_SECONDS
            )));
        }
        if self.stop_grace_seconds > MAX_WAIT_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "stop_grace_seconds must be at most {}",
                MAX_WAIT_SECONDS
            )));
        }
        if self.pool.max_connections == 0 || self.pool.max_idle_connections == 0 {
            return Err(ConfigError::ValidationError(
                "pool limits must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Check a poll interval in seconds, as read from a file or the command line
pub fn validate_poll_interval(seconds: f64) -> Result<(), ConfigError> {
    if !(seconds.is_finite() && seconds > 0.0 && seconds <= MAX_POLL_INTERVAL_SECONDS) {
        return Err(ConfigError::ValidationError(format!(
            "poll interval must be greater than 0 and at most {} seconds, got {}",
            MAX_POLL_INTERVAL_SECONDS, seconds
        )));
    }
    Ok(())
}

fn default_poll_interval_seconds() -> f64 {
    30.0
}

fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
queue_capacity = 64
request_timeout_seconds = 10

[pool]
max_connections = 20

[[providers]]
name = "OpenAI"
base_url = "https://status.openai.com/api/v2/"
poll_interval_seconds = 15

[[providers]]
name = "GitHub"
base_url = "https://www.githubstatus.com/api/v2"
"#;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.providers[0].name, "OpenAI");
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_toml_str() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.pool.max_connections, 20);
        assert_eq!(config.pool.max_idle_connections, 50);
        assert_eq!(config.stop_grace_seconds, 5);
        assert_eq!(config.providers[1].poll_interval(), Duration::from_secs(30));
        assert_eq!(
            config.providers[0].incidents_url(),
            "https://status.openai.com/api/v2/incidents.json"
        );
        assert_eq!(
            config.providers[1].summary_url(),
            "https://www.githubstatus.com/api/v2/summary.json"
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.providers[0].poll_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/statuswatch.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = Config::from_toml_str("providers = 3");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_poll_interval_override() {
        let config = Config::from_toml_str(SAMPLE)
            .unwrap()
            .with_poll_interval_override(Some(5.0));

        let providers = config.effective_providers();
        assert!(providers
            .iter()
            .all(|p| p.poll_interval() == Duration::from_secs(5)));
        assert_eq!(providers[0].base_url, "https://status.openai.com/api/v2");
    }

    #[test]
    fn test_override_none_keeps_file_value() {
        let config = Config {
            poll_interval_override_seconds: Some(12.0),
            ..Config::default()
        }
        .with_poll_interval_override(None);
        assert_eq!(config.poll_interval_override_seconds, Some(12.0));
    }

    #[test]
    fn test_validation_failures() {
        let duplicate = r#"
[[providers]]
name = "A"
base_url = "https://a.example.com/api/v2"
[[providers]]
name = "A"
base_url = "https://b.example.com/api/v2"
"#;
        assert!(matches!(
            Config::from_toml_str(duplicate),
            Err(ConfigError::ValidationError(_))
        ));

        let bad_scheme = r#"
[[providers]]
name = "A"
base_url = "ftp://a.example.com"
"#;
        assert!(Config::from_toml_str(bad_scheme).is_err());

        let bad_interval = r#"
[[providers]]
name = "A"
base_url = "https://a.example.com"
poll_interval_seconds = 0
"#;
        assert!(Config::from_toml_str(bad_interval).is_err());

        let no_providers = "providers = []";
        assert!(Config::from_toml_str(no_providers).is_err());

        let zero_capacity = Config {
            queue_capacity: 0,
            ..Config::default()
        };
        assert!(zero_capacity.validate().is_err());
    }

    #[test]
    fn test_huge_durations_are_rejected() {
        let huge_interval = r#"
[[providers]]
name = "A"
base_url = "https://a.example.com"
poll_interval_seconds = 1e20
"#;
        assert!(matches!(
            Config::from_toml_str(huge_interval),
            Err(ConfigError::ValidationError(_))
        ));

        let huge_override = Config {
            poll_interval_override_seconds: Some(1e20),
            ..Config::default()
        };
        assert!(huge_override.validate().is_err());

        let huge_timeout = Config {
            request_timeout_seconds: u64::MAX,
            ..Config::default()
        };
        assert!(huge_timeout.validate().is_err());

        let huge_grace = Config {
            stop_grace_seconds: u64::MAX,
            ..Config::default()
        };
        assert!(huge_grace.validate().is_err());

        assert!(validate_poll_interval(MAX_POLL_INTERVAL_SECONDS).is_ok());
        assert!(validate_poll_interval(f64::NAN).is_err());
    }

    #[test]
    fn test_poll_interval_never_panics_on_unvalidated_values() {
        let mut provider = ProviderConfig::new("A", "https://a.example.com", Duration::from_secs(1));

        provider.poll_interval_seconds = 1e20;
        assert_eq!(
            provider.poll_interval(),
            Duration::from_secs_f64(MAX_POLL_INTERVAL_SECONDS)
        );

        provider.poll_interval_seconds = f64::NAN;
        assert_eq!(provider.poll_interval(), Duration::from_secs(30));

        provider.poll_interval_seconds = -4.0;
        assert_eq!(provider.poll_interval(), Duration::from_secs(30));
    }
}
