use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// WebSocket transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// WebSocket endpoint
    pub url: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Default deadline for correlated calls in milliseconds
    pub call_timeout_ms: u64,
}

impl WsConfig {
    /// Create a configuration for the given endpoint with default timeouts
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout_ms: 10_000, // 10 seconds
            call_timeout_ms: 5_000,     // 5 seconds
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_WS_URL` (e.g., `DERIBIT_WS_URL`)
    /// - `{PREFIX}_CONNECT_TIMEOUT_MS` (optional)
    /// - `{PREFIX}_CALL_TIMEOUT_MS` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let url_var = format!("{}_WS_URL", prefix);
        let url = env::var(&url_var).map_err(|_| ConfigError::MissingEnvironmentVariable(url_var))?;

        let mut config = Self::new(url);
        if let Some(ms) = parse_env_u64(&format!("{}_CONNECT_TIMEOUT_MS", prefix))? {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = parse_env_u64(&format!("{}_CALL_TIMEOUT_MS", prefix))? {
            config.call_timeout_ms = ms;
        }
        Ok(config)
    }

    /// Load configuration with automatic .env file detection
    ///
    /// Tries `.env.local`, then `.env.{ENVIRONMENT}`, then `.env`, and falls back to
    /// the process environment when none exist.
    #[cfg(feature = "env-file")]
    pub fn from_env_auto(prefix: &str) -> Result<Self, ConfigError> {
        load_env_files()?;
        Self::from_env(prefix)
    }

    #[must_use]
    pub const fn connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    #[must_use]
    pub const fn call_timeout(mut self, ms: u64) -> Self {
        self.call_timeout_ms = ms;
        self
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Reconnection policy for the subscription keeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// First delay after a failed connection attempt, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound for the reconnection delay, in milliseconds
    pub max_backoff_ms: u64,
    /// Capacity of the error reporting channel
    pub error_channel_capacity: usize,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            error_channel_capacity: 64,
        }
    }
}

impl KeeperConfig {
    /// Create configuration from environment variables, keeping defaults for unset values
    ///
    /// Recognised variables: `{PREFIX}_INITIAL_BACKOFF_MS`, `{PREFIX}_MAX_BACKOFF_MS`,
    /// `{PREFIX}_ERROR_CHANNEL_CAPACITY`.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let mut config = Self::default();
        if let Some(ms) = parse_env_u64(&format!("{}_INITIAL_BACKOFF_MS", prefix))? {
            config.initial_backoff_ms = ms;
        }
        if let Some(ms) = parse_env_u64(&format!("{}_MAX_BACKOFF_MS", prefix))? {
            config.max_backoff_ms = ms;
        }
        if let Some(cap) = parse_env_u64(&format!("{}_ERROR_CHANNEL_CAPACITY", prefix))? {
            config.error_channel_capacity = cap as usize;
        }
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub const fn initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    #[must_use]
    pub const fn max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "initial backoff must be positive".to_string(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::InvalidConfiguration(format!(
                "max backoff {}ms is below initial backoff {}ms",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        if self.error_channel_capacity == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "error channel capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env_u64(var: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
            ConfigError::InvalidConfiguration(format!("{} is not a valid integer: {}", var, e))
        }),
        Err(_) => Ok(None),
    }
}

/// Load the first `.env` file found, in priority order
#[cfg(feature = "env-file")]
fn load_env_files() -> Result<(), ConfigError> {
    let env_files = [
        ".env.local".to_string(),
        format!(
            ".env.{}",
            env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
        ),
        ".env".to_string(),
    ];

    for env_file in &env_files {
        match dotenv::from_path(env_file) {
            Ok(()) => return Ok(()),
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file, e
                )));
            }
        }
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_config_defaults() {
        let config = WsConfig::new("wss://test.deribit.com/ws/api/v2").call_timeout(250);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.call_timeout_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_ws_config_missing_url() {
        let err = WsConfig::from_env("LOTUSWIRE_TEST_NOPE").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvironmentVariable(var) if var == "LOTUSWIRE_TEST_NOPE_WS_URL"
        ));
    }

    #[test]
    fn test_keeper_config_from_env() {
        env::set_var("LOTUSWIRE_KEEPER_T1_INITIAL_BACKOFF_MS", "50");
        env::set_var("LOTUSWIRE_KEEPER_T1_MAX_BACKOFF_MS", "500");
        let config = KeeperConfig::from_env("lotuswire_keeper_t1").unwrap();
        assert_eq!(config.initial_backoff_ms, 50);
        assert_eq!(config.max_backoff_ms, 500);
        assert_eq!(config.error_channel_capacity, 64);
    }

    #[test]
    fn test_keeper_config_rejects_inverted_backoff() {
        let config = KeeperConfig::default().initial_backoff(1_000).max_backoff(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keeper_config_rejects_garbage() {
        env::set_var("LOTUSWIRE_KEEPER_T2_MAX_BACKOFF_MS", "soon");
        assert!(matches!(
            KeeperConfig::from_env("LOTUSWIRE_KEEPER_T2"),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }
}
