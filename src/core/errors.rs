use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: i64, message: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Transport-level failure. Fatal to the connection that observed it.
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    /// The caller's context was cancelled before the call completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// The connection died while the call was still waiting for its result.
    #[error("Pending call cleared: connection is closed")]
    Cleared,

    #[error("Dispatch loop already running")]
    AlreadyRunning,

    #[error("Order book chain inconsistency: expected previous sequence {expected}, got {got}")]
    ChainInconsistency { expected: u64, got: u64 },

    #[error("Order book is broken and must be re-bootstrapped")]
    BookBroken,

    #[error("Order book is not live")]
    BookNotLive,

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// Whether this error ends the connection it was observed on.
    ///
    /// Frames that merely fail to decode are skipped by the dispatch loop;
    /// everything the transport itself reports is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::ConnectionTimeout(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
