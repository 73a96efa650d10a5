//! Error types for Feedrelay

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Feed source error: {0}")]
    Source(#[from] SourceError),

    #[error("Message sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Cursor store error: {0}")]
    Cursor(#[from] CursorError),

    #[error("Account resolution failed: {0}")]
    AccountResolution(String),
}

impl RelayError {
    /// Returns the process exit code for an error that ends the program
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Config(_) => 2,
            RelayError::AccountResolution(_) => 1,
            RelayError::Source(_) => 1,
            RelayError::Sink(_) => 1,
            RelayError::Cursor(_) => 1,
        }
    }

    /// The provider's reset time, if this error is a rate-limit signal
    pub fn rate_limited_until(&self) -> Option<DateTime<Utc>> {
        match self {
            RelayError::Source(SourceError::RateLimited { retry_after }) => Some(*retry_after),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Rate limited until {retry_after}")]
    RateLimited { retry_after: DateTime<Utc> },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Message rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum CursorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to replace cursor file: {0}")]
    Persist(#[from] tempfile::PersistError),
}
