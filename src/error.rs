//! Error types for the broker sentinel
//!
//! Each layer owns a focused error enum (`ConfigError`, `MqttError`, `ProbeError`);
//! `SentinelError` is what the sentinel's own lifecycle returns. Transport and probe
//! failures never reach it: they are logged and fed to the supervisor and monitor.

use thiserror::Error;

/// Main error type for sentinel operations
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl SentinelError {
    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Result type for sentinel operations
pub type SentinelResult<T> = Result<T, SentinelError>;
