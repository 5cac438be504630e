//! Error types for cache operations
//!
//! This module defines the error taxonomy of the cache facade. Degradation
//! errors (`Unavailable`, `ConnectFailure`) disable the facade, the rest are
//! raised by individual calls and handled by the configured error mode.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backend is not installed or was never connected
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Connect attempt or handshake failed
    #[error("Connection failed: {0}")]
    ConnectFailure(String),

    /// A store call failed after a successful connection
    #[error("Store operation failed: {0}")]
    Operation(String),

    /// A miss-recovery callback failed
    #[error("Miss callback failed for key '{key}': {message}")]
    Callback { key: String, message: String },

    /// Encoding or decoding of a stored value failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Caller passed an argument the facade rejects
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether this error disables the facade rather than failing a single call
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            CacheError::Unavailable(_) | CacheError::ConnectFailure(_)
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Operation(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Operation(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::ConnectFailure("connection refused".to_string());
        assert_eq!(error.to_string(), "Connection failed: connection refused");

        let callback_error = CacheError::Callback {
            key: "user:1".to_string(),
            message: "db down".to_string(),
        };
        assert!(callback_error.to_string().contains("'user:1'"));
        assert!(callback_error.to_string().contains("db down"));
    }

    #[test]
    fn test_error_conversion() {
        let error: CacheError = "test error".into();
        assert!(matches!(error, CacheError::Operation(_)));

        let error: CacheError = "test error".to_string().into();
        assert!(matches!(error, CacheError::Operation(_)));

        let json_error = serde_json::from_str::<u32>("not json").unwrap_err();
        let error: CacheError = json_error.into();
        assert!(matches!(error, CacheError::Codec(_)));
    }

    #[test]
    fn test_degradation_kinds() {
        assert!(CacheError::Unavailable("x".into()).is_degradation());
        assert!(CacheError::ConnectFailure("x".into()).is_degradation());
        assert!(!CacheError::Operation("x".into()).is_degradation());
        assert!(!CacheError::Codec("x".into()).is_degradation());
    }
}
