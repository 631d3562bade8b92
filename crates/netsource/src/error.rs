//! Error types for netsource operations.
//!
//! Only configuration mistakes made through the public API and shutdown
//! timeouts reach callers. Socket conditions inside the streaming loop are
//! logged and retried by the worker instead of being returned.

use std::io;
use thiserror::Error;

/// Result type alias for netsource operations.
pub type Result<T> = std::result::Result<T, NetSourceError>;

/// Errors that can occur while configuring or controlling a network source.
#[derive(Debug, Error)]
pub enum NetSourceError {
    /// Configuration validation or parsing error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection role is neither `server` nor `client`.
    #[error("Invalid connection type: \"{0}\"")]
    InvalidConnectionType(String),

    /// Declared element kind is not one of the supported port types.
    #[error("Unsupported sample kind: \"{0}\"")]
    UnsupportedSampleKind(String),

    /// A connection with the same name is already registered.
    #[error("Connection '{0}' is already registered")]
    DuplicateConnection(String),

    /// Listening socket could not be created or bound.
    #[error("Unable to bind {address}: {source}")]
    Bind {
        /// Address the listener tried to bind.
        address: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Client socket could not connect to its peer.
    #[error("Unable to connect to {address}: {source}")]
    Connect {
        /// Peer address.
        address: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Worker thread did not report completion within the stop budget.
    #[error("Worker thread failed to exit within {waited_ms}ms")]
    ShutdownTimeout {
        /// Total time spent waiting, in milliseconds.
        waited_ms: u64,
    },

    /// Worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {source}")]
    WorkerSpawn {
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl NetSourceError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a bind error for `address`.
    pub fn bind(address: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    /// Creates a connect error for `address`.
    pub fn connect(address: impl Into<String>, source: io::Error) -> Self {
        Self::Connect {
            address: address.into(),
            source,
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetSourceError::Bind { .. } | NetSourceError::Connect { .. } | NetSourceError::Io(_)
        )
    }
}

impl From<toml::de::Error> for NetSourceError {
    fn from(err: toml::de::Error) -> Self {
        NetSourceError::Configuration(format!("Failed to parse config: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetSourceError::InvalidConnectionType("peer".to_string());
        assert_eq!(err.to_string(), "Invalid connection type: \"peer\"");
    }

    #[test]
    fn test_shutdown_timeout_display() {
        let err = NetSourceError::ShutdownTimeout { waited_ms: 1000 };
        assert_eq!(
            err.to_string(),
            "Worker thread failed to exit within 1000ms"
        );
    }

    #[test]
    fn test_connect_error_keeps_source() {
        let err = NetSourceError::connect(
            "127.0.0.1:9",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(err.to_string().contains("127.0.0.1:9"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_retryable() {
        let bind = NetSourceError::bind("localhost:1", io::Error::from(io::ErrorKind::AddrInUse));
        assert!(bind.is_retryable());
        assert!(!NetSourceError::config("bad").is_retryable());
        assert!(!NetSourceError::ShutdownTimeout { waited_ms: 1 }.is_retryable());
    }
}
