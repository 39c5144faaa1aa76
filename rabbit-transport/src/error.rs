//! Error types for the transport layer

use std::io;

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving a transport
///
/// Socket calls themselves return [`io::Error`] unchanged; this type wraps
/// them only where a transport error meets configuration or codec errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] rabbit_protocol::Error),
}

impl Error {
    /// Check if this error came from the underlying connection
    ///
    /// Deadline expiry and cancellation both land here as
    /// [`io::ErrorKind::TimedOut`].
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Protocol(rabbit_protocol::Error::Io(_)) => true,
            _ => false,
        }
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        match self {
            Error::Config(_) | Error::ConfigParse(_) => true,
            Error::Protocol(e) => e.is_init_fatal(),
            _ => false,
        }
    }

    /// Check if a transport error was a deadline or cancellation
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}
