//! Error types for SMTP operations.

use std::io;
use std::sync::Arc;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
///
/// Configuration errors are fatal before any connection is made, network
/// errors are fatal for one destination only, and protocol errors end the
/// current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration or an unsupported requested extension.
    Configuration,
    /// Dial, timeout, reset, TLS or DNS failure.
    Network,
    /// Unexpected status code or malformed reply.
    Protocol,
}

/// SMTP error types.
///
/// Cloneable so that a failed greeting can be reported again without
/// re-sending it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// A round trip exceeded the configured timeout.
    #[error("timed out waiting for the server")]
    Timeout,

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The TLS server name is not a valid DNS name or IP address.
    #[error("invalid TLS server name: {0}")]
    InvalidDnsName(String),

    /// DNS lookup failure.
    #[error("DNS error: {0}")]
    Dns(String),

    /// The connection has already been closed.
    #[error("connection closed")]
    Closed,

    /// Server returned a status code other than the expected one.
    #[error("SMTP error {code}: {message}")]
    Protocol {
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text, lines joined with `\n`.
        message: String,
    },

    /// Reply could not be parsed.
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// Invalid state for operation.
    #[error("invalid state for operation: {0}")]
    InvalidState(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

impl Error {
    /// Creates a protocol error from a reply code and message.
    #[must_use]
    pub fn protocol(code: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Io(_)
            | Self::Timeout
            | Self::Tls(_)
            | Self::InvalidDnsName(_)
            | Self::Dns(_)
            | Self::Closed => ErrorKind::Network,
            Self::Protocol { .. } | Self::Malformed(_) | Self::InvalidState(_) => {
                ErrorKind::Protocol
            }
        }
    }

    /// Returns the reply code if the server answered with an unexpected status.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Protocol { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Protocol { code, .. } if *code >= 400 && *code < 500)
    }
}
