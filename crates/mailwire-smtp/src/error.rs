//! Error types for SMTP/LMTP sessions.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed command, reply or enhanced status code.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// A line exceeded the configured maximum length.
    #[error("Line exceeds maximum length of {limit} bytes")]
    LineTooLong {
        /// Configured limit, including the CRLF.
        limit: usize,
    },

    /// The peer closed the stream in the middle of a command, reply or message.
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Peer returned error response that ends the session.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from peer.
        message: String,
    },

    /// Protocol error (unexpected reply or sequence).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Session configuration cannot be honoured by the peer.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No I/O happened within the configured timeout.
    #[error("Session timed out")]
    Timeout,
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }

    /// Returns true if the connection cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::LineTooLong { .. } | Self::UnexpectedEof | Self::Timeout
        )
    }
}
