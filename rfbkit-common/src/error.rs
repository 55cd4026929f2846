//! The error taxonomy shared by every layer of the engine.
//!
//! Everything except [`RfbError::SinkCancelled`] is fatal to the connection:
//! the reader task reports the error once, raises the quit signal, and exits.
//! `SinkCancelled` is the clean-shutdown path taken when the application
//! closes the session.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RfbError>;

/// Errors that can occur during an RFB session.
#[derive(Debug, Error)]
pub enum RfbError {
    /// Underlying stream read/write error, short read, or closed stream.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed framing, unknown message type, or impossible field values
    /// (rectangle outside the canvas, palette index out of range, ...).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A pixel format or codec path not implemented for this build.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The server refused the chosen security type or authentication failed.
    #[error("security rejected: {0}")]
    SecurityRejected(String),

    /// A zlib stream was corrupt or disagreed with the expected byte count.
    #[error("decompression failure: {0}")]
    Decompression(String),

    /// The application closed the connection; treated as a clean shutdown.
    #[error("connection cancelled by sink")]
    SinkCancelled,
}

impl RfbError {
    /// Build a protocol-violation error from anything stringy.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// True for every variant that must tear down the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SinkCancelled)
    }
}
