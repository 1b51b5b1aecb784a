//! Error types for channels.

use std::io;

use thiserror::Error;

/// Errors raised by a [`Channel`](crate::Channel).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel is closed.
    #[error("Channel closed")]
    Closed,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message exceeds the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the message.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Malformed frame on the wire.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether this error means the channel can no longer be used.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_) | Self::InvalidFrame(_))
    }
}
