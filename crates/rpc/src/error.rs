//! Error types for the RPC protocol.

use std::time::Duration;

use exthost_transport::TransportError;
use thiserror::Error;

use crate::identifier::{ProxyId, Side};
use crate::message::{ErrorCode, RemoteError};

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer has no service registered under the requested id.
    #[error("No such proxy: {0}")]
    NoSuchProxy(ProxyId),

    /// The remote handler failed; carries the reply payload as sent.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// The channel closed before the call settled.
    #[error("Channel disconnected")]
    Disconnected,

    /// The call was cancelled locally.
    #[error("Request cancelled")]
    Cancelled,

    /// The call did not settle in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Too many in-flight requests.
    #[error("Too many in-flight requests: {current}/{max}")]
    TooManyInFlight {
        /// Current number of in-flight requests.
        current: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// The identifier is used from the wrong side of the channel.
    #[error("Proxy identifier {identifier} cannot be {usage} on the {side} side")]
    WrongSide {
        /// The identifier that was misused.
        identifier: String,
        /// What was attempted ("hosted" or "proxied").
        usage: &'static str,
        /// The local side.
        side: Side,
    },

    /// An identifier with the same side and name already exists.
    #[error("Duplicate proxy identifier: {0}")]
    DuplicateIdentifier(String),

    /// Codec errors during serialization/deserialization.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The channel failed to carry a message.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    /// Rehydrate a reply error received for a call to `proxy_id`.
    pub(crate) fn from_remote(proxy_id: ProxyId, error: RemoteError) -> Self {
        match error.code {
            ErrorCode::NoSuchProxy => Self::NoSuchProxy(proxy_id),
            _ => Self::Remote(error),
        }
    }

    /// Whether this error came from the channel closing.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Codec-related errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    SerializationFailed(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    DeserializationFailed(String),

    /// A payload nests deeper than the peer can decode.
    #[error("Payload nested deeper than {max} levels")]
    NestingTooDeep {
        /// Maximum allowed depth.
        max: usize,
    },
}
