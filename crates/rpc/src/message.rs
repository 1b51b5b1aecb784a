//! Wire messages exchanged between the two sides.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::identifier::ProxyId;

/// Correlation id of a request.
///
/// Allocated from a monotonic counter; never reused while a channel lives.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Create an id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope for everything sent over a channel.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    /// Call a method and expect exactly one reply.
    Request {
        /// Correlation id.
        id: RequestId,
        /// Target service.
        proxy_id: ProxyId,
        /// Method name.
        method: String,
        /// Positional arguments.
        args: Vec<Value>,
    },

    /// Call a method without expecting a reply.
    Notification {
        /// Target service.
        proxy_id: ProxyId,
        /// Method name.
        method: String,
        /// Positional arguments.
        args: Vec<Value>,
    },

    /// Successful result of a request.
    Reply {
        /// Correlation id of the request.
        id: RequestId,
        /// Returned value.
        value: Value,
    },

    /// Failed result of a request.
    ReplyErr {
        /// Correlation id of the request.
        id: RequestId,
        /// What went wrong.
        error: RemoteError,
    },

    /// The caller no longer waits for the request.
    Cancel {
        /// Correlation id of the request.
        id: RequestId,
    },
}

impl Message {
    /// The correlation id, if this message has one.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Request { id, .. }
            | Self::Reply { id, .. }
            | Self::ReplyErr { id, .. }
            | Self::Cancel { id } => Some(*id),
            Self::Notification { .. } => None,
        }
    }

    /// Short name of the message kind, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Notification { .. } => "notification",
            Self::Reply { .. } => "reply",
            Self::ReplyErr { .. } => "reply_err",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// Category of a remote failure.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No service registered under the requested id.
    NoSuchProxy,
    /// The service has no such method.
    NoSuchMethod,
    /// Arguments did not match the method.
    InvalidArguments,
    /// The handler returned an error.
    HandlerFailed,
    /// The handler panicked.
    HandlerPanicked,
    /// The handler was aborted by a cancel request.
    Cancelled,
}

impl ErrorCode {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSuchProxy => "NO_SUCH_PROXY",
            Self::NoSuchMethod => "NO_SUCH_METHOD",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::HandlerPanicked => "HANDLER_PANICKED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error information carried by a [`Message::ReplyErr`].
#[derive(Clone, Debug, Deserialize, Error, PartialEq, Serialize)]
#[error("{code}: {message}")]
pub struct RemoteError {
    /// Error code for categorization.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    pub details: Option<Value>,
}

impl RemoteError {
    /// Create an error without details.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub(crate) fn no_such_proxy(proxy_id: ProxyId) -> Self {
        Self::new(ErrorCode::NoSuchProxy, format!("No such proxy: {proxy_id}"))
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Request cancelled")
    }

    pub(crate) fn panicked(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::HandlerPanicked, message)
    }
}
