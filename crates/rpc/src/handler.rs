//! Service handlers that incoming calls are dispatched to.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::identifier::ProxyId;
use crate::message::{ErrorCode, RemoteError, RequestId};

/// Trait for services that handle incoming calls.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Handle one call to `method`.
    ///
    /// The returned value (or error) becomes the reply. For notifications the
    /// result is only logged.
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        cx: CallContext,
    ) -> Result<Value, HandlerError>;

    /// Whether a call to `method` is aborted when the caller cancels it.
    ///
    /// Calls to methods that are not cancellable run to completion and reply
    /// normally; they can still watch [`CallContext::cancelled`].
    fn is_cancellable(&self, _method: &str) -> bool {
        false
    }
}

/// Per-call information handed to a handler.
#[derive(Clone, Debug)]
pub struct CallContext {
    request_id: Option<RequestId>,
    proxy_id: ProxyId,
    method: String,
    token: CancellationToken,
}

impl CallContext {
    pub(crate) fn new(
        request_id: Option<RequestId>,
        proxy_id: ProxyId,
        method: String,
        token: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            proxy_id,
            method,
            token,
        }
    }

    /// The request id, or `None` for a notification.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    /// The service the call was addressed to.
    #[must_use]
    pub const fn proxy_id(&self) -> ProxyId {
        self.proxy_id
    }

    /// The called method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether this call is a notification.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.request_id.is_none()
    }

    /// Whether the caller cancelled or the channel closed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the caller cancels or the channel closes.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The underlying cancellation token.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Errors returned by handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The service has no such method.
    #[error("No such method: {0}")]
    NoSuchMethod(String),

    /// Arguments did not match the method.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler failed.
    #[error("{message}")]
    Failed {
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<Value>,
    },
}

impl HandlerError {
    /// A plain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            details: None,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::failed(format!("{err:#}"))
    }
}

impl From<HandlerError> for RemoteError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::NoSuchMethod(_) => Self::new(ErrorCode::NoSuchMethod, err.to_string()),
            HandlerError::InvalidArguments(_) => {
                Self::new(ErrorCode::InvalidArguments, err.to_string())
            }
            HandlerError::Failed { message, details } => Self {
                code: ErrorCode::HandlerFailed,
                message,
                details,
            },
        }
    }
}

/// Decode the positional argument at `index`.
///
/// A missing trailing argument decodes as `null`, so `Option<T>` parameters
/// may be omitted by the caller.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidArguments`] if the argument does not decode as `T`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, HandlerError> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| HandlerError::InvalidArguments(format!("argument {index}: {e}")))
}

/// Encode a handler result as a reply value.
///
/// # Errors
///
/// Returns [`HandlerError::Failed`] if the value is not plain data.
pub fn respond<T: Serialize>(value: T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError::failed(format!("bad reply: {e}")))
}
