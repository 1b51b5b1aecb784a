//! Outstanding calls and the futures that wait on them.

use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot::{self, error::RecvError};
use tokio::time::{Instant, Sleep, sleep_until};
use tracing::trace;

use crate::error::{CodecError, Error, Result};
use crate::identifier::ProxyId;
use crate::message::RequestId;
use crate::protocol::Shared;

/// Type alias for the sender that settles one call.
pub(crate) type ReplySender = oneshot::Sender<Result<Value>>;

/// A call awaiting its reply.
pub(crate) struct PendingRequest {
    tx: ReplySender,
    proxy_id: ProxyId,
    method: String,
    started: Instant,
}

impl PendingRequest {
    /// Settle the call with `err`.
    pub(crate) fn reject(self, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}

/// All calls awaiting a reply on one channel.
///
/// Whoever removes an entry owns its sender, so every call settles exactly once.
#[derive(Default)]
pub(crate) struct PendingRequests {
    requests: DashMap<RequestId, PendingRequest>,
}

impl PendingRequests {
    pub(crate) fn insert(&self, id: RequestId, proxy_id: ProxyId, method: &str, tx: ReplySender) {
        self.requests.insert(
            id,
            PendingRequest {
                tx,
                proxy_id,
                method: method.to_string(),
                started: Instant::now(),
            },
        );
    }

    pub(crate) fn take(&self, id: RequestId) -> Option<PendingRequest> {
        self.requests.remove(&id).map(|(_, request)| request)
    }

    /// Settle `id` with the outcome built from its target proxy.
    ///
    /// Returns `false` if no such call is pending.
    pub(crate) fn settle(
        &self,
        id: RequestId,
        outcome: impl FnOnce(ProxyId) -> Result<Value>,
    ) -> bool {
        let Some(request) = self.take(id) else {
            return false;
        };

        trace!(
            %id,
            method = %request.method,
            elapsed = ?request.started.elapsed(),
            "request settled"
        );
        let result = outcome(request.proxy_id);
        let _ = request.tx.send(result);
        true
    }

    /// Reject every pending call, returning how many there were.
    pub(crate) fn reject_all(&self, err: impl Fn() -> Error) -> usize {
        let ids: Vec<RequestId> = self.requests.iter().map(|entry| *entry.key()).collect();

        ids.into_iter()
            .filter_map(|id| self.take(id))
            .map(|request| request.reject(err()))
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }
}

/// Future for one outstanding call.
///
/// Resolves exactly once: with the reply, the remote error, or a local
/// rejection (cancel, timeout, disconnect). Dropping an unsettled call cancels
/// it.
#[must_use = "dropping a PendingCall cancels it"]
pub struct PendingCall<T = Value> {
    id: Option<RequestId>,
    rx: oneshot::Receiver<Result<Value>>,
    shared: Weak<Shared>,
    timeout: Option<Duration>,
    started: Instant,
    deadline: Option<Pin<Box<Sleep>>>,
    settled: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PendingCall<T> {
    pub(crate) fn new(
        id: RequestId,
        rx: oneshot::Receiver<Result<Value>>,
        shared: Weak<Shared>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id: Some(id),
            rx,
            shared,
            timeout,
            started: Instant::now(),
            deadline: None,
            settled: false,
            _marker: PhantomData,
        }
    }

    /// A call that failed before anything was sent.
    pub(crate) fn failed(err: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));

        Self {
            id: None,
            rx,
            shared: Weak::new(),
            timeout: None,
            started: Instant::now(),
            deadline: None,
            settled: false,
            _marker: PhantomData,
        }
    }

    /// The request id, or `None` if the call failed before it was sent.
    pub const fn id(&self) -> Option<RequestId> {
        self.id
    }

    /// Cancel the call.
    ///
    /// The call settles at once with [`Error::Cancelled`] and the peer is told
    /// to stop. Returns `false` if the call had already settled.
    pub fn cancel(&self) -> bool {
        self.cancel_with(Error::Cancelled)
    }

    /// A handle that cancels this call from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id,
            shared: Weak::clone(&self.shared),
        }
    }

    fn cancel_with(&self, reason: Error) -> bool {
        match (self.id, self.shared.upgrade()) {
            (Some(id), Some(shared)) => shared.cancel_request(id, reason),
            _ => false,
        }
    }

    fn finish(&mut self, outcome: std::result::Result<Result<Value>, RecvError>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.settled = true;

        // A dropped sender means the protocol itself went away
        let value = outcome.map_err(|_| Error::Disconnected)??;
        serde_json::from_value(value)
            .map_err(|e| CodecError::DeserializationFailed(e.to_string()).into())
    }
}

impl<T: DeserializeOwned> Future for PendingCall<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Poll::Ready(outcome) = Pin::new(&mut this.rx).poll(cx) {
            return Poll::Ready(this.finish(outcome));
        }

        if let Some(limit) = this.timeout {
            let started = this.started;
            let deadline = this
                .deadline
                .get_or_insert_with(|| Box::pin(sleep_until(started + limit)));

            if deadline.as_mut().poll(cx).is_ready() {
                this.cancel_with(Error::Timeout(limit));

                // The reply may have won the race; either way the receiver is ready now
                if let Poll::Ready(outcome) = Pin::new(&mut this.rx).poll(cx) {
                    return Poll::Ready(this.finish(outcome));
                }
                this.settled = true;
                return Poll::Ready(Err(Error::Timeout(limit)));
            }
        }

        Poll::Pending
    }
}

impl<T> Drop for PendingCall<T> {
    fn drop(&mut self) {
        if !self.settled {
            self.cancel_with(Error::Cancelled);
        }
    }
}

impl<T> Debug for PendingCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

/// Cancels a [`PendingCall`] from another task.
#[derive(Clone)]
pub struct CancelHandle {
    id: Option<RequestId>,
    shared: Weak<Shared>,
}

impl CancelHandle {
    /// Cancel the call. Returns `false` if it had already settled.
    pub fn cancel(&self) -> bool {
        match (self.id, self.shared.upgrade()) {
            (Some(id), Some(shared)) => shared.cancel_request(id, Error::Cancelled),
            _ => false,
        }
    }
}

impl Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").field("id", &self.id).finish()
    }
}
