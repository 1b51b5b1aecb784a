//! The RPC protocol bound to one channel.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use exthost_transport::{Channel, TransportError};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::codec;
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::handler::RpcHandler;
use crate::identifier::{ProxyId, ProxyIdentifier, Side};
use crate::message::{ErrorCode, Message, RemoteError, RequestId};
use crate::pending::{PendingCall, PendingRequests};
use crate::proxy::Proxy;
use crate::registry::ServiceRegistry;

/// Lifecycle of a protocol instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Messages flow in both directions.
    Open,
    /// The channel is gone; every call fails with [`Error::Disconnected`].
    Closed,
}

/// An encoded message waiting for the writer.
pub(crate) enum Outbound {
    /// A request; a failed send rejects the matching pending call.
    Request(RequestId, Bytes),
    /// A reply; a failed send is answered with a small error reply instead.
    Reply(RequestId, Bytes),
    /// Notifications and cancels.
    Other(Bytes),
}

impl Outbound {
    fn bytes(&self) -> Bytes {
        match self {
            Self::Request(_, bytes) | Self::Reply(_, bytes) | Self::Other(bytes) => bytes.clone(),
        }
    }
}

/// State shared by the protocol handle, its background tasks and its calls.
pub(crate) struct Shared {
    pub(crate) side: Side,
    config: RpcConfig,
    channel: Arc<dyn Channel>,
    next_id: AtomicU64,
    pub(crate) pending: PendingRequests,
    pub(crate) in_progress: DashMap<RequestId, CancellationToken>,
    pub(crate) registry: ServiceRegistry,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Sender<ChannelState>,
    pub(crate) shutdown_token: CancellationToken,
    pub(crate) task_tracker: TaskTracker,
}

/// One end of the extension-host RPC protocol.
///
/// Cloning is cheap; all clones drive the same channel. The protocol owns two
/// background tasks: a reader that dispatches incoming messages and a single
/// writer that serializes outgoing ones.
///
/// Dropping the last handle (proxies included) closes the channel.
#[derive(Clone)]
pub struct RpcProtocol {
    pub(crate) shared: Arc<Shared>,
    _guard: Arc<HandleGuard>,
}

/// Closes the channel once no user-facing handle remains.
///
/// The background tasks hold `Shared` too, so its own drop never runs while
/// they are alive.
struct HandleGuard {
    shared: Arc<Shared>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.shared.mark_closed("protocol handle dropped");
    }
}

impl RpcProtocol {
    /// Start the protocol over `channel`.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(side = %config.side))]
    pub fn open(channel: Arc<dyn Channel>, config: RpcConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Open);

        let shared = Arc::new(Shared {
            side: config.side,
            config,
            channel,
            next_id: AtomicU64::new(1),
            pending: PendingRequests::default(),
            in_progress: DashMap::new(),
            registry: ServiceRegistry::new(),
            outbound: outbound_tx,
            state,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        });

        shared
            .task_tracker
            .spawn(Arc::clone(&shared).read_loop());
        shared
            .task_tracker
            .spawn(Arc::clone(&shared).write_loop(outbound_rx));

        info!("RPC protocol opened");
        let guard = Arc::new(HandleGuard {
            shared: Arc::clone(&shared),
        });
        Self {
            shared,
            _guard: guard,
        }
    }

    /// The local side.
    #[must_use]
    pub fn side(&self) -> Side {
        self.shared.side
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Whether the channel has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the channel has closed, for whatever reason.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == ChannelState::Closed).await;
    }

    /// Close the channel.
    ///
    /// Pending calls reject with [`Error::Disconnected`], running handlers see
    /// their cancellation token fire and messages not yet written are dropped.
    /// Closing twice is a no-op.
    pub async fn close(&self) {
        self.shared.mark_closed("closed locally");
        if let Err(e) = self.shared.channel.close().await {
            debug!("Error closing channel: {}", e);
        }
    }

    /// Wait until the channel has closed and every background task and
    /// handler has finished.
    pub async fn wait(&self) {
        self.closed().await;
        self.shared.task_tracker.close();
        self.shared.task_tracker.wait().await;
    }

    /// Host `handler` as the local service behind `identifier`.
    ///
    /// Returns the handler it replaced. Calls already running on the old
    /// handler finish there.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongSide`] if `identifier` does not belong to this side.
    pub fn set<H: RpcHandler>(
        &self,
        identifier: &ProxyIdentifier,
        handler: H,
    ) -> Result<Option<Arc<dyn RpcHandler>>> {
        self.set_arc(identifier, Arc::new(handler))
    }

    /// Like [`set`](Self::set) for a handler that is already shared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongSide`] if `identifier` does not belong to this side.
    pub fn set_arc(
        &self,
        identifier: &ProxyIdentifier,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<Option<Arc<dyn RpcHandler>>> {
        if identifier.side() != self.side() {
            return Err(self.wrong_side(identifier, "hosted"));
        }

        let previous = self.shared.registry.register(identifier.id(), handler);
        debug!(%identifier, replaced = previous.is_some(), "Service registered");
        Ok(previous)
    }

    /// Stop hosting the service behind `identifier`.
    ///
    /// Later calls to it fail on the caller with [`Error::NoSuchProxy`].
    pub fn unset(&self, identifier: &ProxyIdentifier) -> Option<Arc<dyn RpcHandler>> {
        let removed = self.shared.registry.unregister(identifier.id());
        if removed.is_some() {
            debug!(%identifier, "Service unregistered");
        }
        removed
    }

    /// A proxy for the remote service behind `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongSide`] if `identifier` belongs to this side.
    pub fn get_proxy(&self, identifier: &ProxyIdentifier) -> Result<Proxy> {
        if identifier.side() == self.side() {
            return Err(self.wrong_side(identifier, "proxied"));
        }
        Ok(Proxy::new(self.clone(), identifier.clone()))
    }

    /// Call `method` on the remote service behind `identifier`.
    pub fn invoke(
        &self,
        identifier: &ProxyIdentifier,
        method: &str,
        args: Vec<Value>,
    ) -> PendingCall<Value> {
        if identifier.side() == self.side() {
            return PendingCall::failed(self.wrong_side(identifier, "proxied"));
        }
        self.shared.invoke(identifier.id(), method, args)
    }

    /// Send a notification to the remote service behind `identifier`.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is local, the channel is closed or
    /// the arguments cannot be encoded.
    pub fn notify(&self, identifier: &ProxyIdentifier, method: &str, args: Vec<Value>) -> Result<()> {
        if identifier.side() == self.side() {
            return Err(self.wrong_side(identifier, "proxied"));
        }
        self.shared.notify(identifier.id(), method, args)
    }

    /// Services hosted by this side.
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.shared.registry
    }

    /// Number of local calls awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Number of incoming requests whose handler is still running.
    #[must_use]
    pub fn in_progress_count(&self) -> usize {
        self.shared.in_progress.len()
    }

    fn wrong_side(&self, identifier: &ProxyIdentifier, usage: &'static str) -> Error {
        Error::WrongSide {
            identifier: identifier.to_string(),
            usage,
            side: self.side(),
        }
    }
}

impl Debug for RpcProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcProtocol")
            .field("side", &self.shared.side)
            .field("state", &self.state())
            .field("channel", &self.shared.channel)
            .field("pending", &self.pending_count())
            .field("in_progress", &self.in_progress_count())
            .field("registry", &self.shared.registry)
            .finish()
    }
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        *self.state.borrow() == ChannelState::Closed
    }

    pub(crate) fn invoke<T>(
        self: &Arc<Self>,
        proxy_id: ProxyId,
        method: &str,
        args: Vec<Value>,
    ) -> PendingCall<T> {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let call = PendingCall::new(id, rx, Arc::downgrade(self), self.config.request_timeout);

        if self.is_closed() {
            let _ = tx.send(Err(Error::Disconnected));
            return call;
        }

        let current = self.pending.len();
        if current >= self.config.max_in_flight {
            let _ = tx.send(Err(Error::TooManyInFlight {
                current,
                max: self.config.max_in_flight,
            }));
            return call;
        }

        let message = Message::Request {
            id,
            proxy_id,
            method: method.to_string(),
            args,
        };
        let bytes = match codec::encode_message(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(Err(e));
                return call;
            }
        };

        trace!(%id, %proxy_id, %method, "Sending request");
        self.pending.insert(id, proxy_id, method, tx);

        // The channel may have closed after the first check; the drain in
        // mark_closed could have missed this entry
        if self.is_closed() || self.outbound.send(Outbound::Request(id, bytes)).is_err() {
            if let Some(request) = self.pending.take(id) {
                request.reject(Error::Disconnected);
            }
        }

        call
    }

    pub(crate) fn notify(&self, proxy_id: ProxyId, method: &str, args: Vec<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Disconnected);
        }

        let bytes = codec::encode_message(&Message::Notification {
            proxy_id,
            method: method.to_string(),
            args,
        })?;

        trace!(%proxy_id, %method, "Sending notification");
        self.outbound
            .send(Outbound::Other(bytes))
            .map_err(|_| Error::Disconnected)
    }

    /// Settle a local call with `reason` and tell the peer to stop working on it.
    ///
    /// Returns `false` if the call had already settled.
    pub(crate) fn cancel_request(&self, id: RequestId, reason: Error) -> bool {
        let Some(request) = self.pending.take(id) else {
            return false;
        };

        debug!(%id, "Cancelling request: {}", reason);
        request.reject(reason);

        if self.is_closed() {
            return true;
        }
        match codec::encode_message(&Message::Cancel { id }) {
            Ok(bytes) => {
                let _ = self.outbound.send(Outbound::Other(bytes));
            }
            Err(e) => error!("Failed to encode cancel for {}: {}", id, e),
        }
        true
    }

    /// Queue the reply to incoming request `id`.
    pub(crate) fn send_reply(&self, id: RequestId, outcome: std::result::Result<Value, RemoteError>) {
        let message = match outcome {
            Ok(value) => Message::Reply { id, value },
            Err(error) => Message::ReplyErr { id, error },
        };

        let bytes = match codec::encode_message(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode reply {}: {}", id, e);
                let fallback = RemoteError::new(
                    ErrorCode::HandlerFailed,
                    format!("Failed to encode reply: {e}"),
                );
                match codec::encode_message(&Message::ReplyErr { id, error: fallback }) {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                }
            }
        };

        if self.outbound.send(Outbound::Reply(id, bytes)).is_err() {
            debug!(%id, "Dropping reply for closed channel");
        }
    }

    /// Move to [`ChannelState::Closed`] exactly once.
    ///
    /// Returns `true` for the caller that performed the transition.
    pub(crate) fn mark_closed(&self, reason: &str) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == ChannelState::Open {
                *state = ChannelState::Closed;
                true
            } else {
                false
            }
        });
        if !transitioned {
            return false;
        }

        let rejected = self.pending.reject_all(|| Error::Disconnected);
        info!(side = %self.side, rejected, "RPC channel closed: {}", reason);

        // Stops both loops and fires every handler's token
        self.shutdown_token.cancel();
        true
    }

    async fn read_loop(self: Arc<Self>) {
        debug!(side = %self.side, "Read loop started");

        let reason = loop {
            let received = tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => break "protocol closed",
                received = self.channel.recv() => received,
            };

            match received {
                Ok(bytes) => self.handle_incoming(&bytes),
                Err(TransportError::Closed) => break "peer closed the channel",
                Err(e) => {
                    warn!("Channel read failed: {}", e);
                    break "channel read failed";
                }
            }
        };

        self.mark_closed(reason);
        if let Err(e) = self.channel.close().await {
            debug!("Error closing channel: {}", e);
        }
        debug!(side = %self.side, "Read loop stopped");
    }

    async fn write_loop(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
        debug!(side = %self.side, "Write loop started");

        let reason = loop {
            let next = tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => break "protocol closed",
                next = outbound.recv() => next,
            };
            let Some(item) = next else {
                break "outbound queue closed";
            };

            if let Err(e) = self.channel.send(item.bytes()).await {
                if e.is_terminal() {
                    warn!("Channel write failed: {}", e);
                    break "channel write failed";
                }
                self.undeliverable(item, e);
            }
        };

        self.mark_closed(reason);
        debug!(side = %self.side, "Write loop stopped");
    }

    /// Handle a message the channel refused without closing.
    fn undeliverable(&self, item: Outbound, err: TransportError) {
        match item {
            Outbound::Request(id, _) => {
                warn!(%id, "Request could not be sent: {}", err);
                if let Some(request) = self.pending.take(id) {
                    request.reject(Error::Transport(err));
                }
            }
            Outbound::Reply(id, _) => {
                warn!(%id, "Reply could not be sent: {}", err);
                let error = RemoteError::new(
                    ErrorCode::HandlerFailed,
                    format!("Reply could not be delivered: {err}"),
                );
                if let Ok(bytes) = codec::encode_message(&Message::ReplyErr { id, error }) {
                    let _ = self.outbound.send(Outbound::Other(bytes));
                }
            }
            Outbound::Other(_) => warn!("Dropping undeliverable message: {}", err),
        }
    }
}
