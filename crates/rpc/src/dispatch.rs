//! Dispatch of incoming messages.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::handler::{CallContext, RpcHandler};
use crate::identifier::ProxyId;
use crate::message::{Message, RemoteError, RequestId};
use crate::protocol::Shared;

impl Shared {
    /// Decode one frame and act on it. Undecodable frames are logged and skipped.
    pub(crate) fn handle_incoming(self: &Arc<Self>, bytes: &[u8]) {
        let message: Message = match codec::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to decode incoming message: {}", e);
                return;
            }
        };

        trace!(kind = message.kind(), "Received message");

        match message {
            Message::Request {
                id,
                proxy_id,
                method,
                args,
            } => self.dispatch_request(id, proxy_id, method, args),
            Message::Notification {
                proxy_id,
                method,
                args,
            } => self.dispatch_notification(proxy_id, method, args),
            Message::Reply { id, value } => self.settle(id, |_| Ok(value)),
            Message::ReplyErr { id, error } => {
                self.settle(id, |proxy_id| Err(Error::from_remote(proxy_id, error)));
            }
            Message::Cancel { id } => self.cancel_in_progress(id),
        }
    }

    fn settle(&self, id: RequestId, outcome: impl FnOnce(ProxyId) -> Result<Value>) {
        if !self.pending.settle(id, outcome) {
            // Cancelled, timed out or never ours
            debug!(%id, "Ignoring reply for unknown request");
        }
    }

    fn cancel_in_progress(&self, id: RequestId) {
        match self.in_progress.get(&id) {
            Some(token) => {
                debug!(%id, "Peer cancelled request");
                token.cancel();
            }
            None => debug!(%id, "Ignoring cancel for unknown request"),
        }
    }

    fn dispatch_request(
        self: &Arc<Self>,
        id: RequestId,
        proxy_id: ProxyId,
        method: String,
        args: Vec<Value>,
    ) {
        // Only this loop inserts into in_progress, so check-then-insert is safe
        if self.in_progress.contains_key(&id) {
            warn!(%id, %method, "Ignoring request with an id already in progress");
            return;
        }

        let Some(handler) = self.registry.get(proxy_id) else {
            debug!(%id, %proxy_id, %method, "No service registered");
            self.send_reply(id, Err(RemoteError::no_such_proxy(proxy_id)));
            return;
        };

        let token = self.shutdown_token.child_token();
        self.in_progress.insert(id, token.clone());

        let cancellable = handler.is_cancellable(&method);
        let shared = Arc::clone(self);

        self.task_tracker.spawn(async move {
            let cx = CallContext::new(Some(id), proxy_id, method.clone(), token.clone());
            let call = run_handler(handler.as_ref(), &method, args, cx);

            let outcome = if cancellable {
                tokio::select! {
                    biased;

                    outcome = call => outcome,
                    () = token.cancelled() => {
                        debug!(%id, %method, "Handler aborted");
                        Err(RemoteError::cancelled())
                    }
                }
            } else {
                call.await
            };

            shared.in_progress.remove(&id);
            shared.send_reply(id, outcome);
        });
    }

    fn dispatch_notification(self: &Arc<Self>, proxy_id: ProxyId, method: String, args: Vec<Value>) {
        let Some(handler) = self.registry.get(proxy_id) else {
            warn!(%proxy_id, %method, "Dropping notification for unregistered service");
            return;
        };

        let token = self.shutdown_token.child_token();
        self.task_tracker.spawn(async move {
            let cx = CallContext::new(None, proxy_id, method.clone(), token);
            if let Err(e) = run_handler(handler.as_ref(), &method, args, cx).await {
                warn!(%proxy_id, %method, "Notification handler failed: {}", e);
            }
        });
    }
}

/// Run a handler, turning failures and panics into wire errors.
async fn run_handler(
    handler: &dyn RpcHandler,
    method: &str,
    args: Vec<Value>,
    cx: CallContext,
) -> std::result::Result<Value, RemoteError> {
    match AssertUnwindSafe(handler.handle(method, args, cx))
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            debug!(%method, "Handler returned error: {}", e);
            Err(e.into())
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(%method, "Handler panicked: {}", message);
            Err(RemoteError::panicked(format!("Handler panicked: {message}")))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
