//! Registry of local services that incoming calls are dispatched to.

use std::fmt::{self, Debug};
use std::sync::Arc;

use dashmap::DashMap;

use crate::handler::RpcHandler;
use crate::identifier::ProxyId;

/// Maps proxy ids to the handlers serving them.
///
/// Registration overwrites: the last handler registered for an id wins, so a
/// reloaded extension can replace its services without restarting the
/// protocol. Calls already running keep the handler they started with.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    handlers: Arc<DashMap<ProxyId, Arc<dyn RpcHandler>>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `id`, returning the handler it replaced.
    pub fn register(&self, id: ProxyId, handler: Arc<dyn RpcHandler>) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.insert(id, handler)
    }

    /// Remove the handler registered under `id`.
    pub fn unregister(&self, id: ProxyId) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.remove(&id).map(|(_, handler)| handler)
    }

    /// The handler currently registered under `id`.
    #[must_use]
    pub fn get(&self, id: ProxyId) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a handler is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: ProxyId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.handlers.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        f.debug_struct("ServiceRegistry").field("ids", &ids).finish()
    }
}
