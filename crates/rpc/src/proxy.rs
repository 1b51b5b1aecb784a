//! Client-side handles for remote services.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;

use crate::args::IntoArgs;
use crate::error::Result;
use crate::identifier::ProxyIdentifier;
use crate::pending::PendingCall;
use crate::protocol::RpcProtocol;

/// Forwards method calls to the remote service behind one identifier.
///
/// Holds no state of its own: every call is a fresh round trip. Typed client
/// stubs wrap a `Proxy` and expose one async method per remote method.
#[derive(Clone, Debug)]
pub struct Proxy {
    protocol: RpcProtocol,
    identifier: ProxyIdentifier,
}

impl Proxy {
    pub(crate) const fn new(protocol: RpcProtocol, identifier: ProxyIdentifier) -> Self {
        Self {
            protocol,
            identifier,
        }
    }

    /// The remote service this proxy talks to.
    #[must_use]
    pub const fn identifier(&self) -> &ProxyIdentifier {
        &self.identifier
    }

    /// Call `method` and decode the reply as `R`.
    #[instrument(skip(self, args), fields(proxy = %self.identifier))]
    pub fn call<R: DeserializeOwned>(&self, method: &str, args: impl IntoArgs) -> PendingCall<R> {
        match args.into_args() {
            Ok(args) => self
                .protocol
                .shared
                .invoke(self.identifier.id(), method, args),
            Err(e) => PendingCall::failed(e),
        }
    }

    /// Call `method` with already-encoded arguments.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> PendingCall<Value> {
        self.protocol
            .shared
            .invoke(self.identifier.id(), method, args)
    }

    /// Send a notification; no reply is expected.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments cannot be encoded or the channel is closed.
    pub fn notify(&self, method: &str, args: impl IntoArgs) -> Result<()> {
        self.protocol
            .shared
            .notify(self.identifier.id(), method, args.into_args()?)
    }
}
