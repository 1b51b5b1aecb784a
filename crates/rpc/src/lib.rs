//! Bidirectional RPC between the main (UI) side and the extension host.
//!
//! Each side hosts services under well-known [`ProxyIdentifier`]s and obtains
//! [`Proxy`] handles for the services the other side hosts. Calls are
//! multiplexed over a single [`Channel`](exthost_transport::Channel) and
//! correlated by request id.
//!
//! # Features
//!
//! - **Request/reply and notifications**: every request settles exactly once
//! - **Cancellation**: local cancel, drop-to-cancel and timeouts propagate to the peer
//! - **Hot reload**: re-registering a service replaces it without reopening the channel
//! - **CBOR Serialization**: compact wire format using ciborium
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use exthost_rpc::{IdentifierTable, MethodRouter, RpcConfig, RpcProtocol, Side, handler};
//! use exthost_transport_memory::MemoryChannel;
//!
//! async fn example() -> exthost_rpc::Result<()> {
//!     let (main_end, ext_end) = MemoryChannel::pair();
//!     let main = RpcProtocol::open(Arc::new(main_end), RpcConfig::main());
//!     let ext = RpcProtocol::open(Arc::new(ext_end), RpcConfig::ext());
//!
//!     let table = IdentifierTable::well_known();
//!     let commands = table.get(Side::Ext, "commands").cloned().unwrap();
//!
//!     ext.set(
//!         &commands,
//!         MethodRouter::new().method("echo", |args, _cx| async move {
//!             handler::respond(args)
//!         }),
//!     )?;
//!
//!     let proxy = main.get_proxy(&commands)?;
//!     let echoed: Vec<String> = proxy.call("echo", ("hello",)).await?;
//!     assert_eq!(echoed, vec!["hello".to_string()]);
//!
//!     main.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod args;
pub mod codec;
pub mod config;
mod dispatch;
pub mod error;
pub mod handler;
pub mod identifier;
pub mod message;
mod pending;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod router;

// Re-export commonly used types
pub use args::IntoArgs;
pub use config::RpcConfig;
pub use error::{CodecError, Error, Result};
pub use handler::{CallContext, HandlerError, RpcHandler};
pub use identifier::{IdentifierTable, ProxyId, ProxyIdentifier, Side, well_known};
pub use message::{ErrorCode, Message, RemoteError, RequestId};
pub use pending::{CancelHandle, PendingCall};
pub use protocol::{ChannelState, RpcProtocol};
pub use proxy::Proxy;
pub use registry::ServiceRegistry;
pub use router::MethodRouter;

// Re-export dependencies that are part of our public API
pub use async_trait::async_trait;
pub use bytes::Bytes;
pub use serde_json::Value;
