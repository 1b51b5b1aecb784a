//! Shared fixtures for the protocol integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use exthost_rpc::{IdentifierTable, ProxyIdentifier, RpcConfig, RpcProtocol, Side};
use exthost_transport::TransportConfig;
use exthost_transport_memory::MemoryChannel;
use exthost_transport_stream::DuplexChannel;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Main and ext protocols joined by an in-memory channel.
pub fn memory_pair() -> (RpcProtocol, RpcProtocol) {
    memory_pair_with(RpcConfig::main(), RpcConfig::ext())
}

pub fn memory_pair_with(main: RpcConfig, ext: RpcConfig) -> (RpcProtocol, RpcProtocol) {
    let (main_end, ext_end) = MemoryChannel::pair();
    (
        RpcProtocol::open(Arc::new(main_end), main),
        RpcProtocol::open(Arc::new(ext_end), ext),
    )
}

/// Memory-joined protocols whose channel refuses messages above `max_message_size`.
pub fn memory_pair_limited(max_message_size: usize) -> (RpcProtocol, RpcProtocol) {
    let config = TransportConfig {
        max_message_size,
        ..TransportConfig::default()
    };
    let (main_end, ext_end) = MemoryChannel::pair_with_config(&config);
    (
        RpcProtocol::open(Arc::new(main_end), RpcConfig::main()),
        RpcProtocol::open(Arc::new(ext_end), RpcConfig::ext()),
    )
}

/// Main and ext protocols joined by a framed byte stream.
pub fn stream_pair() -> (RpcProtocol, RpcProtocol) {
    let (main_end, ext_end) = DuplexChannel::connect_pair(&TransportConfig::default());
    (
        RpcProtocol::open(Arc::new(main_end), RpcConfig::main()),
        RpcProtocol::open(Arc::new(ext_end), RpcConfig::ext()),
    )
}

pub fn identifier(side: Side, name: &str) -> ProxyIdentifier {
    IdentifierTable::well_known()
        .get(side, name)
        .cloned()
        .expect("well-known identifier")
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
