//! Generic message channel abstraction for the extension host.
//!
//! A channel carries whole, opaque messages between the main side and the
//! extension side. Concrete channels (in-process queues, pipes, sockets) live in
//! separate crates; the RPC protocol only ever sees the [`Channel`] trait.
//!
//! Channels handle:
//! - Whole-message delivery in send order
//! - Concurrent senders
//! - A close signal observable by both peers
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::TransportError;
pub use error::TransportError as Error;

/// Duplex message channel between two RPC peers.
///
/// Implementations must accept `send` from many tasks at once. `recv` is
/// driven by a single reader (the protocol dispatch loop).
#[async_trait]
pub trait Channel: Debug + Send + Sync + 'static {
    /// Send one whole message to the peer.
    ///
    /// Messages sent by one caller arrive in the order they were sent.
    async fn send(&self, data: Bytes) -> Result<(), TransportError>;

    /// Receive the next message from the peer.
    ///
    /// Returns [`TransportError::Closed`] once the channel has been closed by
    /// either side and no buffered messages remain.
    async fn recv(&self) -> Result<Bytes, TransportError>;

    /// Close the channel. Idempotent.
    ///
    /// After closing, both peers observe [`TransportError::Closed`].
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the channel has been closed.
    fn is_closed(&self) -> bool;
}

/// Configuration for channels.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Number of messages buffered per direction before senders wait
    pub queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 10 * 1024 * 1024, // 10MB
            queue_capacity: 1000,
        }
    }
}

impl TransportConfig {
    /// Check a message against the configured maximum size.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FrameTooLarge`] if the message is too big.
    pub fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            return Err(TransportError::FrameTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}
