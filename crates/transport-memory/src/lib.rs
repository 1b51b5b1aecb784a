//! In-memory channel implementation
//!
//! Connects two RPC peers living in the same process, the way an extension
//! host worker talks to the UI thread. Perfect for testing and for hosts that
//! run extensions on a local worker.

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use exthost_transport::{Channel, TransportConfig, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// One end of an in-memory channel pair.
///
/// Closing either end, or dropping it, closes the pair for both peers.
pub struct MemoryChannel {
    id: Uuid,
    config: TransportConfig,
    sender: flume::Sender<Bytes>,
    receiver: flume::Receiver<Bytes>,
    closed: CancellationToken,
}

impl MemoryChannel {
    /// Create a connected pair with default configuration.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with_config(&TransportConfig::default())
    }

    /// Create a connected pair with the given configuration.
    #[must_use]
    pub fn pair_with_config(config: &TransportConfig) -> (Self, Self) {
        let (left_to_right_tx, left_to_right_rx) = flume::bounded(config.queue_capacity);
        let (right_to_left_tx, right_to_left_rx) = flume::bounded(config.queue_capacity);

        // Both ends share one close signal
        let closed = CancellationToken::new();
        let id = Uuid::new_v4();

        let left = Self {
            id,
            config: config.clone(),
            sender: left_to_right_tx,
            receiver: right_to_left_rx,
            closed: closed.clone(),
        };

        let right = Self {
            id,
            config: config.clone(),
            sender: right_to_left_tx,
            receiver: left_to_right_rx,
            closed,
        };

        info!("Memory channel {} established", id);

        (left, right)
    }

    /// The id shared by both ends of this pair.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Number of messages waiting to be received on this end.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }
}

impl Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        self.config.check_size(data.len())?;

        debug!("Memory channel {} sending {} bytes", self.id, data.len());

        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::Closed),
            result = self.sender.send_async(data) => {
                result.map_err(|_| TransportError::Closed)
            }
        }
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        // Buffered messages are still delivered after close
        tokio::select! {
            biased;
            result = self.receiver.recv_async() => match result {
                Ok(data) => {
                    debug!("Memory channel {} received {} bytes", self.id, data.len());
                    Ok(data)
                }
                Err(_) => {
                    self.closed.cancel();
                    Err(TransportError::Closed)
                }
            },
            () = self.closed.cancelled() => Err(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.is_cancelled() {
            debug!("Closing memory channel {}", self.id);
            self.closed.cancel();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
