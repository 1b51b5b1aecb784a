//! Byte-stream channel implementation
//!
//! Carries RPC messages over any ordered byte stream: a pipe to a spawned
//! extension host process, a unix socket, a TCP connection or an in-process
//! duplex pipe. Messages are length-prefixed, typed and checksummed frames.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod framing;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use exthost_transport::{Channel, TransportConfig, TransportError};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub use framing::{Frame, FrameCodec, FrameType};

/// How long `close` waits to flush the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Buffer size of the in-process pipe built by [`StreamChannel::connect_pair`].
const DUPLEX_BUFFER: usize = 64 * 1024;

/// A channel over a reader/writer pair.
pub struct StreamChannel<R, W> {
    id: Uuid,
    config: TransportConfig,
    reader: Mutex<FramedRead<R, FrameCodec>>,
    writer: Mutex<FramedWrite<W, FrameCodec>>,
    closed: CancellationToken,
}

/// A channel over one half of an in-process duplex pipe.
pub type DuplexChannel = StreamChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl<R, W> StreamChannel<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Create a channel from separate read and write halves.
    pub fn new(reader: R, writer: W, config: TransportConfig) -> Self {
        let max_frame_size = config.max_message_size;
        let codec = || FrameCodec::new().with_max_frame_size(max_frame_size);

        Self {
            id: Uuid::new_v4(),
            reader: Mutex::new(FramedRead::new(reader, codec())),
            writer: Mutex::new(FramedWrite::new(writer, codec())),
            closed: CancellationToken::new(),
            config,
        }
    }

    /// The id of this end, used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    fn mark_closed(&self) {
        if !self.closed.is_cancelled() {
            debug!("Stream channel {} closed", self.id);
            self.closed.cancel();
        }
    }
}

impl<S> StreamChannel<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a channel from a single bidirectional stream (socket, pipe).
    pub fn from_stream(stream: S, config: TransportConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, config)
    }
}

impl DuplexChannel {
    /// Create two connected ends over an in-process pipe.
    #[must_use]
    pub fn connect_pair(config: &TransportConfig) -> (Self, Self) {
        let (left, right) = tokio::io::duplex(DUPLEX_BUFFER);
        (
            Self::from_stream(left, config.clone()),
            Self::from_stream(right, config.clone()),
        )
    }
}

impl<R, W> Debug for StreamChannel<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("id", &self.id)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<R, W> Channel for StreamChannel<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        self.config.check_size(data.len())?;

        let mut writer = self.writer.lock().await;
        let result = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(TransportError::Closed),
            result = writer.send(Frame::message(data)) => result,
        };
        drop(writer);

        result.map_err(|e| {
            warn!("Stream channel {} write failed: {}", self.id, e);
            self.mark_closed();
            TransportError::Io(e)
        })
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.reader.lock().await;
        let next = tokio::select! {
            biased;
            next = reader.next() => next,
            () = self.closed.cancelled() => return Err(TransportError::Closed),
        };
        drop(reader);

        match next {
            Some(Ok(frame)) => match frame.frame_type {
                FrameType::Message => Ok(frame.payload),
                FrameType::Close => {
                    debug!("Stream channel {} peer sent close", self.id);
                    self.mark_closed();
                    Err(TransportError::Closed)
                }
            },
            Some(Err(e)) => {
                warn!("Stream channel {} read failed: {}", self.id, e);
                self.mark_closed();
                Err(TransportError::Io(e))
            }
            None => {
                debug!("Stream channel {} reached end of stream", self.id);
                self.mark_closed();
                Err(TransportError::Closed)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }

        // Abort in-flight sends first so the writer lock frees up
        self.mark_closed();

        let mut writer = self.writer.lock().await;
        let flushed = timeout(CLOSE_TIMEOUT, async {
            writer.send(Frame::close()).await?;
            writer.close().await
        })
        .await;

        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Stream channel {} close frame not sent: {}", self.id, e),
            Err(_) => debug!("Stream channel {} close frame timed out", self.id),
        }

        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
