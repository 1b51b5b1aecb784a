//! Message framing for byte-stream channels.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use exthost_transport::TransportError;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (10MB by default).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Frame header size (4 bytes length + 1 byte type + 4 bytes checksum).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Type of frame being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// One RPC message.
    Message = 0x01,
    /// The sender is closing the channel.
    Close = 0x06,
}

impl TryFrom<u8> for FrameType {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, TransportError> {
        match value {
            0x01 => Ok(Self::Message),
            0x06 => Ok(Self::Close),
            _ => Err(TransportError::InvalidFrame(format!(
                "Unknown frame type: {value:#x}"
            ))),
        }
    }
}

/// A frame on the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Type of this frame.
    pub frame_type: FrameType,
    /// Frame payload.
    pub payload: Bytes,
    /// CRC32 of the payload.
    pub checksum: u32,
}

impl Frame {
    /// Create a message frame.
    #[must_use]
    pub fn message(payload: Bytes) -> Self {
        Self::new(FrameType::Message, payload)
    }

    /// Create a close frame.
    #[must_use]
    pub fn close() -> Self {
        Self::new(FrameType::Close, Bytes::new())
    }

    /// Create a new frame.
    #[must_use]
    pub fn new(frame_type: FrameType, payload: Bytes) -> Self {
        let checksum = crc32fast::hash(&payload);
        Self {
            frame_type,
            payload,
            checksum,
        }
    }

    /// Verify the payload checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the checksum does not match.
    pub fn verify_checksum(&self) -> Result<(), TransportError> {
        let actual = crc32fast::hash(&self.payload);
        if self.checksum != actual {
            return Err(TransportError::InvalidFrame(format!(
                "Checksum mismatch: expected {:08x}, got {actual:08x}",
                self.checksum
            )));
        }
        Ok(())
    }
}

/// Codec for encoding/decoding frames.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    fn too_large(&self, size: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            TransportError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            },
        )
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least header size
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        let mut header = &buf[..FRAME_HEADER_SIZE];
        let payload_len = header.get_u32() as usize;
        let frame_type_byte = header.get_u8();
        let checksum = header.get_u32();

        if payload_len > self.max_frame_size {
            return Err(self.too_large(payload_len));
        }

        let frame_len = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        let frame_type = FrameType::try_from(frame_type_byte)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        let frame = Frame {
            frame_type,
            payload,
            checksum,
        };
        frame
            .verify_checksum()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = frame.payload.len();
        if payload_len > self.max_frame_size {
            return Err(self.too_large(payload_len));
        }

        buf.reserve(FRAME_HEADER_SIZE + payload_len);

        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32(payload_len as u32);
        buf.put_u8(frame.frame_type as u8);
        buf.put_u32(frame.checksum);
        buf.put(frame.payload);

        Ok(())
    }
}
