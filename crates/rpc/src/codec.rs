//! CBOR wire encoding.
//!
//! The decoder refuses input nested deeper than its recursion limit, so
//! outgoing messages are checked against [`MAX_DEPTH`] before they are
//! queued. A message the peer could not decode would otherwise be dropped
//! with its request id, leaving the call unanswered.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{CodecError, Result};
use crate::message::Message;

/// Deepest nesting of arrays and maps allowed inside a payload value.
///
/// Well below the decoder's recursion limit of 256, leaving room for the
/// envelope around the payload.
pub const MAX_DEPTH: usize = 128;

/// Encode any serializable value as CBOR.
///
/// # Errors
///
/// Returns [`CodecError::SerializationFailed`] if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| CodecError::SerializationFailed(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Encode a wire message after checking that the peer can decode it.
///
/// # Errors
///
/// Returns [`CodecError::NestingTooDeep`] if a payload value nests deeper than
/// [`MAX_DEPTH`], or [`CodecError::SerializationFailed`] if encoding fails.
pub fn encode_message(message: &Message) -> Result<Bytes> {
    match message {
        Message::Request { args, .. } | Message::Notification { args, .. } => {
            args.iter().try_for_each(check_depth)?;
        }
        Message::Reply { value, .. } => check_depth(value)?,
        Message::ReplyErr { error, .. } => {
            if let Some(details) = &error.details {
                check_depth(details)?;
            }
        }
        Message::Cancel { .. } => {}
    }
    encode(message)
}

/// Decode CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DeserializationFailed`] if the data is not valid CBOR
/// of the expected shape.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let value = ciborium::de::from_reader(data)
        .map_err(|e| CodecError::DeserializationFailed(e.to_string()))?;
    Ok(value)
}

/// Reject values nested deeper than [`MAX_DEPTH`].
///
/// Walks with an explicit stack so arbitrarily deep input cannot overflow
/// the call stack.
fn check_depth(value: &Value) -> Result<()> {
    let mut stack = vec![(value, 1_usize)];

    while let Some((value, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            return Err(CodecError::NestingTooDeep { max: MAX_DEPTH }.into());
        }
        match value {
            Value::Array(items) => stack.extend(items.iter().map(|item| (item, depth + 1))),
            Value::Object(map) => stack.extend(map.values().map(|item| (item, depth + 1))),
            _ => {}
        }
    }

    Ok(())
}
