//! Binary framing for the live connection.
//!
//! A frame is `[ASCII type tag][0x00][bincode payload]`. The tag is
//! self-terminating, so the payload may contain zero bytes of its own; the
//! decoder stops at the first zero and never looks inside the payload for
//! framing.

use crate::protocol::{Message, MessageType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// How far the decoder looks for the tag terminator. Also the number of
/// leading bytes kept in [`CodecError::UnknownMessageType`] for diagnostics.
pub const MAX_TAG_SCAN: usize = 20;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message tag {0:?} cannot be written as a zero-terminated ASCII prefix")]
    Encoding(String),

    #[error("failed to serialize {kind} payload: {source}")]
    PayloadEncode {
        kind: MessageType,
        #[source]
        source: bincode::Error,
    },

    #[error("unknown message type, leading bytes {prefix:?}")]
    UnknownMessageType { prefix: Vec<u8> },

    #[error("failed to decode {kind} payload ({} bytes): {source}", .bytes.len())]
    PayloadDecode {
        kind: MessageType,
        bytes: Vec<u8>,
        #[source]
        source: bincode::Error,
    },
}

/// Writes `tag`, a zero terminator and the serialized payload.
///
/// Fails with [`CodecError::Encoding`] when the tag is empty, not ASCII,
/// contains a zero byte, or is too long for the decoder's bounded scan.
pub fn encode_tagged<P: Serialize>(
    kind: MessageType,
    tag: &str,
    payload: &P,
) -> Result<Vec<u8>, CodecError> {
    let representable = !tag.is_empty()
        && tag.len() < MAX_TAG_SCAN
        && tag.bytes().all(|b| b.is_ascii() && b != 0);
    if !representable {
        return Err(CodecError::Encoding(tag.to_string()));
    }

    let body = bincode::serialize(payload)
        .map_err(|source| CodecError::PayloadEncode { kind, source })?;

    let mut frame = Vec::with_capacity(tag.len() + 1 + body.len());
    frame.extend_from_slice(tag.as_bytes());
    frame.push(0);
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn encode<P: Serialize>(kind: MessageType, payload: &P) -> Result<Vec<u8>, CodecError> {
    encode_tagged(kind, kind.tag(), payload)
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, CodecError> {
    match message {
        Message::PositionUpdate(update) => encode(MessageType::PositionUpdate, update),
        Message::PositionPulse(batch) => encode(MessageType::PositionPulse, batch),
        Message::ChatMessage(chat) => encode(MessageType::ChatMessage, chat),
        Message::PlayerAttack(attack) => encode(MessageType::PlayerAttack, attack),
        Message::LatencyPing(ping) => encode(MessageType::LatencyPing, ping),
    }
}

/// Splits a frame into its message kind and the untouched payload bytes.
pub fn decode_frame(bytes: &[u8]) -> Result<(MessageType, &[u8]), CodecError> {
    let window = &bytes[..bytes.len().min(MAX_TAG_SCAN)];
    let unknown = || CodecError::UnknownMessageType {
        prefix: window.to_vec(),
    };

    let terminator = window.iter().position(|&b| b == 0).ok_or_else(unknown)?;
    let kind = MessageType::from_tag(&bytes[..terminator]).ok_or_else(unknown)?;
    Ok((kind, &bytes[terminator + 1..]))
}

/// Deserializes a payload as the caller-chosen type. On failure the error
/// carries the attempted kind and the raw bytes.
pub fn decode_payload<P: DeserializeOwned>(
    kind: MessageType,
    body: &[u8],
) -> Result<P, CodecError> {
    bincode::deserialize(body).map_err(|source| CodecError::PayloadDecode {
        kind,
        bytes: body.to_vec(),
        source,
    })
}

/// Decodes a frame into its typed variant.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let (kind, body) = decode_frame(bytes)?;
    let message = match kind {
        MessageType::PositionUpdate => Message::PositionUpdate(decode_payload(kind, body)?),
        MessageType::PositionPulse => Message::PositionPulse(decode_payload(kind, body)?),
        MessageType::ChatMessage => Message::ChatMessage(decode_payload(kind, body)?),
        MessageType::PlayerAttack => Message::PlayerAttack(decode_payload(kind, body)?),
        MessageType::LatencyPing => Message::LatencyPing(decode_payload(kind, body)?),
    };
    Ok(message)
}
