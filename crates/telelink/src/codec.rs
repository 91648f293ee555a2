//! # Packet Codec
//!
//! Frames a telemetry record for the uplink.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Sequence Number (32, BE)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  CRC-32 of payload (32, BE)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             Payload: compact JSON, sorted keys ...            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The digest only detects corruption on the serial hop; it does not
//! authenticate the sender. The codec never splits a packet, chunking is a
//! transport concern.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{LinkError, Result};

/// Fixed header: sequence (4) + digest (4).
pub const HEADER_LEN: usize = 8;

/// A telemetry record: field name → scalar or nested value.
pub type Record = Map<String, Value>;

/// Convert any serializable value into a [`Record`].
///
/// Fails with [`LinkError::Encoding`] when the value does not serialize to a
/// JSON object (top-level scalars, maps with non-string keys, ...).
pub fn to_record<T: Serialize + ?Sized>(value: &T) -> Result<Record> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(LinkError::Encoding(format!(
            "expected a map of fields, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(LinkError::Encoding(e.to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}

/// CRC-32 (IEEE) over the serialized payload.
#[inline]
pub fn digest(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// An immutable, framed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    sequence: u32,
    digest: u32,
    bytes: Bytes,
}

impl Packet {
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn digest(&self) -> u32 {
        self.digest
    }

    /// Header + payload, ready for the wire.
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Errors from [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet too short: {0} bytes")]
    Truncated(usize),
    #[error("digest mismatch: header {expected:#010x}, payload {actual:#010x}")]
    DigestMismatch { expected: u32, actual: u32 },
    #[error("payload is not a telemetry record: {0}")]
    Payload(String),
}

/// A packet parsed back into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub sequence: u32,
    pub digest: u32,
    pub record: Record,
}

/// Serialize a record canonically: compact JSON with sorted keys.
///
/// `serde_json::Map` is ordered by key, so equal records always produce
/// identical bytes.
pub fn serialize_record(record: &Record) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| LinkError::Encoding(e.to_string()))
}

/// Parse a framed packet and verify its digest.
pub fn decode(mut buf: &[u8]) -> std::result::Result<DecodedPacket, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(buf.len()));
    }
    let sequence = buf.get_u32();
    let expected = buf.get_u32();
    let actual = digest(buf);
    if actual != expected {
        return Err(DecodeError::DigestMismatch { expected, actual });
    }
    let record: Record =
        serde_json::from_slice(buf).map_err(|e| DecodeError::Payload(e.to_string()))?;
    Ok(DecodedPacket {
        sequence,
        digest: expected,
        record,
    })
}

/// Packet builder owning the session's sequence counter.
///
/// Sequence numbers are handed out strictly increasing and are only consumed
/// when a packet is actually built.
pub struct PacketCodec {
    next: AtomicU32,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u32) -> Self {
        PacketCodec {
            next: AtomicU32::new(first),
        }
    }

    /// The sequence number the next packet will carry.
    pub fn peek_sequence(&self) -> u32 {
        self.next.load(Ordering::Acquire)
    }

    /// Frame `record` with the next sequence number.
    pub fn encode(&self, record: &Record) -> Result<Packet> {
        let payload = serialize_record(record)?;
        let sequence = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map_err(|_| LinkError::Encoding("sequence space exhausted".into()))?;
        let digest = digest(&payload);

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u32(sequence);
        buf.put_u32(digest);
        buf.put_slice(&payload);

        Ok(Packet {
            sequence,
            digest,
            bytes: buf.freeze(),
        })
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}
