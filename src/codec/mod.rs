//! Wire codec for the archive control protocol.
//!
//! Every message is a fixed 8-byte little-endian envelope
//! `{block_length, template_id, schema_id, version}` followed by the
//! template's fixed block and then any variable-length fields (`u32` length
//! prefix + UTF-8 bytes). A fragment whose schema id does not match
//! [SCHEMA_ID] must be treated as fatal by the consumer.

mod request;
mod response;

pub use request::*;
pub use response::*;

use bytes::Buf;
use thiserror::Error;

/// Schema id of the archive control protocol.
pub const SCHEMA_ID: u16 = 101;

/// Version of the archive control protocol schema.
pub const SCHEMA_VERSION: u16 = 1;

/// Encoded length of the envelope preceding every message body.
pub const ENVELOPE_LENGTH: usize = 8;

/// Message template identifiers.
pub mod template_ids {
    pub const CONTROL_RESPONSE: u16 = 1;
    pub const CONNECT_REQUEST: u16 = 2;
    pub const CLOSE_SESSION_REQUEST: u16 = 3;
    pub const START_RECORDING_REQUEST: u16 = 4;
    pub const STOP_RECORDING_REQUEST: u16 = 5;
    pub const REPLAY_REQUEST: u16 = 6;
    pub const STOP_REPLAY_REQUEST: u16 = 7;
    pub const LIST_RECORDINGS_REQUEST: u16 = 8;
    pub const LIST_RECORDINGS_FOR_URI_REQUEST: u16 = 9;
    pub const LIST_RECORDING_REQUEST: u16 = 10;
    pub const EXTEND_RECORDING_REQUEST: u16 = 11;
    pub const RECORDING_POSITION_REQUEST: u16 = 12;
    pub const TRUNCATE_RECORDING_REQUEST: u16 = 13;
    pub const STOP_RECORDING_SUBSCRIPTION_REQUEST: u16 = 14;
    pub const STOP_POSITION_REQUEST: u16 = 15;
    pub const FIND_LAST_MATCHING_RECORDING_REQUEST: u16 = 16;
    pub const LIST_RECORDING_SUBSCRIPTIONS_REQUEST: u16 = 17;
    pub const BOUNDED_REPLAY_REQUEST: u16 = 18;
    pub const STOP_ALL_REPLAYS_REQUEST: u16 = 19;
    pub const RECORDING_DESCRIPTOR: u16 = 22;
    pub const RECORDING_SUBSCRIPTION_DESCRIPTOR: u16 = 23;
    pub const RECORDING_STARTED: u16 = 101;
    pub const RECORDING_PROGRESS: u16 = 102;
    pub const RECORDING_STOPPED: u16 = 103;
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encode buffer too small: needed {needed} capacity {capacity}")]
    InsufficientCapacity { needed: usize, capacity: usize },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message truncated: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("string field is not valid utf-8")]
    Utf8,
    #[error("unknown response code: {0}")]
    UnknownResponseCode(i32),
    #[error("unknown source location: {0}")]
    UnknownSourceLocation(i32),
    #[error("expected schema_id={expected}, actual={actual}")]
    SchemaMismatch { expected: u16, actual: u16 },
    #[error("expected template_id={expected}, actual={actual}")]
    TemplateMismatch { expected: u16, actual: u16 },
    #[error("expected block_length={expected}, actual={actual}")]
    BlockLengthMismatch { expected: u16, actual: u16 },
}

/// Code carried by a control response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    Error,
    RecordingUnknown,
    SubscriptionUnknown,
}

impl ResponseCode {
    pub fn from_i32(value: i32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(ResponseCode::Ok),
            1 => Ok(ResponseCode::Error),
            2 => Ok(ResponseCode::RecordingUnknown),
            3 => Ok(ResponseCode::SubscriptionUnknown),
            other => Err(DecodeError::UnknownResponseCode(other)),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::Error => 1,
            ResponseCode::RecordingUnknown => 2,
            ResponseCode::SubscriptionUnknown => 3,
        }
    }
}

/// Where the archive should record a publication from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLocation {
    /// Recorded from a local spy on the publication.
    Local,
    /// Recorded from the network at the receiving end.
    Remote,
}

impl SourceLocation {
    pub fn from_i32(value: i32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(SourceLocation::Local),
            1 => Ok(SourceLocation::Remote),
            other => Err(DecodeError::UnknownSourceLocation(other)),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            SourceLocation::Local => 0,
            SourceLocation::Remote => 1,
        }
    }
}

/// The envelope preceding every message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

impl Envelope {
    /// Split a whole message into its envelope and body.
    pub fn decode(message: &[u8]) -> Result<(Envelope, &[u8]), DecodeError> {
        if message.len() < ENVELOPE_LENGTH {
            return Err(DecodeError::UnexpectedEof {
                needed: ENVELOPE_LENGTH,
                remaining: message.len(),
            });
        }
        let (mut header, body) = message.split_at(ENVELOPE_LENGTH);
        let envelope = Envelope {
            block_length: header.get_u16_le(),
            template_id: header.get_u16_le(),
            schema_id: header.get_u16_le(),
            version: header.get_u16_le(),
        };
        Ok((envelope, body))
    }
}

/// Sequential little-endian writer over a caller-owned buffer.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(EncodeError::InsufficientCapacity {
                needed: end,
                capacity: self.buf.len(),
            });
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.put(&value.to_le_bytes())
    }

    pub fn put_i32(&mut self, value: i32) -> Result<(), EncodeError> {
        self.put(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), EncodeError> {
        self.put(&value.to_le_bytes())
    }

    pub fn put_i64(&mut self, value: i64) -> Result<(), EncodeError> {
        self.put(&value.to_le_bytes())
    }

    pub fn put_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.put_i32(if value { 1 } else { 0 })
    }

    /// Variable-length string: u32 length prefix + UTF-8 bytes.
    pub fn put_str(&mut self, value: &str) -> Result<(), EncodeError> {
        self.put_u32(value.len() as u32)?;
        self.put(value.as_bytes())
    }
}

/// Sequential little-endian reader over a message body.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < len {
            return Err(DecodeError::UnexpectedEof {
                needed: len,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn get_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(self.take(2)?.get_u16_le())
    }

    pub fn get_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.take(4)?.get_i32_le())
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(self.take(4)?.get_u32_le())
    }

    pub fn get_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.take(8)?.get_i64_le())
    }

    pub fn get_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.get_i32()? != 0)
    }

    pub fn get_str(&mut self) -> Result<&'a str, DecodeError> {
        let len = self.get_u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::Utf8)
    }
}

/// A message template with a fixed block followed by variable-length fields.
pub trait Message<'a>: Sized {
    const TEMPLATE_ID: u16;
    const BLOCK_LENGTH: u16;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError>;
    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError>;
}

/// Encode envelope + body into `buf`, returning the total message length.
pub fn encode_message<'a, M: Message<'a>>(
    buf: &mut [u8],
    message: &M,
) -> Result<usize, EncodeError> {
    let mut writer = Writer::new(buf);
    writer.put_u16(M::BLOCK_LENGTH)?;
    writer.put_u16(M::TEMPLATE_ID)?;
    writer.put_u16(SCHEMA_ID)?;
    writer.put_u16(SCHEMA_VERSION)?;
    message.encode_body(&mut writer)?;
    Ok(writer.position())
}

/// Decode a whole message, verifying envelope identity against `M`.
pub fn decode_message<'a, M: Message<'a>>(message: &'a [u8]) -> Result<M, DecodeError> {
    let (envelope, body) = Envelope::decode(message)?;
    if envelope.schema_id != SCHEMA_ID {
        return Err(DecodeError::SchemaMismatch {
            expected: SCHEMA_ID,
            actual: envelope.schema_id,
        });
    }
    if envelope.template_id != M::TEMPLATE_ID {
        return Err(DecodeError::TemplateMismatch {
            expected: M::TEMPLATE_ID,
            actual: envelope.template_id,
        });
    }
    if envelope.block_length != M::BLOCK_LENGTH {
        return Err(DecodeError::BlockLengthMismatch {
            expected: M::BLOCK_LENGTH,
            actual: envelope.block_length,
        });
    }
    M::decode_body(&mut Reader::new(body))
}

/// Decode only the body of a message whose envelope has been checked by the
/// caller.
pub fn decode_body<'a, M: Message<'a>>(body: &'a [u8]) -> Result<M, DecodeError> {
    M::decode_body(&mut Reader::new(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let mut buf = [0u8; 64];
        let mut writer = Writer::new(&mut buf);
        writer.put_u16(24).unwrap();
        writer.put_u16(template_ids::STOP_REPLAY_REQUEST).unwrap();
        writer.put_u16(SCHEMA_ID).unwrap();
        writer.put_u16(SCHEMA_VERSION).unwrap();

        let (envelope, body) = Envelope::decode(&buf).unwrap();
        assert_eq!(envelope.block_length, 24);
        assert_eq!(envelope.template_id, template_ids::STOP_REPLAY_REQUEST);
        assert_eq!(envelope.schema_id, SCHEMA_ID);
        assert_eq!(envelope.version, SCHEMA_VERSION);
        assert_eq!(body.len(), 64 - ENVELOPE_LENGTH);
    }

    #[test]
    fn envelope_rejects_short_input() {
        let err = Envelope::decode(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { needed: 8, remaining: 4 }));
    }

    #[test]
    fn writer_reports_exhaustion() {
        let mut buf = [0u8; 4];
        let mut writer = Writer::new(&mut buf);
        writer.put_i32(1).unwrap();
        let err = writer.put_i32(2).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::InsufficientCapacity { needed: 8, capacity: 4 }
        ));
    }

    #[test]
    fn string_fields_round_trip() {
        let mut buf = [0u8; 64];
        let mut writer = Writer::new(&mut buf);
        writer.put_str("aeron:udp?endpoint=host:0").unwrap();
        let len = writer.position();

        let mut reader = Reader::new(&buf[..len]);
        assert_eq!(reader.get_str().unwrap(), "aeron:udp?endpoint=host:0");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut buf = [0u8; 8];
        let mut writer = Writer::new(&mut buf);
        writer.put_u32(100).unwrap();
        let mut reader = Reader::new(&buf[..8]);
        assert!(matches!(
            reader.get_str().unwrap_err(),
            DecodeError::UnexpectedEof { .. }
        ));
    }

    #[test]
    fn response_code_rejects_unknown_values() {
        assert!(matches!(
            ResponseCode::from_i32(9),
            Err(DecodeError::UnknownResponseCode(9))
        ));
    }
}
