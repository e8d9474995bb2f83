//! Response and event message templates received from the archive.

use super::{template_ids, DecodeError, EncodeError, Message, Reader, ResponseCode, Writer};

/// Acknowledgement for a control request.
///
/// `relevant_id` carries the operation result on OK (e.g. a subscription id
/// or replay session id) and the archive error code on ERROR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub relevant_id: i64,
    pub code: ResponseCode,
    pub error_message: String,
}

impl<'a> Message<'a> for ControlResponse {
    const TEMPLATE_ID: u16 = template_ids::CONTROL_RESPONSE;
    const BLOCK_LENGTH: u16 = 28;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.relevant_id)?;
        writer.put_i32(self.code.as_i32())?;
        writer.put_str(&self.error_message)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            relevant_id: reader.get_i64()?,
            code: ResponseCode::from_i32(reader.get_i32()?)?,
            error_message: reader.get_str()?.to_string(),
        })
    }
}

/// Descriptor of a stored recording, streamed in reply to a listing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingDescriptor {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
    pub start_timestamp: i64,
    pub stop_timestamp: i64,
    pub start_position: i64,
    pub stop_position: i64,
    pub initial_term_id: i32,
    pub segment_file_length: i32,
    pub term_buffer_length: i32,
    pub mtu_length: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub stripped_channel: String,
    pub original_channel: String,
    pub source_identity: String,
}

impl<'a> Message<'a> for RecordingDescriptor {
    const TEMPLATE_ID: u16 = template_ids::RECORDING_DESCRIPTOR;
    const BLOCK_LENGTH: u16 = 80;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)?;
        writer.put_i64(self.start_timestamp)?;
        writer.put_i64(self.stop_timestamp)?;
        writer.put_i64(self.start_position)?;
        writer.put_i64(self.stop_position)?;
        writer.put_i32(self.initial_term_id)?;
        writer.put_i32(self.segment_file_length)?;
        writer.put_i32(self.term_buffer_length)?;
        writer.put_i32(self.mtu_length)?;
        writer.put_i32(self.session_id)?;
        writer.put_i32(self.stream_id)?;
        writer.put_str(&self.stripped_channel)?;
        writer.put_str(&self.original_channel)?;
        writer.put_str(&self.source_identity)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
            start_timestamp: reader.get_i64()?,
            stop_timestamp: reader.get_i64()?,
            start_position: reader.get_i64()?,
            stop_position: reader.get_i64()?,
            initial_term_id: reader.get_i32()?,
            segment_file_length: reader.get_i32()?,
            term_buffer_length: reader.get_i32()?,
            mtu_length: reader.get_i32()?,
            session_id: reader.get_i32()?,
            stream_id: reader.get_i32()?,
            stripped_channel: reader.get_str()?.to_string(),
            original_channel: reader.get_str()?.to_string(),
            source_identity: reader.get_str()?.to_string(),
        })
    }
}

/// Descriptor of an active recording subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSubscriptionDescriptor {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub subscription_id: i64,
    pub stream_id: i32,
    pub stripped_channel: String,
}

impl<'a> Message<'a> for RecordingSubscriptionDescriptor {
    const TEMPLATE_ID: u16 = template_ids::RECORDING_SUBSCRIPTION_DESCRIPTOR;
    const BLOCK_LENGTH: u16 = 28;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.subscription_id)?;
        writer.put_i32(self.stream_id)?;
        writer.put_str(&self.stripped_channel)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            subscription_id: reader.get_i64()?,
            stream_id: reader.get_i32()?,
            stripped_channel: reader.get_str()?.to_string(),
        })
    }
}

/// Event published when a recording starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingStarted {
    pub recording_id: i64,
    pub start_position: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub channel: String,
    pub source_identity: String,
}

impl<'a> Message<'a> for RecordingStarted {
    const TEMPLATE_ID: u16 = template_ids::RECORDING_STARTED;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.recording_id)?;
        writer.put_i64(self.start_position)?;
        writer.put_i32(self.session_id)?;
        writer.put_i32(self.stream_id)?;
        writer.put_str(&self.channel)?;
        writer.put_str(&self.source_identity)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            recording_id: reader.get_i64()?,
            start_position: reader.get_i64()?,
            session_id: reader.get_i32()?,
            stream_id: reader.get_i32()?,
            channel: reader.get_str()?.to_string(),
            source_identity: reader.get_str()?.to_string(),
        })
    }
}

/// Progress indication for an active recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingProgress {
    pub recording_id: i64,
    pub start_position: i64,
    pub position: i64,
}

impl<'a> Message<'a> for RecordingProgress {
    const TEMPLATE_ID: u16 = template_ids::RECORDING_PROGRESS;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.recording_id)?;
        writer.put_i64(self.start_position)?;
        writer.put_i64(self.position)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            recording_id: reader.get_i64()?,
            start_position: reader.get_i64()?,
            position: reader.get_i64()?,
        })
    }
}

/// Event published when a recording stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingStopped {
    pub recording_id: i64,
    pub start_position: i64,
    pub stop_position: i64,
}

impl<'a> Message<'a> for RecordingStopped {
    const TEMPLATE_ID: u16 = template_ids::RECORDING_STOPPED;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.recording_id)?;
        writer.put_i64(self.start_position)?;
        writer.put_i64(self.stop_position)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            recording_id: reader.get_i64()?,
            start_position: reader.get_i64()?,
            stop_position: reader.get_i64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_message, encode_message};

    #[test]
    fn control_response_round_trips() {
        let response = ControlResponse {
            control_session_id: 7,
            correlation_id: 42,
            relevant_id: 0,
            code: ResponseCode::Ok,
            error_message: String::new(),
        };
        let mut buf = [0u8; 256];
        let length = encode_message(&mut buf, &response).unwrap();
        assert_eq!(decode_message::<ControlResponse>(&buf[..length]).unwrap(), response);
    }

    #[test]
    fn error_response_carries_message() {
        let response = ControlResponse {
            control_session_id: 7,
            correlation_id: 9,
            relevant_id: 5,
            code: ResponseCode::Error,
            error_message: "boom".to_string(),
        };
        let mut buf = [0u8; 256];
        let length = encode_message(&mut buf, &response).unwrap();
        let decoded = decode_message::<ControlResponse>(&buf[..length]).unwrap();
        assert_eq!(decoded.code, ResponseCode::Error);
        assert_eq!(decoded.error_message, "boom");
        assert_eq!(decoded.relevant_id, 5);
    }

    #[test]
    fn recording_descriptor_round_trips_all_fields() {
        let descriptor = RecordingDescriptor {
            control_session_id: 7,
            correlation_id: 20,
            recording_id: 99,
            start_timestamp: 1_000,
            stop_timestamp: crate::NULL_TIMESTAMP,
            start_position: 0,
            stop_position: crate::NULL_POSITION,
            initial_term_id: 12,
            segment_file_length: 128 * 1024 * 1024,
            term_buffer_length: 64 * 1024,
            mtu_length: 1408,
            session_id: -338,
            stream_id: 1001,
            stripped_channel: "aeron:udp?endpoint=x:40001".to_string(),
            original_channel: "aeron:udp?endpoint=x:40001|alias=live".to_string(),
            source_identity: "127.0.0.1:40001".to_string(),
        };
        let mut buf = [0u8; 512];
        let length = encode_message(&mut buf, &descriptor).unwrap();
        assert_eq!(
            decode_message::<RecordingDescriptor>(&buf[..length]).unwrap(),
            descriptor
        );
    }
}
