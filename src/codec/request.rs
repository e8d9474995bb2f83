//! Request message templates offered on the control request publication.
//!
//! Every request carries the control session id it belongs to and a
//! client-allocated correlation id echoed by the server, except
//! [ConnectRequest] (no session exists yet) and [CloseSessionRequest] (no
//! response is expected).

use super::{template_ids, DecodeError, EncodeError, Message, Reader, SourceLocation, Writer};

/// Open a control session, telling the archive where to publish responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest<'a> {
    pub correlation_id: i64,
    pub response_stream_id: i32,
    pub version: i32,
    pub response_channel: &'a str,
}

impl<'a> Message<'a> for ConnectRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::CONNECT_REQUEST;
    const BLOCK_LENGTH: u16 = 16;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.correlation_id)?;
        writer.put_i32(self.response_stream_id)?;
        writer.put_i32(self.version)?;
        writer.put_str(self.response_channel)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            correlation_id: reader.get_i64()?,
            response_stream_id: reader.get_i32()?,
            version: reader.get_i32()?,
            response_channel: reader.get_str()?,
        })
    }
}

/// Close a control session; sent best-effort, no response is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseSessionRequest {
    pub control_session_id: i64,
}

impl<'a> Message<'a> for CloseSessionRequest {
    const TEMPLATE_ID: u16 = template_ids::CLOSE_SESSION_REQUEST;
    const BLOCK_LENGTH: u16 = 8;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self { control_session_id: reader.get_i64()? })
    }
}

/// Start recording streams for a channel and stream id pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRecordingRequest<'a> {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub stream_id: i32,
    pub source_location: SourceLocation,
    pub channel: &'a str,
}

impl<'a> Message<'a> for StartRecordingRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::START_RECORDING_REQUEST;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i32(self.stream_id)?;
        writer.put_i32(self.source_location.as_i32())?;
        writer.put_str(self.channel)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            stream_id: reader.get_i32()?,
            source_location: SourceLocation::from_i32(reader.get_i32()?)?,
            channel: reader.get_str()?,
        })
    }
}

/// Stop an active recording by channel and stream id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRecordingRequest<'a> {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub stream_id: i32,
    pub channel: &'a str,
}

impl<'a> Message<'a> for StopRecordingRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::STOP_RECORDING_REQUEST;
    const BLOCK_LENGTH: u16 = 20;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i32(self.stream_id)?;
        writer.put_str(self.channel)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            stream_id: reader.get_i32()?,
            channel: reader.get_str()?,
        })
    }
}

/// Stop an active recording by the subscription id it was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRecordingSubscriptionRequest {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub subscription_id: i64,
}

impl<'a> Message<'a> for StopRecordingSubscriptionRequest {
    const TEMPLATE_ID: u16 = template_ids::STOP_RECORDING_SUBSCRIPTION_REQUEST;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.subscription_id)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            subscription_id: reader.get_i64()?,
        })
    }
}

/// Replay a recording from a position to a caller-specified channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRequest<'a> {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
    pub position: i64,
    pub length: i64,
    pub replay_stream_id: i32,
    pub replay_channel: &'a str,
}

impl<'a> Message<'a> for ReplayRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::REPLAY_REQUEST;
    const BLOCK_LENGTH: u16 = 44;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)?;
        writer.put_i64(self.position)?;
        writer.put_i64(self.length)?;
        writer.put_i32(self.replay_stream_id)?;
        writer.put_str(self.replay_channel)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
            position: reader.get_i64()?,
            length: reader.get_i64()?,
            replay_stream_id: reader.get_i32()?,
            replay_channel: reader.get_str()?,
        })
    }
}

/// Replay bounded by a counter containing the position limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedReplayRequest<'a> {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
    pub position: i64,
    pub length: i64,
    pub limit_counter_id: i32,
    pub replay_stream_id: i32,
    pub replay_channel: &'a str,
}

impl<'a> Message<'a> for BoundedReplayRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::BOUNDED_REPLAY_REQUEST;
    const BLOCK_LENGTH: u16 = 48;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)?;
        writer.put_i64(self.position)?;
        writer.put_i64(self.length)?;
        writer.put_i32(self.limit_counter_id)?;
        writer.put_i32(self.replay_stream_id)?;
        writer.put_str(self.replay_channel)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
            position: reader.get_i64()?,
            length: reader.get_i64()?,
            limit_counter_id: reader.get_i32()?,
            replay_stream_id: reader.get_i32()?,
            replay_channel: reader.get_str()?,
        })
    }
}

/// Stop an existing replay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReplayRequest {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub replay_session_id: i64,
}

impl<'a> Message<'a> for StopReplayRequest {
    const TEMPLATE_ID: u16 = template_ids::STOP_REPLAY_REQUEST;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.replay_session_id)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            replay_session_id: reader.get_i64()?,
        })
    }
}

/// Stop all replays for a recording, or every replay when the recording id
/// is the null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopAllReplaysRequest {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
}

impl<'a> Message<'a> for StopAllReplaysRequest {
    const TEMPLATE_ID: u16 = template_ids::STOP_ALL_REPLAYS_REQUEST;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
        })
    }
}

/// List a range of recording descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRecordingsRequest {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub from_recording_id: i64,
    pub record_count: i32,
}

impl<'a> Message<'a> for ListRecordingsRequest {
    const TEMPLATE_ID: u16 = template_ids::LIST_RECORDINGS_REQUEST;
    const BLOCK_LENGTH: u16 = 28;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.from_recording_id)?;
        writer.put_i32(self.record_count)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            from_recording_id: reader.get_i64()?,
            record_count: reader.get_i32()?,
        })
    }
}

/// List recording descriptors matching a channel fragment and stream id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRecordingsForUriRequest<'a> {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub from_recording_id: i64,
    pub record_count: i32,
    pub stream_id: i32,
    pub channel_fragment: &'a str,
}

impl<'a> Message<'a> for ListRecordingsForUriRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::LIST_RECORDINGS_FOR_URI_REQUEST;
    const BLOCK_LENGTH: u16 = 32;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.from_recording_id)?;
        writer.put_i32(self.record_count)?;
        writer.put_i32(self.stream_id)?;
        writer.put_str(self.channel_fragment)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            from_recording_id: reader.get_i64()?,
            record_count: reader.get_i32()?,
            stream_id: reader.get_i32()?,
            channel_fragment: reader.get_str()?,
        })
    }
}

/// List the descriptor for a single recording id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRecordingRequest {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
}

impl<'a> Message<'a> for ListRecordingRequest {
    const TEMPLATE_ID: u16 = template_ids::LIST_RECORDING_REQUEST;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
        })
    }
}

/// List active recording subscriptions registered with the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRecordingSubscriptionsRequest<'a> {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub pseudo_index: i32,
    pub subscription_count: i32,
    pub apply_stream_id: bool,
    pub stream_id: i32,
    pub channel_fragment: &'a str,
}

impl<'a> Message<'a> for ListRecordingSubscriptionsRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::LIST_RECORDING_SUBSCRIPTIONS_REQUEST;
    const BLOCK_LENGTH: u16 = 32;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i32(self.pseudo_index)?;
        writer.put_i32(self.subscription_count)?;
        writer.put_bool(self.apply_stream_id)?;
        writer.put_i32(self.stream_id)?;
        writer.put_str(self.channel_fragment)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            pseudo_index: reader.get_i32()?,
            subscription_count: reader.get_i32()?,
            apply_stream_id: reader.get_bool()?,
            stream_id: reader.get_i32()?,
            channel_fragment: reader.get_str()?,
        })
    }
}

/// Extend an existing, non-active recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendRecordingRequest<'a> {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
    pub stream_id: i32,
    pub source_location: SourceLocation,
    pub channel: &'a str,
}

impl<'a> Message<'a> for ExtendRecordingRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::EXTEND_RECORDING_REQUEST;
    const BLOCK_LENGTH: u16 = 32;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)?;
        writer.put_i32(self.stream_id)?;
        writer.put_i32(self.source_location.as_i32())?;
        writer.put_str(self.channel)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
            stream_id: reader.get_i32()?,
            source_location: SourceLocation::from_i32(reader.get_i32()?)?,
            channel: reader.get_str()?,
        })
    }
}

/// Position recorded so far for an active recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingPositionRequest {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
}

impl<'a> Message<'a> for RecordingPositionRequest {
    const TEMPLATE_ID: u16 = template_ids::RECORDING_POSITION_REQUEST;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
        })
    }
}

/// Stop position of a recording, null while still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPositionRequest {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
}

impl<'a> Message<'a> for StopPositionRequest {
    const TEMPLATE_ID: u16 = template_ids::STOP_POSITION_REQUEST;
    const BLOCK_LENGTH: u16 = 24;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
        })
    }
}

/// Truncate a stopped recording to a position on a fragment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncateRecordingRequest {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub recording_id: i64,
    pub position: i64,
}

impl<'a> Message<'a> for TruncateRecordingRequest {
    const TEMPLATE_ID: u16 = template_ids::TRUNCATE_RECORDING_REQUEST;
    const BLOCK_LENGTH: u16 = 32;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.recording_id)?;
        writer.put_i64(self.position)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            recording_id: reader.get_i64()?,
            position: reader.get_i64()?,
        })
    }
}

/// Find the newest recording matching channel fragment, stream and session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindLastMatchingRecordingRequest<'a> {
    pub control_session_id: i64,
    pub correlation_id: i64,
    pub min_recording_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub channel_fragment: &'a str,
}

impl<'a> Message<'a> for FindLastMatchingRecordingRequest<'a> {
    const TEMPLATE_ID: u16 = template_ids::FIND_LAST_MATCHING_RECORDING_REQUEST;
    const BLOCK_LENGTH: u16 = 32;

    fn encode_body(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.put_i64(self.control_session_id)?;
        writer.put_i64(self.correlation_id)?;
        writer.put_i64(self.min_recording_id)?;
        writer.put_i32(self.session_id)?;
        writer.put_i32(self.stream_id)?;
        writer.put_str(self.channel_fragment)
    }

    fn decode_body(reader: &mut Reader<'a>) -> Result<Self, DecodeError> {
        Ok(Self {
            control_session_id: reader.get_i64()?,
            correlation_id: reader.get_i64()?,
            min_recording_id: reader.get_i64()?,
            session_id: reader.get_i32()?,
            stream_id: reader.get_i32()?,
            channel_fragment: reader.get_str()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_message, encode_message, Envelope, SCHEMA_ID};

    #[test]
    fn connect_request_round_trips() {
        let request = ConnectRequest {
            correlation_id: 42,
            response_stream_id: 20,
            version: crate::config::CLIENT_SEMANTIC_VERSION,
            response_channel: "aeron:udp?endpoint=localhost:8020",
        };
        let mut buf = [0u8; 256];
        let length = encode_message(&mut buf, &request).unwrap();
        assert_eq!(decode_message::<ConnectRequest>(&buf[..length]).unwrap(), request);
    }

    #[test]
    fn replay_request_round_trips() {
        let request = ReplayRequest {
            control_session_id: 7,
            correlation_id: 11,
            recording_id: 5,
            position: 0,
            length: i64::MAX,
            replay_stream_id: 1001,
            replay_channel: "aeron:udp?endpoint=localhost:0",
        };
        let mut buf = [0u8; 256];
        let length = encode_message(&mut buf, &request).unwrap();
        assert_eq!(decode_message::<ReplayRequest>(&buf[..length]).unwrap(), request);
    }

    #[test]
    fn list_recording_subscriptions_round_trips_flags() {
        let request = ListRecordingSubscriptionsRequest {
            control_session_id: 7,
            correlation_id: 12,
            pseudo_index: 0,
            subscription_count: 10,
            apply_stream_id: true,
            stream_id: 1001,
            channel_fragment: "endpoint=host",
        };
        let mut buf = [0u8; 256];
        let length = encode_message(&mut buf, &request).unwrap();
        let decoded = decode_message::<ListRecordingSubscriptionsRequest>(&buf[..length]).unwrap();
        assert!(decoded.apply_stream_id);
        assert_eq!(decoded, request);
    }

    #[test]
    fn envelope_carries_template_identity() {
        let request = StopAllReplaysRequest {
            control_session_id: 7,
            correlation_id: 13,
            recording_id: crate::NULL_VALUE,
        };
        let mut buf = [0u8; 64];
        let length = encode_message(&mut buf, &request).unwrap();
        let (envelope, _) = Envelope::decode(&buf[..length]).unwrap();
        assert_eq!(envelope.template_id, template_ids::STOP_ALL_REPLAYS_REQUEST);
        assert_eq!(envelope.block_length, StopAllReplaysRequest::BLOCK_LENGTH);
        assert_eq!(envelope.schema_id, SCHEMA_ID);
    }
}
