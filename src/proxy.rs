//! Proxy encoding typed requests and offering them on the control request
//! publication.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::{
    encode_message, BoundedReplayRequest, CloseSessionRequest, ConnectRequest,
    ExtendRecordingRequest, FindLastMatchingRecordingRequest, ListRecordingRequest,
    ListRecordingSubscriptionsRequest, ListRecordingsForUriRequest, ListRecordingsRequest,
    Message, RecordingPositionRequest, ReplayRequest, SourceLocation, StartRecordingRequest,
    StopAllReplaysRequest, StopPositionRequest, StopRecordingRequest,
    StopRecordingSubscriptionRequest, StopReplayRequest, TruncateRecordingRequest,
};
use crate::config::CLIENT_SEMANTIC_VERSION;
use crate::error::ArchiveError;
use crate::transport::{Offer, Publication, TransportClient, YieldingIdle};
use crate::Result;

/// Attempts made by the plain offer before giving up on a non-fatal result.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Alignment of the request encoding buffer.
const SCRATCH_BUFFER_ALIGNMENT: usize = 16;

/// Size of the request encoding buffer. Large enough for every fixed block
/// plus a long channel URI.
const SCRATCH_BUFFER_LENGTH: usize = 1024;

/// Fixed-size, aligned scratch for request encoding; never reallocated.
#[repr(align(16))]
struct ScratchBuffer([u8; SCRATCH_BUFFER_LENGTH]);

impl ScratchBuffer {
    fn new() -> Self {
        debug_assert_eq!(std::mem::align_of::<Self>(), SCRATCH_BUFFER_ALIGNMENT);
        Self([0u8; SCRATCH_BUFFER_LENGTH])
    }
}

/// Encodes control requests and offers them on the request publication.
///
/// Requests are encoded into a single owned scratch buffer and written
/// atomically as one transport message, so a proxy must not be shared
/// between threads without external serialisation (the archive client's
/// session mutex provides it).
pub struct ArchiveProxy {
    publication: Arc<dyn Publication>,
    scratch: ScratchBuffer,
    connect_timeout: Duration,
    retry_attempts: u32,
    idle: YieldingIdle,
}

impl ArchiveProxy {
    pub fn new(publication: Arc<dyn Publication>, connect_timeout: Duration) -> Self {
        Self::with_retry_attempts(publication, connect_timeout, DEFAULT_RETRY_ATTEMPTS)
    }

    pub fn with_retry_attempts(
        publication: Arc<dyn Publication>,
        connect_timeout: Duration,
        retry_attempts: u32,
    ) -> Self {
        Self {
            publication,
            scratch: ScratchBuffer::new(),
            connect_timeout,
            retry_attempts: retry_attempts.max(1),
            idle: YieldingIdle,
        }
    }

    pub fn publication(&self) -> &Arc<dyn Publication> {
        &self.publication
    }

    /// Connect to an archive, retrying until the connect timeout.
    pub fn connect(
        &mut self,
        response_channel: &str,
        response_stream_id: i32,
        correlation_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&ConnectRequest {
            correlation_id,
            response_stream_id,
            version: CLIENT_SEMANTIC_VERSION,
            response_channel,
        })?;
        self.offer_with_timeout(length, None)
    }

    /// Single connect attempt; the caller drives retries.
    pub fn try_connect(
        &mut self,
        response_channel: &str,
        response_stream_id: i32,
        correlation_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&ConnectRequest {
            correlation_id,
            response_stream_id,
            version: CLIENT_SEMANTIC_VERSION,
            response_channel,
        })?;
        Ok(self.publication.offer(&self.scratch.0[..length]).is_accepted())
    }

    /// Connect, invoking the transport client's conductor between attempts.
    pub fn connect_with_invoker(
        &mut self,
        response_channel: &str,
        response_stream_id: i32,
        correlation_id: i64,
        client: &dyn TransportClient,
    ) -> Result<bool> {
        let length = self.encode(&ConnectRequest {
            correlation_id,
            response_stream_id,
            version: CLIENT_SEMANTIC_VERSION,
            response_channel,
        })?;
        self.offer_with_timeout(length, Some(client))
    }

    /// Close a control session; best-effort, no response follows.
    pub fn close_session(&mut self, control_session_id: i64) -> Result<bool> {
        let length = self.encode(&CloseSessionRequest { control_session_id })?;
        self.offer(length)
    }

    pub fn start_recording(
        &mut self,
        channel: &str,
        stream_id: i32,
        source_location: SourceLocation,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&StartRecordingRequest {
            control_session_id,
            correlation_id,
            stream_id,
            source_location,
            channel,
        })?;
        self.offer(length)
    }

    pub fn stop_recording(
        &mut self,
        channel: &str,
        stream_id: i32,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&StopRecordingRequest {
            control_session_id,
            correlation_id,
            stream_id,
            channel,
        })?;
        self.offer(length)
    }

    pub fn stop_recording_subscription(
        &mut self,
        subscription_id: i64,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&StopRecordingSubscriptionRequest {
            control_session_id,
            correlation_id,
            subscription_id,
        })?;
        self.offer(length)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn replay(
        &mut self,
        recording_id: i64,
        position: i64,
        length: i64,
        replay_channel: &str,
        replay_stream_id: i32,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let encoded = self.encode(&ReplayRequest {
            control_session_id,
            correlation_id,
            recording_id,
            position,
            length,
            replay_stream_id,
            replay_channel,
        })?;
        self.offer(encoded)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn bounded_replay(
        &mut self,
        recording_id: i64,
        position: i64,
        length: i64,
        limit_counter_id: i32,
        replay_channel: &str,
        replay_stream_id: i32,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let encoded = self.encode(&BoundedReplayRequest {
            control_session_id,
            correlation_id,
            recording_id,
            position,
            length,
            limit_counter_id,
            replay_stream_id,
            replay_channel,
        })?;
        self.offer(encoded)
    }

    pub fn stop_replay(
        &mut self,
        replay_session_id: i64,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&StopReplayRequest {
            control_session_id,
            correlation_id,
            replay_session_id,
        })?;
        self.offer(length)
    }

    /// Stop replays for a recording id, or all replays when it is the null
    /// value.
    pub fn stop_all_replays(
        &mut self,
        recording_id: i64,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&StopAllReplaysRequest {
            control_session_id,
            correlation_id,
            recording_id,
        })?;
        self.offer(length)
    }

    pub fn list_recordings(
        &mut self,
        from_recording_id: i64,
        record_count: i32,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&ListRecordingsRequest {
            control_session_id,
            correlation_id,
            from_recording_id,
            record_count,
        })?;
        self.offer(length)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn list_recordings_for_uri(
        &mut self,
        from_recording_id: i64,
        record_count: i32,
        channel_fragment: &str,
        stream_id: i32,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&ListRecordingsForUriRequest {
            control_session_id,
            correlation_id,
            from_recording_id,
            record_count,
            stream_id,
            channel_fragment,
        })?;
        self.offer(length)
    }

    pub fn list_recording(
        &mut self,
        recording_id: i64,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&ListRecordingRequest {
            control_session_id,
            correlation_id,
            recording_id,
        })?;
        self.offer(length)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn list_recording_subscriptions(
        &mut self,
        pseudo_index: i32,
        subscription_count: i32,
        channel_fragment: &str,
        stream_id: i32,
        apply_stream_id: bool,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&ListRecordingSubscriptionsRequest {
            control_session_id,
            correlation_id,
            pseudo_index,
            subscription_count,
            apply_stream_id,
            stream_id,
            channel_fragment,
        })?;
        self.offer(length)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn extend_recording(
        &mut self,
        channel: &str,
        stream_id: i32,
        source_location: SourceLocation,
        recording_id: i64,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&ExtendRecordingRequest {
            control_session_id,
            correlation_id,
            recording_id,
            stream_id,
            source_location,
            channel,
        })?;
        self.offer(length)
    }

    pub fn get_recording_position(
        &mut self,
        recording_id: i64,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&RecordingPositionRequest {
            control_session_id,
            correlation_id,
            recording_id,
        })?;
        self.offer(length)
    }

    pub fn get_stop_position(
        &mut self,
        recording_id: i64,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&StopPositionRequest {
            control_session_id,
            correlation_id,
            recording_id,
        })?;
        self.offer(length)
    }

    pub fn truncate_recording(
        &mut self,
        recording_id: i64,
        position: i64,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&TruncateRecordingRequest {
            control_session_id,
            correlation_id,
            recording_id,
            position,
        })?;
        self.offer(length)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn find_last_matching_recording(
        &mut self,
        min_recording_id: i64,
        channel_fragment: &str,
        stream_id: i32,
        session_id: i32,
        correlation_id: i64,
        control_session_id: i64,
    ) -> Result<bool> {
        let length = self.encode(&FindLastMatchingRecordingRequest {
            control_session_id,
            correlation_id,
            min_recording_id,
            session_id,
            stream_id,
            channel_fragment,
        })?;
        self.offer(length)
    }

    fn encode<'a, M: Message<'a>>(&mut self, message: &M) -> Result<usize> {
        Ok(encode_message(&mut self.scratch.0, message)?)
    }

    /// Offer with a bounded retry budget for non-fatal results.
    fn offer(&mut self, length: usize) -> Result<bool> {
        let mut remaining_attempts = self.retry_attempts;
        loop {
            match self.publication.offer(&self.scratch.0[..length]) {
                Offer::Position(_) => return Ok(true),
                Offer::Closed => return Err(ArchiveError::PublicationClosed),
                Offer::MaxPositionExceeded => return Err(ArchiveError::MaxPositionExceeded),
                Offer::BackPressured | Offer::NotConnected | Offer::AdminAction => {
                    remaining_attempts -= 1;
                    if remaining_attempts == 0 {
                        return Ok(false);
                    }
                    self.idle.idle();
                }
            }
        }
    }

    /// Offer until the connect deadline, optionally invoking the transport
    /// client's conductor between attempts.
    fn offer_with_timeout(
        &mut self,
        length: usize,
        invoker: Option<&dyn TransportClient>,
    ) -> Result<bool> {
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            match self.publication.offer(&self.scratch.0[..length]) {
                Offer::Position(_) => return Ok(true),
                Offer::Closed => return Err(ArchiveError::PublicationClosed),
                Offer::MaxPositionExceeded => return Err(ArchiveError::MaxPositionExceeded),
                Offer::BackPressured | Offer::NotConnected | Offer::AdminAction => {
                    if Instant::now() > deadline {
                        return Ok(false);
                    }
                    if let Some(client) = invoker {
                        client.invoke_conductor();
                    }
                    self.idle.idle();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_message, template_ids, Envelope};
    use crate::test_harness::TestPublication;
    use crate::NULL_VALUE;

    fn proxy(publication: &Arc<TestPublication>) -> ArchiveProxy {
        let publication: Arc<dyn Publication> = Arc::clone(publication) as _;
        ArchiveProxy::new(publication, Duration::from_millis(50))
    }

    #[test]
    fn start_recording_emits_one_message() {
        let publication = TestPublication::connected("aeron:udp?endpoint=localhost:8010", 10);
        let mut proxy = proxy(&publication);

        assert!(proxy
            .start_recording("aeron:udp?endpoint=x:40001", 1001, SourceLocation::Local, 5, 7)
            .unwrap());

        let messages = publication.sent_messages();
        assert_eq!(messages.len(), 1);
        let decoded = decode_message::<StartRecordingRequest>(&messages[0]).unwrap();
        assert_eq!(decoded.channel, "aeron:udp?endpoint=x:40001");
        assert_eq!(decoded.stream_id, 1001);
        assert_eq!(decoded.correlation_id, 5);
        assert_eq!(decoded.control_session_id, 7);
    }

    #[test]
    fn offer_retries_back_pressure_then_succeeds() {
        let publication = TestPublication::connected("aeron:ipc", 10);
        publication.fail_next_offers(Offer::BackPressured, 2);
        let mut proxy = proxy(&publication);

        assert!(proxy.stop_replay(3, 6, 7).unwrap());
        assert_eq!(publication.sent_messages().len(), 1);
        assert_eq!(publication.offer_count(), 3);
    }

    #[test]
    fn offer_gives_up_after_retry_budget() {
        let publication = TestPublication::connected("aeron:ipc", 10);
        publication.fail_next_offers(Offer::NotConnected, 8);
        let mut proxy = proxy(&publication);

        assert!(!proxy.stop_replay(3, 6, 7).unwrap());
        assert_eq!(publication.offer_count() as u32, DEFAULT_RETRY_ATTEMPTS);
    }

    #[test]
    fn closed_publication_is_fatal() {
        let publication = TestPublication::connected("aeron:ipc", 10);
        publication.fail_next_offers(Offer::Closed, 1);
        let mut proxy = proxy(&publication);

        let err = proxy.close_session(7).unwrap_err();
        assert!(matches!(err, ArchiveError::PublicationClosed));
    }

    #[test]
    fn max_position_is_fatal() {
        let publication = TestPublication::connected("aeron:ipc", 10);
        publication.fail_next_offers(Offer::MaxPositionExceeded, 1);
        let mut proxy = proxy(&publication);

        let err = proxy.get_recording_position(1, 2, 7).unwrap_err();
        assert!(matches!(err, ArchiveError::MaxPositionExceeded));
    }

    #[test]
    fn connect_carries_client_version_and_channel() {
        let publication = TestPublication::connected("aeron:ipc", 10);
        let mut proxy = proxy(&publication);

        assert!(proxy.try_connect("aeron:udp?endpoint=localhost:8020", 20, 42).unwrap());
        let messages = publication.sent_messages();
        let decoded = decode_message::<ConnectRequest>(&messages[0]).unwrap();
        assert_eq!(decoded.correlation_id, 42);
        assert_eq!(decoded.response_stream_id, 20);
        assert_eq!(decoded.version, CLIENT_SEMANTIC_VERSION);
        assert_eq!(decoded.response_channel, "aeron:udp?endpoint=localhost:8020");
    }

    #[test]
    fn stop_all_replays_uses_its_own_template() {
        let publication = TestPublication::connected("aeron:ipc", 10);
        let mut proxy = proxy(&publication);

        assert!(proxy.stop_all_replays(NULL_VALUE, 8, 7).unwrap());
        let messages = publication.sent_messages();
        let (envelope, _) = Envelope::decode(&messages[0]).unwrap();
        assert_eq!(envelope.template_id, template_ids::STOP_ALL_REPLAYS_REQUEST);
    }
}
