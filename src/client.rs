//! Archive client facade: blocking-style request/response calls over the
//! control session.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::channel::add_session_id;
use crate::codec::{RecordingDescriptor, RecordingSubscriptionDescriptor, ResponseCode, SourceLocation};
use crate::config::Context;
use crate::error::{ArchiveError, ErrorCode, ErrorHandler};
use crate::poller::{
    ControlResponsePoller, RecordingDescriptorPoller, RecordingSubscriptionDescriptorPoller,
};
use crate::proxy::ArchiveProxy;
use crate::transport::{ImageHandler, Publication, TransportClient, YieldingIdle};
use crate::Result;

pub(crate) struct SessionControl {
    pub(crate) proxy: ArchiveProxy,
    pub(crate) response_poller: ControlResponsePoller,
    pub(crate) recording_poller: RecordingDescriptorPoller,
    pub(crate) subscription_poller: RecordingSubscriptionDescriptorPoller,
    /// ERROR response seen for an unrelated correlation while no error
    /// handler is installed; surfaced by the next error check.
    pending_error: Option<ArchiveError>,
}

/// A connected control session with the archive.
///
/// Each blocking call issues one request on the control publication and
/// polls the response subscription until the matching acknowledgement
/// arrives, the subscription disconnects or the message timeout passes.
/// Calls serialise on a session mutex; drive independent sessions from
/// independent clients.
///
/// Constructed by [AsyncConnect](crate::connect::AsyncConnect) or
/// [connect](crate::connect::connect).
pub struct ArchiveClient {
    control_session_id: i64,
    message_timeout: Duration,
    transport: Arc<dyn TransportClient>,
    error_handler: Option<ErrorHandler>,
    idle: YieldingIdle,
    control: Mutex<SessionControl>,
}

impl std::fmt::Debug for ArchiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveClient")
            .field("control_session_id", &self.control_session_id)
            .field("message_timeout", &self.message_timeout)
            .finish()
    }
}

impl ArchiveClient {
    pub(crate) fn new(
        context: &Context,
        control_session_id: i64,
        transport: Arc<dyn TransportClient>,
        proxy: ArchiveProxy,
        response_poller: ControlResponsePoller,
        recording_poller: RecordingDescriptorPoller,
        subscription_poller: RecordingSubscriptionDescriptorPoller,
    ) -> Self {
        Self {
            control_session_id,
            message_timeout: context.message_timeout(),
            transport,
            error_handler: context.error_handler().cloned(),
            idle: YieldingIdle,
            control: Mutex::new(SessionControl {
                proxy,
                response_poller,
                recording_poller,
                subscription_poller,
                pending_error: None,
            }),
        }
    }

    /// The control session id allocated by the archive for this connection.
    pub fn control_session_id(&self) -> i64 {
        self.control_session_id
    }

    /// The transport client used for driver interaction.
    pub fn transport(&self) -> &Arc<dyn TransportClient> {
        &self.transport
    }

    fn lock(&self) -> MutexGuard<'_, SessionControl> {
        self.control.lock().expect("archive session lock poisoned")
    }

    pub(crate) fn with_control<R>(&self, f: impl FnOnce(&mut SessionControl, i64) -> R) -> R {
        let mut control = self.lock();
        f(&mut control, self.control_session_id)
    }

    /// Poll the response stream once for an error, returning its message
    /// without raising. Any other response is skipped, so only call when no
    /// response is being awaited.
    pub fn poll_for_error_response(&self) -> Option<String> {
        let mut control = self.lock();
        if let Some(error) = control.pending_error.take() {
            return Some(error.to_string());
        }
        self.peek_error(&mut control).map(|error| error.to_string())
    }

    /// Check for an error on the control session; delivered to the error
    /// handler when one is installed, raised otherwise.
    pub fn check_for_error_response(&self) -> Result<()> {
        let mut control = self.lock();
        let error = control
            .pending_error
            .take()
            .or_else(|| self.peek_error(&mut control));
        match error {
            None => Ok(()),
            Some(error) => match &self.error_handler {
                Some(handler) => {
                    handler(&error);
                    Ok(())
                }
                None => Err(error),
            },
        }
    }

    fn peek_error(&self, control: &mut SessionControl) -> Option<ArchiveError> {
        match control.response_poller.poll() {
            Err(error) => Some(error),
            Ok(fragments) => {
                let poller = &control.response_poller;
                if fragments != 0
                    && poller.is_poll_complete()
                    && poller.control_session_id() == self.control_session_id
                    && poller.is_control_response()
                    && poller.is_code_error()
                {
                    Some(ArchiveError::ErrorResponse {
                        error_code: ErrorCode::from_relevant_id(poller.relevant_id()),
                        message: poller.error_message().to_string(),
                        correlation_id: poller.correlation_id(),
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Add a publication and start a session-specific recording of it.
    ///
    /// The publication must be the original creator of the stream; a
    /// pre-existing publication would record under a different session.
    pub fn add_recorded_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Result<Arc<dyn Publication>> {
        let registration_id = self.transport.add_publication(channel, stream_id);
        let publication = self.await_publication(registration_id, false);
        self.record_publication(&publication, channel, stream_id)?;
        Ok(publication)
    }

    /// As [add_recorded_publication](Self::add_recorded_publication) for an
    /// exclusive publication.
    pub fn add_recorded_exclusive_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Result<Arc<dyn Publication>> {
        let registration_id = self.transport.add_exclusive_publication(channel, stream_id);
        let publication = self.await_publication(registration_id, true);
        self.record_publication(&publication, channel, stream_id)?;
        Ok(publication)
    }

    fn await_publication(&self, registration_id: i64, exclusive: bool) -> Arc<dyn Publication> {
        loop {
            let found = if exclusive {
                self.transport.find_exclusive_publication(registration_id)
            } else {
                self.transport.find_publication(registration_id)
            };
            if let Some(publication) = found {
                return publication;
            }
            self.idle.idle();
        }
    }

    fn record_publication(
        &self,
        publication: &Arc<dyn Publication>,
        channel: &str,
        stream_id: i32,
    ) -> Result<()> {
        if !publication.is_original() {
            return Err(ArchiveError::PublicationAlreadyAdded {
                channel: channel.to_string(),
                stream_id,
            });
        }
        let session_channel = add_session_id(channel, publication.session_id());
        self.start_recording(&session_channel, stream_id, SourceLocation::Local)?;
        Ok(())
    }

    /// Start recording a channel and stream pairing.
    ///
    /// Channels that include a session id parameter are distinct from
    /// channels without one; a publication matching both is recorded twice.
    ///
    /// Returns the subscription id of the recording.
    pub fn start_recording(
        &self,
        channel: &str,
        stream_id: i32,
        source_location: SourceLocation,
    ) -> Result<i64> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.start_recording(
            channel,
            stream_id,
            source_location,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "start recording" });
        }
        self.poll_for_response(&mut control, correlation_id)
    }

    /// Extend an existing, non-active recording of a channel and stream
    /// pairing. Returns the subscription id of the recording.
    pub fn extend_recording(
        &self,
        recording_id: i64,
        channel: &str,
        stream_id: i32,
        source_location: SourceLocation,
    ) -> Result<i64> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.extend_recording(
            channel,
            stream_id,
            source_location,
            recording_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "extend recording" });
        }
        self.poll_for_response(&mut control, correlation_id)
    }

    /// Stop recording a channel and stream pairing.
    pub fn stop_recording(&self, channel: &str, stream_id: i32) -> Result<()> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.stop_recording(
            channel,
            stream_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "stop recording" });
        }
        self.poll_for_response(&mut control, correlation_id)?;
        Ok(())
    }

    /// Stop the session-specific recording for a publication started with
    /// [add_recorded_publication](Self::add_recorded_publication).
    pub fn stop_recording_publication(&self, publication: &dyn Publication) -> Result<()> {
        let channel = add_session_id(&publication.channel(), publication.session_id());
        self.stop_recording(&channel, publication.stream_id())
    }

    /// Stop recording by the subscription id returned from start or extend.
    pub fn stop_recording_subscription(&self, subscription_id: i64) -> Result<()> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.stop_recording_subscription(
            subscription_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "stop recording" });
        }
        self.poll_for_response(&mut control, correlation_id)?;
        Ok(())
    }

    /// Start a replay of a recording.
    ///
    /// The low 32 bits of the returned id are the image session id of the
    /// replay; all 64 bits identify the replay for
    /// [stop_replay](Self::stop_replay).
    pub fn start_replay(
        &self,
        recording_id: i64,
        position: i64,
        length: i64,
        replay_channel: &str,
        replay_stream_id: i32,
    ) -> Result<i64> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.replay(
            recording_id,
            position,
            length,
            replay_channel,
            replay_stream_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "replay" });
        }
        self.poll_for_response(&mut control, correlation_id)
    }

    /// Start a replay bounded by the position in a limit counter.
    #[allow(clippy::too_many_arguments)]
    pub fn start_bounded_replay(
        &self,
        recording_id: i64,
        position: i64,
        length: i64,
        limit_counter_id: i32,
        replay_channel: &str,
        replay_stream_id: i32,
    ) -> Result<i64> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.bounded_replay(
            recording_id,
            position,
            length,
            limit_counter_id,
            replay_channel,
            replay_stream_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "bounded replay" });
        }
        self.poll_for_response(&mut control, correlation_id)
    }

    /// Stop a replay session.
    pub fn stop_replay(&self, replay_session_id: i64) -> Result<()> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.stop_replay(
            replay_session_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "stop replay" });
        }
        self.poll_for_response(&mut control, correlation_id)?;
        Ok(())
    }

    /// Stop all replays for a recording id, or every replay when it is
    /// [NULL_VALUE](crate::NULL_VALUE).
    pub fn stop_all_replays(&self, recording_id: i64) -> Result<()> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.stop_all_replays(
            recording_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "stop all replays" });
        }
        self.poll_for_response(&mut control, correlation_id)?;
        Ok(())
    }

    /// Start a replay and add a subscription scoped to its session id for
    /// receiving it. Returns the subscription registration id.
    pub fn replay(
        &self,
        recording_id: i64,
        position: i64,
        length: i64,
        replay_channel: &str,
        replay_stream_id: i32,
    ) -> Result<i64> {
        let replay_session_id =
            self.start_replay(recording_id, position, length, replay_channel, replay_stream_id)?
                as i32;
        let session_channel = add_session_id(replay_channel, replay_session_id);
        Ok(self.transport.add_subscription(&session_channel, replay_stream_id))
    }

    /// As [replay](Self::replay), with image availability handlers for the
    /// replay subscription.
    pub fn replay_with_handlers(
        &self,
        recording_id: i64,
        position: i64,
        length: i64,
        replay_channel: &str,
        replay_stream_id: i32,
        on_available_image: Option<ImageHandler>,
        on_unavailable_image: Option<ImageHandler>,
    ) -> Result<i64> {
        let replay_session_id =
            self.start_replay(recording_id, position, length, replay_channel, replay_stream_id)?
                as i32;
        let session_channel = add_session_id(replay_channel, replay_session_id);
        Ok(self.transport.add_subscription_with_handlers(
            &session_channel,
            replay_stream_id,
            on_available_image,
            on_unavailable_image,
        ))
    }

    /// List recording descriptors from a recording id, bounded by count.
    ///
    /// Returns the number of descriptors consumed, which is less than
    /// `record_count` when the end of known recordings is reached.
    pub fn list_recordings<F>(
        &self,
        from_recording_id: i64,
        record_count: i32,
        consumer: &mut F,
    ) -> Result<i32>
    where
        F: FnMut(&RecordingDescriptor),
    {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.list_recordings(
            from_recording_id,
            record_count,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "list recordings" });
        }
        self.poll_for_descriptors(&mut control, correlation_id, record_count, consumer)
    }

    /// List recording descriptors matching a channel fragment and stream id.
    pub fn list_recordings_for_uri<F>(
        &self,
        from_recording_id: i64,
        record_count: i32,
        channel_fragment: &str,
        stream_id: i32,
        consumer: &mut F,
    ) -> Result<i32>
    where
        F: FnMut(&RecordingDescriptor),
    {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.list_recordings_for_uri(
            from_recording_id,
            record_count,
            channel_fragment,
            stream_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "list recordings" });
        }
        self.poll_for_descriptors(&mut control, correlation_id, record_count, consumer)
    }

    /// List the descriptor of a single recording id.
    pub fn list_recording<F>(&self, recording_id: i64, consumer: &mut F) -> Result<i32>
    where
        F: FnMut(&RecordingDescriptor),
    {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.list_recording(
            recording_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "list recording" });
        }
        self.poll_for_descriptors(&mut control, correlation_id, 1, consumer)
    }

    /// List active recording subscriptions in the archive.
    pub fn list_recording_subscriptions<F>(
        &self,
        pseudo_index: i32,
        subscription_count: i32,
        channel_fragment: &str,
        stream_id: i32,
        apply_stream_id: bool,
        consumer: &mut F,
    ) -> Result<i32>
    where
        F: FnMut(&RecordingSubscriptionDescriptor),
    {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.list_recording_subscriptions(
            pseudo_index,
            subscription_count,
            channel_fragment,
            stream_id,
            apply_stream_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "list recording subscriptions" });
        }
        self.poll_for_subscription_descriptors(
            &mut control,
            correlation_id,
            subscription_count,
            consumer,
        )
    }

    /// Position recorded for an active recording,
    /// [NULL_POSITION](crate::NULL_POSITION) when not active.
    pub fn get_recording_position(&self, recording_id: i64) -> Result<i64> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.get_recording_position(
            recording_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "get recording position" });
        }
        self.poll_for_response(&mut control, correlation_id)
    }

    /// Stop position of a recording, [NULL_POSITION](crate::NULL_POSITION)
    /// while it is still active.
    pub fn get_stop_position(&self, recording_id: i64) -> Result<i64> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.get_stop_position(
            recording_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "get stop position" });
        }
        self.poll_for_response(&mut control, correlation_id)
    }

    /// Find the newest recording matching the criteria,
    /// [NULL_VALUE](crate::NULL_VALUE) when none matches.
    pub fn find_last_matching_recording(
        &self,
        min_recording_id: i64,
        channel_fragment: &str,
        stream_id: i32,
        session_id: i32,
    ) -> Result<i64> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.find_last_matching_recording(
            min_recording_id,
            channel_fragment,
            stream_id,
            session_id,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "find last matching recording" });
        }
        self.poll_for_response(&mut control, correlation_id)
    }

    /// Truncate a stopped recording to a position on a fragment boundary.
    /// Truncating to the start position deletes the recording.
    pub fn truncate_recording(&self, recording_id: i64, position: i64) -> Result<()> {
        let mut control = self.lock();
        let correlation_id = self.transport.next_correlation_id();
        if !control.proxy.truncate_recording(
            recording_id,
            position,
            correlation_id,
            self.control_session_id,
        )? {
            return Err(ArchiveError::SendFailed { request: "truncate recording" });
        }
        self.poll_for_response(&mut control, correlation_id)?;
        Ok(())
    }

    fn route_async_error(&self, control: &mut SessionControl, error: ArchiveError) {
        match &self.error_handler {
            Some(handler) => handler(&error),
            None => {
                warn!("retaining archive error on unrelated correlation: {error}");
                control.pending_error.get_or_insert(error);
            }
        }
    }

    /// Await the control response matching `correlation_id`, returning its
    /// relevant id on OK.
    fn poll_for_response(
        &self,
        control: &mut SessionControl,
        correlation_id: i64,
    ) -> Result<i64> {
        let deadline = Instant::now() + self.message_timeout;
        loop {
            self.poll_next_response(control, correlation_id, deadline)?;

            let poller = &control.response_poller;
            if poller.control_session_id() != self.control_session_id
                || !poller.is_control_response()
            {
                self.transport.invoke_conductor();
                continue;
            }

            if poller.is_code_error() {
                let response_correlation_id = poller.correlation_id();
                let error = ArchiveError::ErrorResponse {
                    error_code: ErrorCode::from_relevant_id(poller.relevant_id()),
                    message: poller.error_message().to_string(),
                    correlation_id: response_correlation_id,
                };
                if response_correlation_id == correlation_id {
                    return Err(error);
                }
                self.route_async_error(control, error);
            } else if poller.correlation_id() == correlation_id {
                match poller.code() {
                    Some(ResponseCode::Ok) => return Ok(poller.relevant_id()),
                    Some(code) => return Err(ArchiveError::UnexpectedResponseCode { code }),
                    None => {}
                }
            }
        }
    }

    /// Poll until a complete control response is available, raising on
    /// disconnect or deadline.
    fn poll_next_response(
        &self,
        control: &mut SessionControl,
        correlation_id: i64,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            let fragments = control.response_poller.poll()?;
            if control.response_poller.is_poll_complete() {
                return Ok(());
            }
            if fragments > 0 {
                continue;
            }
            if !control.response_poller.subscription().is_connected() {
                return Err(ArchiveError::NotConnected);
            }
            if Instant::now() > deadline {
                return Err(ArchiveError::ResponseTimeout { correlation_id });
            }
            self.idle.idle();
            self.transport.invoke_conductor();
        }
    }

    /// Await a bounded descriptor stream; the deadline resets on every
    /// delivered descriptor so steady progress never times out.
    fn poll_for_descriptors<F>(
        &self,
        control: &mut SessionControl,
        correlation_id: i64,
        record_count: i32,
        consumer: &mut F,
    ) -> Result<i32>
    where
        F: FnMut(&RecordingDescriptor),
    {
        let mut last_remaining = record_count;
        let mut deadline = Instant::now() + self.message_timeout;
        control.recording_poller.reset(correlation_id, record_count);

        loop {
            let polled = control.recording_poller.poll(consumer);
            let fragments = match polled {
                Ok(fragments) => fragments,
                Err(error) => {
                    self.drain_recording_poller_error(control);
                    return Err(error);
                }
            };

            let remaining = control.recording_poller.remaining_record_count();
            if control.recording_poller.is_dispatch_complete() {
                self.drain_recording_poller_error(control);
                return Ok(record_count - remaining);
            }

            if remaining != last_remaining {
                last_remaining = remaining;
                deadline = Instant::now() + self.message_timeout;
            }

            self.transport.invoke_conductor();

            if fragments > 0 {
                continue;
            }
            if !control.recording_poller.subscription().is_connected() {
                return Err(ArchiveError::NotConnected);
            }
            if Instant::now() > deadline {
                return Err(ArchiveError::ResponseTimeout { correlation_id });
            }
            self.idle.idle();
        }
    }

    fn poll_for_subscription_descriptors<F>(
        &self,
        control: &mut SessionControl,
        correlation_id: i64,
        subscription_count: i32,
        consumer: &mut F,
    ) -> Result<i32>
    where
        F: FnMut(&RecordingSubscriptionDescriptor),
    {
        let mut last_remaining = subscription_count;
        let mut deadline = Instant::now() + self.message_timeout;
        control.subscription_poller.reset(correlation_id, subscription_count);

        loop {
            let polled = control.subscription_poller.poll(consumer);
            let fragments = match polled {
                Ok(fragments) => fragments,
                Err(error) => {
                    self.drain_subscription_poller_error(control);
                    return Err(error);
                }
            };

            let remaining = control.subscription_poller.remaining_subscription_count();
            if control.subscription_poller.is_dispatch_complete() {
                self.drain_subscription_poller_error(control);
                return Ok(subscription_count - remaining);
            }

            if remaining != last_remaining {
                last_remaining = remaining;
                deadline = Instant::now() + self.message_timeout;
            }

            self.transport.invoke_conductor();

            if fragments > 0 {
                continue;
            }
            if !control.subscription_poller.subscription().is_connected() {
                return Err(ArchiveError::NotConnected);
            }
            if Instant::now() > deadline {
                return Err(ArchiveError::ResponseTimeout { correlation_id });
            }
            self.idle.idle();
        }
    }

    fn drain_recording_poller_error(&self, control: &mut SessionControl) {
        if let Some(error) = control.recording_poller.take_unrelated_error() {
            control.pending_error.get_or_insert(error);
        }
    }

    fn drain_subscription_poller_error(&self, control: &mut SessionControl) {
        if let Some(error) = control.subscription_poller.take_unrelated_error() {
            control.pending_error.get_or_insert(error);
        }
    }
}

impl Drop for ArchiveClient {
    /// Closing the session is best-effort; the archive also reaps sessions
    /// whose response publication disconnects.
    fn drop(&mut self) {
        if let Ok(control) = self.control.get_mut() {
            let _ = control.proxy.close_session(self.control_session_id);
        }
    }
}
