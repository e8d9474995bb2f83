//! Per-session configuration for an archive control session.

use std::time::Duration;

use crate::error::ErrorHandler;

/// Defaults for a control session.
pub mod defaults {
    use std::time::Duration;

    /// Timeout when waiting on a message to be sent or received.
    pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Channel for sending control messages to an archive.
    pub const CONTROL_REQUEST_CHANNEL: &str = "aeron:udp?endpoint=localhost:8010";

    /// Stream id within a channel for sending control messages to an archive.
    pub const CONTROL_REQUEST_STREAM_ID: i32 = 10;

    /// Channel for receiving control responses from an archive.
    pub const CONTROL_RESPONSE_CHANNEL: &str = "aeron:udp?endpoint=localhost:8020";

    /// Stream id within a channel for receiving control responses.
    pub const CONTROL_RESPONSE_STREAM_ID: i32 = 20;

    /// Channel for receiving progress events of recordings from an archive.
    ///
    /// For production, multicast or dynamic multi-destination-cast is
    /// recommended so subscribers can come and go.
    pub const RECORDING_EVENTS_CHANNEL: &str =
        "aeron:udp?control-mode=dynamic|control=localhost:8030";

    /// Stream id within a channel for receiving recording progress events.
    pub const RECORDING_EVENTS_STREAM_ID: i32 = 30;

    /// Whether term buffers for the control streams are sparse files.
    pub const CONTROL_TERM_BUFFER_SPARSE: bool = true;

    /// Low term length for the control channel reflects expected low
    /// bandwidth usage.
    pub const CONTROL_TERM_BUFFER_LENGTH: i32 = 64 * 1024;

    /// MTU for the control streams.
    pub const CONTROL_MTU_LENGTH: i32 = 1408;
}

const CLIENT_MAJOR_VERSION: u8 = 0;
const CLIENT_MINOR_VERSION: u8 = 2;
const CLIENT_PATCH_VERSION: u8 = 1;

/// Compose a semantic version into the single i32 carried by the connect
/// request.
pub const fn semantic_version_compose(major: u8, minor: u8, patch: u8) -> i32 {
    ((major as i32) << 16) | ((minor as i32) << 8) | patch as i32
}

/// Client semantic version sent in the connect request.
pub const CLIENT_SEMANTIC_VERSION: i32 =
    semantic_version_compose(CLIENT_MAJOR_VERSION, CLIENT_MINOR_VERSION, CLIENT_PATCH_VERSION);

/// Per-session options: channels, stream ids, timeout and the handler for
/// asynchronous errors.
///
/// Construct with [Context::default] and override with the `with_*` setters:
///
/// ```
/// use std::time::Duration;
/// use stream_archive::Context;
///
/// let ctx = Context::default()
///     .with_message_timeout(Duration::from_secs(10))
///     .with_control_request_channel("aeron:udp?endpoint=archive-host:8010");
/// ```
#[derive(Clone)]
pub struct Context {
    message_timeout: Duration,
    control_request_channel: String,
    control_request_stream_id: i32,
    control_response_channel: String,
    control_response_stream_id: i32,
    recording_events_channel: String,
    recording_events_stream_id: i32,
    control_term_buffer_sparse: bool,
    control_term_buffer_length: i32,
    control_mtu_length: i32,
    error_handler: Option<ErrorHandler>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            message_timeout: defaults::MESSAGE_TIMEOUT,
            control_request_channel: defaults::CONTROL_REQUEST_CHANNEL.to_string(),
            control_request_stream_id: defaults::CONTROL_REQUEST_STREAM_ID,
            control_response_channel: defaults::CONTROL_RESPONSE_CHANNEL.to_string(),
            control_response_stream_id: defaults::CONTROL_RESPONSE_STREAM_ID,
            recording_events_channel: defaults::RECORDING_EVENTS_CHANNEL.to_string(),
            recording_events_stream_id: defaults::RECORDING_EVENTS_STREAM_ID,
            control_term_buffer_sparse: defaults::CONTROL_TERM_BUFFER_SPARSE,
            control_term_buffer_length: defaults::CONTROL_TERM_BUFFER_LENGTH,
            control_mtu_length: defaults::CONTROL_MTU_LENGTH,
            error_handler: None,
        }
    }
}

impl Context {
    /// Timeout to wait for sending or receiving a message.
    pub fn message_timeout(&self) -> Duration {
        self.message_timeout
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Channel on which control requests are sent to the archive.
    pub fn control_request_channel(&self) -> &str {
        &self.control_request_channel
    }

    pub fn with_control_request_channel(mut self, channel: impl Into<String>) -> Self {
        self.control_request_channel = channel.into();
        self
    }

    pub fn control_request_stream_id(&self) -> i32 {
        self.control_request_stream_id
    }

    pub fn with_control_request_stream_id(mut self, stream_id: i32) -> Self {
        self.control_request_stream_id = stream_id;
        self
    }

    /// Channel on which control responses are received from the archive.
    pub fn control_response_channel(&self) -> &str {
        &self.control_response_channel
    }

    pub fn with_control_response_channel(mut self, channel: impl Into<String>) -> Self {
        self.control_response_channel = channel.into();
        self
    }

    pub fn control_response_stream_id(&self) -> i32 {
        self.control_response_stream_id
    }

    pub fn with_control_response_stream_id(mut self, stream_id: i32) -> Self {
        self.control_response_stream_id = stream_id;
        self
    }

    /// Channel on which recording lifecycle events are published.
    pub fn recording_events_channel(&self) -> &str {
        &self.recording_events_channel
    }

    pub fn with_recording_events_channel(mut self, channel: impl Into<String>) -> Self {
        self.recording_events_channel = channel.into();
        self
    }

    pub fn recording_events_stream_id(&self) -> i32 {
        self.recording_events_stream_id
    }

    pub fn with_recording_events_stream_id(mut self, stream_id: i32) -> Self {
        self.recording_events_stream_id = stream_id;
        self
    }

    /// Should the control streams use sparse file term buffers.
    pub fn control_term_buffer_sparse(&self) -> bool {
        self.control_term_buffer_sparse
    }

    pub fn with_control_term_buffer_sparse(mut self, sparse: bool) -> Self {
        self.control_term_buffer_sparse = sparse;
        self
    }

    /// Term buffer length for the control streams.
    pub fn control_term_buffer_length(&self) -> i32 {
        self.control_term_buffer_length
    }

    pub fn with_control_term_buffer_length(mut self, length: i32) -> Self {
        self.control_term_buffer_length = length;
        self
    }

    /// MTU length for the control streams.
    pub fn control_mtu_length(&self) -> i32 {
        self.control_mtu_length
    }

    pub fn with_control_mtu_length(mut self, length: i32) -> Self {
        self.control_mtu_length = length;
        self
    }

    /// Handler called for asynchronous errors on the control session.
    pub fn error_handler(&self) -> Option<&ErrorHandler> {
        self.error_handler.as_ref()
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_version_packs_fields() {
        assert_eq!(semantic_version_compose(0, 2, 1), 0x0000_0201);
        assert_eq!(CLIENT_SEMANTIC_VERSION, 0x0000_0201);
    }

    #[test]
    fn context_defaults_match_configuration() {
        let ctx = Context::default();
        assert_eq!(ctx.message_timeout(), Duration::from_secs(5));
        assert_eq!(ctx.control_request_channel(), "aeron:udp?endpoint=localhost:8010");
        assert_eq!(ctx.control_request_stream_id(), 10);
        assert_eq!(ctx.control_response_channel(), "aeron:udp?endpoint=localhost:8020");
        assert_eq!(ctx.control_response_stream_id(), 20);
        assert_eq!(ctx.recording_events_stream_id(), 30);
        assert!(ctx.control_term_buffer_sparse());
        assert_eq!(ctx.control_term_buffer_length(), 64 * 1024);
        assert_eq!(ctx.control_mtu_length(), 1408);
    }
}
