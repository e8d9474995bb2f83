//! Channel URI parameter helpers.
//!
//! Channel URIs take the form `scheme:media?name=value|name=value`. The
//! helpers here only add or read parameters; full URI validation belongs to
//! the transport.

use crate::config::Context;

pub const SESSION_ID_PARAM_NAME: &str = "session-id";
pub const MDC_CONTROL_MODE_PARAM_NAME: &str = "control-mode";
pub const MDC_CONTROL_MODE_MANUAL: &str = "manual";
pub const TERM_LENGTH_PARAM_NAME: &str = "term-length";
pub const MTU_LENGTH_PARAM_NAME: &str = "mtu";
pub const SPARSE_PARAM_NAME: &str = "sparse";

/// Append a parameter, starting the query section if the URI has none yet.
fn append_param(channel: &mut String, name: &str, value: &str) {
    channel.push(if channel.contains('?') { '|' } else { '?' });
    channel.push_str(name);
    channel.push('=');
    channel.push_str(value);
}

/// Scope a channel URI to a specific session id.
///
/// Recordings and replays are bound to an exact publication session by
/// appending `session-id=<id>`.
pub fn add_session_id(channel: &str, session_id: i32) -> String {
    let mut scoped = String::with_capacity(channel.len() + 16);
    scoped.push_str(channel);
    append_param(&mut scoped, SESSION_ID_PARAM_NAME, &session_id.to_string());
    scoped
}

/// Read a parameter value from a channel URI, if present.
pub fn channel_param<'a>(channel: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = channel.split_once('?')?;
    query.split('|').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

/// Build the control request channel with the context's term-buffer
/// parameters applied.
pub fn control_request_channel(ctx: &Context) -> String {
    let mut channel = ctx.control_request_channel().to_string();
    if channel_param(&channel, TERM_LENGTH_PARAM_NAME).is_none() {
        append_param(
            &mut channel,
            TERM_LENGTH_PARAM_NAME,
            &ctx.control_term_buffer_length().to_string(),
        );
    }
    if channel_param(&channel, MTU_LENGTH_PARAM_NAME).is_none() {
        append_param(
            &mut channel,
            MTU_LENGTH_PARAM_NAME,
            &ctx.control_mtu_length().to_string(),
        );
    }
    if channel_param(&channel, SPARSE_PARAM_NAME).is_none() {
        append_param(
            &mut channel,
            SPARSE_PARAM_NAME,
            if ctx.control_term_buffer_sparse() { "true" } else { "false" },
        );
    }
    channel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_starts_query_when_absent() {
        assert_eq!(add_session_id("aeron:ipc", 7), "aeron:ipc?session-id=7");
    }

    #[test]
    fn session_id_extends_existing_query() {
        assert_eq!(
            add_session_id("aeron:udp?endpoint=host:40001", -12),
            "aeron:udp?endpoint=host:40001|session-id=-12"
        );
    }

    #[test]
    fn channel_param_finds_value() {
        let channel = "aeron:udp?control-mode=manual|endpoint=host:0";
        assert_eq!(channel_param(channel, "control-mode"), Some("manual"));
        assert_eq!(channel_param(channel, "endpoint"), Some("host:0"));
        assert_eq!(channel_param(channel, "session-id"), None);
        assert_eq!(channel_param("aeron:ipc", "control-mode"), None);
    }

    #[test]
    fn control_request_channel_applies_context_params() {
        let ctx = Context::default();
        let channel = control_request_channel(&ctx);
        assert_eq!(channel_param(&channel, "term-length"), Some("65536"));
        assert_eq!(channel_param(&channel, "mtu"), Some("1408"));
        assert_eq!(channel_param(&channel, "sparse"), Some("true"));
    }

    #[test]
    fn control_request_channel_keeps_explicit_params() {
        let ctx = Context::default()
            .with_control_request_channel("aeron:udp?endpoint=host:8010|term-length=131072");
        let channel = control_request_channel(&ctx);
        assert_eq!(channel_param(&channel, "term-length"), Some("131072"));
        assert_eq!(channel_param(&channel, "mtu"), Some("1408"));
    }
}
