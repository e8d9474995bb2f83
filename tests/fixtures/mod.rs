//! Shared scenario fixtures: a control session established against the
//! in-memory transport.

use std::sync::Arc;

use stream_archive::codec::ResponseCode;
use stream_archive::connect::AsyncConnect;
use stream_archive::test_harness::{control_response_frame, TestSubscription, TestTransport};
use stream_archive::{ArchiveClient, Context};

/// Control session id allocated by the scripted archive.
pub const CONTROL_SESSION_ID: i64 = 7;

/// Establish a connected client.
///
/// The connect request consumes `first_correlation_id`; the first API call
/// on the returned client will allocate `first_correlation_id + 1`.
pub fn connected_client(
    first_correlation_id: i64,
    context: Context,
) -> (Arc<TestTransport>, ArchiveClient) {
    let transport = TestTransport::with_first_correlation_id(first_correlation_id);
    let mut pending = AsyncConnect::new(context.clone(), transport.clone());

    assert!(!pending.poll().expect("connect poll"), "no response scripted yet");
    response_subscription(&transport, &context).enqueue(
        control_response_frame(CONTROL_SESSION_ID, first_correlation_id, 0, ResponseCode::Ok, ""),
        1,
    );
    assert!(pending.poll().expect("connect poll"));

    let client = pending.into_client().expect("connected client");
    (transport, client)
}

pub fn response_subscription(
    transport: &Arc<TestTransport>,
    context: &Context,
) -> Arc<TestSubscription> {
    transport
        .find_subscription_by_stream_id(context.control_response_stream_id())
        .expect("response subscription registered")
}

/// Enqueue an OK control response for a correlation id.
pub fn respond_ok(
    transport: &Arc<TestTransport>,
    context: &Context,
    correlation_id: i64,
    relevant_id: i64,
) {
    response_subscription(transport, context).enqueue(
        control_response_frame(CONTROL_SESSION_ID, correlation_id, relevant_id, ResponseCode::Ok, ""),
        1,
    );
}
