//! End-to-end control session scenarios against the in-memory transport.

mod fixtures;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stream_archive::channel::add_session_id;
use stream_archive::codec::{
    decode_message, RecordingDescriptor, ResponseCode, SourceLocation, StopRecordingRequest,
};
use stream_archive::connect::AsyncConnect;
use stream_archive::counters::CountersReader;
use stream_archive::test_harness::{
    control_response_frame, frame_of, CountersBuilder, TestTransport,
};
use stream_archive::transport::{Subscription, TransportClient};
use stream_archive::{ArchiveError, Context, ErrorCode, ErrorHandler};

use fixtures::{connected_client, respond_ok, response_subscription, CONTROL_SESSION_ID};

#[test]
fn connect_completes_when_publication_connects_after_subscription() {
    let transport = TestTransport::with_first_correlation_id(42);
    let context = Context::default();

    // Subscription is up but the request publication has no subscriber yet.
    let mut pending = AsyncConnect::new(context.clone(), transport.clone());
    let publication = transport
        .find_publication_by_stream_id(context.control_request_stream_id())
        .expect("request publication");
    publication.set_connected(false);

    assert!(!pending.poll().unwrap());
    assert!(publication.sent_messages().is_empty());

    publication.set_connected(true);
    assert!(!pending.poll().unwrap());
    assert_eq!(publication.sent_messages().len(), 1);

    response_subscription(&transport, &context).enqueue(
        control_response_frame(7, 42, 0, ResponseCode::Ok, ""),
        1,
    );
    assert!(pending.poll().unwrap());

    let client = pending.into_client().unwrap();
    assert_eq!(client.control_session_id(), 7);
}

#[test]
fn start_recording_returns_relevant_id() {
    let context = Context::default();
    let (transport, client) = connected_client(1, context.clone());

    respond_ok(&transport, &context, 2, 99);
    let subscription_id = client
        .start_recording("aeron:udp?endpoint=x:40001", 1001, SourceLocation::Local)
        .unwrap();
    assert_eq!(subscription_id, 99);
}

#[test]
fn error_on_unrelated_correlation_goes_to_handler_then_call_succeeds() {
    let seen: Arc<Mutex<Vec<(String, ErrorCode)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: ErrorHandler = Arc::new(move |error| {
        if let ArchiveError::ErrorResponse { message, error_code, .. } = error {
            sink.lock().unwrap().push((message.clone(), *error_code));
        }
    });
    let context = Context::default().with_error_handler(handler);
    let (transport, client) = connected_client(9, context.clone());

    // The awaited call will use correlation id 10; an error for the earlier
    // correlation 9 arrives first.
    let subscription = response_subscription(&transport, &context);
    subscription.enqueue(
        control_response_frame(
            CONTROL_SESSION_ID,
            9,
            ErrorCode::UnknownRecording.as_relevant_id(),
            ResponseCode::Error,
            "boom",
        ),
        1,
    );
    subscription.enqueue(control_response_frame(CONTROL_SESSION_ID, 10, 0, ResponseCode::Ok, ""), 1);

    let result = client.get_recording_position(5).unwrap();
    assert_eq!(result, 0);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("boom".to_string(), ErrorCode::UnknownRecording)]
    );
}

#[test]
fn error_on_unrelated_correlation_is_retained_without_handler() {
    let context = Context::default();
    let (transport, client) = connected_client(9, context.clone());

    let subscription = response_subscription(&transport, &context);
    subscription.enqueue(
        control_response_frame(
            CONTROL_SESSION_ID,
            9,
            ErrorCode::UnknownRecording.as_relevant_id(),
            ResponseCode::Error,
            "boom",
        ),
        1,
    );
    subscription.enqueue(control_response_frame(CONTROL_SESSION_ID, 10, 0, ResponseCode::Ok, ""), 1);

    client.get_recording_position(5).unwrap();

    let message = client.poll_for_error_response().expect("retained error");
    assert!(message.contains("boom"));
    assert!(client.poll_for_error_response().is_none());
}

#[test]
fn error_on_awaited_correlation_raises() {
    let context = Context::default();
    let (transport, client) = connected_client(1, context.clone());

    response_subscription(&transport, &context).enqueue(
        control_response_frame(
            CONTROL_SESSION_ID,
            2,
            ErrorCode::ActiveRecording.as_relevant_id(),
            ResponseCode::Error,
            "already recording",
        ),
        1,
    );

    let err = client
        .start_recording("aeron:udp?endpoint=x:40001", 1001, SourceLocation::Local)
        .unwrap_err();
    let ArchiveError::ErrorResponse { error_code, message, correlation_id } = err else {
        panic!("expected error response, got {err}");
    };
    assert_eq!(error_code, ErrorCode::ActiveRecording);
    assert_eq!(message, "already recording");
    assert_eq!(correlation_id, 2);
}

#[test]
fn no_response_times_out_mentioning_the_correlation() {
    let context = Context::default().with_message_timeout(Duration::from_millis(50));
    let (_transport, client) = connected_client(9, context);

    let err = client.get_recording_position(5).unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("correlation_id=10"));
}

#[test]
fn disconnected_subscription_raises_not_connected() {
    let context = Context::default();
    let (transport, client) = connected_client(1, context.clone());

    response_subscription(&transport, &context).set_connected(false);
    let err = client.get_recording_position(5).unwrap_err();
    assert!(matches!(err, ArchiveError::NotConnected));
}

fn listing_descriptor(correlation_id: i64, recording_id: i64) -> RecordingDescriptor {
    RecordingDescriptor {
        control_session_id: CONTROL_SESSION_ID,
        correlation_id,
        recording_id,
        start_timestamp: 1_000 + recording_id,
        stop_timestamp: -1,
        start_position: 0,
        stop_position: -1,
        initial_term_id: 1,
        segment_file_length: 128 * 1024 * 1024,
        term_buffer_length: 64 * 1024,
        mtu_length: 1408,
        session_id: 10 + recording_id as i32,
        stream_id: 1001,
        stripped_channel: "aeron:udp?endpoint=x:40001".to_string(),
        original_channel: "aeron:udp?endpoint=x:40001|alias=live".to_string(),
        source_identity: "127.0.0.1:40001".to_string(),
    }
}

#[test]
fn listing_returns_early_when_recordings_run_out() {
    let context = Context::default();
    let (transport, client) = connected_client(1, context.clone());

    let subscription = response_subscription(&transport, &context);
    for recording_id in 0..3 {
        subscription.enqueue(frame_of(&listing_descriptor(2, recording_id)), 1);
    }
    subscription.enqueue(
        control_response_frame(CONTROL_SESSION_ID, 2, 0, ResponseCode::RecordingUnknown, ""),
        1,
    );

    let mut seen = Vec::new();
    let mut consumer = |descriptor: &RecordingDescriptor| seen.push(descriptor.recording_id);
    let count = client.list_recordings(0, 100, &mut consumer).unwrap();

    assert_eq!(count, 3);
    assert_eq!(seen, vec![0, 1, 2]);
}

#[test]
fn listing_deadline_resets_on_progress() {
    let context = Context::default().with_message_timeout(Duration::from_millis(80));
    let (transport, client) = connected_client(1, context.clone());
    let subscription = response_subscription(&transport, &context);

    // Feed descriptors slower than the timeout but faster than it expires,
    // so only the progress-based reset keeps the query alive.
    let feeder = std::thread::spawn({
        let subscription = Arc::clone(&subscription);
        move || {
            for recording_id in 0..5 {
                std::thread::sleep(Duration::from_millis(40));
                subscription.enqueue(frame_of(&listing_descriptor(2, recording_id)), 1);
            }
            std::thread::sleep(Duration::from_millis(40));
            subscription.enqueue(
                control_response_frame(CONTROL_SESSION_ID, 2, 0, ResponseCode::RecordingUnknown, ""),
                1,
            );
        }
    });

    let deliveries = AtomicUsize::new(0);
    let mut consumer = |_: &RecordingDescriptor| {
        deliveries.fetch_add(1, Ordering::SeqCst);
    };
    let count = client.list_recordings(0, 100, &mut consumer).unwrap();
    feeder.join().unwrap();

    assert_eq!(count, 5);
    assert_eq!(deliveries.load(Ordering::SeqCst), 5);
}

#[test]
fn stop_recording_for_publication_scopes_channel_to_session() {
    let context = Context::default();
    let (transport, client) = connected_client(1, context.clone());

    respond_ok(&transport, &context, 2, 20);
    respond_ok(&transport, &context, 3, 0);

    let publication = client
        .add_recorded_publication("aeron:udp?endpoint=x:40001", 1001)
        .unwrap();
    client.stop_recording_publication(publication.as_ref()).unwrap();

    let request_publication = transport
        .find_publication_by_stream_id(context.control_request_stream_id())
        .expect("request publication");
    let sent = request_publication.sent_messages();
    let stop = decode_message::<StopRecordingRequest>(sent.last().unwrap()).unwrap();

    let expected_channel = add_session_id("aeron:udp?endpoint=x:40001", publication.session_id());
    assert_eq!(stop.channel, expected_channel);
    assert_eq!(stop.stream_id, 1001);
}

#[test]
fn recorded_publication_must_be_original() {
    let context = Context::default();
    let (transport, client) = connected_client(1, context.clone());

    // A publication already exists for the channel, so the new one joins
    // the stream instead of creating it.
    transport.set_publications_original(false);

    let err = client
        .add_recorded_publication("aeron:udp?endpoint=x:40002", 1003)
        .unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::PublicationAlreadyAdded { stream_id: 1003, .. }
    ));

    // No recording was requested for the rejected publication.
    let request_publication = transport
        .find_publication_by_stream_id(context.control_request_stream_id())
        .expect("request publication");
    assert_eq!(request_publication.sent_messages().len(), 1); // connect only
}

#[test]
fn replay_helper_subscribes_to_the_replay_session() {
    let context = Context::default();
    let (transport, client) = connected_client(1, context.clone());

    // Replay session id 338 in the low 32 bits.
    respond_ok(&transport, &context, 2, 338);
    let registration_id = client
        .replay(5, 0, i64::MAX, "aeron:udp?endpoint=localhost:0", 1001)
        .unwrap();

    let replay_subscription = transport.subscription(registration_id).expect("replay subscription");
    assert_eq!(replay_subscription.stream_id(), 1001);
    assert_eq!(
        replay_subscription.channel(),
        "aeron:udp?endpoint=localhost:0|session-id=338"
    );
}

#[test]
fn counters_snapshot_resolves_recording_positions() {
    let transport = TestTransport::new();
    transport.set_counters(
        CountersBuilder::default()
            .recording_position(5, -338, "127.0.0.1:40001")
            .build_bytes(),
    );

    let reader = CountersReader::new(transport.counters_metadata());
    let counter_id = reader.find_by_recording_id(5);
    assert_eq!(reader.recording_id(counter_id), 5);
    assert_eq!(reader.source_identity(counter_id), "127.0.0.1:40001");
}
