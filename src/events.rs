//! Asynchronous recording lifecycle events.
//!
//! The archive publishes start/progress/stop events for recordings on a
//! dedicated channel, see
//! [Context::recording_events_channel](crate::config::Context::recording_events_channel).

use std::sync::Arc;

use crate::codec::{
    decode_body, template_ids, Envelope, RecordingProgress, RecordingStarted, RecordingStopped,
    SCHEMA_ID,
};
use crate::error::ArchiveError;
use crate::transport::{FragmentContext, Subscription};
use crate::Result;

/// Decodes recording events and dispatches them by template id.
///
/// Messages with unknown template ids are skipped silently so newer
/// archives can add event types.
pub struct RecordingEventsListener {
    subscription: Arc<dyn Subscription>,
}

impl RecordingEventsListener {
    pub fn new(subscription: Arc<dyn Subscription>) -> Self {
        Self { subscription }
    }

    pub fn subscription(&self) -> &Arc<dyn Subscription> {
        &self.subscription
    }

    /// Poll up to `fragment_limit` events, dispatching each to the matching
    /// callback. Returns the number of fragments read.
    pub fn poll<S, P, T>(
        &self,
        on_start: &mut S,
        on_progress: &mut P,
        on_stop: &mut T,
        fragment_limit: usize,
    ) -> Result<usize>
    where
        S: FnMut(&RecordingStarted),
        P: FnMut(&RecordingProgress),
        T: FnMut(&RecordingStopped),
    {
        let mut failure: Option<ArchiveError> = None;
        let mut on_message = |message: &[u8], _context: &FragmentContext| {
            if failure.is_some() {
                return;
            }

            let (envelope, body) = match Envelope::decode(message) {
                Ok(parts) => parts,
                Err(e) => {
                    failure = Some(e.into());
                    return;
                }
            };
            if envelope.schema_id != SCHEMA_ID {
                failure = Some(ArchiveError::SchemaMismatch {
                    expected: SCHEMA_ID,
                    actual: envelope.schema_id,
                });
                return;
            }

            let result = match envelope.template_id {
                template_ids::RECORDING_STARTED => {
                    decode_body::<RecordingStarted>(body).map(|event| on_start(&event))
                }
                template_ids::RECORDING_PROGRESS => {
                    decode_body::<RecordingProgress>(body).map(|event| on_progress(&event))
                }
                template_ids::RECORDING_STOPPED => {
                    decode_body::<RecordingStopped>(body).map(|event| on_stop(&event))
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                failure = Some(e.into());
            }
        };

        let fragments = self.subscription.poll(&mut on_message, fragment_limit);
        match failure {
            Some(error) => Err(error),
            None => Ok(fragments),
        }
    }
}

type StartHandler = Box<dyn FnMut(&RecordingStarted) + Send>;
type ProgressHandler = Box<dyn FnMut(&RecordingProgress) + Send>;
type StopHandler = Box<dyn FnMut(&RecordingStopped) + Send>;

/// Bundles a [RecordingEventsListener] with stored handlers and a fragment
/// limit for repeated duty-cycle polling.
pub struct RecordingEventsAdapter {
    on_start: StartHandler,
    on_progress: ProgressHandler,
    on_stop: StopHandler,
    listener: RecordingEventsListener,
    fragment_limit: usize,
}

impl RecordingEventsAdapter {
    pub fn new(
        on_start: StartHandler,
        on_progress: ProgressHandler,
        on_stop: StopHandler,
        subscription: Arc<dyn Subscription>,
        fragment_limit: usize,
    ) -> Self {
        Self {
            on_start,
            on_progress,
            on_stop,
            listener: RecordingEventsListener::new(subscription),
            fragment_limit,
        }
    }

    pub fn subscription(&self) -> &Arc<dyn Subscription> {
        self.listener.subscription()
    }

    pub fn poll(&mut self) -> Result<usize> {
        self.listener.poll(
            &mut self.on_start,
            &mut self.on_progress,
            &mut self.on_stop,
            self.fragment_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{frame_of, TestSubscription};

    fn started(recording_id: i64) -> RecordingStarted {
        RecordingStarted {
            recording_id,
            start_position: 0,
            session_id: 1,
            stream_id: 1001,
            channel: "aeron:udp?endpoint=x:0".to_string(),
            source_identity: "src".to_string(),
        }
    }

    #[test]
    fn dispatches_events_by_template() {
        let subscription = TestSubscription::new("aeron:udp?control-mode=dynamic", 30);
        subscription.enqueue(frame_of(&started(5)), 1);
        subscription.enqueue(
            frame_of(&RecordingProgress { recording_id: 5, start_position: 0, position: 4096 }),
            1,
        );
        subscription.enqueue(
            frame_of(&RecordingStopped { recording_id: 5, start_position: 0, stop_position: 8192 }),
            1,
        );

        let dyn_subscription: Arc<dyn Subscription> = Arc::clone(&subscription) as _;
        let listener = RecordingEventsListener::new(dyn_subscription);

        let events = std::cell::RefCell::new(Vec::new());
        let mut on_start =
            |e: &RecordingStarted| events.borrow_mut().push(format!("start:{}", e.recording_id));
        let mut on_progress = |e: &RecordingProgress| {
            events.borrow_mut().push(format!("progress:{}", e.position))
        };
        let mut on_stop =
            |e: &RecordingStopped| events.borrow_mut().push(format!("stop:{}", e.stop_position));

        let fragments = listener.poll(&mut on_start, &mut on_progress, &mut on_stop, 10).unwrap();
        assert_eq!(fragments, 3);
        assert_eq!(events.into_inner(), vec!["start:5", "progress:4096", "stop:8192"]);
    }

    #[test]
    fn unknown_templates_are_skipped() {
        let subscription = TestSubscription::new("aeron:udp?control-mode=dynamic", 30);
        subscription.enqueue(
            frame_of(&crate::codec::ControlResponse {
                control_session_id: 7,
                correlation_id: 1,
                relevant_id: 0,
                code: crate::codec::ResponseCode::Ok,
                error_message: String::new(),
            }),
            1,
        );
        subscription.enqueue(frame_of(&started(6)), 1);

        let dyn_subscription: Arc<dyn Subscription> = Arc::clone(&subscription) as _;
        let listener = RecordingEventsListener::new(dyn_subscription);

        let mut starts = 0;
        let mut on_start = |_: &RecordingStarted| starts += 1;
        let mut on_progress = |_: &RecordingProgress| {};
        let mut on_stop = |_: &RecordingStopped| {};
        listener.poll(&mut on_start, &mut on_progress, &mut on_stop, 10).unwrap();
        assert_eq!(starts, 1);
    }

    #[test]
    fn adapter_polls_with_stored_handlers() {
        let subscription = TestSubscription::new("aeron:udp?control-mode=dynamic", 30);
        subscription.enqueue(frame_of(&started(9)), 1);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dyn_subscription: Arc<dyn Subscription> = Arc::clone(&subscription) as _;
        let mut adapter = RecordingEventsAdapter::new(
            Box::new(move |e| sink.lock().expect("sink lock poisoned").push(e.recording_id)),
            Box::new(|_| {}),
            Box::new(|_| {}),
            dyn_subscription,
            10,
        );

        adapter.poll().unwrap();
        assert_eq!(*seen.lock().expect("sink lock poisoned"), vec![9]);
    }
}
