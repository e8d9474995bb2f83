//! Poller dispatching recording subscription descriptor streams.

use std::sync::Arc;

use tracing::warn;

use crate::codec::{
    decode_body, template_ids, ControlResponse, Envelope, RecordingSubscriptionDescriptor,
    ResponseCode, SCHEMA_ID,
};
use crate::error::{ArchiveError, ErrorCode, ErrorHandler};
use crate::fragment::FragmentAssembler;
use crate::transport::{ControlledPollAction, FragmentContext, Subscription};
use crate::{Result, NULL_VALUE};

/// Dispatches the bounded stream of subscription descriptors produced by a
/// listing query; the stream terminates with SUBSCRIPTION_UNKNOWN.
pub struct RecordingSubscriptionDescriptorPoller {
    subscription: Arc<dyn Subscription>,
    error_handler: Option<ErrorHandler>,
    control_session_id: i64,
    fragment_limit: usize,
    assembler: FragmentAssembler,
    correlation_id: i64,
    remaining_subscription_count: i32,
    is_dispatch_complete: bool,
    unrelated_error: Option<ArchiveError>,
}

impl RecordingSubscriptionDescriptorPoller {
    pub fn new(
        subscription: Arc<dyn Subscription>,
        error_handler: Option<ErrorHandler>,
        control_session_id: i64,
        fragment_limit: usize,
    ) -> Self {
        Self {
            subscription,
            error_handler,
            control_session_id,
            fragment_limit,
            assembler: FragmentAssembler::default(),
            correlation_id: NULL_VALUE,
            remaining_subscription_count: 0,
            is_dispatch_complete: false,
            unrelated_error: None,
        }
    }

    pub fn subscription(&self) -> &Arc<dyn Subscription> {
        &self.subscription
    }

    pub fn control_session_id(&self) -> i64 {
        self.control_session_id
    }

    /// Prepare to dispatch the descriptors of a new query.
    pub fn reset(&mut self, correlation_id: i64, subscription_count: i32) {
        self.correlation_id = correlation_id;
        self.remaining_subscription_count = subscription_count;
        self.is_dispatch_complete = false;
    }

    pub fn remaining_subscription_count(&self) -> i32 {
        self.remaining_subscription_count
    }

    pub fn is_dispatch_complete(&self) -> bool {
        self.is_dispatch_complete
    }

    /// See [RecordingDescriptorPoller::take_unrelated_error][super::RecordingDescriptorPoller::take_unrelated_error].
    pub fn take_unrelated_error(&mut self) -> Option<ArchiveError> {
        self.unrelated_error.take()
    }

    /// Poll once, dispatching matching descriptors to `consumer`.
    pub fn poll<F>(&mut self, consumer: &mut F) -> Result<usize>
    where
        F: FnMut(&RecordingSubscriptionDescriptor),
    {
        self.is_dispatch_complete = false;

        let Self {
            subscription,
            error_handler,
            control_session_id,
            fragment_limit,
            assembler,
            correlation_id,
            remaining_subscription_count,
            is_dispatch_complete,
            unrelated_error,
        } = self;

        let mut failure: Option<ArchiveError> = None;
        let mut on_message = |message: &[u8], _context: &FragmentContext| {
            let (envelope, body) = match Envelope::decode(message) {
                Ok(parts) => parts,
                Err(e) => {
                    failure = Some(e.into());
                    return ControlledPollAction::Abort;
                }
            };
            if envelope.schema_id != SCHEMA_ID {
                failure = Some(ArchiveError::SchemaMismatch {
                    expected: SCHEMA_ID,
                    actual: envelope.schema_id,
                });
                return ControlledPollAction::Abort;
            }

            match envelope.template_id {
                template_ids::CONTROL_RESPONSE => {
                    let response = match decode_body::<ControlResponse>(body) {
                        Ok(response) => response,
                        Err(e) => {
                            failure = Some(e.into());
                            return ControlledPollAction::Abort;
                        }
                    };
                    if response.control_session_id != *control_session_id {
                        return ControlledPollAction::Continue;
                    }

                    if response.code == ResponseCode::SubscriptionUnknown
                        && response.correlation_id == *correlation_id
                    {
                        *is_dispatch_complete = true;
                        return ControlledPollAction::Break;
                    }

                    if response.code == ResponseCode::Error {
                        let error = ArchiveError::ErrorResponse {
                            error_code: ErrorCode::from_relevant_id(response.relevant_id),
                            message: response.error_message,
                            correlation_id: response.correlation_id,
                        };
                        if response.correlation_id == *correlation_id {
                            failure = Some(error);
                            return ControlledPollAction::Abort;
                        }
                        match error_handler {
                            Some(handler) => handler(&error),
                            None => {
                                warn!("retaining archive error on unrelated correlation: {error}");
                                unrelated_error.get_or_insert(error);
                            }
                        }
                    }
                    ControlledPollAction::Continue
                }

                template_ids::RECORDING_SUBSCRIPTION_DESCRIPTOR => {
                    let descriptor = match decode_body::<RecordingSubscriptionDescriptor>(body) {
                        Ok(descriptor) => descriptor,
                        Err(e) => {
                            failure = Some(e.into());
                            return ControlledPollAction::Abort;
                        }
                    };
                    if descriptor.control_session_id != *control_session_id
                        || descriptor.correlation_id != *correlation_id
                    {
                        return ControlledPollAction::Continue;
                    }

                    consumer(&descriptor);
                    *remaining_subscription_count -= 1;
                    if *remaining_subscription_count == 0 {
                        *is_dispatch_complete = true;
                        return ControlledPollAction::Break;
                    }
                    ControlledPollAction::Continue
                }

                _ => ControlledPollAction::Continue,
            }
        };

        let fragments =
            subscription.controlled_poll(&mut assembler.controlled(&mut on_message), *fragment_limit);

        match failure {
            Some(error) => Err(error),
            None => Ok(fragments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::FRAGMENT_LIMIT;
    use crate::test_harness::{control_response_frame, frame_of, TestSubscription};

    fn descriptor(correlation_id: i64, subscription_id: i64) -> RecordingSubscriptionDescriptor {
        RecordingSubscriptionDescriptor {
            control_session_id: 7,
            correlation_id,
            subscription_id,
            stream_id: 1001,
            stripped_channel: "aeron:udp?endpoint=x:0".to_string(),
        }
    }

    fn poller(subscription: &Arc<TestSubscription>) -> RecordingSubscriptionDescriptorPoller {
        let subscription: Arc<dyn Subscription> = Arc::clone(subscription) as _;
        RecordingSubscriptionDescriptorPoller::new(subscription, None, 7, FRAGMENT_LIMIT)
    }

    #[test]
    fn subscription_unknown_terminates_dispatch() {
        let subscription = TestSubscription::new("aeron:udp?endpoint=localhost:8020", 20);
        subscription.enqueue(frame_of(&descriptor(10, 800)), 1);
        subscription
            .enqueue(control_response_frame(7, 10, 0, ResponseCode::SubscriptionUnknown, ""), 1);
        let mut poller = poller(&subscription);
        poller.reset(10, 10);

        let mut seen = Vec::new();
        let mut consumer = |d: &RecordingSubscriptionDescriptor| seen.push(d.subscription_id);
        poller.poll(&mut consumer).unwrap();

        assert!(poller.is_dispatch_complete());
        assert_eq!(seen, vec![800]);
        assert_eq!(poller.remaining_subscription_count(), 9);
    }

    #[test]
    fn count_exhaustion_terminates_dispatch() {
        let subscription = TestSubscription::new("aeron:udp?endpoint=localhost:8020", 20);
        subscription.enqueue(frame_of(&descriptor(10, 800)), 1);
        subscription.enqueue(frame_of(&descriptor(10, 801)), 1);
        subscription.enqueue(frame_of(&descriptor(10, 802)), 1);
        let mut poller = poller(&subscription);
        poller.reset(10, 2);

        let mut seen = Vec::new();
        let mut consumer = |d: &RecordingSubscriptionDescriptor| seen.push(d.subscription_id);
        poller.poll(&mut consumer).unwrap();

        assert!(poller.is_dispatch_complete());
        assert_eq!(seen, vec![800, 801]);
    }

    #[test]
    fn error_on_matching_correlation_is_fatal() {
        let subscription = TestSubscription::new("aeron:udp?endpoint=localhost:8020", 20);
        subscription.enqueue(control_response_frame(7, 10, 3, ResponseCode::Error, "denied"), 1);
        let mut poller = poller(&subscription);
        poller.reset(10, 1);

        let mut consumer = |_: &RecordingSubscriptionDescriptor| {};
        let err = poller.poll(&mut consumer).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ActiveSubscription);
    }
}
