//! Poller dispatching recording descriptor streams to a consumer.

use std::sync::Arc;

use tracing::warn;

use crate::codec::{
    decode_body, template_ids, ControlResponse, Envelope, RecordingDescriptor, ResponseCode,
    SCHEMA_ID,
};
use crate::error::{ArchiveError, ErrorCode, ErrorHandler};
use crate::fragment::FragmentAssembler;
use crate::transport::{ControlledPollAction, FragmentContext, Subscription};
use crate::{Result, NULL_VALUE};

/// Dispatches the bounded stream of recording descriptors produced by a
/// listing query.
///
/// Before polling for a query, call [reset](Self::reset) with the query's
/// correlation id and expected record count. Dispatch completes when the
/// count is exhausted or the archive terminates the stream with a
/// RECORDING_UNKNOWN response.
pub struct RecordingDescriptorPoller {
    subscription: Arc<dyn Subscription>,
    error_handler: Option<ErrorHandler>,
    control_session_id: i64,
    fragment_limit: usize,
    assembler: FragmentAssembler,
    correlation_id: i64,
    remaining_record_count: i32,
    is_dispatch_complete: bool,
    unrelated_error: Option<ArchiveError>,
}

impl RecordingDescriptorPoller {
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
            remaining_record_count: 0,
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
    pub fn reset(&mut self, correlation_id: i64, record_count: i32) {
        self.correlation_id = correlation_id;
        self.remaining_record_count = record_count;
        self.is_dispatch_complete = false;
    }

    pub fn remaining_record_count(&self) -> i32 {
        self.remaining_record_count
    }

    pub fn is_dispatch_complete(&self) -> bool {
        self.is_dispatch_complete
    }

    /// An ERROR response for another correlation observed while no error
    /// handler is installed; held so the session can surface it later.
    pub fn take_unrelated_error(&mut self) -> Option<ArchiveError> {
        self.unrelated_error.take()
    }

    /// Poll once, dispatching matching descriptors to `consumer`.
    pub fn poll<F>(&mut self, consumer: &mut F) -> Result<usize>
    where
        F: FnMut(&RecordingDescriptor),
    {
        self.is_dispatch_complete = false;

        let Self {
            subscription,
            error_handler,
            control_session_id,
            fragment_limit,
            assembler,
            correlation_id,
            remaining_record_count,
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

                    if response.code == ResponseCode::RecordingUnknown
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

                template_ids::RECORDING_DESCRIPTOR => {
                    let descriptor = match decode_body::<RecordingDescriptor>(body) {
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
                    *remaining_record_count -= 1;
                    if *remaining_record_count == 0 {
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
