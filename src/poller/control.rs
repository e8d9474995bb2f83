//! Poller for control response acknowledgements.

use std::sync::Arc;

use crate::codec::{decode_body, template_ids, ControlResponse, Envelope, ResponseCode, SCHEMA_ID};
use crate::error::ArchiveError;
use crate::fragment::FragmentAssembler;
use crate::transport::{ControlledPollAction, FragmentContext, Subscription};
use crate::{Result, NULL_VALUE};

/// Decodes control responses from the response subscription, exposing the
/// fields of the last complete response.
///
/// After `poll` returns, either `is_poll_complete` is true and the decoded
/// fields are valid, or it is false and fields from a prior poll must not
/// be consumed.
pub struct ControlResponsePoller {
    subscription: Arc<dyn Subscription>,
    assembler: FragmentAssembler,
    fragment_limit: usize,
    control_session_id: i64,
    correlation_id: i64,
    relevant_id: i64,
    template_id: i32,
    code: Option<ResponseCode>,
    error_message: String,
    is_poll_complete: bool,
}

impl ControlResponsePoller {
    pub fn new(subscription: Arc<dyn Subscription>, fragment_limit: usize) -> Self {
        Self {
            subscription,
            assembler: FragmentAssembler::default(),
            fragment_limit,
            control_session_id: NULL_VALUE,
            correlation_id: NULL_VALUE,
            relevant_id: NULL_VALUE,
            template_id: NULL_VALUE as i32,
            code: None,
            error_message: String::new(),
            is_poll_complete: false,
        }
    }

    pub fn subscription(&self) -> &Arc<dyn Subscription> {
        &self.subscription
    }

    /// Poll once for a control response.
    ///
    /// Returns the number of fragments read; zero when nothing was
    /// available.
    pub fn poll(&mut self) -> Result<usize> {
        self.control_session_id = NULL_VALUE;
        self.correlation_id = NULL_VALUE;
        self.relevant_id = NULL_VALUE;
        self.template_id = NULL_VALUE as i32;
        self.code = None;
        self.error_message.clear();
        self.is_poll_complete = false;

        let Self {
            subscription,
            assembler,
            fragment_limit,
            control_session_id,
            correlation_id,
            relevant_id,
            template_id,
            code,
            error_message,
            is_poll_complete,
        } = self;

        let mut failure: Option<ArchiveError> = None;
        let mut on_message = |message: &[u8], _context: &FragmentContext| {
            if *is_poll_complete {
                return ControlledPollAction::Abort;
            }

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

            *template_id = envelope.template_id as i32;
            if envelope.template_id != template_ids::CONTROL_RESPONSE {
                return ControlledPollAction::Continue;
            }

            match decode_body::<ControlResponse>(body) {
                Ok(response) => {
                    *control_session_id = response.control_session_id;
                    *correlation_id = response.correlation_id;
                    *relevant_id = response.relevant_id;
                    *code = Some(response.code);
                    *error_message = response.error_message;
                    *is_poll_complete = true;
                    ControlledPollAction::Break
                }
                Err(e) => {
                    failure = Some(e.into());
                    ControlledPollAction::Abort
                }
            }
        };

        let fragments =
            subscription.controlled_poll(&mut assembler.controlled(&mut on_message), *fragment_limit);

        match failure {
            Some(error) => Err(error),
            None => Ok(fragments),
        }
    }

    /// Control session id of the last polled response.
    pub fn control_session_id(&self) -> i64 {
        self.control_session_id
    }

    /// Correlation id of the last polled response.
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    /// Relevant id returned with the response, e.g. a replay session id.
    pub fn relevant_id(&self) -> i64 {
        self.relevant_id
    }

    /// Template id of the last received message.
    pub fn template_id(&self) -> i32 {
        self.template_id
    }

    /// Did the last poll receive a complete message.
    pub fn is_poll_complete(&self) -> bool {
        self.is_poll_complete
    }

    /// Was the last received message a control response.
    pub fn is_control_response(&self) -> bool {
        self.template_id == template_ids::CONTROL_RESPONSE as i32
    }

    /// Response code of the last response, if one was decoded.
    pub fn code(&self) -> Option<ResponseCode> {
        self.code
    }

    pub fn is_code_ok(&self) -> bool {
        self.code == Some(ResponseCode::Ok)
    }

    pub fn is_code_error(&self) -> bool {
        self.code == Some(ResponseCode::Error)
    }

    /// Error message of the last response, empty when none was carried.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}
