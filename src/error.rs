//! Typed archive failures and the enumerated error-code surface.

use std::sync::Arc;

use thiserror::Error;

use crate::codec::{DecodeError, EncodeError, ResponseCode};

/// Error code reported by the archive in the `relevant_id` field of an
/// ERROR control response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Generic,
    ActiveListing,
    ActiveRecording,
    ActiveSubscription,
    UnknownSubscription,
    UnknownRecording,
    UnknownReplay,
    MaxReplays,
    MaxRecordings,
    InvalidExtension,
}

impl ErrorCode {
    /// Map the `relevant_id` of an ERROR response onto a code.
    ///
    /// Unrecognised values fall back to [ErrorCode::Generic] so that a newer
    /// server cannot make the client unable to report its errors.
    pub fn from_relevant_id(relevant_id: i64) -> Self {
        match relevant_id {
            1 => ErrorCode::ActiveListing,
            2 => ErrorCode::ActiveRecording,
            3 => ErrorCode::ActiveSubscription,
            4 => ErrorCode::UnknownSubscription,
            5 => ErrorCode::UnknownRecording,
            6 => ErrorCode::UnknownReplay,
            7 => ErrorCode::MaxReplays,
            8 => ErrorCode::MaxRecordings,
            9 => ErrorCode::InvalidExtension,
            _ => ErrorCode::Generic,
        }
    }

    pub fn as_relevant_id(self) -> i64 {
        match self {
            ErrorCode::Generic => 0,
            ErrorCode::ActiveListing => 1,
            ErrorCode::ActiveRecording => 2,
            ErrorCode::ActiveSubscription => 3,
            ErrorCode::UnknownSubscription => 4,
            ErrorCode::UnknownRecording => 5,
            ErrorCode::UnknownReplay => 6,
            ErrorCode::MaxReplays => 7,
            ErrorCode::MaxRecordings => 8,
            ErrorCode::InvalidExtension => 9,
        }
    }
}

/// Handler for asynchronous errors that arrive on the control session but
/// do not belong to the request currently being awaited.
pub type ErrorHandler = Arc<dyn Fn(&ArchiveError) + Send + Sync>;

/// Failures raised by archive client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// The transport did not accept a request within the retry budget.
    #[error("failed to send {request} request")]
    SendFailed { request: &'static str },

    /// The request publication has been closed.
    #[error("connection to the archive has been closed")]
    PublicationClosed,

    /// The request publication reached its maximum position.
    #[error("offer failed due to max position being reached")]
    MaxPositionExceeded,

    /// The response subscription lost connectivity while a response was
    /// awaited.
    #[error("subscription to archive is not connected")]
    NotConnected,

    /// No response arrived before the deadline.
    #[error("timed out awaiting response: correlation_id={correlation_id}")]
    ResponseTimeout { correlation_id: i64 },

    /// A fragment carried a schema id other than the archive control schema.
    #[error("expected schema_id={expected}, actual={actual}")]
    SchemaMismatch { expected: u16, actual: u16 },

    /// A matched response carried a code other than OK or ERROR.
    #[error("unexpected response code: {code:?}")]
    UnexpectedResponseCode { code: ResponseCode },

    /// The archive reported an error for a request.
    #[error("archive error response for correlation_id={correlation_id}: {message}")]
    ErrorResponse {
        error_code: ErrorCode,
        message: String,
        correlation_id: i64,
    },

    /// A recorded publication was requested for a channel and stream that
    /// already has a publication.
    #[error("publication already added for channel={channel} stream_id={stream_id}")]
    PublicationAlreadyAdded { channel: String, stream_id: i32 },

    /// Replay-merge requires a subscription in manual multi-destination-cast
    /// control mode.
    #[error("subscription channel must be manual control mode: mode={mode}")]
    NotManualControlMode { mode: String },

    /// `into_client` was called before the async connect completed.
    #[error("archive connect has not completed")]
    ConnectNotComplete,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl ArchiveError {
    /// Archive-reported error code, [ErrorCode::Generic] for local failures.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ArchiveError::ErrorResponse { error_code, .. } => *error_code,
            _ => ErrorCode::Generic,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ArchiveError::ResponseTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevant_id_round_trips_known_codes() {
        for id in 0..=9 {
            let code = ErrorCode::from_relevant_id(id);
            assert_eq!(code.as_relevant_id(), id);
        }
    }

    #[test]
    fn unknown_relevant_id_maps_to_generic() {
        assert_eq!(ErrorCode::from_relevant_id(42), ErrorCode::Generic);
        assert_eq!(ErrorCode::from_relevant_id(-1), ErrorCode::Generic);
    }

    #[test]
    fn error_code_defaults_to_generic_for_local_failures() {
        let err = ArchiveError::ResponseTimeout { correlation_id: 10 };
        assert_eq!(err.error_code(), ErrorCode::Generic);
        assert!(err.is_timeout());
    }
}
