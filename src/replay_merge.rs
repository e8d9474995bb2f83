//! Replay-merge: catch a late subscriber up to a live publisher.
//!
//! A subscriber joining after publication has begun obtains historical
//! data by replaying the recording while the live stream continues. The
//! merge runs both over one subscription in manual multi-destination-cast
//! control mode: the replay destination is present from the start, the
//! live destination is added once the subscriber has nearly caught up, and
//! the replay is stopped and removed once the live stream has safely
//! overtaken it. The subscriber observes a single continuous stream.
//!
//! Drive [do_work](ReplayMerge::do_work) on the polling thread; each call
//! performs at most one archive request or one poller observation. At most
//! one archive request is in flight at a time.

use std::sync::Arc;

use tracing::debug;

use crate::channel::{channel_param, MDC_CONTROL_MODE_MANUAL, MDC_CONTROL_MODE_PARAM_NAME};
use crate::client::ArchiveClient;
use crate::error::{ArchiveError, ErrorCode};
use crate::transport::{Image, Subscription};
use crate::{Result, NULL_POSITION, NULL_VALUE};

/// Progress of a replay merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Resolving the position to catch up to.
    GetRecordingPosition,
    /// Starting the replay of historical data.
    Replay,
    /// Waiting for the replay image to reach the target position.
    Catchup,
    /// Deciding whether to join live or keep catching up.
    AttemptLiveJoin,
    /// Stopping the replay after the live stream has overtaken it.
    StopReplay,
    /// Merged with the live stream; terminal.
    Merged,
    /// An archive operation failed; terminal.
    Failed,
    /// Explicitly closed before merging; terminal.
    Closed,
}

/// Divisor of the image term-buffer length giving the margin at which the
/// live destination is added.
const LIVE_ADD_TERM_FRACTION: i64 = 16;

/// Divisor of the image term-buffer length giving the margin by which live
/// must overtake the recording position before the replay is removed.
const REPLAY_REMOVE_TERM_FRACTION: i64 = 4;

/// Merges a replay of a recording with its live stream.
impl<'a> std::fmt::Debug for ReplayMerge<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayMerge")
            .field("recording_id", &self.recording_id)
            .field("state", &self.state)
            .finish()
    }
}

pub struct ReplayMerge<'a> {
    archive: &'a ArchiveClient,
    subscription: Arc<dyn Subscription>,
    replay_channel: String,
    replay_destination: String,
    live_destination: String,
    recording_id: i64,
    start_position: i64,
    state: MergeState,
    active_correlation_id: i64,
    next_target_position: i64,
    initial_max_position: i64,
    replay_session_id: i64,
    image: Option<Arc<dyn Image>>,
    is_live_added: bool,
    is_replay_active: bool,
    live_add_threshold: i64,
    replay_remove_threshold: i64,
}

impl<'a> ReplayMerge<'a> {
    /// Begin a merge over `subscription`, which must be in manual
    /// multi-destination-cast control mode. The replay destination is added
    /// immediately; the live destination is added by the state machine.
    pub fn new(
        archive: &'a ArchiveClient,
        subscription: Arc<dyn Subscription>,
        replay_channel: impl Into<String>,
        replay_destination: impl Into<String>,
        live_destination: impl Into<String>,
        recording_id: i64,
        start_position: i64,
    ) -> Result<Self> {
        let channel = subscription.channel();
        let mode = channel_param(&channel, MDC_CONTROL_MODE_PARAM_NAME).unwrap_or("");
        if mode != MDC_CONTROL_MODE_MANUAL {
            return Err(ArchiveError::NotManualControlMode { mode: mode.to_string() });
        }

        let replay_destination = replay_destination.into();
        subscription.add_destination(&replay_destination);

        Ok(Self {
            archive,
            subscription,
            replay_channel: replay_channel.into(),
            replay_destination,
            live_destination: live_destination.into(),
            recording_id,
            start_position,
            state: MergeState::GetRecordingPosition,
            active_correlation_id: NULL_VALUE,
            next_target_position: NULL_POSITION,
            initial_max_position: NULL_POSITION,
            replay_session_id: NULL_VALUE,
            image: None,
            is_live_added: false,
            is_replay_active: false,
            live_add_threshold: 0,
            replay_remove_threshold: 0,
        })
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Has the merge reached the live stream.
    pub fn is_merged(&self) -> bool {
        self.state == MergeState::Merged
    }

    pub fn is_live_added(&self) -> bool {
        self.is_live_added
    }

    /// The image of the replayed stream once it has appeared on the
    /// subscription.
    pub fn image(&self) -> Option<&Arc<dyn Image>> {
        self.image.as_ref()
    }

    /// Position the merge is currently targeting.
    pub fn next_target_position(&self) -> i64 {
        self.next_target_position
    }

    /// Recording position first observed, i.e. where live data began while
    /// the merge was being set up.
    pub fn initial_max_position(&self) -> i64 {
        self.initial_max_position
    }

    /// Perform one unit of merge work; returns the work count.
    ///
    /// On failure the state becomes [MergeState::Failed] and the error is
    /// returned; further calls are no-ops.
    pub fn do_work(&mut self) -> Result<usize> {
        let result = match self.state {
            MergeState::GetRecordingPosition => self.await_initial_recording_position(),
            MergeState::Replay => self.await_replay(),
            MergeState::Catchup => self.await_catch_up(),
            MergeState::AttemptLiveJoin => self.await_updated_recording_position(),
            MergeState::StopReplay => self.await_stop_replay(),
            MergeState::Merged | MergeState::Failed | MergeState::Closed => Ok(0),
        };

        if result.is_err() {
            self.transition(MergeState::Failed);
        }
        result
    }

    /// Shut the merge down, stopping the replay and removing the replay
    /// destination unless already merged or closed.
    pub fn close(&mut self) {
        if matches!(self.state, MergeState::Closed | MergeState::Merged) {
            return;
        }

        if self.is_replay_active {
            self.is_replay_active = false;
            let replay_session_id = self.replay_session_id;
            // Best-effort: the response is not awaited during shutdown.
            let _ = self.archive.with_control(|control, control_session_id| {
                let correlation_id = self.archive.transport().next_correlation_id();
                control
                    .proxy
                    .stop_replay(replay_session_id, correlation_id, control_session_id)
            });
        }

        self.subscription.remove_destination(&self.replay_destination);
        self.transition(MergeState::Closed);
    }

    fn transition(&mut self, next: MergeState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "replay merge transition");
            self.state = next;
        }
    }

    fn await_initial_recording_position(&mut self) -> Result<usize> {
        let mut work_count = 0;

        if self.active_correlation_id == NULL_VALUE {
            let recording_id = self.recording_id;
            let correlation_id = self.archive.transport().next_correlation_id();
            let offered = self.archive.with_control(|control, control_session_id| {
                control
                    .proxy
                    .get_recording_position(recording_id, correlation_id, control_session_id)
            })?;
            if offered {
                self.active_correlation_id = correlation_id;
                work_count += 1;
            }
        } else if let Some(position) = self.poll_for_merge_response()? {
            self.next_target_position = position;
            if self.next_target_position == NULL_POSITION {
                // The recording has already stopped; its stop position is
                // the catch-up target.
                let recording_id = self.recording_id;
                let correlation_id = self.archive.transport().next_correlation_id();
                let offered = self.archive.with_control(|control, control_session_id| {
                    control
                        .proxy
                        .get_stop_position(recording_id, correlation_id, control_session_id)
                })?;
                if offered {
                    self.active_correlation_id = correlation_id;
                    work_count += 1;
                } else {
                    self.active_correlation_id = NULL_VALUE;
                }
            } else {
                self.initial_max_position = self.next_target_position;
                self.active_correlation_id = NULL_VALUE;
                self.transition(MergeState::Replay);
            }
            work_count += 1;
        }

        Ok(work_count)
    }

    fn await_replay(&mut self) -> Result<usize> {
        let mut work_count = 0;

        if self.active_correlation_id == NULL_VALUE {
            let recording_id = self.recording_id;
            let start_position = self.start_position;
            let replay_channel = self.replay_channel.clone();
            let replay_stream_id = self.subscription.stream_id();
            let correlation_id = self.archive.transport().next_correlation_id();
            let offered = self.archive.with_control(|control, control_session_id| {
                control.proxy.replay(
                    recording_id,
                    start_position,
                    i64::MAX,
                    &replay_channel,
                    replay_stream_id,
                    correlation_id,
                    control_session_id,
                )
            })?;
            if offered {
                self.active_correlation_id = correlation_id;
                work_count += 1;
            }
        } else if let Some(replay_session_id) = self.poll_for_merge_response()? {
            self.is_replay_active = true;
            self.replay_session_id = replay_session_id;
            self.active_correlation_id = NULL_VALUE;
            self.transition(MergeState::Catchup);
            work_count += 1;
        }

        Ok(work_count)
    }

    fn await_catch_up(&mut self) -> Result<usize> {
        let mut work_count = 0;

        if self.image.is_none() && self.subscription.is_connected() {
            if let Some(image) =
                self.subscription.image_by_session_id(self.replay_session_id as i32)
            {
                let term_length = i64::from(image.term_buffer_length());
                self.live_add_threshold = term_length / LIVE_ADD_TERM_FRACTION;
                self.replay_remove_threshold = term_length / REPLAY_REMOVE_TERM_FRACTION;
                self.image = Some(image);
            }
        }

        if let Some(image) = &self.image {
            if image.position() >= self.next_target_position {
                self.active_correlation_id = NULL_VALUE;
                self.transition(MergeState::AttemptLiveJoin);
                work_count += 1;
            }
        }

        Ok(work_count)
    }

    fn await_updated_recording_position(&mut self) -> Result<usize> {
        let mut work_count = 0;

        if self.active_correlation_id == NULL_VALUE {
            let recording_id = self.recording_id;
            let correlation_id = self.archive.transport().next_correlation_id();
            let offered = self.archive.with_control(|control, control_session_id| {
                control
                    .proxy
                    .get_recording_position(recording_id, correlation_id, control_session_id)
            })?;
            if offered {
                self.active_correlation_id = correlation_id;
                work_count += 1;
            }
        } else if let Some(position) = self.poll_for_merge_response()? {
            if position == NULL_POSITION {
                // Recording transitioned to stopped; ask again.
                let recording_id = self.recording_id;
                let correlation_id = self.archive.transport().next_correlation_id();
                let offered = self.archive.with_control(|control, control_session_id| {
                    control
                        .proxy
                        .get_recording_position(recording_id, correlation_id, control_session_id)
                })?;
                if offered {
                    self.active_correlation_id = correlation_id;
                } else {
                    self.active_correlation_id = NULL_VALUE;
                }
            } else {
                self.next_target_position = position;
                let mut next_state = MergeState::Catchup;

                if let Some(image) = &self.image {
                    let position = image.position();

                    if self.should_add_live_destination(position) {
                        self.subscription.add_destination(&self.live_destination);
                        self.is_live_added = true;
                    } else if self.should_stop_and_remove_replay(position) {
                        next_state = MergeState::StopReplay;
                    }
                }

                self.active_correlation_id = NULL_VALUE;
                self.transition(next_state);
            }
            work_count += 1;
        }

        Ok(work_count)
    }

    fn await_stop_replay(&mut self) -> Result<usize> {
        let mut work_count = 0;

        if self.active_correlation_id == NULL_VALUE {
            let replay_session_id = self.replay_session_id;
            let correlation_id = self.archive.transport().next_correlation_id();
            let offered = self.archive.with_control(|control, control_session_id| {
                control
                    .proxy
                    .stop_replay(replay_session_id, correlation_id, control_session_id)
            })?;
            if offered {
                self.active_correlation_id = correlation_id;
                work_count += 1;
            }
        } else if self.poll_for_merge_response()?.is_some() {
            self.is_replay_active = false;
            self.replay_session_id = NULL_VALUE;
            self.active_correlation_id = NULL_VALUE;
            self.subscription.remove_destination(&self.replay_destination);
            self.transition(MergeState::Merged);
            work_count += 1;
        }

        Ok(work_count)
    }

    /// The subscriber is close enough to the latest archive position that
    /// the live stream can keep it fed.
    fn should_add_live_destination(&self, position: i64) -> bool {
        !self.is_live_added && self.next_target_position - position <= self.live_add_threshold
    }

    /// The merged stream has overtaken the recording position by a safe
    /// margin; the replay adds nothing further.
    fn should_stop_and_remove_replay(&self, position: i64) -> bool {
        self.is_live_added && position - self.next_target_position >= self.replay_remove_threshold
    }

    /// One non-blocking observation of the control response stream for the
    /// in-flight request.
    fn poll_for_merge_response(&mut self) -> Result<Option<i64>> {
        let correlation_id = self.active_correlation_id;
        self.archive.with_control(|control, control_session_id| {
            let fragments = control.response_poller.poll()?;
            let poller = &control.response_poller;

            if fragments > 0
                && poller.is_poll_complete()
                && poller.control_session_id() == control_session_id
                && poller.correlation_id() == correlation_id
            {
                if poller.is_code_error() {
                    return Err(ArchiveError::ErrorResponse {
                        error_code: ErrorCode::from_relevant_id(poller.relevant_id()),
                        message: poller.error_message().to_string(),
                        correlation_id,
                    });
                }
                return Ok(Some(poller.relevant_id()));
            }
            Ok(None)
        })
    }
}

impl Drop for ReplayMerge<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
