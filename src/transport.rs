//! Contract consumed from the underlying messaging transport.
//!
//! The transport (publications, subscriptions, images, term buffers, the
//! driver conductor and the counter registry) lives outside this crate.
//! These traits capture exactly the behaviour the archive client depends
//! on; [crate::test_harness] provides an in-memory implementation.
//!
//! Collaborators are shared as `Arc<dyn ...>` and expose `&self` methods,
//! leaving interior mutability to the implementor. The client itself
//! serialises all use of them behind its session mutex.

use std::sync::Arc;

use bytes::Bytes;

/// Outcome of offering a message to a publication.
///
/// On success the transport emits exactly one application message; on any
/// failure no partial message is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Message accepted; the new stream position.
    Position(i64),
    /// Transient flow-control push-back; retry later.
    BackPressured,
    /// No subscriber is connected.
    NotConnected,
    /// Transient administrative action in the driver; retry later.
    AdminAction,
    /// The publication has been closed.
    Closed,
    /// The publication reached its maximum possible position.
    MaxPositionExceeded,
}

impl Offer {
    pub fn is_accepted(self) -> bool {
        matches!(self, Offer::Position(_))
    }
}

/// Action returned by a controlled fragment handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlledPollAction {
    /// Consume the fragment and continue polling.
    Continue,
    /// Consume the fragment and stop polling after it.
    Break,
    /// Do not consume the fragment; it will be redelivered.
    Abort,
    /// Consume the fragment and commit the position before continuing.
    Commit,
}

/// Framing flags on a delivered fragment.
pub mod frame_flags {
    pub const BEGIN_FRAGMENT: u8 = 0b1000_0000;
    pub const END_FRAGMENT: u8 = 0b0100_0000;
    pub const UNFRAGMENTED: u8 = BEGIN_FRAGMENT | END_FRAGMENT;
}

/// Per-fragment delivery metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentContext {
    pub session_id: i32,
    pub flags: u8,
}

impl FragmentContext {
    pub fn unfragmented(session_id: i32) -> Self {
        Self { session_id, flags: frame_flags::UNFRAGMENTED }
    }

    pub fn is_unfragmented(&self) -> bool {
        self.flags & frame_flags::UNFRAGMENTED == frame_flags::UNFRAGMENTED
    }

    pub fn is_begin_fragment(&self) -> bool {
        self.flags & frame_flags::BEGIN_FRAGMENT != 0
    }

    pub fn is_end_fragment(&self) -> bool {
        self.flags & frame_flags::END_FRAGMENT != 0
    }
}

/// Handler for whole or partial fragments under controlled polling.
pub type ControlledFragmentHandler<'a> =
    &'a mut dyn FnMut(&[u8], &FragmentContext) -> ControlledPollAction;

/// Handler for fragments under plain polling.
pub type FragmentHandler<'a> = &'a mut dyn FnMut(&[u8], &FragmentContext);

/// Exclusive, ordered writer for one stream.
pub trait Publication: Send + Sync + std::fmt::Debug {
    fn offer(&self, message: &[u8]) -> Offer;
    fn is_connected(&self) -> bool;
    /// True when this publication created the stream rather than joining an
    /// existing one.
    fn is_original(&self) -> bool;
    fn channel(&self) -> String;
    fn stream_id(&self) -> i32;
    fn session_id(&self) -> i32;
}

/// A per-publisher view of a subscribed stream.
pub trait Image: Send + Sync {
    fn session_id(&self) -> i32;
    fn position(&self) -> i64;
    fn term_buffer_length(&self) -> i32;
    fn is_closed(&self) -> bool;
}

/// Reader side of one or more stream images.
pub trait Subscription: Send + Sync {
    /// Poll fragments, letting the handler steer consumption.
    ///
    /// Returns the number of fragments read. `Abort` leaves the fragment
    /// unconsumed for redelivery on the next poll.
    fn controlled_poll(&self, handler: ControlledFragmentHandler<'_>, fragment_limit: usize)
        -> usize;

    /// Poll up to `fragment_limit` fragments without consumption control.
    fn poll(&self, handler: FragmentHandler<'_>, fragment_limit: usize) -> usize;

    fn is_connected(&self) -> bool;
    fn channel(&self) -> String;
    fn stream_id(&self) -> i32;
    fn image_by_session_id(&self, session_id: i32) -> Option<Arc<dyn Image>>;

    /// Add a destination to a manual multi-destination-cast subscription.
    fn add_destination(&self, destination: &str);
    fn remove_destination(&self, destination: &str);
}

/// Handler invoked when an image becomes available or unavailable.
pub type ImageHandler = Arc<dyn Fn(&dyn Image) + Send + Sync>;

/// The transport client: resource registration, correlation id allocation,
/// cooperative conductor duty cycle and the counter registry.
pub trait TransportClient: Send + Sync {
    /// Allocate the next client-unique correlation id.
    fn next_correlation_id(&self) -> i64;

    /// Register a subscription, returning its registration id. The
    /// subscription becomes findable once the driver has created it.
    fn add_subscription(&self, channel: &str, stream_id: i32) -> i64;

    fn add_subscription_with_handlers(
        &self,
        channel: &str,
        stream_id: i32,
        on_available_image: Option<ImageHandler>,
        on_unavailable_image: Option<ImageHandler>,
    ) -> i64;

    fn find_subscription(&self, registration_id: i64) -> Option<Arc<dyn Subscription>>;

    fn add_publication(&self, channel: &str, stream_id: i32) -> i64;
    fn find_publication(&self, registration_id: i64) -> Option<Arc<dyn Publication>>;

    fn add_exclusive_publication(&self, channel: &str, stream_id: i32) -> i64;
    fn find_exclusive_publication(&self, registration_id: i64) -> Option<Arc<dyn Publication>>;

    /// Run one duty cycle of the client conductor when it is agent-invoked.
    fn invoke_conductor(&self);

    /// Snapshot of the counter registry metadata, see [crate::counters].
    fn counters_metadata(&self) -> Bytes;
}

/// Idle strategy for spin-with-idle waits: yields the thread between polls.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldingIdle;

impl YieldingIdle {
    pub fn idle(&self) {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_flags_classify() {
        let whole = FragmentContext::unfragmented(1);
        assert!(whole.is_unfragmented());
        assert!(whole.is_begin_fragment());
        assert!(whole.is_end_fragment());

        let begin = FragmentContext { session_id: 1, flags: frame_flags::BEGIN_FRAGMENT };
        assert!(!begin.is_unfragmented());
        assert!(begin.is_begin_fragment());
        assert!(!begin.is_end_fragment());

        let middle = FragmentContext { session_id: 1, flags: 0 };
        assert!(!middle.is_begin_fragment());
        assert!(!middle.is_end_fragment());
    }

    #[test]
    fn offer_acceptance() {
        assert!(Offer::Position(128).is_accepted());
        assert!(!Offer::BackPressured.is_accepted());
        assert!(!Offer::Closed.is_accepted());
    }
}
