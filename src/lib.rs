#![forbid(unsafe_code)]

//! Client library for a stream archive service layered over a low-latency
//! messaging transport.
//!
//! The archive persists published streams and replays them to subscribers on
//! demand. A client opens a bidirectional control session (one request
//! publication, one response subscription), issues typed requests through the
//! [ArchiveProxy](proxy::ArchiveProxy), and awaits correlated responses via
//! the pollers in [poller]. The [ArchiveClient](client::ArchiveClient) facade
//! ties these together behind blocking-style calls, while
//! [AsyncConnect](connect::AsyncConnect) and
//! [ReplayMerge](replay_merge::ReplayMerge) expose non-blocking `poll`/
//! `do_work` state machines that can be interleaved with other duty-cycle
//! work on the same thread.
//!
//! The transport itself is an external collaborator: the traits in
//! [transport] capture the contract this crate consumes, and
//! [test_harness] provides an in-memory implementation of it.

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod connect;
pub mod counters;
pub mod error;
pub mod events;
pub mod fragment;
pub mod poller;
pub mod proxy;
pub mod replay_merge;
pub mod test_harness;
pub mod transport;

pub use error::{ArchiveError, ErrorCode, ErrorHandler};
pub type Result<T> = std::result::Result<T, ArchiveError>;

pub use client::ArchiveClient;
pub use codec::{
    RecordingDescriptor, RecordingSubscriptionDescriptor, ResponseCode, SourceLocation,
};
pub use config::Context;
pub use connect::{connect, AsyncConnect};
pub use replay_merge::{MergeState, ReplayMerge};

/// Sentinel for ids, positions, timestamps and lengths that are not set.
pub const NULL_VALUE: i64 = -1;

/// A position that has not been set or is not available.
pub const NULL_POSITION: i64 = NULL_VALUE;

/// A timestamp that has not been set.
pub const NULL_TIMESTAMP: i64 = NULL_VALUE;

/// A length that has not been set; replay the whole recorded stream.
pub const NULL_LENGTH: i64 = NULL_VALUE;
