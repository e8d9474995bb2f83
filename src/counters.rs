//! Recording position counters.
//!
//! The archive publishes the position each active recording has reached as
//! a counter in the transport's shared registry. Counter metadata is laid
//! out as fixed-size records in a memory-mapped region; values are
//! published atomically by the producer so a read-only snapshot can be
//! scanned without locks.
//!
//! Record layout (offsets within a record):
//!
//! ```text
//! 0   state: i32 (0 unused, 1 allocated, -1 reclaimed)
//! 4   type_id: i32
//! 8   key: type-specific
//! ```
//!
//! Recording position counters have `type_id == 100` and a key of
//! `{recording_id: i64, session_id: i32, source_identity_len: i32,
//! source_identity: utf8}`.

use bytes::{Buf, Bytes};

/// Type id of a recording position counter.
pub const RECORDING_POSITION_TYPE_ID: i32 = 100;

/// Returned when no counter matches a lookup.
pub const NULL_COUNTER_ID: i32 = -1;

/// Returned when a counter does not carry a recording id.
pub const NULL_RECORDING_ID: i64 = -1;

/// Length of one metadata record.
pub const METADATA_RECORD_LENGTH: usize = 128;

const STATE_OFFSET: usize = 0;
const TYPE_ID_OFFSET: usize = 4;
const KEY_OFFSET: usize = 8;

const RECORDING_ID_KEY_OFFSET: usize = 0;
const SESSION_ID_KEY_OFFSET: usize = RECORDING_ID_KEY_OFFSET + 8;
const SOURCE_IDENTITY_LENGTH_KEY_OFFSET: usize = SESSION_ID_KEY_OFFSET + 4;
const SOURCE_IDENTITY_KEY_OFFSET: usize = SOURCE_IDENTITY_LENGTH_KEY_OFFSET + 4;

/// Allocation state of a counter metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterState {
    Unused,
    Allocated,
    Reclaimed,
}

/// Read-only view over a snapshot of the counter registry metadata.
#[derive(Clone)]
pub struct CountersReader {
    metadata: Bytes,
}

impl CountersReader {
    pub fn new(metadata: Bytes) -> Self {
        Self { metadata }
    }

    /// Highest counter id addressable in this snapshot, exclusive.
    pub fn max_counter_id(&self) -> i32 {
        (self.metadata.len() / METADATA_RECORD_LENGTH) as i32
    }

    pub fn counter_state(&self, counter_id: i32) -> CounterState {
        match self.read_i32(counter_id, STATE_OFFSET) {
            Some(1) => CounterState::Allocated,
            Some(-1) => CounterState::Reclaimed,
            _ => CounterState::Unused,
        }
    }

    pub fn type_id(&self, counter_id: i32) -> Option<i32> {
        self.read_i32(counter_id, TYPE_ID_OFFSET)
    }

    fn record(&self, counter_id: i32) -> Option<&[u8]> {
        if counter_id < 0 {
            return None;
        }
        let start = counter_id as usize * METADATA_RECORD_LENGTH;
        let end = start + METADATA_RECORD_LENGTH;
        (end <= self.metadata.len()).then(|| &self.metadata[start..end])
    }

    fn read_i32(&self, counter_id: i32, offset: usize) -> Option<i32> {
        let mut slice = &self.record(counter_id)?[offset..offset + 4];
        Some(slice.get_i32_le())
    }

    fn read_key_i32(&self, counter_id: i32, key_offset: usize) -> Option<i32> {
        self.read_i32(counter_id, KEY_OFFSET + key_offset)
    }

    fn read_key_i64(&self, counter_id: i32, key_offset: usize) -> Option<i64> {
        let offset = KEY_OFFSET + key_offset;
        let mut slice = &self.record(counter_id)?[offset..offset + 8];
        Some(slice.get_i64_le())
    }

    fn is_recording_position(&self, counter_id: i32) -> bool {
        self.counter_state(counter_id) == CounterState::Allocated
            && self.type_id(counter_id) == Some(RECORDING_POSITION_TYPE_ID)
    }

    /// Find the active recording position counter for a recording id.
    pub fn find_by_recording_id(&self, recording_id: i64) -> i32 {
        for counter_id in 0..self.max_counter_id() {
            if self.is_recording_position(counter_id)
                && self.read_key_i64(counter_id, RECORDING_ID_KEY_OFFSET) == Some(recording_id)
            {
                return counter_id;
            }
        }
        NULL_COUNTER_ID
    }

    /// Find the active recording position counter for a publication session.
    pub fn find_by_session_id(&self, session_id: i32) -> i32 {
        for counter_id in 0..self.max_counter_id() {
            if self.is_recording_position(counter_id)
                && self.read_key_i32(counter_id, SESSION_ID_KEY_OFFSET) == Some(session_id)
            {
                return counter_id;
            }
        }
        NULL_COUNTER_ID
    }

    /// Recording id carried by a counter, [NULL_RECORDING_ID] if it is not
    /// an allocated recording position counter.
    pub fn recording_id(&self, counter_id: i32) -> i64 {
        if self.is_recording_position(counter_id) {
            self.read_key_i64(counter_id, RECORDING_ID_KEY_OFFSET)
                .unwrap_or(NULL_RECORDING_ID)
        } else {
            NULL_RECORDING_ID
        }
    }

    /// Source identity of the image being recorded, empty if unavailable.
    pub fn source_identity(&self, counter_id: i32) -> String {
        if !self.is_recording_position(counter_id) {
            return String::new();
        }
        let Some(record) = self.record(counter_id) else {
            return String::new();
        };
        let length_offset = KEY_OFFSET + SOURCE_IDENTITY_LENGTH_KEY_OFFSET;
        let mut slice = &record[length_offset..length_offset + 4];
        let length = slice.get_i32_le().max(0) as usize;
        let start = KEY_OFFSET + SOURCE_IDENTITY_KEY_OFFSET;
        let end = (start + length).min(record.len());
        String::from_utf8_lossy(&record[start..end]).into_owned()
    }

    /// Is the counter still the allocated position counter for a recording.
    pub fn is_active(&self, counter_id: i32, recording_id: i64) -> bool {
        self.is_recording_position(counter_id)
            && self.read_key_i64(counter_id, RECORDING_ID_KEY_OFFSET) == Some(recording_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::CountersBuilder;

    #[test]
    fn finds_counter_by_recording_id() {
        let reader = CountersBuilder::default()
            .recording_position(42, -338, "127.0.0.1:40001")
            .recording_position(43, -339, "127.0.0.1:40002")
            .build();

        assert_eq!(reader.find_by_recording_id(43), 1);
        assert_eq!(reader.find_by_recording_id(99), NULL_COUNTER_ID);
    }

    #[test]
    fn finds_counter_by_session_id() {
        let reader = CountersBuilder::default()
            .recording_position(42, -338, "src-a")
            .recording_position(43, -339, "src-b")
            .build();

        assert_eq!(reader.find_by_session_id(-338), 0);
        assert_eq!(reader.find_by_session_id(7), NULL_COUNTER_ID);
    }

    #[test]
    fn other_counter_types_are_skipped() {
        let reader = CountersBuilder::default()
            .counter(7, &42i64.to_le_bytes())
            .recording_position(42, -338, "src")
            .build();

        assert_eq!(reader.find_by_recording_id(42), 1);
        assert_eq!(reader.recording_id(0), NULL_RECORDING_ID);
    }

    #[test]
    fn reclaimed_counters_are_not_found() {
        let reader = CountersBuilder::default()
            .recording_position(42, -338, "src")
            .reclaim(0)
            .build();

        assert_eq!(reader.find_by_recording_id(42), NULL_COUNTER_ID);
        assert!(!reader.is_active(0, 42));
    }

    #[test]
    fn reads_recording_id_and_source_identity() {
        let reader = CountersBuilder::default()
            .recording_position(42, -338, "127.0.0.1:40001")
            .build();

        assert_eq!(reader.recording_id(0), 42);
        assert_eq!(reader.source_identity(0), "127.0.0.1:40001");
        assert!(reader.is_active(0, 42));
        assert!(!reader.is_active(0, 41));
    }

    #[test]
    fn out_of_range_counter_ids_are_null() {
        let reader = CountersBuilder::default().build();
        assert_eq!(reader.recording_id(0), NULL_RECORDING_ID);
        assert_eq!(reader.recording_id(NULL_COUNTER_ID), NULL_RECORDING_ID);
        assert_eq!(reader.source_identity(3), "");
    }
}
