//! Reassembly of fragmented messages into whole application messages.
//!
//! Large messages arrive as BEGIN/MIDDLE/END fragments interleaved per
//! session id. [FragmentAssembler] sits between a subscription and a
//! handler so the handler only ever sees whole messages: unfragmented
//! messages are delegated without copying, fragment chains are accumulated
//! in a lazily allocated, growable buffer per session id.
//!
//! Session buffers survive until [FragmentAssembler::free_session_buffer]
//! is called, which should happen when the image for that session goes
//! away.

use std::collections::HashMap;

use crate::transport::{ControlledPollAction, FragmentContext};

/// Initial capacity for each session's reassembly buffer.
pub const DEFAULT_FRAGMENT_ASSEMBLY_BUFFER_LENGTH: usize = 4096;

pub struct FragmentAssembler {
    initial_buffer_length: usize,
    buffer_by_session_id: HashMap<i32, Vec<u8>>,
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_ASSEMBLY_BUFFER_LENGTH)
    }
}

impl FragmentAssembler {
    pub fn new(initial_buffer_length: usize) -> Self {
        Self {
            initial_buffer_length,
            buffer_by_session_id: HashMap::new(),
        }
    }

    /// Free a session's buffer once its image has gone away.
    pub fn free_session_buffer(&mut self, session_id: i32) {
        self.buffer_by_session_id.remove(&session_id);
    }

    /// Wrap a controlled handler so it is only invoked with whole messages.
    ///
    /// An `Abort` returned for an assembled message rewinds the session
    /// buffer so the redelivered END fragment reassembles the same message.
    pub fn controlled<'a, F>(
        &'a mut self,
        handler: &'a mut F,
    ) -> impl FnMut(&[u8], &FragmentContext) -> ControlledPollAction + 'a
    where
        F: FnMut(&[u8], &FragmentContext) -> ControlledPollAction + ?Sized,
    {
        move |fragment: &[u8], context: &FragmentContext| {
            if context.is_unfragmented() {
                return handler(fragment, context);
            }

            if context.is_begin_fragment() {
                let buffer = self.buffer_for(context.session_id);
                buffer.clear();
                buffer.extend_from_slice(fragment);
                return ControlledPollAction::Continue;
            }

            let Some(buffer) = self.buffer_by_session_id.get_mut(&context.session_id) else {
                // Chain was never started (or was freed); skip the tail.
                return ControlledPollAction::Continue;
            };
            if buffer.is_empty() {
                return ControlledPollAction::Continue;
            }

            let limit = buffer.len();
            buffer.extend_from_slice(fragment);

            if !context.is_end_fragment() {
                return ControlledPollAction::Continue;
            }

            let assembled = FragmentContext::unfragmented(context.session_id);
            let action = handler(buffer, &assembled);
            if action == ControlledPollAction::Abort {
                buffer.truncate(limit);
            } else {
                buffer.clear();
            }
            action
        }
    }

    /// Wrap a plain handler so it is only invoked with whole messages.
    pub fn handler<'a, F>(
        &'a mut self,
        handler: &'a mut F,
    ) -> impl FnMut(&[u8], &FragmentContext) + 'a
    where
        F: FnMut(&[u8], &FragmentContext) + ?Sized,
    {
        move |fragment: &[u8], context: &FragmentContext| {
            self.on_plain_fragment(fragment, context, handler);
        }
    }

    fn on_plain_fragment<F>(
        &mut self,
        fragment: &[u8],
        context: &FragmentContext,
        handler: &mut F,
    ) where
        F: FnMut(&[u8], &FragmentContext) + ?Sized,
    {
        if context.is_unfragmented() {
            handler(fragment, context);
            return;
        }

        if context.is_begin_fragment() {
            let buffer = self.buffer_for(context.session_id);
            buffer.clear();
            buffer.extend_from_slice(fragment);
            return;
        }

        let Some(buffer) = self.buffer_by_session_id.get_mut(&context.session_id) else {
            return;
        };
        if buffer.is_empty() {
            return;
        }
        buffer.extend_from_slice(fragment);

        if context.is_end_fragment() {
            let assembled = FragmentContext::unfragmented(context.session_id);
            handler(buffer, &assembled);
            buffer.clear();
        }
    }

    fn buffer_for(&mut self, session_id: i32) -> &mut Vec<u8> {
        let initial = self.initial_buffer_length;
        self.buffer_by_session_id
            .entry(session_id)
            .or_insert_with(|| Vec::with_capacity(initial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame_flags;

    fn begin(session_id: i32) -> FragmentContext {
        FragmentContext { session_id, flags: frame_flags::BEGIN_FRAGMENT }
    }

    fn middle(session_id: i32) -> FragmentContext {
        FragmentContext { session_id, flags: 0 }
    }

    fn end(session_id: i32) -> FragmentContext {
        FragmentContext { session_id, flags: frame_flags::END_FRAGMENT }
    }

    fn collecting_poll(
        assembler: &mut FragmentAssembler,
        fragments: &[(&[u8], FragmentContext)],
    ) -> Vec<(Vec<u8>, i32)> {
        let mut delivered = Vec::new();
        let mut handler = |message: &[u8], context: &FragmentContext| {
            delivered.push((message.to_vec(), context.session_id));
            ControlledPollAction::Continue
        };
        let mut wrapped = assembler.controlled(&mut handler);
        for (fragment, context) in fragments {
            wrapped(fragment, context);
        }
        drop(wrapped);
        delivered
    }

    #[test]
    fn unfragmented_passes_through() {
        let mut assembler = FragmentAssembler::default();
        let delivered = collecting_poll(
            &mut assembler,
            &[(b"whole", FragmentContext::unfragmented(5))],
        );
        assert_eq!(delivered, vec![(b"whole".to_vec(), 5)]);
    }

    #[test]
    fn chain_reassembles_in_order() {
        let mut assembler = FragmentAssembler::default();
        let delivered = collecting_poll(
            &mut assembler,
            &[
                (b"one ", begin(5)),
                (b"two ", middle(5)),
                (b"three", end(5)),
            ],
        );
        assert_eq!(delivered, vec![(b"one two three".to_vec(), 5)]);
    }

    #[test]
    fn sessions_reassemble_independently() {
        let mut assembler = FragmentAssembler::default();
        let delivered = collecting_poll(
            &mut assembler,
            &[
                (b"a1", begin(1)),
                (b"b1", begin(2)),
                (b"a2", end(1)),
                (b"b2", end(2)),
            ],
        );
        assert_eq!(delivered, vec![(b"a1a2".to_vec(), 1), (b"b1b2".to_vec(), 2)]);
    }

    #[test]
    fn tail_without_begin_is_skipped() {
        let mut assembler = FragmentAssembler::default();
        let delivered = collecting_poll(&mut assembler, &[(b"late", end(9))]);
        assert!(delivered.is_empty());
    }

    #[test]
    fn abort_rewinds_for_redelivery() {
        let mut assembler = FragmentAssembler::default();
        let mut deliveries = 0;
        {
            let mut handler = |message: &[u8], _context: &FragmentContext| {
                deliveries += 1;
                assert_eq!(message, b"headtail");
                if deliveries == 1 {
                    ControlledPollAction::Abort
                } else {
                    ControlledPollAction::Continue
                }
            };
            let mut wrapped = assembler.controlled(&mut handler);
            wrapped(b"head", &begin(3));
            assert_eq!(wrapped(b"tail", &end(3)), ControlledPollAction::Abort);
            // Redelivered END fragment completes the same message.
            assert_eq!(wrapped(b"tail", &end(3)), ControlledPollAction::Continue);
        }
        assert_eq!(deliveries, 2);
    }

    #[test]
    fn freed_session_discards_partial_chain() {
        let mut assembler = FragmentAssembler::default();
        {
            let mut handler =
                |_: &[u8], _: &FragmentContext| -> ControlledPollAction { unreachable!() };
            let mut wrapped = assembler.controlled(&mut handler);
            wrapped(b"head", &begin(7));
        }
        assembler.free_session_buffer(7);
        let delivered = collecting_poll(&mut assembler, &[(b"tail", end(7))]);
        assert!(delivered.is_empty());
    }

    #[test]
    fn plain_handler_reassembles() {
        let mut assembler = FragmentAssembler::default();
        let mut delivered = Vec::new();
        {
            let mut handler = |message: &[u8], _context: &FragmentContext| {
                delivered.push(message.to_vec());
            };
            let mut wrapped = assembler.handler(&mut handler);
            wrapped(b"he", &begin(1));
            wrapped(b"llo", &end(1));
        }
        assert_eq!(delivered, vec![b"hello".to_vec()]);
    }
}
