//! Long attribute value reassembly
//!
//! A value longer than ATT_MTU - 1 is read with a Read Request followed by
//! Read Blob Requests at increasing offsets. Each response carries one
//! fragment. Fragments live in a per-session arena. Reconstruction links
//! each fragment to the one captured just before it for the same handle,
//! back to offset 0, so the result depends only on what was captured and
//! never on the order fragments were recorded in.

use super::history::HistoryStore;
use super::types::{SequencePoint, SessionKey};
use log::{debug, trace};
use std::collections::HashMap;

/// One piece of a long attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueFragment {
    /// Attribute handle
    pub handle: u16,
    /// Offset of the first byte within the value
    pub offset: u16,
    /// Fragment bytes
    pub payload: Vec<u8>,
    /// Where the fragment was captured
    pub capture_seq: SequencePoint,
}

impl ValueFragment {
    /// Offset one past the last byte of this fragment
    pub fn end(&self) -> usize {
        self.offset as usize + self.payload.len()
    }
}

/// Index of a fragment in its session arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FragmentId(usize);

/// Outcome of a reconstruction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyStatus {
    /// The full value, in order
    Complete(Vec<u8>),
    /// The newest fragment is full-sized; more are expected
    InProgress,
    /// The chain is broken; the value is unavailable
    Incomplete,
    /// No fragment recorded for the handle
    Unknown,
}

/// Fragment arena and per-handle index
#[derive(Debug, Clone, Default)]
pub struct ValueReassembler {
    arenas: HashMap<SessionKey, Vec<ValueFragment>>,
    index: HistoryStore<u16, FragmentId>,
}

impl ValueReassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment of `handle` captured at `seq`.
    ///
    /// Recording the same `(handle, seq)` twice keeps the first fragment.
    /// Returns whether the fragment was added.
    pub fn record_fragment(
        &mut self,
        session: SessionKey,
        handle: u16,
        seq: SequencePoint,
        offset: u16,
        payload: &[u8],
    ) -> bool {
        if self.index.get_exact(&session, &handle, seq).is_some() {
            return false;
        }

        let arena = self.arenas.entry(session).or_default();
        let id = FragmentId(arena.len());
        arena.push(ValueFragment {
            handle,
            offset,
            payload: payload.to_vec(),
            capture_seq: seq,
        });
        self.index.put(session, handle, seq, id);

        trace!(
            "{}: fragment of 0x{:04X} at {} covers {}..{}",
            session,
            handle,
            seq,
            offset,
            offset as usize + payload.len()
        );
        true
    }

    /// Most recent fragment of `handle` at or before `seq`
    pub fn latest_fragment(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Option<&ValueFragment> {
        let id = self.index.get(session, &handle, seq)?;
        self.fragment(session, *id)
    }

    /// The fragment a fragment at `offset` captured at `seq` continues.
    ///
    /// Only the fragment of `handle` captured immediately before `seq` is a
    /// candidate, and only if it ends exactly at `offset`. A Read Blob can
    /// therefore never be joined to the bytes of an earlier, finished read.
    pub fn find_predecessor(
        &self,
        session: &SessionKey,
        handle: u16,
        offset: u16,
        seq: SequencePoint,
    ) -> Option<&ValueFragment> {
        self.index
            .history(session, &handle, seq)
            .filter_map(|(_, id)| self.fragment(session, *id))
            .find(|fragment| fragment.capture_seq < seq)
            .filter(|fragment| fragment.end() == offset as usize)
    }

    /// Rebuild the value of `handle` as of `seq`.
    ///
    /// `max_fragment_len` is the largest value payload a single response can
    /// carry (ATT_MTU - 1). A newest fragment of exactly that size means the
    /// read is still going on.
    pub fn reconstruct(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
        max_fragment_len: usize,
    ) -> ReassemblyStatus {
        let terminal = match self.latest_fragment(session, handle, seq) {
            Some(fragment) => fragment,
            None => return ReassemblyStatus::Unknown,
        };
        if terminal.payload.len() >= max_fragment_len {
            return ReassemblyStatus::InProgress;
        }
        self.assemble_from(session, terminal)
    }

    /// Rebuild the value ending at the newest fragment, whatever its size.
    ///
    /// Used when the server signals the end of a long read explicitly.
    pub fn reconstruct_terminated(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> ReassemblyStatus {
        match self.latest_fragment(session, handle, seq) {
            Some(terminal) => self.assemble_from(session, terminal),
            None => ReassemblyStatus::Unknown,
        }
    }

    /// Number of fragments recorded for a session
    pub fn fragment_count(&self, session: &SessionKey) -> usize {
        self.arenas.get(session).map_or(0, Vec::len)
    }

    /// Release a session's fragments
    pub fn remove_session(&mut self, session: &SessionKey) {
        self.arenas.remove(session);
        self.index.remove_session(session);
    }

    fn fragment(&self, session: &SessionKey, id: FragmentId) -> Option<&ValueFragment> {
        self.arenas.get(session)?.get(id.0)
    }

    // Links back from `terminal` to offset 0. Capture points strictly
    // decrease along the chain, so the walk visits each fragment at most once.
    fn assemble_from(&self, session: &SessionKey, terminal: &ValueFragment) -> ReassemblyStatus {
        let mut chain = vec![terminal];
        let mut current = terminal;

        while current.offset != 0 {
            let previous =
                self.find_predecessor(session, current.handle, current.offset, current.capture_seq);
            match previous {
                Some(previous) => {
                    chain.push(previous);
                    current = previous;
                }
                None => {
                    debug!(
                        "{}: fragment chain of 0x{:04X} broken below offset {}",
                        session, terminal.handle, current.offset
                    );
                    return ReassemblyStatus::Incomplete;
                }
            }
        }

        let value = chain
            .iter()
            .rev()
            .flat_map(|fragment| fragment.payload.iter().copied())
            .collect();
        ReassemblyStatus::Complete(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const MAX: usize = 20;

    fn session() -> SessionKey {
        SessionKey::le(0, 0x0040)
    }

    fn chunk(fill: u8, len: usize) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn test_contiguous_fragments_reassemble() {
        let mut r = ValueReassembler::new();
        let s = session();
        r.record_fragment(s, 0x0010, SequencePoint(2), 0, &chunk(0xA0, 20));
        r.record_fragment(s, 0x0010, SequencePoint(4), 20, &chunk(0xB0, 20));
        r.record_fragment(s, 0x0010, SequencePoint(6), 40, &chunk(0xC0, 5));

        let mut expected = chunk(0xA0, 20);
        expected.extend(chunk(0xB0, 20));
        expected.extend(chunk(0xC0, 5));
        assert_eq!(
            r.reconstruct(&s, 0x0010, SequencePoint(6), MAX),
            ReassemblyStatus::Complete(expected)
        );
    }

    #[test]
    fn test_in_progress_until_short_fragment() {
        let mut r = ValueReassembler::new();
        let s = session();
        r.record_fragment(s, 0x0010, SequencePoint(2), 0, &chunk(1, 20));
        r.record_fragment(s, 0x0010, SequencePoint(4), 20, &chunk(2, 20));

        assert_eq!(r.reconstruct(&s, 0x0010, SequencePoint(1), MAX), ReassemblyStatus::Unknown);
        assert_eq!(r.reconstruct(&s, 0x0010, SequencePoint(2), MAX), ReassemblyStatus::InProgress);
        assert_eq!(r.reconstruct(&s, 0x0010, SequencePoint(5), MAX), ReassemblyStatus::InProgress);

        r.record_fragment(s, 0x0010, SequencePoint(6), 40, &[]);
        assert!(matches!(
            r.reconstruct(&s, 0x0010, SequencePoint(6), MAX),
            ReassemblyStatus::Complete(value) if value.len() == 40
        ));
    }

    #[test]
    fn test_gap_is_incomplete() {
        let mut r = ValueReassembler::new();
        let s = session();
        r.record_fragment(s, 0x0010, SequencePoint(2), 0, &chunk(1, 20));
        r.record_fragment(s, 0x0010, SequencePoint(6), 40, &chunk(3, 5));
        assert_eq!(r.reconstruct(&s, 0x0010, SequencePoint(6), MAX), ReassemblyStatus::Incomplete);

        let mut orphan = ValueReassembler::new();
        orphan.record_fragment(s, 0x0010, SequencePoint(6), 40, &chunk(3, 5));
        assert_eq!(
            orphan.reconstruct(&s, 0x0010, SequencePoint(6), MAX),
            ReassemblyStatus::Incomplete
        );
    }

    #[test]
    fn test_blob_never_joins_an_earlier_read() {
        let mut r = ValueReassembler::new();
        let s = session();
        // A finished read of 28 bytes
        r.record_fragment(s, 0x0010, SequencePoint(2), 0, &chunk(0xAA, 20));
        r.record_fragment(s, 0x0010, SequencePoint(4), 20, &chunk(0xAA, 8));
        // A later blob at offset 20 whose Read Response was not captured
        r.record_fragment(s, 0x0010, SequencePoint(8), 20, &chunk(0xBB, 8));

        assert!(matches!(
            r.reconstruct(&s, 0x0010, SequencePoint(4), MAX),
            ReassemblyStatus::Complete(value) if value.len() == 28
        ));
        assert_eq!(r.reconstruct(&s, 0x0010, SequencePoint(8), MAX), ReassemblyStatus::Incomplete);
    }

    #[test]
    fn test_zero_length_fragments_do_not_loop() {
        let mut r = ValueReassembler::new();
        let s = session();
        r.record_fragment(s, 0x0010, SequencePoint(3), 20, &[]);
        r.record_fragment(s, 0x0010, SequencePoint(5), 20, &[]);
        assert_eq!(r.reconstruct(&s, 0x0010, SequencePoint(5), MAX), ReassemblyStatus::Incomplete);
    }

    #[test]
    fn test_short_value_is_complete_immediately() {
        let mut r = ValueReassembler::new();
        let s = session();
        r.record_fragment(s, 0x0003, SequencePoint(9), 0, b"hello");
        assert_eq!(
            r.reconstruct(&s, 0x0003, SequencePoint(9), MAX),
            ReassemblyStatus::Complete(b"hello".to_vec())
        );
    }

    #[test]
    fn test_replay_and_predecessor_search() {
        let mut r = ValueReassembler::new();
        let s = session();
        assert!(r.record_fragment(s, 0x0010, SequencePoint(2), 0, &chunk(1, 20)));
        assert!(!r.record_fragment(s, 0x0010, SequencePoint(2), 0, &chunk(7, 20)));
        assert_eq!(r.fragment_count(&s), 1);

        let pred = r.find_predecessor(&s, 0x0010, 20, SequencePoint(4)).map(|f| f.capture_seq);
        assert_eq!(pred, Some(SequencePoint(2)));
        assert!(r.find_predecessor(&s, 0x0010, 40, SequencePoint(4)).is_none());
        assert!(r.find_predecessor(&s, 0x0010, 20, SequencePoint(2)).is_none());
        assert!(r.find_predecessor(&s, 0x0011, 20, SequencePoint(4)).is_none());
    }

    #[test]
    fn test_recording_order_does_not_matter() {
        let s = session();
        let fragments: Vec<(u32, u16, Vec<u8>)> = vec![
            (2, 0, chunk(1, 20)),
            (4, 20, chunk(2, 20)),
            (6, 40, chunk(3, 7)),
            (9, 0, chunk(4, 20)),
            (11, 20, chunk(5, 3)),
        ];

        let mut in_order = ValueReassembler::new();
        for (seq, offset, payload) in &fragments {
            in_order.record_fragment(s, 0x0010, SequencePoint(*seq), *offset, payload);
        }

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..8 {
            let mut shuffled = fragments.clone();
            shuffled.shuffle(&mut rng);

            let mut r = ValueReassembler::new();
            for (seq, offset, payload) in &shuffled {
                r.record_fragment(s, 0x0010, SequencePoint(*seq), *offset, payload);
            }
            for seq in 0..13 {
                assert_eq!(
                    r.reconstruct(&s, 0x0010, SequencePoint(seq), MAX),
                    in_order.reconstruct(&s, 0x0010, SequencePoint(seq), MAX),
                    "seq {}",
                    seq
                );
            }
        }
    }

    #[test]
    fn test_terminated_read() {
        let mut r = ValueReassembler::new();
        let s = session();
        r.record_fragment(s, 0x0010, SequencePoint(2), 0, &chunk(1, 20));
        r.record_fragment(s, 0x0010, SequencePoint(4), 20, &chunk(2, 20));
        assert_eq!(r.reconstruct(&s, 0x0010, SequencePoint(5), MAX), ReassemblyStatus::InProgress);
        assert!(matches!(
            r.reconstruct_terminated(&s, 0x0010, SequencePoint(5)),
            ReassemblyStatus::Complete(value) if value.len() == 40
        ));

        r.remove_session(&s);
        assert_eq!(
            r.reconstruct_terminated(&s, 0x0010, SequencePoint(5)),
            ReassemblyStatus::Unknown
        );
    }
}
