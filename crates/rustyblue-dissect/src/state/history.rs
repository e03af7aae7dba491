//! Versioned "as of" store
//!
//! Every piece of reconstructed state is kept as a history of immutable
//! entries stamped with the sequence point that produced them. A lookup at
//! sequence point `seq` sees the newest entry stamped at or before `seq`,
//! regardless of the order in which entries were inserted, so a capture can
//! be re-dissected in any order and every frame still sees the state that
//! was in effect when it was captured.

use super::types::{SequencePoint, SessionKey};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Per-session, per-subkey history of values.
///
/// `K` is the sub-key within a session (a handle, a transaction initiator);
/// use `()` when a concern has a single history per session.
#[derive(Debug, Clone)]
pub struct HistoryStore<K, V> {
    sessions: HashMap<SessionKey, HashMap<K, BTreeMap<SequencePoint, V>>>,
}

impl<K, V> Default for HistoryStore<K, V> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> HistoryStore<K, V> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` at `seq`.
    ///
    /// An entry already stored at the same `(session, key, seq)` is left
    /// untouched, which makes replaying a message a no-op. Returns whether
    /// the value was inserted.
    pub fn put(&mut self, session: SessionKey, key: K, seq: SequencePoint, value: V) -> bool {
        let history = self
            .sessions
            .entry(session)
            .or_default()
            .entry(key)
            .or_default();

        if history.contains_key(&seq) {
            return false;
        }
        history.insert(seq, value);
        true
    }

    /// The value in effect at `seq`
    pub fn get(&self, session: &SessionKey, key: &K, seq: SequencePoint) -> Option<&V> {
        self.get_entry(session, key, seq).map(|(_, value)| value)
    }

    /// The value in effect at `seq`, with the sequence point it was stored at
    pub fn get_entry(
        &self,
        session: &SessionKey,
        key: &K,
        seq: SequencePoint,
    ) -> Option<(SequencePoint, &V)> {
        self.history_map(session, key)?
            .range(..=seq)
            .next_back()
            .map(|(stored, value)| (*stored, value))
    }

    /// The value stored at exactly `seq`
    pub fn get_exact(&self, session: &SessionKey, key: &K, seq: SequencePoint) -> Option<&V> {
        self.history_map(session, key)?.get(&seq)
    }

    /// Mutable access to the value stored at exactly `seq`.
    ///
    /// Only for fields whose own contract is write-once; entries are
    /// otherwise immutable.
    pub fn get_exact_mut(
        &mut self,
        session: &SessionKey,
        key: &K,
        seq: SequencePoint,
    ) -> Option<&mut V> {
        self.sessions.get_mut(session)?.get_mut(key)?.get_mut(&seq)
    }

    /// Entries stored at or before `seq`, most recent first
    pub fn history<'a>(
        &'a self,
        session: &SessionKey,
        key: &K,
        seq: SequencePoint,
    ) -> impl Iterator<Item = (SequencePoint, &'a V)> + 'a
    where
        K: 'a,
    {
        self.history_map(session, key)
            .into_iter()
            .flat_map(move |history| history.range(..=seq).rev())
            .map(|(stored, value)| (*stored, value))
    }

    /// Number of entries recorded for one session
    pub fn session_len(&self, session: &SessionKey) -> usize {
        self.sessions
            .get(session)
            .map_or(0, |keys| keys.values().map(BTreeMap::len).sum())
    }

    /// Number of entries recorded across all sessions
    pub fn len(&self) -> usize {
        self.sessions
            .values()
            .flat_map(|keys| keys.values())
            .map(BTreeMap::len)
            .sum()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release everything recorded for a session
    pub fn remove_session(&mut self, session: &SessionKey) {
        self.sessions.remove(session);
    }

    fn history_map(&self, session: &SessionKey, key: &K) -> Option<&BTreeMap<SequencePoint, V>> {
        self.sessions.get(session)?.get(key)
    }
}
