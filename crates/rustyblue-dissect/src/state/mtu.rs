//! Negotiated ATT_MTU tracking
use super::history::HistoryStore;
use super::types::{SequencePoint, SessionKey};
use crate::att::constants::ATT_DEFAULT_MTU;
use log::debug;

/// Tracks the ATT_MTU of each session over time.
///
/// The client proposes its receive MTU in an Exchange MTU Request; the
/// server answers with its own. From the response onward both sides use the
/// smaller of the two.
#[derive(Debug, Clone)]
pub struct MtuTracker {
    /// Client Rx MTU proposals, by request sequence point
    client_proposals: HistoryStore<(), u16>,
    /// Effective MTU, by response sequence point
    effective: HistoryStore<(), u16>,
    /// MTU in force before any exchange completes
    default_mtu: u16,
}

impl Default for MtuTracker {
    fn default() -> Self {
        Self::new(ATT_DEFAULT_MTU)
    }
}

impl MtuTracker {
    /// Create a tracker with the given pre-negotiation MTU
    pub fn new(default_mtu: u16) -> Self {
        Self {
            client_proposals: HistoryStore::new(),
            effective: HistoryStore::new(),
            default_mtu: default_mtu.max(ATT_DEFAULT_MTU),
        }
    }

    /// Record the client Rx MTU carried by an Exchange MTU Request
    pub fn propose_client(&mut self, session: SessionKey, seq: SequencePoint, value: u16) {
        if self.client_proposals.put(session, (), seq, value) {
            debug!("{}: client proposes MTU {} at {}", session, value, seq);
        }
    }

    /// Record the server Rx MTU carried by an Exchange MTU Response.
    ///
    /// Returns the effective MTU from `seq` onward. Without a known client
    /// proposal the server value alone is used.
    pub fn propose_server(&mut self, session: SessionKey, seq: SequencePoint, value: u16) -> u16 {
        let client = self
            .client_proposals
            .get(&session, &(), seq)
            .copied()
            .unwrap_or(value);
        let mtu = client.min(value).max(ATT_DEFAULT_MTU);

        if self.effective.put(session, (), seq, mtu) {
            debug!(
                "{}: MTU negotiated at {} (client {}, server {}) -> {}",
                session, seq, client, value, mtu
            );
        }
        self.get_mtu(&session, seq)
    }

    /// ATT_MTU in force at `seq`
    pub fn get_mtu(&self, session: &SessionKey, seq: SequencePoint) -> u16 {
        self.effective
            .get(session, &(), seq)
            .copied()
            .unwrap_or(self.default_mtu)
    }

    /// Release a session's MTU history
    pub fn remove_session(&mut self, session: &SessionKey) {
        self.client_proposals.remove_session(session);
        self.effective.remove_session(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_takes_minimum() {
        let mut tracker = MtuTracker::default();
        let s = SessionKey::le(0, 0x0040);

        tracker.propose_client(s, SequencePoint(1), 200);
        assert_eq!(tracker.propose_server(s, SequencePoint(2), 100), 100);

        assert_eq!(tracker.get_mtu(&s, SequencePoint(0)), ATT_DEFAULT_MTU);
        assert_eq!(tracker.get_mtu(&s, SequencePoint(1)), ATT_DEFAULT_MTU);
        assert_eq!(tracker.get_mtu(&s, SequencePoint(2)), 100);
        assert_eq!(tracker.get_mtu(&s, SequencePoint(500)), 100);
    }

    #[test]
    fn test_proposal_alone_changes_nothing() {
        let mut tracker = MtuTracker::default();
        let s = SessionKey::le(0, 0x0040);
        tracker.propose_client(s, SequencePoint(1), 247);
        assert_eq!(tracker.get_mtu(&s, SequencePoint(10)), ATT_DEFAULT_MTU);
    }

    #[test]
    fn test_response_replayed_before_request() {
        let mut tracker = MtuTracker::default();
        let s = SessionKey::le(0, 0x0040);

        // Response first: no client proposal known yet
        tracker.propose_server(s, SequencePoint(2), 185);
        tracker.propose_client(s, SequencePoint(1), 64);
        // The first write at #2 stands; replays never rewrite history
        assert_eq!(tracker.get_mtu(&s, SequencePoint(2)), 185);
    }

    #[test]
    fn test_renegotiation_and_clamping() {
        let mut tracker = MtuTracker::default();
        let s = SessionKey::le(0, 0x0040);
        let other = SessionKey::le(0, 0x0041);

        tracker.propose_client(s, SequencePoint(1), 10);
        tracker.propose_server(s, SequencePoint(2), 512);
        assert_eq!(tracker.get_mtu(&s, SequencePoint(3)), ATT_DEFAULT_MTU);

        tracker.propose_client(s, SequencePoint(20), 247);
        tracker.propose_server(s, SequencePoint(21), 512);
        assert_eq!(tracker.get_mtu(&s, SequencePoint(20)), ATT_DEFAULT_MTU);
        assert_eq!(tracker.get_mtu(&s, SequencePoint(21)), 247);
        assert_eq!(tracker.get_mtu(&other, SequencePoint(21)), ATT_DEFAULT_MTU);

        tracker.remove_session(&s);
        assert_eq!(tracker.get_mtu(&s, SequencePoint(21)), ATT_DEFAULT_MTU);
    }
}
