//! Per-capture state arena
use super::correlator::{
    PendingRequest, PipeliningPolicy, Registration, RequestCorrelator, RequestParams,
    ResponseMatch,
};
use super::directory::{AttributeDirectory, AttributeRole};
use super::mtu::MtuTracker;
use super::reassembly::{ReassemblyStatus, ValueReassembler};
use super::types::{SequencePoint, SessionKey};
use crate::att::constants::{ATT_DEFAULT_MTU, ATT_READ_RSP_HEADER_SIZE};
use crate::att::opcode::Initiator;
use crate::error::DissectResult;
use crate::uuid::Uuid;
use log::debug;

/// Dissector configuration
#[derive(Debug, Clone)]
pub struct DissectorConfig {
    /// ATT_MTU assumed before an Exchange MTU completes
    pub default_mtu: u16,
    /// Unanswered requests a response may skip back over
    pub request_lookback: usize,
    /// Handling of requests sent while another is outstanding
    pub pipelining: PipeliningPolicy,
}

impl Default for DissectorConfig {
    fn default() -> Self {
        Self {
            default_mtu: ATT_DEFAULT_MTU,
            request_lookback: 1,
            pipelining: PipeliningPolicy::Reject,
        }
    }
}

/// Everything reconstructed from one capture.
///
/// Owns one store per concern. Sessions never share state, and dropping the
/// capture (or calling [`end_session`](Self::end_session)) releases it in
/// bulk.
#[derive(Debug, Clone)]
pub struct CaptureState {
    config: DissectorConfig,
    mtu: MtuTracker,
    directory: AttributeDirectory,
    correlator: RequestCorrelator,
    reassembler: ValueReassembler,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new(DissectorConfig::default())
    }
}

impl CaptureState {
    /// Create an empty capture state
    pub fn new(config: DissectorConfig) -> Self {
        Self {
            mtu: MtuTracker::new(config.default_mtu),
            directory: AttributeDirectory::new(),
            correlator: RequestCorrelator::new(config.pipelining, config.request_lookback),
            reassembler: ValueReassembler::new(),
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &DissectorConfig {
        &self.config
    }

    /// Attribute directory
    pub fn directory(&self) -> &AttributeDirectory {
        &self.directory
    }

    /// MTU tracker
    pub fn mtu(&self) -> &MtuTracker {
        &self.mtu
    }

    /// Request correlator
    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    /// Fragment reassembler
    pub fn reassembler(&self) -> &ValueReassembler {
        &self.reassembler
    }

    // --- Directory ---

    /// Record a handle's type and role from `seq` onward
    pub fn declare(
        &mut self,
        session: SessionKey,
        handle: u16,
        attribute_type: Uuid,
        role: AttributeRole,
        seq: SequencePoint,
    ) -> bool {
        self.directory.declare(session, handle, attribute_type, role, seq)
    }

    /// Type of `handle` as known at `seq`
    pub fn resolve_type(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Option<Uuid> {
        self.directory.resolve_type(session, handle, seq)
    }

    /// Type of the service enclosing `handle` as known at `seq`
    pub fn resolve_enclosing_service(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Option<Uuid> {
        self.directory.resolve_enclosing_service(session, handle, seq)
    }

    /// Type of the characteristic enclosing `handle` as known at `seq`.
    ///
    /// The walk stops at the first service declaration it meets.
    pub fn resolve_enclosing_characteristic(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Option<Uuid> {
        self.directory.resolve_enclosing_characteristic(session, handle, seq)
    }

    pub(crate) fn directory_mut(&mut self) -> &mut AttributeDirectory {
        &mut self.directory
    }

    // --- MTU ---

    /// Note the client's Exchange MTU request
    pub fn propose_client_mtu(&mut self, session: SessionKey, seq: SequencePoint, value: u16) {
        self.mtu.propose_client(session, seq, value);
    }

    /// Settle the MTU from the server's reply and return the effective value
    pub fn propose_server_mtu(
        &mut self,
        session: SessionKey,
        seq: SequencePoint,
        value: u16,
    ) -> u16 {
        self.mtu.propose_server(session, seq, value)
    }

    /// Effective ATT_MTU at `seq`, or the configured default before negotiation
    pub fn get_mtu(&self, session: &SessionKey, seq: SequencePoint) -> u16 {
        self.mtu.get_mtu(session, seq)
    }

    // --- Transactions ---

    /// Open a transaction for `initiator` at `seq`
    pub fn register_request(
        &mut self,
        session: SessionKey,
        initiator: Initiator,
        seq: SequencePoint,
        opcode: u8,
        params: RequestParams,
    ) -> DissectResult<Registration> {
        self.correlator.register_request(session, initiator, seq, opcode, params)
    }

    /// Link the response at `seq` to the request it answers.
    ///
    /// `expected_opcode` is the request opcode the response implies, or the
    /// one named in an Error Response's payload.
    pub fn match_response(
        &mut self,
        session: SessionKey,
        initiator: Initiator,
        seq: SequencePoint,
        response_opcode: u8,
        expected_opcode: u8,
    ) -> DissectResult<ResponseMatch> {
        self.correlator.match_response(session, initiator, seq, response_opcode, expected_opcode)
    }

    /// The request registered at exactly `request_seq`
    pub fn request_at(
        &self,
        session: &SessionKey,
        initiator: Initiator,
        request_seq: SequencePoint,
    ) -> Option<&PendingRequest> {
        self.correlator.request_at(session, initiator, request_seq)
    }

    // --- Long values ---

    /// Store one Read or Read Blob response payload.
    ///
    /// Returns `false` when a fragment was already recorded at `seq`.
    pub fn record_fragment(
        &mut self,
        session: SessionKey,
        handle: u16,
        seq: SequencePoint,
        offset: u16,
        payload: &[u8],
    ) -> bool {
        self.reassembler.record_fragment(session, handle, seq, offset, payload)
    }

    /// Rebuild the value of `handle` as of `seq`, using the MTU then in force
    pub fn reconstruct(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> ReassemblyStatus {
        let mtu = self.get_mtu(session, seq);
        let max_fragment_len = mtu.saturating_sub(ATT_READ_RSP_HEADER_SIZE) as usize;
        self.reassembler.reconstruct(session, handle, seq, max_fragment_len)
    }

    /// Rebuild the value of `handle` after the server ended the read early
    pub fn reconstruct_terminated(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> ReassemblyStatus {
        self.reassembler.reconstruct_terminated(session, handle, seq)
    }

    // --- Teardown ---

    /// Release every store partition of `session`
    pub fn end_session(&mut self, session: &SessionKey) {
        debug!("{}: releasing session state", session);
        self.mtu.remove_session(session);
        self.directory.remove_session(session);
        self.correlator.remove_session(session);
        self.reassembler.remove_session(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att::constants::*;

    #[test]
    fn test_reconstruct_uses_mtu_in_force() {
        let mut capture = CaptureState::default();
        let s = SessionKey::le(0, 0x0040);

        // 22 bytes fill a default-MTU Read Response
        capture.record_fragment(s, 0x0010, SequencePoint(5), 0, &[0x11; 22]);
        assert_eq!(capture.reconstruct(&s, 0x0010, SequencePoint(5)), ReassemblyStatus::InProgress);

        // With a larger MTU the same fragment is a short, final one
        capture.propose_client_mtu(s, SequencePoint(1), 64);
        capture.propose_server_mtu(s, SequencePoint(2), 64);
        assert_eq!(
            capture.reconstruct(&s, 0x0010, SequencePoint(5)),
            ReassemblyStatus::Complete(vec![0x11; 22])
        );
    }

    #[test]
    fn test_end_session_releases_everything() {
        let mut capture = CaptureState::default();
        let s = SessionKey::le(0, 0x0040);
        let other = SessionKey::le(1, 0x0040);

        capture.declare(s, 1, 0x180Fu16.into(), AttributeRole::Service, SequencePoint(1));
        capture.declare(other, 1, 0x180Au16.into(), AttributeRole::Service, SequencePoint(1));
        capture.propose_client_mtu(s, SequencePoint(2), 100);
        capture.propose_server_mtu(s, SequencePoint(3), 100);
        capture
            .register_request(
                s,
                Initiator::Client,
                SequencePoint(4),
                ATT_READ_REQ,
                RequestParams::Handle { handle: 3 },
            )
            .unwrap();
        capture.record_fragment(s, 3, SequencePoint(5), 0, b"x");

        capture.end_session(&s);

        let later = SequencePoint(10);
        assert_eq!(capture.resolve_type(&s, 1, later), None);
        assert_eq!(capture.get_mtu(&s, later), ATT_DEFAULT_MTU);
        assert!(capture.request_at(&s, Initiator::Client, SequencePoint(4)).is_none());
        assert_eq!(capture.reconstruct(&s, 3, later), ReassemblyStatus::Unknown);
        assert_eq!(capture.resolve_type(&other, 1, later), Some(0x180Au16.into()));
    }
}
