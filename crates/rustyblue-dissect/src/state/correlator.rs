//! Request/response correlation
//!
//! ATT allows one outstanding transaction per direction: a client request
//! is closed by the matching response (or an Error Response naming it), and
//! a server indication by a confirmation. Requests are recorded as pending
//! transactions at their sequence point; each response looks backward from
//! its own sequence point for the request it answers.

use super::history::HistoryStore;
use super::types::{SequencePoint, SessionKey};
use crate::att::opcode::{opcode_name, Initiator};
use crate::error::{DissectError, DissectResult, Violation};
use crate::uuid::Uuid;
use log::{debug, warn};

/// Parameters of a request that later responses depend on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestParams {
    /// No parameters of interest
    None,
    /// Single handle (Read, Write, Indication)
    Handle { handle: u16 },
    /// Handle and value offset (Read Blob, Prepare Write)
    HandleOffset { handle: u16, offset: u16 },
    /// Handle list (Read Multiple, Read Multiple Variable)
    Handles(Vec<u16>),
    /// Handle range (Find Information)
    Range { start: u16, end: u16 },
    /// Handle range and attribute type (Read By Type, Read By Group Type)
    TypeRange {
        start: u16,
        end: u16,
        attribute_type: Uuid,
    },
    /// Handle range, type and value (Find By Type Value)
    TypeValueRange {
        start: u16,
        end: u16,
        attribute_type: u16,
        value: Vec<u8>,
    },
    /// Client Rx MTU (Exchange MTU)
    Mtu { client_mtu: u16 },
    /// Execute Write flags
    ExecuteWrite { flags: u8 },
}

/// A transaction opened by a request or indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Request opcode
    pub opcode: u8,
    /// Where the request was seen
    pub request_seq: SequencePoint,
    /// Where its answer was seen, once known
    pub response_seq: Option<SequencePoint>,
    /// Decoded parameters
    pub params: RequestParams,
}

impl PendingRequest {
    /// Whether the transaction is still open at `seq`
    fn is_open_at(&self, seq: SequencePoint) -> bool {
        self.response_seq.map_or(true, |answered| answered > seq)
    }

    /// Whether a response at `seq` may close this transaction
    fn accepts_response_at(&self, seq: SequencePoint) -> bool {
        self.response_seq.map_or(true, |answered| answered == seq)
    }
}

/// What to do with a request opened while another is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipeliningPolicy {
    /// Refuse to record the new request
    #[default]
    Reject,
    /// Record it anyway; the violation is still reported
    Record,
}

/// Result of registering a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Recorded as a new pending transaction
    Recorded,
    /// Already recorded at this sequence point (replay)
    Replayed,
    /// Recorded, although it pipelines behind an open transaction
    RecordedPipelined(Violation),
}

/// A response matched to its request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMatch {
    /// The matched transaction, with `response_seq` filled in
    pub request: PendingRequest,
    /// How many unanswered requests were stepped over
    pub steps_back: usize,
}

/// Pairs requests with responses per session and initiator
#[derive(Debug, Clone)]
pub struct RequestCorrelator {
    pending: HistoryStore<Initiator, PendingRequest>,
    /// Backward links: response seq -> request seq
    answers: HistoryStore<Initiator, SequencePoint>,
    policy: PipeliningPolicy,
    lookback: usize,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new(PipeliningPolicy::default(), 1)
    }
}

impl RequestCorrelator {
    /// Create a correlator.
    ///
    /// `lookback` bounds how many older unanswered requests a response may
    /// skip back over when the most recent one does not match.
    pub fn new(policy: PipeliningPolicy, lookback: usize) -> Self {
        Self {
            pending: HistoryStore::new(),
            answers: HistoryStore::new(),
            policy,
            lookback,
        }
    }

    /// Open a transaction for a request or indication seen at `seq`
    pub fn register_request(
        &mut self,
        session: SessionKey,
        initiator: Initiator,
        seq: SequencePoint,
        opcode: u8,
        params: RequestParams,
    ) -> DissectResult<Registration> {
        if self.pending.get_exact(&session, &initiator, seq).is_some() {
            return Ok(Registration::Replayed);
        }

        let outstanding = self
            .pending
            .history(&session, &initiator, seq)
            .next()
            .map(|(_, req)| req)
            .filter(|req| req.is_open_at(seq))
            .map(|req| Violation::PipelinedRequest {
                opcode,
                outstanding_opcode: req.opcode,
                outstanding_seq: req.request_seq,
            });

        if let Some(violation) = &outstanding {
            warn!(
                "{}: {} at {} while {:?} is outstanding",
                session,
                opcode_name(opcode),
                seq,
                violation
            );
            if self.policy == PipeliningPolicy::Reject {
                return Err(DissectError::ProtocolViolation(violation.clone()));
            }
        }

        let request = PendingRequest {
            opcode,
            request_seq: seq,
            response_seq: None,
            params,
        };
        self.pending.put(session, initiator, seq, request);
        debug!("{}: {} pending at {}", session, opcode_name(opcode), seq);

        Ok(match outstanding {
            Some(violation) => Registration::RecordedPipelined(violation),
            None => Registration::Recorded,
        })
    }

    /// Close the transaction a response at `seq` answers.
    ///
    /// `expected_opcode` is the request opcode the response implies, or the
    /// opcode named inside an Error Response.
    pub fn match_response(
        &mut self,
        session: SessionKey,
        initiator: Initiator,
        seq: SequencePoint,
        response_opcode: u8,
        expected_opcode: u8,
    ) -> DissectResult<ResponseMatch> {
        let found = self.find_request(&session, initiator, seq, expected_opcode)?;

        let (request_seq, steps_back) = match found {
            Some(found) => found,
            None => {
                warn!(
                    "{}: {} at {} has no outstanding {}",
                    session,
                    opcode_name(response_opcode),
                    seq,
                    opcode_name(expected_opcode)
                );
                return Err(Violation::UnmatchedResponse {
                    opcode: response_opcode,
                    expected_request: expected_opcode,
                }
                .into());
            }
        };

        let request = match self.pending.get_exact_mut(&session, &initiator, request_seq) {
            Some(request) => request,
            None => {
                return Err(Violation::UnmatchedResponse {
                    opcode: response_opcode,
                    expected_request: expected_opcode,
                }
                .into())
            }
        };
        if request.response_seq.is_none() {
            request.response_seq = Some(seq);
            debug!(
                "{}: {} at {} answers {}",
                session,
                opcode_name(response_opcode),
                seq,
                request_seq
            );
        }
        let request = request.clone();
        self.answers.put(session, initiator, seq, request_seq);

        Ok(ResponseMatch {
            request,
            steps_back,
        })
    }

    /// The pending transaction recorded at exactly `request_seq`
    pub fn request_at(
        &self,
        session: &SessionKey,
        initiator: Initiator,
        request_seq: SequencePoint,
    ) -> Option<&PendingRequest> {
        self.pending.get_exact(session, &initiator, request_seq)
    }

    /// Forward link: where the request at `request_seq` was answered
    pub fn response_for(
        &self,
        session: &SessionKey,
        initiator: Initiator,
        request_seq: SequencePoint,
    ) -> Option<SequencePoint> {
        self.request_at(session, initiator, request_seq)?.response_seq
    }

    /// Backward link: which request the response at `response_seq` answers
    pub fn request_for(
        &self,
        session: &SessionKey,
        initiator: Initiator,
        response_seq: SequencePoint,
    ) -> Option<SequencePoint> {
        self.answers
            .get_exact(session, &initiator, response_seq)
            .copied()
    }

    /// Most recent transaction opened at or before `seq`
    pub fn latest_request(
        &self,
        session: &SessionKey,
        initiator: Initiator,
        seq: SequencePoint,
    ) -> Option<&PendingRequest> {
        self.pending.get(session, &initiator, seq)
    }

    /// Release a session's transactions
    pub fn remove_session(&mut self, session: &SessionKey) {
        self.pending.remove_session(session);
        self.answers.remove_session(session);
    }

    // The newest request is tried first. When it is not the one, older
    // unanswered requests are tried, at most `lookback` of them.
    fn find_request(
        &self,
        session: &SessionKey,
        initiator: Initiator,
        seq: SequencePoint,
        expected_opcode: u8,
    ) -> DissectResult<Option<(SequencePoint, usize)>> {
        let mut history = self.pending.history(session, &initiator, seq);

        let latest = match history.next() {
            Some((_, req)) => req,
            None => return Ok(None),
        };
        if latest.opcode == expected_opcode {
            if latest.accepts_response_at(seq) {
                return Ok(Some((latest.request_seq, 0)));
            }
            if let Some(response_seq) = latest.response_seq {
                return Err(Violation::AlreadyAnswered {
                    request_seq: latest.request_seq,
                    response_seq,
                }
                .into());
            }
        }

        Ok(history
            .map(|(_, req)| req)
            .filter(|req| req.accepts_response_at(seq))
            .take(self.lookback)
            .enumerate()
            .find(|(_, req)| req.opcode == expected_opcode)
            .map(|(skipped, req)| (req.request_seq, skipped + 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att::constants::*;

    fn session() -> SessionKey {
        SessionKey::le(0, 0x0040)
    }

    fn read(handle: u16) -> RequestParams {
        RequestParams::Handle { handle }
    }

    #[test]
    fn test_request_response_links() {
        let mut corr = RequestCorrelator::default();
        let s = session();

        let reg = corr
            .register_request(s, Initiator::Client, SequencePoint(10), ATT_READ_REQ, read(3))
            .unwrap();
        assert_eq!(reg, Registration::Recorded);
        assert_eq!(corr.response_for(&s, Initiator::Client, SequencePoint(10)), None);

        let m = corr
            .match_response(s, Initiator::Client, SequencePoint(11), ATT_READ_RSP, ATT_READ_REQ)
            .unwrap();
        assert_eq!(m.request.request_seq, SequencePoint(10));
        assert_eq!(m.request.response_seq, Some(SequencePoint(11)));
        assert_eq!(m.request.params, read(3));
        assert_eq!(m.steps_back, 0);

        assert_eq!(
            corr.response_for(&s, Initiator::Client, SequencePoint(10)),
            Some(SequencePoint(11))
        );
        assert_eq!(
            corr.request_for(&s, Initiator::Client, SequencePoint(11)),
            Some(SequencePoint(10))
        );
        assert_eq!(corr.request_for(&s, Initiator::Client, SequencePoint(12)), None);
    }

    #[test]
    fn test_error_response_names_failed_opcode() {
        let mut corr = RequestCorrelator::default();
        let s = session();
        corr.register_request(
            s,
            Initiator::Client,
            SequencePoint(10),
            ATT_READ_BLOB_REQ,
            RequestParams::HandleOffset { handle: 7, offset: 22 },
        )
        .unwrap();

        // The opcode comes from the error payload, not from ATT_ERROR_RSP - 1
        let m = corr
            .match_response(
                s,
                Initiator::Client,
                SequencePoint(11),
                ATT_ERROR_RSP,
                ATT_READ_BLOB_REQ,
            )
            .unwrap();
        assert_eq!(m.request.response_seq, Some(SequencePoint(11)));
    }

    #[test]
    fn test_pipelining_rejected_by_default() {
        let mut corr = RequestCorrelator::default();
        let s = session();
        corr.register_request(s, Initiator::Client, SequencePoint(1), ATT_READ_REQ, read(3))
            .unwrap();
        let err = corr
            .register_request(s, Initiator::Client, SequencePoint(2), ATT_WRITE_REQ, read(4))
            .unwrap_err();
        assert!(matches!(
            err,
            DissectError::ProtocolViolation(Violation::PipelinedRequest {
                outstanding_seq: SequencePoint(1),
                ..
            })
        ));
        assert_eq!(corr.request_at(&s, Initiator::Client, SequencePoint(2)), None);

        // Indications are a separate transaction space
        assert_eq!(
            corr.register_request(
                s,
                Initiator::Server,
                SequencePoint(2),
                ATT_HANDLE_VALUE_IND,
                read(9),
            )
                .unwrap(),
            Registration::Recorded
        );
    }

    #[test]
    fn test_pipelining_recorded_when_allowed() {
        let mut corr = RequestCorrelator::new(PipeliningPolicy::Record, 1);
        let s = session();
        corr.register_request(s, Initiator::Client, SequencePoint(1), ATT_READ_REQ, read(3))
            .unwrap();
        let reg = corr
            .register_request(s, Initiator::Client, SequencePoint(2), ATT_WRITE_REQ, read(4))
            .unwrap();
        assert!(matches!(reg, Registration::RecordedPipelined(_)));

        // Newest is the write; the read response steps back one request
        let m = corr
            .match_response(s, Initiator::Client, SequencePoint(3), ATT_READ_RSP, ATT_READ_REQ)
            .unwrap();
        assert_eq!(m.request.request_seq, SequencePoint(1));
        assert_eq!(m.steps_back, 1);

        let m = corr
            .match_response(s, Initiator::Client, SequencePoint(4), ATT_WRITE_RSP, ATT_WRITE_REQ)
            .unwrap();
        assert_eq!(m.request.request_seq, SequencePoint(2));
    }

    #[test]
    fn test_lookback_is_bounded() {
        let mut corr = RequestCorrelator::new(PipeliningPolicy::Record, 1);
        let s = session();
        corr.register_request(
            s,
            Initiator::Client,
            SequencePoint(1),
            ATT_FIND_INFO_REQ,
            RequestParams::None,
        )
            .unwrap();
        corr.register_request(s, Initiator::Client, SequencePoint(2), ATT_READ_REQ, read(3))
            .unwrap();
        corr.register_request(s, Initiator::Client, SequencePoint(3), ATT_WRITE_REQ, read(3))
            .unwrap();

        let err = corr
            .match_response(
                s,
                Initiator::Client,
                SequencePoint(4),
                ATT_FIND_INFO_RSP,
                ATT_FIND_INFO_REQ,
            )
            .unwrap_err();
        assert_eq!(
            err,
            DissectError::ProtocolViolation(Violation::UnmatchedResponse {
                opcode: ATT_FIND_INFO_RSP,
                expected_request: ATT_FIND_INFO_REQ,
            })
        );

        let mut deeper = RequestCorrelator::new(PipeliningPolicy::Record, 2);
        for (seq, opcode) in [(1, ATT_FIND_INFO_REQ), (2, ATT_READ_REQ), (3, ATT_WRITE_REQ)] {
            deeper
                .register_request(
                    s,
                    Initiator::Client,
                    SequencePoint(seq),
                    opcode,
                    RequestParams::None,
                )
                .unwrap();
        }
        let m = deeper
            .match_response(
                s,
                Initiator::Client,
                SequencePoint(4),
                ATT_FIND_INFO_RSP,
                ATT_FIND_INFO_REQ,
            )
            .unwrap();
        assert_eq!(m.request.request_seq, SequencePoint(1));
        assert_eq!(m.steps_back, 2);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut corr = RequestCorrelator::default();
        let s = session();
        corr.register_request(s, Initiator::Client, SequencePoint(5), ATT_READ_REQ, read(3))
            .unwrap();
        corr.match_response(s, Initiator::Client, SequencePoint(6), ATT_READ_RSP, ATT_READ_REQ)
            .unwrap();
        let once = corr.clone();

        assert_eq!(
            corr.register_request(s, Initiator::Client, SequencePoint(5), ATT_READ_REQ, read(3))
                .unwrap(),
            Registration::Replayed
        );
        let m = corr
            .match_response(s, Initiator::Client, SequencePoint(6), ATT_READ_RSP, ATT_READ_REQ)
            .unwrap();
        assert_eq!(m.request.response_seq, Some(SequencePoint(6)));

        assert_eq!(
            corr.request_at(&s, Initiator::Client, SequencePoint(5)),
            once.request_at(&s, Initiator::Client, SequencePoint(5))
        );
        assert_eq!(
            corr.request_for(&s, Initiator::Client, SequencePoint(6)),
            once.request_for(&s, Initiator::Client, SequencePoint(6))
        );
    }

    #[test]
    fn test_second_response_is_reported() {
        let mut corr = RequestCorrelator::default();
        let s = session();
        corr.register_request(s, Initiator::Client, SequencePoint(5), ATT_READ_REQ, read(3))
            .unwrap();
        corr.match_response(s, Initiator::Client, SequencePoint(6), ATT_READ_RSP, ATT_READ_REQ)
            .unwrap();

        let err = corr
            .match_response(s, Initiator::Client, SequencePoint(7), ATT_READ_RSP, ATT_READ_REQ)
            .unwrap_err();
        assert_eq!(
            err,
            DissectError::ProtocolViolation(Violation::AlreadyAnswered {
                request_seq: SequencePoint(5),
                response_seq: SequencePoint(6),
            })
        );
        assert_eq!(
            corr.response_for(&s, Initiator::Client, SequencePoint(5)),
            Some(SequencePoint(6))
        );
    }

    #[test]
    fn test_response_without_request() {
        let mut corr = RequestCorrelator::default();
        let err = corr
            .match_response(
                session(),
                Initiator::Client,
                SequencePoint(3),
                ATT_WRITE_RSP,
                ATT_WRITE_REQ,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DissectError::ProtocolViolation(Violation::UnmatchedResponse { .. })
        ));
    }

    #[test]
    fn test_request_after_answer_is_not_pipelined() {
        let mut corr = RequestCorrelator::default();
        let s = session();
        corr.register_request(s, Initiator::Client, SequencePoint(1), ATT_READ_REQ, read(3))
            .unwrap();
        corr.match_response(s, Initiator::Client, SequencePoint(2), ATT_READ_RSP, ATT_READ_REQ)
            .unwrap();
        assert_eq!(
            corr.register_request(s, Initiator::Client, SequencePoint(3), ATT_READ_REQ, read(4))
                .unwrap(),
            Registration::Recorded
        );
        assert_eq!(
            corr.latest_request(&s, Initiator::Client, SequencePoint(100))
                .map(|req| req.request_seq),
            Some(SequencePoint(3))
        );
    }
}
