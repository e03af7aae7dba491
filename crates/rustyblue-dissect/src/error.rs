//! Error types for the rustyblue-dissect library
//!
//! Nothing here is fatal. The dissector collects these values as annotations
//! on the message that triggered them and carries on with the next message.

use crate::state::SequencePoint;
use thiserror::Error;

/// Protocol rules a capture was seen to break
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Response (or confirmation) with no plausible outstanding request
    UnmatchedResponse {
        opcode: u8,
        expected_request: u8,
    },
    /// A request opened while an earlier one was still unanswered
    PipelinedRequest {
        opcode: u8,
        outstanding_opcode: u8,
        outstanding_seq: SequencePoint,
    },
    /// The matching request was already answered by another response
    AlreadyAnswered {
        request_seq: SequencePoint,
        response_seq: SequencePoint,
    },
    /// The hierarchy walk reached handle 1 without finding a service
    HandleWalkExhausted { handle: u16 },
    /// Opcode travelling in a direction the protocol does not allow
    UnexpectedDirection { opcode: u8 },
    /// Notification or indication on a characteristic that does not permit it
    PropertyMismatch { handle: u16, opcode: u8 },
}

/// Errors reported while rebuilding conversation state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DissectError {
    #[error("Malformed PDU 0x{opcode:02X}: need {needed} bytes, got {actual}")]
    MalformedMessage {
        opcode: u8,
        needed: usize,
        actual: usize,
    },

    #[error("Protocol violation: {0:?}")]
    ProtocolViolation(Violation),

    #[error("Value of handle 0x{handle:04X} unavailable: fragment chain incomplete")]
    IncompleteReassembly { handle: u16 },
}

impl From<Violation> for DissectError {
    fn from(violation: Violation) -> Self {
        DissectError::ProtocolViolation(violation)
    }
}

impl DissectError {
    /// Malformed PDU helper used by the parsers
    pub fn malformed(opcode: u8, needed: usize, actual: usize) -> Self {
        DissectError::MalformedMessage {
            opcode,
            needed,
            actual,
        }
    }
}

/// Result type for dissection operations
pub type DissectResult<T> = Result<T, DissectError>;
