//! Dissector input and output types
use crate::att::error::AttErrorCode;
use crate::att::opcode::OpcodeClass;
use crate::att::pdu::AttPdu;
use crate::error::DissectError;
use crate::state::{ReassemblyStatus, SequencePoint, SessionKey};
use crate::uuid::Uuid;

/// Direction a PDU travelled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by the GATT client
    ClientToServer,
    /// Sent by the GATT server
    ServerToClient,
    /// The capture does not say
    Unknown,
}

impl Direction {
    /// The direction an opcode of `class` must travel in
    pub fn expected_for(class: OpcodeClass) -> Direction {
        match class {
            OpcodeClass::Request | OpcodeClass::Command | OpcodeClass::Confirmation => {
                Direction::ClientToServer
            }
            OpcodeClass::Response | OpcodeClass::Notification | OpcodeClass::Indication => {
                Direction::ServerToClient
            }
            OpcodeClass::Unknown => Direction::Unknown,
        }
    }

    /// Whether both directions are known and differ
    pub fn contradicts(&self, other: Direction) -> bool {
        *self != Direction::Unknown && other != Direction::Unknown && *self != other
    }
}

/// One ATT PDU, already demultiplexed to its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttMessage {
    /// Bearer the PDU belongs to
    pub session: SessionKey,
    /// Where in the capture it was seen
    pub seq: SequencePoint,
    /// ATT opcode
    pub opcode: u8,
    /// Everything after the opcode byte
    pub payload: Vec<u8>,
    /// Direction of travel
    pub direction: Direction,
}

impl AttMessage {
    pub fn new(
        session: SessionKey,
        seq: impl Into<SequencePoint>,
        direction: Direction,
        opcode: u8,
        payload: &[u8],
    ) -> Self {
        Self {
            session,
            seq: seq.into(),
            opcode,
            payload: payload.to_vec(),
            direction,
        }
    }

    /// Build a message from a raw PDU whose first byte is the opcode
    pub fn from_pdu(
        session: SessionKey,
        seq: impl Into<SequencePoint>,
        direction: Direction,
        pdu: &[u8],
    ) -> Option<Self> {
        let (&opcode, payload) = pdu.split_first()?;
        Some(Self::new(session, seq, direction, opcode, payload))
    }
}

/// Where a handle sits in the GATT hierarchy, as of the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeContext {
    pub handle: u16,
    pub attribute_type: Option<Uuid>,
    pub service: Option<Uuid>,
    pub characteristic: Option<Uuid>,
}

/// What the dissector learned from one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReport {
    pub session: SessionKey,
    pub seq: SequencePoint,
    pub opcode: u8,
    pub class: OpcodeClass,
    /// Decoded fixed fields, absent when the PDU is malformed
    pub pdu: Option<AttPdu>,
    /// Attribute the message is about
    pub handle: Option<u16>,
    pub attribute: Option<AttributeContext>,
    /// "Is the answer to": the request this response closes
    pub request_seq: Option<SequencePoint>,
    /// "Answered at": known once the response has been dissected
    pub response_seq: Option<SequencePoint>,
    /// Error code of an Error Response
    pub error: Option<AttErrorCode>,
    /// Long value state for Read and Read Blob responses
    pub value: Option<ReassemblyStatus>,
    /// Problems found while dissecting; none of them are fatal
    pub annotations: Vec<DissectError>,
}

impl MessageReport {
    pub(crate) fn new(message: &AttMessage, class: OpcodeClass) -> Self {
        Self {
            session: message.session,
            seq: message.seq,
            opcode: message.opcode,
            class,
            pdu: None,
            handle: None,
            attribute: None,
            request_seq: None,
            response_seq: None,
            error: None,
            value: None,
            annotations: Vec::new(),
        }
    }

    /// Whether any annotation was raised
    pub fn has_annotations(&self) -> bool {
        !self.annotations.is_empty()
    }
}
