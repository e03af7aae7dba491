//! ATT opcode classification
//!
//! Every ATT PDU falls into one of a handful of method types. Requests and
//! indications open a transaction that the peer closes with a response or
//! confirmation; commands and notifications never expect an answer.

use super::constants::*;

/// Transaction role of an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeClass {
    /// Client request that expects a response
    Request,
    /// Server response to a request
    Response,
    /// Client command, no response defined
    Command,
    /// Server notification, no confirmation defined
    Notification,
    /// Server indication that expects a confirmation
    Indication,
    /// Client confirmation of an indication
    Confirmation,
    /// Opcode not defined by the protocol
    Unknown,
}

/// The side of the link that opened a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Initiator {
    /// GATT client (requests)
    Client,
    /// GATT server (indications)
    Server,
}

impl OpcodeClass {
    /// Classify a raw opcode
    pub fn of(opcode: u8) -> Self {
        match opcode {
            ATT_ERROR_RSP
            | ATT_EXCHANGE_MTU_RSP
            | ATT_FIND_INFO_RSP
            | ATT_FIND_BY_TYPE_VALUE_RSP
            | ATT_READ_BY_TYPE_RSP
            | ATT_READ_RSP
            | ATT_READ_BLOB_RSP
            | ATT_READ_MULTIPLE_RSP
            | ATT_READ_BY_GROUP_TYPE_RSP
            | ATT_WRITE_RSP
            | ATT_PREPARE_WRITE_RSP
            | ATT_EXECUTE_WRITE_RSP
            | ATT_READ_MULTIPLE_VARIABLE_RSP => OpcodeClass::Response,
            ATT_EXCHANGE_MTU_REQ
            | ATT_FIND_INFO_REQ
            | ATT_FIND_BY_TYPE_VALUE_REQ
            | ATT_READ_BY_TYPE_REQ
            | ATT_READ_REQ
            | ATT_READ_BLOB_REQ
            | ATT_READ_MULTIPLE_REQ
            | ATT_READ_BY_GROUP_TYPE_REQ
            | ATT_WRITE_REQ
            | ATT_PREPARE_WRITE_REQ
            | ATT_EXECUTE_WRITE_REQ
            | ATT_READ_MULTIPLE_VARIABLE_REQ => OpcodeClass::Request,
            ATT_WRITE_CMD | ATT_SIGNED_WRITE_CMD => OpcodeClass::Command,
            ATT_HANDLE_VALUE_NTF | ATT_MULTIPLE_HANDLE_VALUE_NTF => OpcodeClass::Notification,
            ATT_HANDLE_VALUE_IND => OpcodeClass::Indication,
            ATT_HANDLE_VALUE_CONF => OpcodeClass::Confirmation,
            _ => OpcodeClass::Unknown,
        }
    }

    /// The side that owns the transaction this class takes part in
    pub fn initiator(&self) -> Option<Initiator> {
        match self {
            OpcodeClass::Request | OpcodeClass::Response | OpcodeClass::Command => {
                Some(Initiator::Client)
            }
            OpcodeClass::Indication | OpcodeClass::Confirmation | OpcodeClass::Notification => {
                Some(Initiator::Server)
            }
            OpcodeClass::Unknown => None,
        }
    }
}

/// Request opcode implied by a response opcode.
///
/// Returns `None` for the Error Response, whose request opcode travels in
/// its payload, and for opcodes that are not responses.
pub fn implied_request_opcode(response_opcode: u8) -> Option<u8> {
    match response_opcode {
        ATT_HANDLE_VALUE_CONF => Some(ATT_HANDLE_VALUE_IND),
        ATT_ERROR_RSP => None,
        op if OpcodeClass::of(op) == OpcodeClass::Response => Some(op - 1),
        _ => None,
    }
}

/// Human readable opcode name, for logs
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        ATT_ERROR_RSP => "Error Response",
        ATT_EXCHANGE_MTU_REQ => "Exchange MTU Request",
        ATT_EXCHANGE_MTU_RSP => "Exchange MTU Response",
        ATT_FIND_INFO_REQ => "Find Information Request",
        ATT_FIND_INFO_RSP => "Find Information Response",
        ATT_FIND_BY_TYPE_VALUE_REQ => "Find By Type Value Request",
        ATT_FIND_BY_TYPE_VALUE_RSP => "Find By Type Value Response",
        ATT_READ_BY_TYPE_REQ => "Read By Type Request",
        ATT_READ_BY_TYPE_RSP => "Read By Type Response",
        ATT_READ_REQ => "Read Request",
        ATT_READ_RSP => "Read Response",
        ATT_READ_BLOB_REQ => "Read Blob Request",
        ATT_READ_BLOB_RSP => "Read Blob Response",
        ATT_READ_MULTIPLE_REQ => "Read Multiple Request",
        ATT_READ_MULTIPLE_RSP => "Read Multiple Response",
        ATT_READ_BY_GROUP_TYPE_REQ => "Read By Group Type Request",
        ATT_READ_BY_GROUP_TYPE_RSP => "Read By Group Type Response",
        ATT_WRITE_REQ => "Write Request",
        ATT_WRITE_RSP => "Write Response",
        ATT_PREPARE_WRITE_REQ => "Prepare Write Request",
        ATT_PREPARE_WRITE_RSP => "Prepare Write Response",
        ATT_EXECUTE_WRITE_REQ => "Execute Write Request",
        ATT_EXECUTE_WRITE_RSP => "Execute Write Response",
        ATT_HANDLE_VALUE_NTF => "Handle Value Notification",
        ATT_HANDLE_VALUE_IND => "Handle Value Indication",
        ATT_HANDLE_VALUE_CONF => "Handle Value Confirmation",
        ATT_READ_MULTIPLE_VARIABLE_REQ => "Read Multiple Variable Request",
        ATT_READ_MULTIPLE_VARIABLE_RSP => "Read Multiple Variable Response",
        ATT_MULTIPLE_HANDLE_VALUE_NTF => "Multiple Handle Value Notification",
        ATT_WRITE_CMD => "Write Command",
        ATT_SIGNED_WRITE_CMD => "Signed Write Command",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(OpcodeClass::of(ATT_READ_REQ), OpcodeClass::Request);
        assert_eq!(OpcodeClass::of(ATT_READ_RSP), OpcodeClass::Response);
        assert_eq!(OpcodeClass::of(ATT_ERROR_RSP), OpcodeClass::Response);
        assert_eq!(OpcodeClass::of(ATT_WRITE_CMD), OpcodeClass::Command);
        assert_eq!(OpcodeClass::of(ATT_SIGNED_WRITE_CMD), OpcodeClass::Command);
        assert_eq!(OpcodeClass::of(ATT_HANDLE_VALUE_NTF), OpcodeClass::Notification);
        assert_eq!(OpcodeClass::of(ATT_HANDLE_VALUE_IND), OpcodeClass::Indication);
        assert_eq!(OpcodeClass::of(ATT_HANDLE_VALUE_CONF), OpcodeClass::Confirmation);
        assert_eq!(OpcodeClass::of(0x3F), OpcodeClass::Unknown);

        assert_eq!(OpcodeClass::Indication.initiator(), Some(Initiator::Server));
        assert_eq!(OpcodeClass::Response.initiator(), Some(Initiator::Client));
        assert_eq!(OpcodeClass::Unknown.initiator(), None);
    }

    #[test]
    fn test_implied_request() {
        assert_eq!(implied_request_opcode(ATT_READ_BLOB_RSP), Some(ATT_READ_BLOB_REQ));
        assert_eq!(implied_request_opcode(ATT_EXCHANGE_MTU_RSP), Some(ATT_EXCHANGE_MTU_REQ));
        assert_eq!(
            implied_request_opcode(ATT_READ_MULTIPLE_VARIABLE_RSP),
            Some(ATT_READ_MULTIPLE_VARIABLE_REQ)
        );
        assert_eq!(implied_request_opcode(ATT_HANDLE_VALUE_CONF), Some(ATT_HANDLE_VALUE_IND));
        assert_eq!(implied_request_opcode(ATT_ERROR_RSP), None);
        assert_eq!(implied_request_opcode(ATT_READ_REQ), None);
    }
}
