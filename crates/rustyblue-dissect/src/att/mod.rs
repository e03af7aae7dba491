//! Attribute Protocol (ATT) definitions
//!
//! Opcodes, error codes and the fixed PDU fields the state engine needs in
//! order to follow a conversation. Attribute values themselves are left as
//! raw bytes.

pub mod constants;
pub mod error;
pub mod opcode;
pub mod pdu;

pub use self::constants::*;
pub use self::error::AttErrorCode;
pub use self::opcode::{implied_request_opcode, opcode_name, Initiator, OpcodeClass};
pub use self::pdu::{AttPdu, CharacteristicDeclaration, CharacteristicProperties};
