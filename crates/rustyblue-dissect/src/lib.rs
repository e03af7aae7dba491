//! RustyBlue Dissect - ATT/GATT conversation state for protocol analyzers
//!
//! This library rebuilds what a GATT client and server know about each other
//! from a capture of their ATT traffic: which attribute a handle is and what
//! service and characteristic contain it, the negotiated ATT_MTU, which
//! request a response answers and the full value of attributes read in
//! several pieces. Every question is answered as of a capture position, so a
//! frame can be dissected again later with the same result.

pub mod att;
pub mod dissector;
pub mod error;
pub mod state;
pub mod uuid;

// Re-export common types for convenience
pub use att::{AttErrorCode, AttPdu, CharacteristicProperties, Initiator, OpcodeClass};
pub use dissector::{AttDissector, AttMessage, AttributeContext, Direction, MessageReport};
pub use error::{DissectError, DissectResult, Violation};
pub use state::{
    AttributeDirectory, AttributeRole, CaptureState, DissectorConfig, HistoryStore, MtuTracker,
    PipeliningPolicy, ReassemblyStatus, RequestCorrelator, SequencePoint, SessionKey,
    ValueReassembler,
};
pub use uuid::Uuid;
