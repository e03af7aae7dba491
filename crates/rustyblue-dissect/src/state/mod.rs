//! Conversation state reconstruction
//!
//! This module holds the versioned stores the dissector rebuilds from ATT
//! traffic: the attribute directory, the negotiated MTU, pending
//! transactions and long-value fragments. Every store answers "as of"
//! queries so a capture can be re-dissected in any order.

pub mod capture;
pub mod correlator;
pub mod directory;
pub mod history;
pub mod mtu;
pub mod reassembly;
pub mod types;

pub use capture::{CaptureState, DissectorConfig};
pub use correlator::{
    PendingRequest, PipeliningPolicy, Registration, RequestCorrelator, RequestParams,
    ResponseMatch,
};
pub use directory::{AttributeDirectory, AttributeRecord, AttributeRole, Enclosing};
pub use history::HistoryStore;
pub use mtu::MtuTracker;
pub use reassembly::{ReassemblyStatus, ValueFragment, ValueReassembler};
pub use types::{SequencePoint, SessionKey};
