//! Identifiers shared by every state store

use crate::att::constants::ATT_CID;
use std::fmt;

/// Identifies one ATT bearer: adapter, ACL connection and L2CAP channel.
///
/// All reconstructed state is partitioned by this key; nothing is shared
/// between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    /// Local adapter (controller) index
    pub adapter_id: u32,
    /// HCI ACL connection handle
    pub connection_handle: u16,
    /// L2CAP channel carrying ATT
    pub cid: u16,
}

impl SessionKey {
    /// Session on an arbitrary channel (e.g. an enhanced ATT bearer)
    pub fn new(adapter_id: u32, connection_handle: u16, cid: u16) -> Self {
        Self {
            adapter_id,
            connection_handle,
            cid,
        }
    }

    /// Session on the LE fixed ATT channel
    pub fn le(adapter_id: u32, connection_handle: u16) -> Self {
        Self::new(adapter_id, connection_handle, ATT_CID)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hci{}/0x{:04X}/cid 0x{:04X}",
            self.adapter_id, self.connection_handle, self.cid
        )
    }
}

/// A point in the capture, typically the frame number.
///
/// Used both as the insertion time of every recorded entry and as the query
/// time of every "as of" lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequencePoint(pub u32);

impl SequencePoint {
    /// Raw frame number
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for SequencePoint {
    fn from(frame: u32) -> Self {
        SequencePoint(frame)
    }
}

impl fmt::Display for SequencePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
