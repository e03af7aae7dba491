//! Attribute directory
//!
//! Maps handles to the attribute type and GATT role learned from discovery
//! traffic, as of any point in the capture. Services and characteristics
//! are recorded at the handle that opens them; every handle above such a
//! record, up to the next one, belongs to it.

use super::history::HistoryStore;
use super::types::{SequencePoint, SessionKey};
use crate::att::constants::ATT_HANDLE_MIN;
use crate::att::pdu::CharacteristicProperties;
use crate::uuid::Uuid;
use log::debug;

/// Structural role of a handle in the GATT hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeRole {
    /// Service declaration; the type is the service UUID
    Service,
    /// Characteristic value; the type is the characteristic UUID
    Characteristic,
    /// Anything else (descriptors, declarations, unknown)
    Other,
}

/// What the directory knows about one handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    /// Attribute handle
    pub handle: u16,
    /// Attribute type
    pub attribute_type: Uuid,
    /// Role in the hierarchy
    pub role: AttributeRole,
    /// Declared properties, for characteristics learned from a declaration
    pub properties: Option<CharacteristicProperties>,
}

impl AttributeRecord {
    /// Create a record with no declared properties
    pub fn new(handle: u16, attribute_type: Uuid, role: AttributeRole) -> Self {
        Self {
            handle,
            attribute_type,
            role,
            properties: None,
        }
    }

    /// Attach characteristic properties
    pub fn with_properties(mut self, properties: CharacteristicProperties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Outcome of a downward hierarchy walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enclosing<'a> {
    /// The enclosing record was found
    Found(&'a AttributeRecord),
    /// A service boundary was met before a characteristic
    Boundary,
    /// The walk reached the lowest handle without a match
    Exhausted,
}

/// As-of directory of attribute handles
#[derive(Debug, Clone, Default)]
pub struct AttributeDirectory {
    records: HistoryStore<u16, AttributeRecord>,
}

impl AttributeDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `handle` has `attribute_type` and `role` from `seq` onward.
    ///
    /// Handle 0 never addresses an attribute and is ignored. Returns whether
    /// the directory changed.
    pub fn declare(
        &mut self,
        session: SessionKey,
        handle: u16,
        attribute_type: Uuid,
        role: AttributeRole,
        seq: SequencePoint,
    ) -> bool {
        self.declare_record(session, AttributeRecord::new(handle, attribute_type, role), seq)
    }

    /// Like [`declare`](Self::declare), with the type as raw ATT bytes.
    ///
    /// Ignored unless the bytes are a 16-bit or 128-bit identifier.
    pub fn declare_raw(
        &mut self,
        session: SessionKey,
        handle: u16,
        type_bytes: &[u8],
        role: AttributeRole,
        seq: SequencePoint,
    ) -> bool {
        match Uuid::from_att_bytes(type_bytes) {
            Some(attribute_type) => self.declare(session, handle, attribute_type, role, seq),
            None => false,
        }
    }

    /// Record a fully built record
    pub fn declare_record(
        &mut self,
        session: SessionKey,
        record: AttributeRecord,
        seq: SequencePoint,
    ) -> bool {
        if record.handle < ATT_HANDLE_MIN {
            return false;
        }

        let handle = record.handle;
        let role = record.role;
        let attribute_type = record.attribute_type;
        let inserted = self.records.put(session, handle, seq, record);
        if inserted {
            debug!(
                "{}: handle 0x{:04X} is {:?} {} from {}",
                session, handle, role, attribute_type, seq
            );
        }
        inserted
    }

    /// Record for `handle` as of `seq`
    pub fn resolve(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Option<&AttributeRecord> {
        self.records.get(session, &handle, seq)
    }

    /// Attribute type of `handle` as of `seq`
    pub fn resolve_type(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Option<Uuid> {
        self.resolve(session, handle, seq).map(|record| record.attribute_type)
    }

    /// UUID of the service containing `handle` as of `seq`
    pub fn resolve_enclosing_service(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Option<Uuid> {
        match self.enclosing_service_record(session, handle, seq) {
            Enclosing::Found(record) => Some(record.attribute_type),
            _ => None,
        }
    }

    /// UUID of the characteristic containing `handle` as of `seq`.
    ///
    /// Never crosses into a preceding service.
    pub fn resolve_enclosing_characteristic(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Option<Uuid> {
        match self.enclosing_characteristic_record(session, handle, seq) {
            Enclosing::Found(record) => Some(record.attribute_type),
            _ => None,
        }
    }

    /// Service record at or below `handle`
    pub fn enclosing_service_record(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Enclosing<'_> {
        self.walk_down(session, handle, seq, |record| match record.role {
            AttributeRole::Service => Some(Enclosing::Found(record)),
            _ => None,
        })
    }

    /// Characteristic record at or below `handle`, stopping at a service
    pub fn enclosing_characteristic_record(
        &self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
    ) -> Enclosing<'_> {
        self.walk_down(session, handle, seq, |record| match record.role {
            AttributeRole::Characteristic => Some(Enclosing::Found(record)),
            AttributeRole::Service => Some(Enclosing::Boundary),
            AttributeRole::Other => None,
        })
    }

    /// Release a session's directory
    pub fn remove_session(&mut self, session: &SessionKey) {
        self.records.remove_session(session);
    }

    // Scans handle, handle - 1, ... 1 and stops at the first record `visit`
    // has an answer for. Bounded by the handle value itself.
    fn walk_down<'a, F>(
        &'a self,
        session: &SessionKey,
        handle: u16,
        seq: SequencePoint,
        visit: F,
    ) -> Enclosing<'a>
    where
        F: Fn(&'a AttributeRecord) -> Option<Enclosing<'a>>,
    {
        (ATT_HANDLE_MIN..=handle)
            .rev()
            .filter_map(|h| self.records.get(session, &h, seq))
            .find_map(visit)
            .unwrap_or(Enclosing::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVC_BATTERY: u16 = 0x180F;
    const SVC_HEART_RATE: u16 = 0x180D;
    const CHR_BATTERY_LEVEL: u16 = 0x2A19;
    const CHR_HR_MEASUREMENT: u16 = 0x2A37;
    const DESC_CCCD: u16 = 0x2902;

    fn session() -> SessionKey {
        SessionKey::le(0, 0x0040)
    }

    fn sample_directory() -> AttributeDirectory {
        let mut dir = AttributeDirectory::new();
        let s = session();
        let seq = SequencePoint(1);
        dir.declare(s, 1, SVC_BATTERY.into(), AttributeRole::Service, seq);
        dir.declare(s, 5, CHR_BATTERY_LEVEL.into(), AttributeRole::Characteristic, seq);
        dir
    }

    #[test]
    fn test_hierarchy_resolution() {
        let dir = sample_directory();
        let s = session();
        let seq = SequencePoint(1);

        assert_eq!(dir.resolve_enclosing_service(&s, 7, seq), Some(SVC_BATTERY.into()));
        assert_eq!(
            dir.resolve_enclosing_characteristic(&s, 7, seq),
            Some(CHR_BATTERY_LEVEL.into())
        );
        assert_eq!(dir.resolve_enclosing_characteristic(&s, 3, seq), None);
        assert_eq!(dir.resolve_enclosing_service(&s, 1, seq), Some(SVC_BATTERY.into()));
    }

    #[test]
    fn test_as_of_visibility() {
        let dir = sample_directory();
        let s = session();
        assert_eq!(dir.resolve_enclosing_service(&s, 7, SequencePoint(0)), None);
        assert_eq!(dir.resolve_type(&s, 5, SequencePoint(0)), None);
        assert_eq!(dir.resolve_type(&s, 5, SequencePoint(2)), Some(CHR_BATTERY_LEVEL.into()));
    }

    #[test]
    fn test_characteristic_never_crosses_service_boundary() {
        let mut dir = sample_directory();
        let s = session();
        let seq = SequencePoint(2);
        dir.declare(s, 10, SVC_HEART_RATE.into(), AttributeRole::Service, seq);
        dir.declare(s, 12, DESC_CCCD.into(), AttributeRole::Other, seq);

        assert_eq!(dir.resolve_enclosing_characteristic(&s, 12, seq), None);
        assert_eq!(
            dir.enclosing_characteristic_record(&s, 12, seq),
            Enclosing::Boundary
        );
        assert_eq!(dir.resolve_enclosing_service(&s, 12, seq), Some(SVC_HEART_RATE.into()));

        dir.declare(s, 11, CHR_HR_MEASUREMENT.into(), AttributeRole::Characteristic, seq);
        assert_eq!(
            dir.resolve_enclosing_characteristic(&s, 12, seq),
            Some(CHR_HR_MEASUREMENT.into())
        );
        // The earlier snapshot is unchanged
        assert_eq!(
            dir.resolve_enclosing_characteristic(&s, 12, SequencePoint(1)),
            Some(CHR_BATTERY_LEVEL.into())
        );
    }

    #[test]
    fn test_ignored_declarations() {
        let mut dir = AttributeDirectory::new();
        let s = session();
        assert!(!dir.declare(s, 0, SVC_BATTERY.into(), AttributeRole::Service, SequencePoint(1)));
        assert!(!dir.declare_raw(
            s,
            3,
            &[0x01, 0x02, 0x03],
            AttributeRole::Other,
            SequencePoint(1),
        ));
        assert!(dir.declare_raw(s, 3, &[0x02, 0x29], AttributeRole::Other, SequencePoint(1)));
        assert_eq!(dir.resolve_type(&s, 3, SequencePoint(1)), Some(DESC_CCCD.into()));
        assert_eq!(dir.resolve_type(&s, 0, SequencePoint(1)), None);
    }

    #[test]
    fn test_walk_exhausts_without_service() {
        let mut dir = AttributeDirectory::new();
        let s = session();
        dir.declare(s, 4, DESC_CCCD.into(), AttributeRole::Other, SequencePoint(1));
        assert_eq!(dir.enclosing_service_record(&s, 4, SequencePoint(1)), Enclosing::Exhausted);
        assert_eq!(dir.enclosing_service_record(&s, 0, SequencePoint(1)), Enclosing::Exhausted);
        assert_eq!(
            dir.enclosing_service_record(&s, u16::MAX, SequencePoint(1)),
            Enclosing::Exhausted
        );
    }

    #[test]
    fn test_redeclaration_is_idempotent() {
        let mut dir = sample_directory();
        let s = session();
        let before = dir.clone();
        assert!(!dir.declare(
            s,
            5,
            CHR_BATTERY_LEVEL.into(),
            AttributeRole::Characteristic,
            SequencePoint(1),
        ));
        for handle in 0..10 {
            assert_eq!(
                dir.resolve(&s, handle, SequencePoint(1)),
                before.resolve(&s, handle, SequencePoint(1))
            );
        }
    }
}
