//! Per-message driver over the capture state
use super::message::{AttMessage, AttributeContext, Direction, MessageReport};
use crate::att::constants::*;
use crate::att::opcode::{implied_request_opcode, opcode_name, OpcodeClass};
use crate::att::pdu::{AttPdu, CharacteristicDeclaration, CharacteristicProperties};
use crate::error::{DissectError, Violation};
use crate::state::{
    AttributeRecord, AttributeRole, CaptureState, DissectorConfig, Enclosing, PendingRequest,
    ReassemblyStatus, Registration, RequestParams, SequencePoint, SessionKey,
};
use crate::uuid::Uuid;
use log::{debug, trace, warn};

/// ATT conversation dissector.
///
/// Feed it every ATT PDU of a capture through [`process`](Self::process).
/// Messages may be fed more than once and in any order after the first
/// in-order pass; each report reflects the state as of its own message.
#[derive(Debug, Clone, Default)]
pub struct AttDissector {
    state: CaptureState,
}

impl AttDissector {
    /// Create a dissector with the given configuration
    pub fn new(config: DissectorConfig) -> Self {
        Self {
            state: CaptureState::new(config),
        }
    }

    /// Reconstructed state
    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Consume the dissector, keeping its state
    pub fn into_state(self) -> CaptureState {
        self.state
    }

    /// Release everything learned about `session`
    pub fn end_session(&mut self, session: &SessionKey) {
        self.state.end_session(session);
    }

    /// Dissect one message and update the capture state
    pub fn process(&mut self, message: &AttMessage) -> MessageReport {
        let class = OpcodeClass::of(message.opcode);
        let mut report = MessageReport::new(message, class);

        trace!(
            "{}: {} {} ({} bytes)",
            message.session,
            message.seq,
            opcode_name(message.opcode),
            message.payload.len()
        );

        if Direction::expected_for(class).contradicts(message.direction) {
            report.annotations.push(
                Violation::UnexpectedDirection {
                    opcode: message.opcode,
                }
                .into(),
            );
        }

        let pdu = match AttPdu::parse(message.opcode, &message.payload) {
            Ok(pdu) => pdu,
            Err(e) => {
                warn!("{}: {} {}", message.session, message.seq, e);
                report.annotations.push(e);
                return report;
            }
        };

        report.handle = pdu.handle();
        match class {
            OpcodeClass::Request | OpcodeClass::Indication => {
                self.on_request(message, class, &pdu, &mut report)
            }
            OpcodeClass::Response | OpcodeClass::Confirmation => {
                self.on_response(message, class, &pdu, &mut report)
            }
            OpcodeClass::Notification => self.on_notification(message, &pdu, &mut report),
            OpcodeClass::Command | OpcodeClass::Unknown => {}
        }

        if let Some(handle) = report.handle {
            let context = self.attribute_context(message, handle, &mut report.annotations);
            report.attribute = Some(context);
        }
        report.pdu = Some(pdu);

        for annotation in &report.annotations {
            debug!("{}: {} annotated: {}", message.session, message.seq, annotation);
        }
        report
    }

    fn on_request(
        &mut self,
        message: &AttMessage,
        class: OpcodeClass,
        pdu: &AttPdu,
        report: &mut MessageReport,
    ) {
        let Some(initiator) = class.initiator() else {
            return;
        };

        if let AttPdu::ExchangeMtuRequest { client_mtu } = pdu {
            self.state
                .propose_client_mtu(message.session, message.seq, *client_mtu);
        }
        if let AttPdu::HandleValueIndication { handle, .. } = pdu {
            self.check_properties(message, *handle, CharacteristicProperties::INDICATE, report);
        }

        match self.state.register_request(
            message.session,
            initiator,
            message.seq,
            message.opcode,
            request_params(pdu),
        ) {
            Ok(Registration::RecordedPipelined(violation)) => {
                report.annotations.push(violation.into())
            }
            Ok(_) => {}
            Err(e) => report.annotations.push(e),
        }

        report.response_seq = self
            .state
            .correlator()
            .response_for(&message.session, initiator, message.seq);
    }

    fn on_response(
        &mut self,
        message: &AttMessage,
        class: OpcodeClass,
        pdu: &AttPdu,
        report: &mut MessageReport,
    ) {
        let Some(initiator) = class.initiator() else {
            return;
        };

        let expected = match pdu {
            AttPdu::ErrorResponse {
                request_opcode,
                error_code,
                ..
            } => {
                report.error = Some(*error_code);
                Some(*request_opcode)
            }
            _ => implied_request_opcode(message.opcode),
        };
        let Some(expected) = expected else {
            return;
        };

        let matched = match self.state.match_response(
            message.session,
            initiator,
            message.seq,
            message.opcode,
            expected,
        ) {
            Ok(matched) => matched,
            Err(e) => {
                report.annotations.push(e);
                return;
            }
        };

        if matched.steps_back > 0 {
            debug!(
                "{}: {} stepped back over {} request(s)",
                message.session, message.seq, matched.steps_back
            );
        }
        report.request_seq = Some(matched.request.request_seq);
        if report.handle.is_none() {
            report.handle = request_handle(&matched.request.params);
        }
        self.apply_response(message, pdu, &matched.request, report);
    }

    fn on_notification(&mut self, message: &AttMessage, pdu: &AttPdu, report: &mut MessageReport) {
        match pdu {
            AttPdu::HandleValueNotification { handle, .. } => {
                self.check_properties(message, *handle, CharacteristicProperties::NOTIFY, report)
            }
            AttPdu::MultipleHandleValueNotification { entries } => {
                for (handle, _) in entries {
                    let required = CharacteristicProperties::NOTIFY;
                    self.check_properties(message, *handle, required, report);
                }
            }
            _ => {}
        }
    }

    // Learn whatever the response reveals about the server
    fn apply_response(
        &mut self,
        message: &AttMessage,
        pdu: &AttPdu,
        request: &PendingRequest,
        report: &mut MessageReport,
    ) {
        let session = message.session;
        let seq = message.seq;

        match (pdu, &request.params) {
            (AttPdu::ExchangeMtuResponse { server_mtu }, _) => {
                self.state.propose_server_mtu(session, seq, *server_mtu);
            }
            (
                AttPdu::ReadByGroupTypeResponse { entries },
                RequestParams::TypeRange { attribute_type, .. },
            ) if attribute_type.is_service_declaration() => {
                let directory = self.state.directory_mut();
                for entry in entries {
                    let role = AttributeRole::Service;
                    directory.declare_raw(session, entry.start_handle, &entry.value, role, seq);
                }
            }
            (
                AttPdu::FindByTypeValueResponse { ranges },
                RequestParams::TypeValueRange {
                    attribute_type,
                    value,
                    ..
                },
            ) if Uuid::from_u16(*attribute_type).is_service_declaration() => {
                let directory = self.state.directory_mut();
                for (start, _) in ranges {
                    directory.declare_raw(session, *start, value, AttributeRole::Service, seq);
                }
            }
            (
                AttPdu::ReadByTypeResponse { entries },
                RequestParams::TypeRange { attribute_type, .. },
            ) => {
                for entry in entries {
                    let (handle, value) = (entry.handle, &entry.value);
                    self.learn_declaration(session, seq, *attribute_type, handle, value);
                }
            }
            (AttPdu::FindInformationResponse { entries }, _) => {
                let directory = self.state.directory_mut();
                for (handle, uuid) in entries {
                    if !uuid.is_gatt_declaration() {
                        directory.declare(session, *handle, *uuid, AttributeRole::Other, seq);
                    }
                }
            }
            (AttPdu::ReadResponse { value }, RequestParams::Handle { handle }) => {
                self.state.record_fragment(session, *handle, seq, 0, value);
                let status = self.state.reconstruct(&session, *handle, seq);
                Self::finish_value(message, *handle, status, report);
            }
            (
                AttPdu::ReadBlobResponse { value },
                RequestParams::HandleOffset { handle, offset },
            ) => {
                self.state
                    .record_fragment(session, *handle, seq, *offset, value);
                let status = self.state.reconstruct(&session, *handle, seq);
                Self::finish_value(message, *handle, status, report);
            }
            (AttPdu::ErrorResponse { error_code, .. }, RequestParams::HandleOffset { handle, .. })
                if request.opcode == ATT_READ_BLOB_REQ && error_code.ends_long_read() =>
            {
                let status = self.state.reconstruct_terminated(&session, *handle, seq);
                Self::finish_value(message, *handle, status, report);
            }
            _ => {}
        }
    }

    fn finish_value(
        message: &AttMessage,
        handle: u16,
        status: ReassemblyStatus,
        report: &mut MessageReport,
    ) {
        if status == ReassemblyStatus::Incomplete {
            warn!(
                "{}: {} cannot rebuild value of 0x{:04X}",
                message.session, message.seq, handle
            );
            report
                .annotations
                .push(DissectError::IncompleteReassembly { handle });
        }
        report.value = Some(status);
    }

    // `value` is the value of the attribute at `handle`, whose type is `attribute_type`
    fn learn_declaration(
        &mut self,
        session: SessionKey,
        seq: SequencePoint,
        attribute_type: Uuid,
        handle: u16,
        value: &[u8],
    ) {
        let directory = self.state.directory_mut();
        if attribute_type.is_service_declaration() {
            directory.declare_raw(session, handle, value, AttributeRole::Service, seq);
        } else if attribute_type.is_characteristic_declaration() {
            directory.declare(session, handle, attribute_type, AttributeRole::Other, seq);
            if let Some(decl) = CharacteristicDeclaration::parse(value) {
                let role = AttributeRole::Characteristic;
                let record = AttributeRecord::new(decl.value_handle, decl.uuid, role)
                    .with_properties(decl.properties);
                directory.declare_record(session, record, seq);
            }
        } else if attribute_type.is_include_declaration() {
            directory.declare(session, handle, attribute_type, AttributeRole::Other, seq);
        } else if !attribute_type.is_gatt_declaration()
            && directory.resolve_type(&session, handle, seq) != Some(attribute_type)
        {
            directory.declare(session, handle, attribute_type, AttributeRole::Other, seq);
        }
    }

    fn check_properties(
        &self,
        message: &AttMessage,
        handle: u16,
        required: CharacteristicProperties,
        report: &mut MessageReport,
    ) {
        let record = self
            .state
            .directory()
            .resolve(&message.session, handle, message.seq);
        let Some(properties) = record.and_then(|record| record.properties) else {
            return;
        };
        if !properties.contains(required) {
            warn!(
                "{}: {} on 0x{:04X} which only allows {:?}",
                message.session,
                opcode_name(message.opcode),
                handle,
                properties
            );
            report.annotations.push(
                Violation::PropertyMismatch {
                    handle,
                    opcode: message.opcode,
                }
                .into(),
            );
        }
    }

    fn attribute_context(
        &self,
        message: &AttMessage,
        handle: u16,
        annotations: &mut Vec<DissectError>,
    ) -> AttributeContext {
        let session = &message.session;
        let seq = message.seq;
        let directory = self.state.directory();
        let attribute_type = directory.resolve_type(session, handle, seq);

        let service = match directory.enclosing_service_record(session, handle, seq) {
            Enclosing::Found(record) => Some(record.attribute_type),
            Enclosing::Exhausted if attribute_type.is_some() => {
                annotations.push(Violation::HandleWalkExhausted { handle }.into());
                None
            }
            _ => None,
        };

        AttributeContext {
            handle,
            attribute_type,
            service,
            characteristic: directory.resolve_enclosing_characteristic(session, handle, seq),
        }
    }
}

/// Parameters a request carries forward to its response
fn request_params(pdu: &AttPdu) -> RequestParams {
    match pdu {
        AttPdu::ExchangeMtuRequest { client_mtu } => RequestParams::Mtu {
            client_mtu: *client_mtu,
        },
        AttPdu::FindInformationRequest {
            start_handle,
            end_handle,
        } => RequestParams::Range {
            start: *start_handle,
            end: *end_handle,
        },
        AttPdu::FindByTypeValueRequest {
            start_handle,
            end_handle,
            attribute_type,
            value,
        } => RequestParams::TypeValueRange {
            start: *start_handle,
            end: *end_handle,
            attribute_type: *attribute_type,
            value: value.clone(),
        },
        AttPdu::ReadByTypeRequest {
            start_handle,
            end_handle,
            attribute_type,
        } => RequestParams::TypeRange {
            start: *start_handle,
            end: *end_handle,
            attribute_type: *attribute_type,
        },
        AttPdu::ReadByGroupTypeRequest {
            start_handle,
            end_handle,
            group_type,
        } => RequestParams::TypeRange {
            start: *start_handle,
            end: *end_handle,
            attribute_type: *group_type,
        },
        AttPdu::ReadRequest { handle }
        | AttPdu::WriteRequest { handle, .. }
        | AttPdu::HandleValueIndication { handle, .. } => RequestParams::Handle { handle: *handle },
        AttPdu::ReadBlobRequest { handle, offset }
        | AttPdu::PrepareWriteRequest { handle, offset, .. } => RequestParams::HandleOffset {
            handle: *handle,
            offset: *offset,
        },
        AttPdu::ReadMultipleRequest { handles }
        | AttPdu::ReadMultipleVariableRequest { handles } => {
            RequestParams::Handles(handles.clone())
        }
        AttPdu::ExecuteWriteRequest { flags } => RequestParams::ExecuteWrite { flags: *flags },
        _ => RequestParams::None,
    }
}

fn request_handle(params: &RequestParams) -> Option<u16> {
    match params {
        RequestParams::Handle { handle } | RequestParams::HandleOffset { handle, .. } => {
            Some(*handle)
        }
        _ => None,
    }
}
