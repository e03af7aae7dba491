//! ATT PDU headers
//!
//! Only the fixed fields the state engine reacts to are decoded here:
//! handles, offsets, types, MTUs and the lists carried by discovery
//! responses. Attribute values are kept as raw bytes.

use super::constants::*;
use super::error::AttErrorCode;
use crate::error::{DissectError, DissectResult};
use crate::uuid::Uuid;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

bitflags! {
    /// Characteristic properties from a characteristic declaration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// Value of a characteristic declaration attribute (type 0x2803)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDeclaration {
    /// Declared properties
    pub properties: CharacteristicProperties,
    /// Handle of the characteristic value
    pub value_handle: u16,
    /// Characteristic UUID
    pub uuid: Uuid,
}

impl CharacteristicDeclaration {
    /// Parse a declaration value: properties (1), value handle (2), UUID (2 or 16)
    pub fn parse(value: &[u8]) -> Option<Self> {
        if value.len() < 5 {
            return None;
        }
        let properties = CharacteristicProperties::from_bits_truncate(value[0]);
        let value_handle = u16::from_le_bytes([value[1], value[2]]);
        let uuid = Uuid::from_att_bytes(&value[3..])?;

        Some(Self {
            properties,
            value_handle,
            uuid,
        })
    }
}

/// Handle-value pair from a Read By Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Group entry from a Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupData {
    pub start_handle: u16,
    pub end_handle: u16,
    pub value: Vec<u8>,
}

/// A decoded ATT PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttPdu {
    ErrorResponse {
        request_opcode: u8,
        handle: u16,
        error_code: AttErrorCode,
    },
    ExchangeMtuRequest {
        client_mtu: u16,
    },
    ExchangeMtuResponse {
        server_mtu: u16,
    },
    FindInformationRequest {
        start_handle: u16,
        end_handle: u16,
    },
    FindInformationResponse {
        entries: Vec<(u16, Uuid)>,
    },
    FindByTypeValueRequest {
        start_handle: u16,
        end_handle: u16,
        attribute_type: u16,
        value: Vec<u8>,
    },
    FindByTypeValueResponse {
        ranges: Vec<(u16, u16)>,
    },
    ReadByTypeRequest {
        start_handle: u16,
        end_handle: u16,
        attribute_type: Uuid,
    },
    ReadByTypeResponse {
        entries: Vec<HandleValue>,
    },
    ReadRequest {
        handle: u16,
    },
    ReadResponse {
        value: Vec<u8>,
    },
    ReadBlobRequest {
        handle: u16,
        offset: u16,
    },
    ReadBlobResponse {
        value: Vec<u8>,
    },
    ReadMultipleRequest {
        handles: Vec<u16>,
    },
    ReadMultipleResponse {
        values: Vec<u8>,
    },
    ReadByGroupTypeRequest {
        start_handle: u16,
        end_handle: u16,
        group_type: Uuid,
    },
    ReadByGroupTypeResponse {
        entries: Vec<GroupData>,
    },
    WriteRequest {
        handle: u16,
        value: Vec<u8>,
    },
    WriteResponse,
    WriteCommand {
        handle: u16,
        value: Vec<u8>,
    },
    SignedWriteCommand {
        handle: u16,
        value: Vec<u8>,
        signature: [u8; ATT_SIGNATURE_LEN],
    },
    PrepareWriteRequest {
        handle: u16,
        offset: u16,
        value: Vec<u8>,
    },
    PrepareWriteResponse {
        handle: u16,
        offset: u16,
        value: Vec<u8>,
    },
    ExecuteWriteRequest {
        flags: u8,
    },
    ExecuteWriteResponse,
    HandleValueNotification {
        handle: u16,
        value: Vec<u8>,
    },
    HandleValueIndication {
        handle: u16,
        value: Vec<u8>,
    },
    HandleValueConfirmation,
    ReadMultipleVariableRequest {
        handles: Vec<u16>,
    },
    ReadMultipleVariableResponse {
        values: Vec<Vec<u8>>,
    },
    MultipleHandleValueNotification {
        entries: Vec<(u16, Vec<u8>)>,
    },
    Unknown {
        opcode: u8,
        payload: Vec<u8>,
    },
}

// Little helper over a cursor that turns short reads into MalformedMessage
struct Reader<'a> {
    opcode: u8,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    fn new(opcode: u8, payload: &'a [u8]) -> Self {
        Self {
            opcode,
            cursor: Cursor::new(payload),
        }
    }

    fn require(&self, needed: usize) -> DissectResult<()> {
        let actual = self.cursor.get_ref().len();
        if actual < needed {
            return Err(DissectError::malformed(self.opcode, needed, actual));
        }
        Ok(())
    }

    fn u8(&mut self) -> DissectResult<u8> {
        let needed = self.position() + 1;
        let actual = self.cursor.get_ref().len();
        self.cursor
            .read_u8()
            .map_err(|_| DissectError::malformed(self.opcode, needed, actual))
    }

    fn u16(&mut self) -> DissectResult<u16> {
        let needed = self.position() + 2;
        let actual = self.cursor.get_ref().len();
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| DissectError::malformed(self.opcode, needed, actual))
    }

    fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn remaining(&self) -> &'a [u8] {
        let data: &'a [u8] = *self.cursor.get_ref();
        &data[self.position().min(data.len())..]
    }

    fn take(&mut self, len: usize) -> DissectResult<&'a [u8]> {
        let rest = self.remaining();
        if rest.len() < len {
            return Err(DissectError::malformed(
                self.opcode,
                self.position() + len,
                self.cursor.get_ref().len(),
            ));
        }
        self.cursor.set_position((self.position() + len) as u64);
        Ok(&rest[..len])
    }

    fn uuid(&mut self) -> DissectResult<Uuid> {
        let rest = self.remaining();
        let uuid = Uuid::from_att_bytes(rest).ok_or_else(|| {
            DissectError::malformed(self.opcode, self.position() + 2, self.cursor.get_ref().len())
        })?;
        self.take(rest.len())?;
        Ok(uuid)
    }

    fn handles(&mut self) -> DissectResult<Vec<u16>> {
        let mut handles = Vec::new();
        while self.remaining().len() >= 2 {
            handles.push(self.u16()?);
        }
        Ok(handles)
    }
}

impl AttPdu {
    /// Parse the payload (everything after the opcode byte) of an ATT PDU
    pub fn parse(opcode: u8, payload: &[u8]) -> DissectResult<Self> {
        let mut r = Reader::new(opcode, payload);

        let pdu = match opcode {
            ATT_ERROR_RSP => {
                r.require(4)?;
                AttPdu::ErrorResponse {
                    request_opcode: r.u8()?,
                    handle: r.u16()?,
                    error_code: AttErrorCode::from(r.u8()?),
                }
            }
            ATT_EXCHANGE_MTU_REQ => AttPdu::ExchangeMtuRequest {
                client_mtu: r.u16()?,
            },
            ATT_EXCHANGE_MTU_RSP => AttPdu::ExchangeMtuResponse {
                server_mtu: r.u16()?,
            },
            ATT_FIND_INFO_REQ => {
                r.require(4)?;
                AttPdu::FindInformationRequest {
                    start_handle: r.u16()?,
                    end_handle: r.u16()?,
                }
            }
            ATT_FIND_INFO_RSP => {
                let uuid_len = match r.u8()? {
                    ATT_FIND_INFO_RSP_FORMAT_16BIT => 2,
                    ATT_FIND_INFO_RSP_FORMAT_128BIT => 16,
                    _ => return Err(DissectError::malformed(opcode, 1 + 2 + 2, payload.len())),
                };
                r.require(1 + 2 + uuid_len)?;
                let mut entries = Vec::new();
                while r.remaining().len() >= 2 + uuid_len {
                    let handle = r.u16()?;
                    let uuid = Uuid::from_att_bytes(r.take(uuid_len)?)
                        .ok_or_else(|| DissectError::malformed(opcode, 2 + uuid_len, 0))?;
                    entries.push((handle, uuid));
                }
                AttPdu::FindInformationResponse { entries }
            }
            ATT_FIND_BY_TYPE_VALUE_REQ => {
                r.require(6)?;
                AttPdu::FindByTypeValueRequest {
                    start_handle: r.u16()?,
                    end_handle: r.u16()?,
                    attribute_type: r.u16()?,
                    value: r.remaining().to_vec(),
                }
            }
            ATT_FIND_BY_TYPE_VALUE_RSP => {
                r.require(4)?;
                let mut ranges = Vec::new();
                while r.remaining().len() >= 4 {
                    ranges.push((r.u16()?, r.u16()?));
                }
                AttPdu::FindByTypeValueResponse { ranges }
            }
            ATT_READ_BY_TYPE_REQ => {
                r.require(6)?;
                AttPdu::ReadByTypeRequest {
                    start_handle: r.u16()?,
                    end_handle: r.u16()?,
                    attribute_type: r.uuid()?,
                }
            }
            ATT_READ_BY_TYPE_RSP => {
                let length = r.u8()? as usize;
                if length < 2 {
                    return Err(DissectError::malformed(opcode, 1 + 2, payload.len()));
                }
                r.require(1 + length)?;
                let mut entries = Vec::new();
                while r.remaining().len() >= length {
                    let handle = r.u16()?;
                    let value = r.take(length - 2)?.to_vec();
                    entries.push(HandleValue { handle, value });
                }
                AttPdu::ReadByTypeResponse { entries }
            }
            ATT_READ_REQ => AttPdu::ReadRequest { handle: r.u16()? },
            ATT_READ_RSP => AttPdu::ReadResponse {
                value: payload.to_vec(),
            },
            ATT_READ_BLOB_REQ => {
                r.require(4)?;
                AttPdu::ReadBlobRequest {
                    handle: r.u16()?,
                    offset: r.u16()?,
                }
            }
            ATT_READ_BLOB_RSP => AttPdu::ReadBlobResponse {
                value: payload.to_vec(),
            },
            ATT_READ_MULTIPLE_REQ => {
                r.require(4)?;
                AttPdu::ReadMultipleRequest {
                    handles: r.handles()?,
                }
            }
            ATT_READ_MULTIPLE_RSP => AttPdu::ReadMultipleResponse {
                values: payload.to_vec(),
            },
            ATT_READ_BY_GROUP_TYPE_REQ => {
                r.require(6)?;
                AttPdu::ReadByGroupTypeRequest {
                    start_handle: r.u16()?,
                    end_handle: r.u16()?,
                    group_type: r.uuid()?,
                }
            }
            ATT_READ_BY_GROUP_TYPE_RSP => {
                let length = r.u8()? as usize;
                if length < 4 {
                    return Err(DissectError::malformed(opcode, 1 + 4, payload.len()));
                }
                r.require(1 + length)?;
                let mut entries = Vec::new();
                while r.remaining().len() >= length {
                    let start_handle = r.u16()?;
                    let end_handle = r.u16()?;
                    let value = r.take(length - 4)?.to_vec();
                    entries.push(GroupData {
                        start_handle,
                        end_handle,
                        value,
                    });
                }
                AttPdu::ReadByGroupTypeResponse { entries }
            }
            ATT_WRITE_REQ => AttPdu::WriteRequest {
                handle: r.u16()?,
                value: r.remaining().to_vec(),
            },
            ATT_WRITE_RSP => AttPdu::WriteResponse,
            ATT_WRITE_CMD => AttPdu::WriteCommand {
                handle: r.u16()?,
                value: r.remaining().to_vec(),
            },
            ATT_SIGNED_WRITE_CMD => {
                r.require(2 + ATT_SIGNATURE_LEN)?;
                let handle = r.u16()?;
                let value_len = r.remaining().len() - ATT_SIGNATURE_LEN;
                let value = r.take(value_len)?.to_vec();
                let mut signature = [0u8; ATT_SIGNATURE_LEN];
                signature.copy_from_slice(r.take(ATT_SIGNATURE_LEN)?);
                AttPdu::SignedWriteCommand {
                    handle,
                    value,
                    signature,
                }
            }
            ATT_PREPARE_WRITE_REQ | ATT_PREPARE_WRITE_RSP => {
                r.require(4)?;
                let handle = r.u16()?;
                let offset = r.u16()?;
                let value = r.remaining().to_vec();
                if opcode == ATT_PREPARE_WRITE_REQ {
                    AttPdu::PrepareWriteRequest {
                        handle,
                        offset,
                        value,
                    }
                } else {
                    AttPdu::PrepareWriteResponse {
                        handle,
                        offset,
                        value,
                    }
                }
            }
            ATT_EXECUTE_WRITE_REQ => AttPdu::ExecuteWriteRequest { flags: r.u8()? },
            ATT_EXECUTE_WRITE_RSP => AttPdu::ExecuteWriteResponse,
            ATT_HANDLE_VALUE_NTF => AttPdu::HandleValueNotification {
                handle: r.u16()?,
                value: r.remaining().to_vec(),
            },
            ATT_HANDLE_VALUE_IND => AttPdu::HandleValueIndication {
                handle: r.u16()?,
                value: r.remaining().to_vec(),
            },
            ATT_HANDLE_VALUE_CONF => AttPdu::HandleValueConfirmation,
            ATT_READ_MULTIPLE_VARIABLE_REQ => {
                r.require(4)?;
                AttPdu::ReadMultipleVariableRequest {
                    handles: r.handles()?,
                }
            }
            ATT_READ_MULTIPLE_VARIABLE_RSP => {
                // The last value may be truncated to fit the MTU
                let mut values = Vec::new();
                while r.remaining().len() >= 2 {
                    let len = r.u16()? as usize;
                    let available = len.min(r.remaining().len());
                    values.push(r.take(available)?.to_vec());
                }
                AttPdu::ReadMultipleVariableResponse { values }
            }
            ATT_MULTIPLE_HANDLE_VALUE_NTF => {
                r.require(4)?;
                let mut entries = Vec::new();
                while r.remaining().len() >= 4 {
                    let handle = r.u16()?;
                    let len = r.u16()? as usize;
                    entries.push((handle, r.take(len)?.to_vec()));
                }
                AttPdu::MultipleHandleValueNotification { entries }
            }
            _ => AttPdu::Unknown {
                opcode,
                payload: payload.to_vec(),
            },
        };

        Ok(pdu)
    }

    /// The single attribute handle a PDU addresses, if it addresses one
    pub fn handle(&self) -> Option<u16> {
        match self {
            AttPdu::ReadRequest { handle }
            | AttPdu::ReadBlobRequest { handle, .. }
            | AttPdu::WriteRequest { handle, .. }
            | AttPdu::WriteCommand { handle, .. }
            | AttPdu::SignedWriteCommand { handle, .. }
            | AttPdu::PrepareWriteRequest { handle, .. }
            | AttPdu::PrepareWriteResponse { handle, .. }
            | AttPdu::HandleValueNotification { handle, .. }
            | AttPdu::HandleValueIndication { handle, .. } => Some(*handle),
            AttPdu::ErrorResponse { handle, .. } if *handle != 0 => Some(*handle),
            _ => None,
        }
    }
}
