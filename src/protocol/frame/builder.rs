//! Builders for the PCCC operations the driver issues.
//!
//! Each builder returns a [`PcccCommand`] ready for the link layer; the
//! session prepends node addressing and the TNS. Address fields follow the
//! protected-typed convention: one byte when the value fits, otherwise the
//! 0xFF sentinel followed by the absolute value in two little-endian bytes.

use super::defs::{
    CMD_DIAGNOSTIC, CMD_PROTECTED_TYPED, EXTENDED_FIELD, EXTENDED_FIELD_MIN, FNC_BEGIN_DOWNLOAD,
    FNC_CHANGE_MODE, FNC_CHANGE_MODE_ML1000, FNC_COMPLETE_DOWNLOAD, FNC_DIAGNOSTIC_STATUS,
    FNC_EXECUTE_COMMAND_LIST, FNC_READ_FOUR_FIELDS, FNC_READ_THREE_FIELDS,
    FNC_SOLE_ACCESS_ACQUIRE, FNC_SOLE_ACCESS_RELEASE, FNC_WRITE_MASKED, FNC_WRITE_THREE_FIELDS,
};
use super::PcccCommand;
use crate::types::{ProcessorFamily, ProcessorMode};
use bytes::{BufMut, Bytes, BytesMut};

/// Raw position of one read/write target inside a data table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TablePosition {
    pub file_number: u8,
    pub file_type_code: u8,
    pub element: u16,
    pub sub_element: u16,
}

fn put_address_field(out: &mut BytesMut, value: u16) {
    if value >= EXTENDED_FIELD_MIN {
        out.put_u8(EXTENDED_FIELD);
        out.put_u16_le(value);
    } else {
        out.put_u8(value as u8);
    }
}

/// Protected typed logical read of `bytes` bytes at `pos`.
///
/// Uses the three-field form when the sub-element is zero, the four-field
/// form otherwise.
pub fn build_typed_read(pos: TablePosition, bytes: usize) -> PcccCommand {
    let mut data = BytesMut::with_capacity(10);
    data.put_u8(bytes as u8);
    data.put_u8(pos.file_number);
    data.put_u8(pos.file_type_code);
    put_address_field(&mut data, pos.element);
    let function = if pos.sub_element == 0 {
        FNC_READ_THREE_FIELDS
    } else {
        put_address_field(&mut data, pos.sub_element);
        FNC_READ_FOUR_FIELDS
    };
    PcccCommand::new(CMD_PROTECTED_TYPED, function, data.freeze())
}

/// Protected typed logical write of `payload` at `pos`.
pub fn build_typed_write(pos: TablePosition, payload: &[u8]) -> PcccCommand {
    let mut data = BytesMut::with_capacity(10 + payload.len());
    data.put_u8(payload.len() as u8);
    data.put_u8(pos.file_number);
    data.put_u8(pos.file_type_code);
    put_address_field(&mut data, pos.element);
    put_address_field(&mut data, pos.sub_element);
    data.put_slice(payload);
    PcccCommand::new(CMD_PROTECTED_TYPED, FNC_WRITE_THREE_FIELDS, data.freeze())
}

/// Masked bit write: `set_mask` selects the bits to change and
/// `value_mask` carries their new state (zero bits clear).
pub fn build_bit_write(pos: TablePosition, set_mask: u16, value_mask: u16) -> PcccCommand {
    let mut data = BytesMut::with_capacity(12);
    data.put_u8(2);
    data.put_u8(pos.file_number);
    data.put_u8(pos.file_type_code);
    put_address_field(&mut data, pos.element);
    put_address_field(&mut data, pos.sub_element);
    data.put_u16_le(set_mask);
    data.put_u16_le(value_mask);
    PcccCommand::new(CMD_PROTECTED_TYPED, FNC_WRITE_MASKED, data.freeze())
}

/// Diagnostic status request; the reply carries the processor family code.
pub fn build_diagnostic_status() -> PcccCommand {
    PcccCommand::new(CMD_DIAGNOSTIC, FNC_DIAGNOSTIC_STATUS, Bytes::new())
}

/// Change controller mode. The MicroLogix 1000 uses its own function and
/// mode bytes; every other family shares the 0x80 form.
pub fn build_change_mode(family: ProcessorFamily, mode: ProcessorMode) -> PcccCommand {
    let (function, mode_byte) = match family {
        ProcessorFamily::MicroLogix1000 => (
            FNC_CHANGE_MODE_ML1000,
            match mode {
                ProcessorMode::Program => 0x00,
                ProcessorMode::Run => 0x02,
            },
        ),
        _ => (
            FNC_CHANGE_MODE,
            match mode {
                ProcessorMode::Program => 0x01,
                ProcessorMode::Run => 0x06,
            },
        ),
    };
    PcccCommand::new(
        CMD_PROTECTED_TYPED,
        function,
        Bytes::from(vec![mode_byte]),
    )
}

/// Acquire or release sole access around a download.
pub fn build_sole_access(acquire: bool) -> PcccCommand {
    let function = if acquire {
        FNC_SOLE_ACCESS_ACQUIRE
    } else {
        FNC_SOLE_ACCESS_RELEASE
    };
    PcccCommand::new(CMD_PROTECTED_TYPED, function, Bytes::new())
}

/// Complete-download marker issued after all files are written.
pub fn build_complete_download() -> PcccCommand {
    PcccCommand::new(CMD_PROTECTED_TYPED, FNC_COMPLETE_DOWNLOAD, Bytes::new())
}

/// Execute-command-list kicking off a download.
///
/// Two embedded sub-commands: a short write into file 0 type 0x63 carrying
/// bytes 2.. of the pre-download header snapshot, then the one-byte
/// begin-download marker.
pub fn build_download_command_list(
    family: ProcessorFamily,
    header_snapshot: &[u8],
) -> PcccCommand {
    let copy_len = family.download_prefix_len();
    let mut copied = vec![0u8; copy_len];
    for (i, slot) in copied.iter_mut().enumerate() {
        *slot = header_snapshot.get(2 + i).copied().unwrap_or(0);
    }

    let mut data = BytesMut::with_capacity(12 + copy_len);
    data.put_u8(2);
    // Sub-command 1: write `copied` to file 0, type 0x63, element 0.
    data.put_u8((6 + copy_len) as u8);
    data.put_u8(FNC_WRITE_THREE_FIELDS);
    data.put_u8(copy_len as u8);
    data.put_u8(0x00);
    data.put_u8(0x63);
    data.put_u8(0x00);
    data.put_u8(0x00);
    data.put_slice(&copied);
    // Sub-command 2: begin download.
    data.put_u8(1);
    data.put_u8(FNC_BEGIN_DOWNLOAD);
    PcccCommand::new(CMD_PROTECTED_TYPED, FNC_EXECUTE_COMMAND_LIST, data.freeze())
}
