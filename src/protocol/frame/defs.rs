//! Wire-level constants for DF1 framing and the PCCC command set.

/// Data Link Escape; doubled when it occurs inside a payload.
pub const DLE: u8 = 0x10;
/// Start of text, always preceded by DLE.
pub const STX: u8 = 0x02;
/// End of text, always preceded by DLE.
pub const ETX: u8 = 0x03;
/// Positive acknowledge control octet.
pub const ACK: u8 = 0x06;
/// Negative acknowledge control octet.
pub const NAK: u8 = 0x15;
/// Enquiry control octet; solicits a repeat of the last ACK/NAK.
pub const ENQ: u8 = 0x05;

/// Diagnostic command class (get status and friends).
pub const CMD_DIAGNOSTIC: u8 = 0x06;
/// Protected-typed command class used by all SLC data-table operations.
pub const CMD_PROTECTED_TYPED: u8 = 0x0F;
/// Set on a command byte to mark the frame as a reply.
pub const CMD_REPLY_FLAG: u8 = 0x40;

/// A command byte above this value carries the reply flag.
pub const CMD_REPLY_THRESHOLD: u8 = 0x1F;

/// Diagnostic status (processor type, mode, faults).
pub const FNC_DIAGNOSTIC_STATUS: u8 = 0x03;
/// Protected typed logical read with three address fields.
pub const FNC_READ_THREE_FIELDS: u8 = 0xA1;
/// Protected typed logical read with four address fields (sub-element form).
pub const FNC_READ_FOUR_FIELDS: u8 = 0xA2;
/// Protected typed logical write with three address fields.
pub const FNC_WRITE_THREE_FIELDS: u8 = 0xAA;
/// Protected typed logical write with mask (bit-level writes).
pub const FNC_WRITE_MASKED: u8 = 0xAB;
/// Acquire sole access before a download.
pub const FNC_SOLE_ACCESS_ACQUIRE: u8 = 0x11;
/// Release sole access after a download.
pub const FNC_SOLE_ACCESS_RELEASE: u8 = 0x12;
/// Execute a list of embedded sub-commands.
pub const FNC_EXECUTE_COMMAND_LIST: u8 = 0x88;
/// Begin-download marker sub-command inside the command list.
pub const FNC_BEGIN_DOWNLOAD: u8 = 0x56;
/// Complete a download sequence.
pub const FNC_COMPLETE_DOWNLOAD: u8 = 0x52;
/// Change mode on MicroLogix 1000 controllers.
pub const FNC_CHANGE_MODE_ML1000: u8 = 0x3A;
/// Change mode on every other supported family.
pub const FNC_CHANGE_MODE: u8 = 0x80;

/// Sentinel that introduces a two-byte little-endian address field.
pub const EXTENDED_FIELD: u8 = 0xFF;
/// Smallest value that forces extended field encoding.
pub const EXTENDED_FIELD_MIN: u16 = 255;

/// STS value that redirects to the extended status byte.
pub const STS_EXTENDED: u8 = 0xF0;

/// High bit set on every DH485 node byte on the wire.
pub const DH485_NODE_FLAG: u8 = 0x80;
/// DH485 control byte: token passed to the addressed node.
pub const DH485_CTRL_TOKEN_PASS: u8 = 0x00;
/// DH485 control byte: link-level acknowledge from the peer.
pub const DH485_CTRL_ACK: u8 = 0x18;
/// DH485 control low nibble carried by data-bearing frames.
pub const DH485_CTRL_DATA_NIBBLE: u8 = 0x08;
/// Marker byte opening the DH485 application prefix.
pub const DH485_APP_MARKER: u8 = 0x88;

/// Data-monitor file code; reads against it use a shorter chunk and
/// element-stride continuation.
pub const FILE_CODE_DATA_MONITOR: u8 = 0xA4;

/// Inclusive range of file-type codes listed in the user-data directory.
pub const USER_DATA_CODE_MIN: u8 = 0x82;
/// Inclusive upper bound of the user-data directory range.
pub const USER_DATA_CODE_MAX: u8 = 0x9E;
