//! PCCC application framing for DF1 and DH485 payloads.
//!
//! Every application command travels as
//! `[dst][src][cmd][sts=0][tns_lo][tns_hi][fnc][data...]`. DH485 wraps the
//! same block in a three-byte link header plus an application prefix, and
//! replies mirror the layout with the reply flag OR'd into the command
//! byte.

use crate::protocol::error::{ProtocolError, Sts};
use crate::types::ProtocolKind;
use bytes::{BufMut, Bytes, BytesMut};

pub mod builder;
pub mod defs;

use defs::{CMD_REPLY_FLAG, CMD_REPLY_THRESHOLD, DH485_APP_MARKER, DH485_NODE_FLAG};

/// Caller-composed half of a PCCC command: class byte, optional function
/// byte, and the command data block.
#[derive(Debug, Clone, PartialEq)]
pub struct PcccCommand {
    pub command: u8,
    pub function: Option<u8>,
    pub data: Bytes,
}

impl PcccCommand {
    pub fn new(command: u8, function: u8, data: Bytes) -> Self {
        Self {
            command,
            function: Some(function),
            data,
        }
    }
}

/// Parsed PCCC reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PcccReply {
    pub command: u8,
    pub status: Sts,
    pub tns: u16,
    pub data: Bytes,
}

impl PcccReply {
    /// Convert a non-zero status into the error it represents.
    pub fn check(self) -> Result<Self, ProtocolError> {
        if self.status.is_ok() {
            Ok(self)
        } else {
            Err(ProtocolError::Status(self.status))
        }
    }
}

/// Whether a command byte carries the reply flag.
pub fn is_reply_command(command: u8) -> bool {
    command > CMD_REPLY_THRESHOLD
}

/// Encode a DF1 application payload for one command.
pub fn encode_df1(target: u8, source: u8, tns: u16, command: &PcccCommand) -> Bytes {
    let mut out = BytesMut::with_capacity(7 + command.data.len());
    out.put_u8(target);
    out.put_u8(source);
    out.put_u8(command.command);
    out.put_u8(0);
    out.put_u16_le(tns);
    if let Some(function) = command.function {
        out.put_u8(function);
    }
    out.put_slice(&command.data);
    out.freeze()
}

/// Encode a DF1 reply payload echoing a received TNS; used to answer
/// unsolicited commands from the controller.
pub fn encode_df1_reply(target: u8, source: u8, command: u8, tns: u16) -> Bytes {
    let mut out = BytesMut::with_capacity(6);
    out.put_u8(target);
    out.put_u8(source);
    out.put_u8(command | CMD_REPLY_FLAG);
    out.put_u8(0);
    out.put_u16_le(tns);
    out.freeze()
}

/// Encode a DH485 application payload for one command.
///
/// Layout: three-byte link header (`dst|0x80`, control, `src|0x80`)
/// followed by the application prefix `[0x88][src|0x80][0x01][0x01][len]`
/// and the PCCC block.
pub fn encode_dh485(
    target: u8,
    source: u8,
    control: u8,
    tns: u16,
    command: &PcccCommand,
) -> Bytes {
    let app_len = 4 + usize::from(command.function.is_some()) + command.data.len();
    let mut out = BytesMut::with_capacity(8 + app_len);
    out.put_u8(target | DH485_NODE_FLAG);
    out.put_u8(control);
    out.put_u8(source | DH485_NODE_FLAG);
    out.put_u8(DH485_APP_MARKER);
    out.put_u8(source | DH485_NODE_FLAG);
    out.put_u8(0x01);
    out.put_u8(0x01);
    out.put_u8(app_len as u8);
    out.put_u8(command.command);
    out.put_u8(0);
    out.put_u16_le(tns);
    if let Some(function) = command.function {
        out.put_u8(function);
    }
    out.put_slice(&command.data);
    out.freeze()
}

/// Encode a bare DH485 token-pass frame.
pub fn encode_dh485_token_pass(target: u8, source: u8) -> Bytes {
    Bytes::from(vec![
        target | DH485_NODE_FLAG,
        defs::DH485_CTRL_TOKEN_PASS,
        source | DH485_NODE_FLAG,
    ])
}

/// Encode a bare DH485 link-level acknowledge frame.
pub fn encode_dh485_ack(target: u8, source: u8) -> Bytes {
    Bytes::from(vec![
        target | DH485_NODE_FLAG,
        defs::DH485_CTRL_ACK,
        source | DH485_NODE_FLAG,
    ])
}

/// Offset of the STS byte inside a reply body.
fn sts_offset(protocol: ProtocolKind) -> usize {
    match protocol {
        ProtocolKind::Df1 => 3,
        ProtocolKind::Dh485 => 7,
    }
}

/// Offset of the TNS low byte inside a reply-bearing body.
fn tns_offset(protocol: ProtocolKind) -> usize {
    match protocol {
        ProtocolKind::Df1 => 4,
        ProtocolKind::Dh485 => 8,
    }
}

/// Offset of the command byte inside a body.
pub fn command_offset(protocol: ProtocolKind) -> usize {
    match protocol {
        ProtocolKind::Df1 => 2,
        ProtocolKind::Dh485 => 6,
    }
}

/// Extract the command byte of a received body, if long enough.
pub fn command_byte(protocol: ProtocolKind, body: &[u8]) -> Option<u8> {
    body.get(command_offset(protocol)).copied()
}

/// Transaction slot index for a received body.
///
/// Bodies too short to carry a TNS are short commands and land in slot 0.
pub fn reply_slot(protocol: ProtocolKind, body: &[u8]) -> u8 {
    body.get(tns_offset(protocol)).copied().unwrap_or(0)
}

/// Parse a received body into a [`PcccReply`].
///
/// An STS of 0xF0 redirects to the extended status carried in the last
/// body byte, surfaced as `0x100 + ext`.
pub fn parse_reply(protocol: ProtocolKind, body: &Bytes) -> Result<PcccReply, ProtocolError> {
    let sts_at = sts_offset(protocol);
    let tns_at = tns_offset(protocol);
    if body.len() < tns_at + 2 {
        return Err(ProtocolError::MalformedReply(format!(
            "reply body too short: {} bytes",
            body.len()
        )));
    }
    let command = body[command_offset(protocol)];
    let sts = body[sts_at];
    let tns = u16::from_le_bytes([body[tns_at], body[tns_at + 1]]);
    let data = body.slice(tns_at + 2..);
    let ext = if sts == defs::STS_EXTENDED {
        body.last().copied()
    } else {
        None
    };
    Ok(PcccReply {
        command,
        status: Sts::from_reply(sts, ext),
        tns,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::defs::{CMD_PROTECTED_TYPED, FNC_READ_THREE_FIELDS};

    #[test]
    fn df1_command_layout() {
        let cmd = PcccCommand::new(
            CMD_PROTECTED_TYPED,
            FNC_READ_THREE_FIELDS,
            Bytes::from_static(&[0x02, 0x07, 0x89, 0x00]),
        );
        let body = encode_df1(1, 0, 0x1234, &cmd);
        assert_eq!(
            &body[..],
            &[0x01, 0x00, 0x0F, 0x00, 0x34, 0x12, 0xA1, 0x02, 0x07, 0x89, 0x00]
        );
    }

    #[test]
    fn df1_reply_round_trip() {
        let body = Bytes::from_static(&[0x00, 0x01, 0x4F, 0x00, 0x34, 0x12, 0xAA, 0xBB]);
        let reply = parse_reply(ProtocolKind::Df1, &body).unwrap();
        assert_eq!(reply.command, 0x4F);
        assert!(reply.status.is_ok());
        assert_eq!(reply.tns, 0x1234);
        assert_eq!(&reply.data[..], &[0xAA, 0xBB]);
        assert_eq!(reply_slot(ProtocolKind::Df1, &body), 0x34);
    }

    #[test]
    fn df1_extended_status_from_tail() {
        let body = Bytes::from_static(&[0x00, 0x01, 0x4F, 0xF0, 0x01, 0x00, 0x07]);
        let reply = parse_reply(ProtocolKind::Df1, &body).unwrap();
        assert_eq!(reply.status.0, 0x107);
        assert!(matches!(
            reply.check(),
            Err(ProtocolError::Status(sts)) if sts.0 == 0x107
        ));
    }

    #[test]
    fn dh485_command_layout() {
        let cmd = PcccCommand::new(
            CMD_PROTECTED_TYPED,
            FNC_READ_THREE_FIELDS,
            Bytes::from_static(&[0x02]),
        );
        let body = encode_dh485(1, 2, 0x08, 0x0102, &cmd);
        assert_eq!(
            &body[..],
            &[
                0x81, 0x08, 0x82, 0x88, 0x82, 0x01, 0x01, 0x06, 0x0F, 0x00, 0x02, 0x01, 0xA1,
                0x02
            ]
        );
    }

    #[test]
    fn dh485_reply_offsets() {
        // [dst|80][ctrl][src|80][88][src|80][len][cmd][sts][tns_lo][tns_hi][data]
        let body = Bytes::from_static(&[
            0x80, 0x08, 0x81, 0x88, 0x81, 0x05, 0x4F, 0x00, 0x77, 0x00, 0x2A,
        ]);
        let reply = parse_reply(ProtocolKind::Dh485, &body).unwrap();
        assert_eq!(reply.command, 0x4F);
        assert_eq!(reply.tns, 0x77);
        assert_eq!(&reply.data[..], &[0x2A]);
        assert_eq!(reply_slot(ProtocolKind::Dh485, &body), 0x77);
    }

    #[test]
    fn short_bodies_map_to_slot_zero() {
        assert_eq!(reply_slot(ProtocolKind::Df1, &[0x00, 0x01, 0x06]), 0);
        assert!(parse_reply(ProtocolKind::Df1, &Bytes::from_static(&[0x00, 0x01])).is_err());
    }

    #[test]
    fn reply_flag_threshold() {
        assert!(!is_reply_command(0x0F));
        assert!(!is_reply_command(0x06));
        assert!(is_reply_command(0x4F));
        assert!(is_reply_command(0x46));
    }
}
