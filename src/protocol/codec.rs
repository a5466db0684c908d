//! DF1 framing codec.
//!
//! Outbound frames are `DLE STX <payload with DLEs doubled> DLE ETX <bcc|crc>`.
//! Inbound bytes feed a small state machine that collapses doubled DLEs,
//! restarts on a nested DLE/STX, surfaces bare DLE-prefixed control octets
//! (ACK/NAK/ENQ) to the link layer, and hands off completed frames together
//! with the result of local checksum verification.

use crate::protocol::checksum::{bcc, crc16};
use crate::protocol::frame::defs::{ACK, DH485_NODE_FLAG, DLE, ENQ, ETX, NAK, STX};
use crate::types::{ChecksumKind, ProtocolKind};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// In-band control octet delivered outside the frame path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOctet {
    Ack,
    Nak,
    Enq,
}

/// A completed inbound frame body with the local checksum verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkFrame {
    /// Unescaped bytes between DLE/STX and DLE/ETX.
    pub body: Bytes,
    /// Whether the trailing checksum matched our own computation.
    pub checksum_ok: bool,
}

/// One event surfaced by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum RxEvent {
    Control(ControlOctet),
    Frame(LinkFrame),
}

/// One item accepted by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum TxFrame {
    /// A full application frame; the payload is escaped and checksummed.
    Payload(Bytes),
    Ack,
    Nak,
    Enq,
}

#[derive(Debug, Default)]
struct ReceiverState {
    packet_started: bool,
    packet_ended: bool,
    node_checked: bool,
    pending_dle: bool,
    etx_position: usize,
    buffer: BytesMut,
    trailer: Vec<u8>,
}

impl ReceiverState {
    fn reset(&mut self) {
        self.packet_started = false;
        self.packet_ended = false;
        self.node_checked = false;
        self.pending_dle = false;
        self.etx_position = 0;
        self.buffer.clear();
        self.trailer.clear();
    }

    fn restart_frame(&mut self) {
        self.packet_started = true;
        self.packet_ended = false;
        self.node_checked = false;
        self.pending_dle = false;
        self.etx_position = 0;
        self.buffer.clear();
        self.trailer.clear();
    }
}

/// Byte-oriented DF1 link codec for use with `tokio_util::codec::Framed`.
#[derive(Debug)]
pub struct LinkCodec {
    checksum: ChecksumKind,
    protocol: ProtocolKind,
    my_node: u8,
    rx: ReceiverState,
}

impl LinkCodec {
    pub fn new(checksum: ChecksumKind, protocol: ProtocolKind, my_node: u8) -> Self {
        Self {
            checksum,
            protocol,
            my_node,
            rx: ReceiverState::default(),
        }
    }

    fn trailer_len(&self) -> usize {
        match self.checksum {
            ChecksumKind::Bcc => 1,
            ChecksumKind::Crc => 2,
        }
    }

    /// Escape and frame a payload, appending the raw checksum bytes.
    pub fn frame_payload(&self, payload: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(payload.len() + 8);
        out.put_u8(DLE);
        out.put_u8(STX);
        for &b in payload {
            out.put_u8(b);
            if b == DLE {
                out.put_u8(DLE);
            }
        }
        out.put_u8(DLE);
        out.put_u8(ETX);
        match self.checksum {
            ChecksumKind::Bcc => out.put_u8(bcc(payload)),
            ChecksumKind::Crc => out.put_u16_le(crc16(payload)),
        }
        out.freeze()
    }

    fn verify(&self, body: &[u8], trailer: &[u8]) -> bool {
        match self.checksum {
            ChecksumKind::Bcc => trailer.len() == 1 && trailer[0] == bcc(body),
            ChecksumKind::Crc => {
                trailer.len() == 2
                    && u16::from_le_bytes([trailer[0], trailer[1]]) == crc16(body)
            }
        }
    }

    /// Whether the first payload byte addresses this node.
    fn addressed_to_us(&self, first: u8) -> bool {
        match self.protocol {
            ProtocolKind::Df1 => true,
            ProtocolKind::Dh485 => first == self.my_node | DH485_NODE_FLAG,
        }
    }

    fn push_byte(&mut self, byte: u8) -> Option<RxEvent> {
        // Trailer collection runs before anything else: checksum bytes are
        // raw and may legally be DLE or any control value.
        if self.rx.packet_ended {
            self.rx.trailer.push(byte);
            if self.rx.trailer.len() == self.trailer_len() {
                let body = self.rx.buffer.split_to(self.rx.etx_position).freeze();
                let ok = self.verify(&body, &self.rx.trailer);
                self.rx.reset();
                return Some(RxEvent::Frame(LinkFrame {
                    body,
                    checksum_ok: ok,
                }));
            }
            return None;
        }

        if self.rx.pending_dle {
            self.rx.pending_dle = false;
            match byte {
                DLE if self.rx.packet_started => {
                    self.append(DLE);
                    return None;
                }
                STX => {
                    self.rx.restart_frame();
                    return None;
                }
                ETX if self.rx.packet_started => {
                    self.rx.packet_ended = true;
                    self.rx.etx_position = self.rx.buffer.len();
                    return None;
                }
                ACK => return Some(RxEvent::Control(ControlOctet::Ack)),
                NAK => return Some(RxEvent::Control(ControlOctet::Nak)),
                ENQ => return Some(RxEvent::Control(ControlOctet::Enq)),
                _ => {
                    // Not a recognizable DLE sequence; abandon any frame in
                    // progress and resynchronize on the next DLE/STX.
                    self.rx.reset();
                    return None;
                }
            }
        }

        if byte == DLE {
            self.rx.pending_dle = true;
            return None;
        }

        if self.rx.packet_started {
            self.append(byte);
        }
        None
    }

    fn append(&mut self, byte: u8) {
        if !self.rx.node_checked {
            self.rx.node_checked = true;
            if !self.addressed_to_us(byte) {
                self.rx.reset();
                return;
            }
        }
        self.rx.buffer.put_u8(byte);
    }
}

impl Decoder for LinkCodec {
    type Item = RxEvent;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while src.has_remaining() {
            let byte = src.get_u8();
            if let Some(event) = self.push_byte(byte) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

impl Encoder<TxFrame> for LinkCodec {
    type Error = io::Error;

    fn encode(&mut self, item: TxFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            TxFrame::Payload(payload) => dst.extend_from_slice(&self.frame_payload(&payload)),
            TxFrame::Ack => dst.extend_from_slice(&[DLE, ACK]),
            TxFrame::Nak => dst.extend_from_slice(&[DLE, NAK]),
            TxFrame::Enq => dst.extend_from_slice(&[DLE, ENQ]),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LinkCodec, wire: &[u8]) -> Vec<RxEvent> {
        let mut src = BytesMut::from(wire);
        let mut out = Vec::new();
        while let Some(ev) = codec.decode(&mut src).unwrap() {
            out.push(ev);
        }
        out
    }

    fn round_trip(payload: &[u8], checksum: ChecksumKind) {
        let mut codec = LinkCodec::new(checksum, ProtocolKind::Df1, 0);
        let wire = codec.frame_payload(payload);
        let events = decode_all(&mut codec, &wire);
        assert_eq!(events.len(), 1, "payload {:02X?}", payload);
        match &events[0] {
            RxEvent::Frame(f) => {
                assert_eq!(&f.body[..], payload);
                assert!(f.checksum_ok);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn frame_round_trip_with_awkward_octets() {
        for checksum in [ChecksumKind::Bcc, ChecksumKind::Crc] {
            round_trip(&[], checksum);
            round_trip(&[0x00], checksum);
            round_trip(&[0x10], checksum);
            round_trip(&[0x10, 0x10, 0x10], checksum);
            round_trip(&[0x10, 0x02], checksum);
            round_trip(&[0x10, 0x03], checksum);
            round_trip(&[0x06, 0x15, 0x05], checksum);
            round_trip(&[0x01, 0x10, 0x02, 0x10, 0x03, 0x10, 0x10, 0xFF], checksum);
        }
    }

    #[test]
    fn wire_form_has_no_unescaped_dle_in_payload_region() {
        let codec = LinkCodec::new(ChecksumKind::Bcc, ProtocolKind::Df1, 0);
        let payload = [0x10u8, 0x42, 0x10, 0x10];
        let wire = codec.frame_payload(&payload);
        // Strip the DLE STX header, DLE ETX trailer, and checksum byte.
        let inner = &wire[2..wire.len() - 3];
        let mut i = 0;
        while i < inner.len() {
            if inner[i] == DLE {
                assert_eq!(inner[i + 1], DLE, "lone DLE inside payload region");
                i += 2;
            } else {
                i += 1;
            }
        }
    }

    #[test]
    fn bare_controls_surface_between_frames() {
        let mut codec = LinkCodec::new(ChecksumKind::Bcc, ProtocolKind::Df1, 0);
        let events = decode_all(&mut codec, &[DLE, ACK, DLE, NAK, DLE, ENQ]);
        assert_eq!(
            events,
            vec![
                RxEvent::Control(ControlOctet::Ack),
                RxEvent::Control(ControlOctet::Nak),
                RxEvent::Control(ControlOctet::Enq),
            ]
        );
    }

    #[test]
    fn control_inside_frame_does_not_join_payload() {
        let mut codec = LinkCodec::new(ChecksumKind::Bcc, ProtocolKind::Df1, 0);
        let mut wire = vec![DLE, STX, 0x01, 0x02, DLE, ACK, 0x03, DLE, ETX];
        wire.push(bcc(&[0x01, 0x02, 0x03]));
        let events = decode_all(&mut codec, &wire);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RxEvent::Control(ControlOctet::Ack));
        match &events[1] {
            RxEvent::Frame(f) => {
                assert_eq!(&f.body[..], &[0x01, 0x02, 0x03]);
                assert!(f.checksum_ok);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nested_stx_restarts_frame() {
        let mut codec = LinkCodec::new(ChecksumKind::Bcc, ProtocolKind::Df1, 0);
        let mut wire = vec![DLE, STX, 0xAA, 0xBB, DLE, STX, 0x01, DLE, ETX];
        wire.push(bcc(&[0x01]));
        let events = decode_all(&mut codec, &wire);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RxEvent::Frame(f) => assert_eq!(&f.body[..], &[0x01]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn corrupt_checksum_is_flagged_not_dropped() {
        let mut codec = LinkCodec::new(ChecksumKind::Crc, ProtocolKind::Df1, 0);
        let mut wire = codec.frame_payload(&[0x01, 0x02]).to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        let events = decode_all(&mut codec, &wire);
        match &events[0] {
            RxEvent::Frame(f) => assert!(!f.checksum_ok),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn dh485_node_filter_drops_foreign_frames() {
        let mut codec = LinkCodec::new(ChecksumKind::Bcc, ProtocolKind::Dh485, 3);
        let mine = [3 | DH485_NODE_FLAG, 0x08, 0x81];
        let foreign = [7 | DH485_NODE_FLAG, 0x08, 0x81];
        let other = LinkCodec::new(ChecksumKind::Bcc, ProtocolKind::Df1, 0);
        let mut wire = other.frame_payload(&foreign).to_vec();
        wire.extend_from_slice(&other.frame_payload(&mine));
        let events = decode_all(&mut codec, &wire);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RxEvent::Frame(f) => assert_eq!(f.body[0], 3 | DH485_NODE_FLAG),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn frames_split_across_reads_reassemble() {
        let mut codec = LinkCodec::new(ChecksumKind::Crc, ProtocolKind::Df1, 0);
        let wire = codec.frame_payload(&[0x01, 0x10, 0x02]);
        let mut events = Vec::new();
        for chunk in wire.chunks(1) {
            let mut src = BytesMut::from(chunk);
            while let Some(ev) = codec.decode(&mut src).unwrap() {
                events.push(ev);
            }
        }
        assert_eq!(events.len(), 1);
        match &events[0] {
            RxEvent::Frame(f) => {
                assert_eq!(&f.body[..], &[0x01, 0x10, 0x02]);
                assert!(f.checksum_ok);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
