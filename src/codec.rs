//! Typed value codec for SLC data tables.
//!
//! Converts between the raw byte stream produced by protected-typed reads
//! and the file-typed values callers work with, and the reverse for
//! writes. Word-family files decode little-endian signed words, floats and
//! longs are four little-endian bytes, and strings are 84-byte elements
//! whose text is stored with adjacent byte pairs swapped.

use crate::address::{DataAddress, FileType};
use crate::protocol::error::ProtocolError;

/// Maximum text length of one string element.
pub const STRING_CAPACITY: usize = 82;
/// Full byte size of one string element.
pub const STRING_ELEMENT_LEN: usize = 84;

/// A single decoded data-table value.
#[derive(Debug, Clone, PartialEq)]
pub enum PlcValue {
    Int(i16),
    Long(i32),
    Float(f32),
    Bool(bool),
    Text(String),
    Raw(Vec<u8>),
}

impl PlcValue {
    /// Bit-write interpretation: true for `Bool(true)` and any non-zero
    /// numeric value.
    pub fn as_bit(&self) -> Result<bool, ProtocolError> {
        match self {
            PlcValue::Bool(b) => Ok(*b),
            PlcValue::Int(v) => Ok(*v != 0),
            PlcValue::Long(v) => Ok(*v != 0),
            other => Err(ProtocolError::ValueOutOfRange(format!(
                "expected a bit value, got {:?}",
                other
            ))),
        }
    }
}

/// Decode a raw read stream according to the file type of `addr`.
///
/// `count` is only significant for bit addressing, where it is the number
/// of booleans to extract; all other shapes are derived from the data
/// length.
pub fn decode_typed(
    addr: &DataAddress,
    count: usize,
    data: &[u8],
) -> Result<Vec<PlcValue>, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::NoDataReturned);
    }

    if let Some(bit) = addr.bit {
        return decode_bits(bit, count, data);
    }

    let values = match addr.file_type {
        FileType::Float => data
            .chunks_exact(4)
            .map(|c| PlcValue::Float(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
        FileType::Long => data
            .chunks_exact(4)
            .map(|c| PlcValue::Long(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
        FileType::String => data
            .chunks(STRING_ELEMENT_LEN)
            .map(|c| PlcValue::Text(decode_string(c)))
            .collect(),
        FileType::Message | FileType::Pid | FileType::Pls => data
            .chunks(addr.file_type.bytes_per_element())
            .map(|c| PlcValue::Raw(c.to_vec()))
            .collect(),
        // Everything else, timers and counters included, decodes as
        // little-endian signed words.
        _ => data
            .chunks_exact(2)
            .map(|c| PlcValue::Int(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
    };
    Ok(values)
}

fn decode_bits(bit: u8, count: usize, data: &[u8]) -> Result<Vec<PlcValue>, ProtocolError> {
    let words: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let global = usize::from(bit) + i;
        let word = words
            .get(global / 16)
            .ok_or(ProtocolError::NoDataReturned)?;
        out.push(PlcValue::Bool(word & (1 << (global % 16)) != 0));
    }
    Ok(out)
}

/// Decode one string element: a 16-bit length clamped to the element
/// capacity, then the text with adjacent byte pairs swapped. A NUL inside
/// the declared length terminates early.
pub fn decode_string(element: &[u8]) -> String {
    if element.len() < 2 {
        return String::new();
    }
    let declared = usize::from(u16::from_le_bytes([element[0], element[1]]));
    let len = declared.min(STRING_CAPACITY);
    let payload = &element[2..];
    let mut text = Vec::with_capacity(len);
    let padded = (len + 1) & !1;
    for i in (0..padded).step_by(2) {
        text.push(payload.get(i + 1).copied().unwrap_or(0));
        text.push(payload.get(i).copied().unwrap_or(0));
    }
    text.truncate(len);
    if let Some(nul) = text.iter().position(|&b| b == 0) {
        text.truncate(nul);
    }
    String::from_utf8_lossy(&text).into_owned()
}

/// Encode one string value as (length, pair-swapped padded text).
pub fn encode_string(text: &str) -> Result<Vec<u8>, ProtocolError> {
    let bytes = text.as_bytes();
    if bytes.len() > STRING_CAPACITY {
        return Err(ProtocolError::ValueOutOfRange(format!(
            "string of {} bytes exceeds the {}-byte element capacity",
            bytes.len(),
            STRING_CAPACITY
        )));
    }
    let mut padded = bytes.to_vec();
    padded.push(0);
    if padded.len() % 2 != 0 {
        padded.push(0);
    }
    let mut out = Vec::with_capacity(2 + padded.len());
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    for pair in padded.chunks_exact(2) {
        out.push(pair[1]);
        out.push(pair[0]);
    }
    Ok(out)
}

/// Encode typed values into the raw write stream for `addr`.
pub fn encode_typed(addr: &DataAddress, values: &[PlcValue]) -> Result<Vec<u8>, ProtocolError> {
    if values.is_empty() {
        return Err(ProtocolError::EmptyData);
    }
    let mut out = Vec::new();
    for value in values {
        match (addr.file_type, value) {
            (FileType::Float, PlcValue::Float(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (FileType::Long, PlcValue::Long(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (FileType::Long, PlcValue::Int(v)) => {
                out.extend_from_slice(&i32::from(*v).to_le_bytes())
            }
            (FileType::String, PlcValue::Text(s)) => out.extend_from_slice(&encode_string(s)?),
            (
                FileType::Message | FileType::Pid | FileType::Pls,
                PlcValue::Raw(raw),
            ) => {
                if raw.len() != addr.file_type.bytes_per_element() {
                    return Err(ProtocolError::ValueOutOfRange(format!(
                        "raw element must be {} bytes, got {}",
                        addr.file_type.bytes_per_element(),
                        raw.len()
                    )));
                }
                out.extend_from_slice(raw);
            }
            (
                FileType::Float | FileType::Long | FileType::String | FileType::Message
                | FileType::Pid | FileType::Pls,
                other,
            ) => {
                return Err(ProtocolError::ValueOutOfRange(format!(
                    "value {:?} does not match file type {:?}",
                    other, addr.file_type
                )))
            }
            (_, PlcValue::Int(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (_, PlcValue::Bool(b)) => {
                out.extend_from_slice(&i16::from(*b).to_le_bytes())
            }
            (_, other) => {
                return Err(ProtocolError::ValueOutOfRange(format!(
                    "value {:?} does not fit a 16-bit word file",
                    other
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::parse_address;

    #[test]
    fn words_decode_signed_little_endian() {
        let addr = parse_address("N7:0").unwrap();
        let values = decode_typed(&addr, 3, &[0x01, 0x00, 0xFF, 0xFF, 0x34, 0x12]).unwrap();
        assert_eq!(
            values,
            vec![PlcValue::Int(1), PlcValue::Int(-1), PlcValue::Int(0x1234)]
        );
    }

    #[test]
    fn floats_and_longs() {
        let addr = parse_address("F8:0").unwrap();
        let raw = 1.5f32.to_le_bytes();
        assert_eq!(
            decode_typed(&addr, 1, &raw).unwrap(),
            vec![PlcValue::Float(1.5)]
        );

        let addr = parse_address("L20:0").unwrap();
        let raw = (-70_000i32).to_le_bytes();
        assert_eq!(
            decode_typed(&addr, 1, &raw).unwrap(),
            vec![PlcValue::Long(-70_000)]
        );
    }

    #[test]
    fn bit_sequence_crosses_word_boundaries() {
        let addr = parse_address("B3:0/14").unwrap();
        // Word 0 = 0x4000 (bit 14 set), word 1 = 0x0001 (bit 16 set).
        let values = decode_typed(&addr, 3, &[0x00, 0x40, 0x01, 0x00]).unwrap();
        assert_eq!(
            values,
            vec![
                PlcValue::Bool(true),
                PlcValue::Bool(false),
                PlcValue::Bool(true)
            ]
        );
    }

    #[test]
    fn string_encode_swaps_pairs_and_terminates() {
        let encoded = encode_string("ABC").unwrap();
        assert_eq!(encoded, vec![0x03, 0x00, b'B', b'A', 0x00, b'C']);
        let mut element = encoded[..].to_vec();
        element.resize(STRING_ELEMENT_LEN, 0);
        assert_eq!(decode_string(&element[..]), "ABC");
    }

    #[test]
    fn string_even_length_round_trip() {
        let encoded = encode_string("HELLO!").unwrap();
        let mut element = encoded.to_vec();
        element.resize(STRING_ELEMENT_LEN, 0);
        assert_eq!(decode_string(&element), "HELLO!");
    }

    #[test]
    fn string_length_clamps_to_capacity() {
        let mut element = vec![0xFF, 0x00];
        element.resize(STRING_ELEMENT_LEN, b'X');
        let text = decode_string(&element);
        assert_eq!(text.len(), STRING_CAPACITY);
    }

    #[test]
    fn oversized_string_rejected() {
        let long = "x".repeat(STRING_CAPACITY + 1);
        assert!(encode_string(&long).is_err());
    }

    #[test]
    fn typed_encode_validates_shapes() {
        let n = parse_address("N7:0").unwrap();
        assert_eq!(
            encode_typed(&n, &[PlcValue::Int(-2), PlcValue::Int(5)]).unwrap(),
            vec![0xFE, 0xFF, 0x05, 0x00]
        );
        assert!(encode_typed(&n, &[PlcValue::Float(1.0)]).is_err());
        assert!(encode_typed(&n, &[]).is_err());

        let f = parse_address("F8:0").unwrap();
        assert_eq!(
            encode_typed(&f, &[PlcValue::Float(1.5)]).unwrap(),
            1.5f32.to_le_bytes().to_vec()
        );

        let mg = parse_address("MG14:0").unwrap();
        assert!(encode_typed(&mg, &[PlcValue::Raw(vec![0; 10])]).is_err());
        assert_eq!(
            encode_typed(&mg, &[PlcValue::Raw(vec![0xAB; 50])]).unwrap().len(),
            50
        );
    }

    #[test]
    fn timers_decode_as_words() {
        let addr = parse_address("T4:0").unwrap();
        let raw = [0x00u8, 0x80, 0x10, 0x27, 0x05, 0x00];
        let values = decode_typed(&addr, 1, &raw).unwrap();
        assert_eq!(
            values,
            vec![
                PlcValue::Int(i16::from_le_bytes([0x00, 0x80])),
                PlcValue::Int(10000),
                PlcValue::Int(5)
            ]
        );
    }
}
