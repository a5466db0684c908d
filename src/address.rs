//! Textual data-table address parsing.
//!
//! SLC 500 / MicroLogix data is addressed as `<type><file>:<element>` with
//! optional sub-element and bit components, e.g. `N7:0`, `T4:5.ACC`,
//! `B3/16`, `I:2.1/3`. The parser is a hand-written tokenizer: a
//! longest-first prefix table selects the file type and the rest is plain
//! number splitting, which keeps the four accepted shapes in one place.

use crate::protocol::error::ProtocolError;

/// SLC data-table file types with their PCCC type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Output,
    Input,
    Status,
    Bit,
    Timer,
    Counter,
    Control,
    Integer,
    Float,
    Ascii,
    String,
    Long,
    Message,
    Pid,
    Pls,
}

// Longest-first to avoid prefix shadowing (ST before S, PLS/PD before P-less
// single letters, MG before M-less).
const TOKENS: &[(&str, FileType)] = &[
    ("PLS", FileType::Pls),
    ("ST", FileType::String),
    ("MG", FileType::Message),
    ("PD", FileType::Pid),
    ("S", FileType::Status),
    ("B", FileType::Bit),
    ("C", FileType::Counter),
    ("T", FileType::Timer),
    ("R", FileType::Control),
    ("N", FileType::Integer),
    ("F", FileType::Float),
    ("A", FileType::Ascii),
    ("I", FileType::Input),
    ("O", FileType::Output),
    ("L", FileType::Long),
];

impl FileType {
    /// PCCC file-type code used in read/write address blocks.
    pub fn code(self) -> u8 {
        match self {
            FileType::Output => 0x8B,
            FileType::Input => 0x8C,
            FileType::Status => 0x84,
            FileType::Bit => 0x85,
            FileType::Timer => 0x86,
            FileType::Counter => 0x87,
            FileType::Control => 0x88,
            FileType::Integer => 0x89,
            FileType::Float => 0x8A,
            FileType::Ascii => 0x8E,
            FileType::String => 0x8D,
            FileType::Long => 0x91,
            FileType::Message => 0x92,
            FileType::Pid => 0x93,
            FileType::Pls => 0x94,
        }
    }

    /// Map a directory type code back to a file type. The I/O tables
    /// appear under two codes each.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x82 | 0x8B => Some(FileType::Output),
            0x83 | 0x8C => Some(FileType::Input),
            0x84 => Some(FileType::Status),
            0x85 => Some(FileType::Bit),
            0x86 => Some(FileType::Timer),
            0x87 => Some(FileType::Counter),
            0x88 => Some(FileType::Control),
            0x89 => Some(FileType::Integer),
            0x8A => Some(FileType::Float),
            0x8D => Some(FileType::String),
            0x8E => Some(FileType::Ascii),
            0x91 => Some(FileType::Long),
            0x92 => Some(FileType::Message),
            0x93 => Some(FileType::Pid),
            0x94 => Some(FileType::Pls),
            _ => None,
        }
    }

    /// Bytes occupied by one element of this file type.
    pub fn bytes_per_element(self) -> usize {
        match self {
            FileType::Float | FileType::Long => 4,
            FileType::Timer | FileType::Counter | FileType::Control => 6,
            FileType::String => 84,
            FileType::Message => 50,
            FileType::Pid => 46,
            FileType::Pls => 12,
            _ => 2,
        }
    }

    /// Address-form letter(s) for this file type.
    pub fn letter(self) -> &'static str {
        match self {
            FileType::Output => "O",
            FileType::Input => "I",
            FileType::Status => "S",
            FileType::Bit => "B",
            FileType::Timer => "T",
            FileType::Counter => "C",
            FileType::Control => "R",
            FileType::Integer => "N",
            FileType::Float => "F",
            FileType::Ascii => "A",
            FileType::String => "ST",
            FileType::Long => "L",
            FileType::Message => "MG",
            FileType::Pid => "PD",
            FileType::Pls => "PLS",
        }
    }
}

/// Fully parsed data-table address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAddress {
    pub file_type: FileType,
    pub file_number: u8,
    pub element: u16,
    pub sub_element: u16,
    /// Bit position 0-15 for bit-level access.
    pub bit: Option<u8>,
}

impl DataAddress {
    pub fn bytes_per_element(&self) -> usize {
        self.file_type.bytes_per_element()
    }
}

/// Timer/counter field mnemonics and their sub-element indices.
fn mnemonic_sub_element(name: &str) -> Option<u16> {
    match name {
        "ACC" => Some(2),
        "PRE" => Some(1),
        "EN" | "CU" => Some(15),
        "TT" | "CD" => Some(14),
        "DN" => Some(13),
        "OV" => Some(12),
        "UN" => Some(11),
        "UA" => Some(10),
        _ => None,
    }
}

fn invalid(input: &str) -> ProtocolError {
    ProtocolError::InvalidAddress(input.to_string())
}

fn parse_num<T: std::str::FromStr>(s: &str, input: &str) -> Result<T, ProtocolError> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(input));
    }
    s.parse::<T>().map_err(|_| invalid(input))
}

fn check_bit(bit: u16, input: &str) -> Result<u8, ProtocolError> {
    if bit <= 15 {
        Ok(bit as u8)
    } else {
        Err(invalid(input))
    }
}

/// Parse a textual address into a [`DataAddress`].
///
/// Accepted shapes, case-insensitively:
/// - `N7:0`, `F8:3`, `ST9:2` — element addressing, optional `/bit`;
/// - `B3/16`, `N7/40` — file-wide bit numbering (`element = bit >> 4`);
/// - `T4:5.ACC`, `C5:0.DN` — timer/counter field mnemonics;
/// - `I:2.1/3`, `O:0`, `S:1` — fixed-file areas with optional `.sub`.
pub fn parse_address(input: &str) -> Result<DataAddress, ProtocolError> {
    let s = input.trim().to_uppercase();
    if s.is_empty() {
        return Err(invalid(input));
    }

    let (file_type, rest) = TOKENS
        .iter()
        .find_map(|(tok, ft)| s.strip_prefix(tok).map(|rest| (*ft, rest)))
        .ok_or_else(|| invalid(input))?;

    if let Some(rest) = rest.strip_prefix(':') {
        // Fixed-file form: I/O/S without a file number.
        let file_number = match file_type {
            FileType::Input => 1,
            FileType::Output => 0,
            FileType::Status => 2,
            _ => return Err(invalid(input)),
        };
        return parse_element_tail(rest, file_type, file_number, true, input);
    }

    // A file number must follow the type letters.
    let split = rest
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid(input))?;
    let file_number: u8 = parse_num(&rest[..split], input)?;
    let tail = &rest[split..];

    if let Some(bit_str) = tail.strip_prefix('/') {
        // File-wide bit numbering, B and N files only.
        if !matches!(file_type, FileType::Bit | FileType::Integer) {
            return Err(invalid(input));
        }
        let raw: u16 = parse_num(bit_str, input)?;
        return Ok(DataAddress {
            file_type,
            file_number,
            element: raw >> 4,
            sub_element: 0,
            bit: Some((raw & 0x0F) as u8),
        });
    }

    let tail = tail.strip_prefix(':').ok_or_else(|| invalid(input))?;
    parse_element_tail(tail, file_type, file_number, false, input)
}

/// Parse `<elem>[.<sub-or-mnemonic>][/<bit>]`.
fn parse_element_tail(
    tail: &str,
    file_type: FileType,
    file_number: u8,
    numeric_sub: bool,
    input: &str,
) -> Result<DataAddress, ProtocolError> {
    let (main, bit) = match tail.split_once('/') {
        Some((main, bit_str)) => {
            let raw: u16 = parse_num(bit_str, input)?;
            (main, Some(check_bit(raw, input)?))
        }
        None => (tail, None),
    };

    let (elem_str, sub) = match main.split_once('.') {
        Some((elem, sub_str)) => {
            let sub = if numeric_sub {
                parse_num::<u16>(sub_str, input)?
            } else {
                match file_type {
                    FileType::Timer | FileType::Counter => {
                        mnemonic_sub_element(sub_str).ok_or_else(|| invalid(input))?
                    }
                    _ => return Err(invalid(input)),
                }
            };
            (elem, sub)
        }
        None => (main, 0),
    };

    Ok(DataAddress {
        file_type,
        file_number,
        element: parse_num(elem_str, input)?,
        sub_element: sub,
        bit,
    })
}
