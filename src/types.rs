use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Link-layer protocol selector.
///
/// DF1 is the point-to-point half-duplex form; DH485 shares the framing but
/// adds a three-byte header and a token-passing discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolKind {
    Df1,
    Dh485,
}

/// Frame trailer algorithm negotiated with the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumKind {
    /// One-byte two's-complement block check.
    Bcc,
    /// Two-byte CRC-16 (0xA001), low byte first.
    Crc,
}

/// Serial parity configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i16)]
pub enum Parity {
    None = 0,
    Odd = 1,
    Even = 2,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Processor family code as reported in byte 9 of a diagnostic status reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ProcessorFamily {
    Slc501 = 0x18,
    FixedSlc500 = 0x1A,
    Slc502 = 0x25,
    Slc503 = 0x49,
    MicroLogix1000 = 0x58,
    Slc504 = 0x5B,
    Slc505 = 0x78,
    MicroLogix1200 = 0x88,
    MicroLogix1500Lsp = 0x89,
    MicroLogix1500Lrp = 0x8C,
    CompactLogixL35E = 0x95,
    MicroLogix1100 = 0x9C,
}

impl ProcessorFamily {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x18 => Some(ProcessorFamily::Slc501),
            0x1A => Some(ProcessorFamily::FixedSlc500),
            0x25 => Some(ProcessorFamily::Slc502),
            0x49 => Some(ProcessorFamily::Slc503),
            0x58 => Some(ProcessorFamily::MicroLogix1000),
            0x5B => Some(ProcessorFamily::Slc504),
            0x78 => Some(ProcessorFamily::Slc505),
            0x88 => Some(ProcessorFamily::MicroLogix1200),
            0x89 => Some(ProcessorFamily::MicroLogix1500Lsp),
            0x8C => Some(ProcessorFamily::MicroLogix1500Lrp),
            0x95 => Some(ProcessorFamily::CompactLogixL35E),
            0x9C => Some(ProcessorFamily::MicroLogix1100),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            ProcessorFamily::Slc501 => "SLC 5/01",
            ProcessorFamily::FixedSlc500 => "Fixed SLC 500",
            ProcessorFamily::Slc502 => "SLC 5/02",
            ProcessorFamily::Slc503 => "SLC 5/03",
            ProcessorFamily::MicroLogix1000 => "MicroLogix 1000",
            ProcessorFamily::Slc504 => "SLC 5/04",
            ProcessorFamily::Slc505 => "SLC 5/05",
            ProcessorFamily::MicroLogix1200 => "MicroLogix 1200",
            ProcessorFamily::MicroLogix1500Lsp => "MicroLogix 1500 LSP",
            ProcessorFamily::MicroLogix1500Lrp => "MicroLogix 1500 LRP",
            ProcessorFamily::CompactLogixL35E => "CompactLogix L35E",
            ProcessorFamily::MicroLogix1100 => "MicroLogix 1100",
        }
    }

    /// Whether the family is limited to the short 0x50-byte read chunk.
    pub fn short_read_chunk(self) -> bool {
        matches!(self, ProcessorFamily::Slc502)
    }

    /// Header address holding the file-zero byte length:
    /// `(file_type_code, element)` for a two-byte read against file 0.
    pub fn directory_header(self) -> (u8, u16) {
        match self {
            ProcessorFamily::MicroLogix1100
            | ProcessorFamily::MicroLogix1200
            | ProcessorFamily::MicroLogix1500Lsp
            | ProcessorFamily::MicroLogix1500Lrp => (0x02, 0x2F),
            ProcessorFamily::Slc503
            | ProcessorFamily::Slc504
            | ProcessorFamily::Slc505
            | ProcessorFamily::CompactLogixL35E => (0x01, 0x23),
            _ => (0x00, 0x23),
        }
    }

    /// Byte offset of the first descriptor in file zero.
    pub fn directory_offset(self) -> usize {
        match self {
            ProcessorFamily::MicroLogix1100
            | ProcessorFamily::MicroLogix1200
            | ProcessorFamily::MicroLogix1500Lsp
            | ProcessorFamily::MicroLogix1500Lrp => 93,
            ProcessorFamily::Slc503
            | ProcessorFamily::Slc504
            | ProcessorFamily::Slc505
            | ProcessorFamily::CompactLogixL35E => 103,
            _ => 79,
        }
    }

    /// Stride of one directory descriptor entry.
    pub fn directory_stride(self) -> usize {
        match self {
            ProcessorFamily::Slc501
            | ProcessorFamily::FixedSlc500
            | ProcessorFamily::Slc502
            | ProcessorFamily::MicroLogix1000 => 8,
            _ => 10,
        }
    }

    /// Number of bytes copied into the pre-download command list.
    pub fn download_prefix_len(self) -> usize {
        match self {
            ProcessorFamily::Slc503
            | ProcessorFamily::Slc504
            | ProcessorFamily::Slc505
            | ProcessorFamily::CompactLogixL35E => 6,
            _ => 4,
        }
    }
}

/// Target operating mode for [`ProcessorFamily`]-aware mode changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorMode {
    Program,
    Run,
}

/// Serial line settings handed to the transport connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialSettings {
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Baud rate; controllers commonly run 9600/19200/38400.
    pub baud_rate: u32,
    pub parity: Parity,
}

/// Channel configuration for one DF1/DH485 link.
///
/// Mutable between transactions, never during one; changing the serial
/// settings closes any open link so the next operation reopens it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Df1ChannelConfig {
    pub serial: SerialSettings,
    #[serde(default = "Df1ChannelConfig::default_protocol")]
    pub protocol: ProtocolKind,
    #[serde(default = "Df1ChannelConfig::default_checksum")]
    pub checksum: ChecksumKind,
    /// Our station number, 0-254.
    #[serde(default)]
    pub my_node: u8,
    /// Controller station number, 0-254.
    #[serde(default = "Df1ChannelConfig::default_target_node")]
    pub target_node: u8,
    /// When set, write-style commands resolve as soon as the bytes are on
    /// the wire instead of waiting for the link acknowledge.
    #[serde(default)]
    pub async_mode: bool,
    /// Response budget in 20 ms ticks. 100 ticks is the 2 s default; the
    /// auto-detect sweep drops this to 3 while probing.
    #[serde(default = "Df1ChannelConfig::default_max_ticks")]
    pub max_ticks: u32,
}

impl Df1ChannelConfig {
    fn default_protocol() -> ProtocolKind {
        ProtocolKind::Df1
    }

    fn default_checksum() -> ChecksumKind {
        ChecksumKind::Crc
    }

    fn default_target_node() -> u8 {
        1
    }

    fn default_max_ticks() -> u32 {
        100
    }

    pub fn new(port: impl Into<String>) -> Self {
        Self {
            serial: SerialSettings {
                port: port.into(),
                baud_rate: 19200,
                parity: Parity::None,
            },
            protocol: Self::default_protocol(),
            checksum: Self::default_checksum(),
            my_node: 0,
            target_node: Self::default_target_node(),
            async_mode: false,
            max_ticks: Self::default_max_ticks(),
        }
    }
}

/// Descriptor for one data table found by the directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileEntry {
    /// File-type tag such as `N`, `T` or `Undefined`.
    pub file_type: String,
    pub file_number: u8,
    pub elements: u16,
}

/// One uploaded or to-be-downloaded program file blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramFile {
    pub file_type_code: u8,
    pub file_number: u8,
    pub data: Vec<u8>,
}
