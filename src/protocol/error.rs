use std::fmt;
use thiserror::Error;

/// PCCC status reported by the controller in the STS byte of a reply.
///
/// Plain status codes occupy the high nibble of the STS byte. When the STS
/// byte is 0xF0 the real reason lives in the extended status byte at the
/// tail of the reply body, reported here as `0x100 + ext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sts(pub u16);

impl Sts {
    /// Build a status from the STS byte and, when it signals 0xF0, the
    /// extended status byte.
    pub fn from_reply(sts: u8, ext: Option<u8>) -> Self {
        match (sts, ext) {
            (0xF0, Some(e)) => Sts(0x100 + u16::from(e)),
            _ => Sts(u16::from(sts)),
        }
    }

    /// Whether this status indicates success.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Human-readable diagnostic for this status.
    ///
    /// The plain codes step through the high nibble; the extended codes
    /// are the 0x100-offset mnemonics. Anything unrecognized is reported
    /// with its numeric value.
    pub fn description(self) -> String {
        let text = match self.0 {
            0x00 => "Success",
            0x10 => "Illegal command or format",
            0x20 => "Host has a problem and will not communicate",
            0x30 => "Remote node host is missing, disconnected, or shut down",
            0x40 => "Host could not complete function due to hardware fault",
            0x50 => "Addressing problem or memory protect rungs",
            0x60 => "Function not allowed due to command protection selection",
            0x70 => "Processor is in Program mode",
            0x80 => "Compatibility mode file missing or communication zone problem",
            0x90 => "Remote node cannot buffer command",
            0xF0 => "Error code in the EXT STS byte",
            0x101 => "A field has an illegal value",
            0x102 => "Less levels specified in address than minimum for any address",
            0x103 => "More levels specified in address than system supports",
            0x104 => "Symbol not found",
            0x105 => "Symbol is of improper format",
            0x106 => "Address doesn't point to something usable",
            0x107 => "File is wrong size",
            0x108 => "Cannot complete request, situation has changed since start of command",
            0x109 => "Data or file is too large",
            0x10A => "Transaction size plus word address is too large",
            0x10B => "Access denied, improper privilege",
            0x10C => "Condition cannot be generated - resource is not available",
            0x10D => "Condition already exists - resource is already available",
            0x10E => "Command cannot be executed",
            other => return format!("Unknown Message - {}", other),
        };
        text.to_string()
    }
}

impl fmt::Display for Sts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#X})", self.description(), self.0)
    }
}

/// Protocol-level error type for the DF1/DH485 driver.
///
/// The variants mirror the failure classes a caller has to distinguish:
/// link handshake failures, per-request timeouts, controller-reported
/// status, addressing problems, and transport/IO trouble.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer answered the frame with NAK on every attempt.
    #[error("Frame not acknowledged by peer")]
    NotAcknowledged,
    /// The link is open but the peer never answered.
    #[error("No response from peer")]
    NoResponse,
    /// The textual address did not parse to a known data-table form.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    /// The serial transport could not be opened.
    #[error("Could not open transport: {0}")]
    OpenFailed(String),
    /// A write was requested with no data.
    #[error("Empty data supplied")]
    EmptyData,
    /// A reply arrived but carried no data where some was required.
    #[error("No data returned from peer")]
    NoDataReturned,
    /// No reply frame arrived within the configured tick budget.
    #[error("Response timeout")]
    Timeout,
    /// The received reply failed our checksum and was NAKed back.
    #[error("Received frame failed checksum verification")]
    LocalChecksum,
    /// The controller reported a non-zero PCCC status.
    #[error("Controller status: {0}")]
    Status(Sts),
    /// A value was out of range for the target file type.
    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),
    /// The reply body was too short or structurally invalid.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
    /// The session task is gone (closed or panicked).
    #[error("Link closed")]
    LinkClosed,
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the typed engine may transparently retry a chunk that
    /// failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotAcknowledged
                | ProtocolError::NoResponse
                | ProtocolError::Timeout
                | ProtocolError::LocalChecksum
                | ProtocolError::Status(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_status_decodes() {
        assert_eq!(Sts::from_reply(0x10, None).description(), "Illegal command or format");
        assert_eq!(Sts::from_reply(0x70, None).description(), "Processor is in Program mode");
        assert!(Sts::from_reply(0, None).is_ok());
    }

    #[test]
    fn extended_status_offsets_by_0x100() {
        let sts = Sts::from_reply(0xF0, Some(0x07));
        assert_eq!(sts.0, 0x107);
        assert_eq!(sts.description(), "File is wrong size");
    }

    #[test]
    fn unknown_status_keeps_numeric_value() {
        assert_eq!(Sts(0x123).description(), "Unknown Message - 291");
    }

    #[test]
    fn extended_without_ext_byte_stays_plain() {
        assert_eq!(Sts::from_reply(0xF0, None).0, 0xF0);
    }
}
