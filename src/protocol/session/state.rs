use crate::protocol::error::ProtocolError;
use crate::protocol::frame::PcccReply;
use crate::types::{ChecksumKind, Parity};
use bytes::Bytes;
use rand::Rng;
use tokio::sync::oneshot;

/// Link lifecycle as observed through session events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closed,
    Failed(String),
}

/// Events published on the session's broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LifecycleChanged(LinkState),
    /// A reply frame arrived and was routed through the transaction table.
    DataReceived { tns: u16 },
    /// The controller initiated a command of its own; it has already been
    /// acknowledged and answered on the wire.
    UnsolicitedMessage { command: u8, tns: u16, data: Bytes },
    /// One probe of the auto-detect sweep is about to run.
    AutoDetectAttempt {
        baud_rate: u32,
        parity: Parity,
        checksum: ChecksumKind,
    },
    /// One program file finished uploading.
    UploadProgress { file_index: usize, total: usize },
    /// One program file finished downloading.
    DownloadProgress { file_index: usize, total: usize },
}

/// Transaction number sequence.
///
/// Sixteen bits, seeded randomly in [1, 128], incremented before every
/// outbound command, wrapping from 65535 back to 1 so that zero is never
/// allocated (zero marks short commands on the wire).
#[derive(Debug)]
pub struct TnsCounter {
    value: u16,
}

impl TnsCounter {
    pub fn new() -> Self {
        Self {
            value: rand::thread_rng().gen_range(1..=128),
        }
    }

    /// Start from a known value; used by tests to pin the sequence.
    pub fn with_value(value: u16) -> Self {
        Self { value }
    }

    /// Advance and return the next transaction number.
    pub fn next(&mut self) -> u16 {
        self.value = match self.value {
            u16::MAX => 1,
            v => v + 1,
        };
        self.value
    }
}

impl Default for TnsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel half that resolves one in-flight exchange.
pub(crate) type ExchangeWaiter = oneshot::Sender<Result<PcccReply, ProtocolError>>;

/// Reply routing for in-flight requests, indexed by the low byte of the
/// TNS.
///
/// The sender resets its slot just before transmission and parks the
/// request's reply waiter there; the receive path, a timeout, or a link
/// failure completes it. Late or unsolicited traffic finds an empty slot
/// and completes nothing.
#[derive(Debug)]
pub(crate) struct TransactionTable {
    slots: Vec<Option<ExchangeWaiter>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self {
            slots: (0..256).map(|_| None).collect(),
        }
    }

    /// Clear a slot ahead of reusing its TNS. A stale waiter from an
    /// abandoned request observes a closed channel.
    pub fn reset(&mut self, slot: u8) {
        self.slots[usize::from(slot)] = None;
    }

    /// Park the waiter for a freshly transmitted request.
    pub fn arm(&mut self, slot: u8, waiter: ExchangeWaiter) {
        self.slots[usize::from(slot)] = Some(waiter);
    }

    /// Wake the slot's waiter with the exchange outcome.
    ///
    /// Returns whether a request was actually parked there; replies for
    /// slots nobody is waiting on report `false`.
    pub fn complete(&mut self, slot: u8, result: Result<PcccReply, ProtocolError>) -> bool {
        match self.slots[usize::from(slot)].take() {
            Some(waiter) => {
                let _ = waiter.send(result);
                true
            }
            None => false,
        }
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}
