//! Allen-Bradley DF1 / DH485 client driver for SLC 500 and MicroLogix
//! controllers.
//!
//! The crate couples two layers. The link layer frames raw bytes with
//! DLE/STX escapes and a BCC or CRC-16 trailer, drives the ACK/NAK/ENQ
//! handshake with retries, and matches replies to requests through a
//! 256-slot transaction table. The application layer composes PCCC
//! commands, parses typed addresses such as `N7:0` or `T4:5.ACC`, and
//! turns typed reads and writes against the controller's file-based data
//! model into sequences of bounded raw transfers.
//!
//! ```no_run
//! use df1_driver::{Df1ChannelConfig, Df1Client, PlcValue};
//!
//! # async fn demo() -> Result<(), df1_driver::ProtocolError> {
//! let mut client = Df1Client::new(Df1ChannelConfig::new("/dev/ttyUSB0"));
//! client.detect_comm_settings().await?;
//! let values = client.read("N7:0", 10).await?;
//! client.write("B3/16", &[PlcValue::Bool(true)]).await?;
//! # let _ = values;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod client;
pub mod codec;
pub mod directory;
pub mod planner;
pub mod protocol;
pub mod transport;
pub mod types;

pub use address::{parse_address, DataAddress, FileType};
pub use client::Df1Client;
pub use codec::PlcValue;
pub use protocol::error::{ProtocolError, Sts};
pub use protocol::session::state::{LinkState, SessionEvent};
pub use protocol::session::{ExchangeMode, LinkConfig, LinkHandle};
pub use transport::{Connector, SerialConnector, Transport};
pub use types::{
    ChecksumKind, DataFileEntry, Df1ChannelConfig, Parity, ProcessorFamily, ProcessorMode,
    ProgramFile, ProtocolKind, SerialSettings,
};
