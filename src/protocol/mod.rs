//! Wire-level protocol stack: checksums, DF1 framing, PCCC packets, and
//! the link session.

pub mod checksum;
pub mod codec;
pub mod error;
pub mod frame;
pub mod session;
