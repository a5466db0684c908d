//! Chunk planning for protected-typed transfers.
//!
//! A single PCCC read or write moves a bounded number of bytes; the bound
//! depends on the file type and, for reads, on the processor family. The
//! planner splits a byte total into wire-sized chunks and computes where
//! each chunk continues: data-monitor files advance the element (40-byte
//! records), everything else advances the sub-element in words.

use crate::protocol::frame::defs::FILE_CODE_DATA_MONITOR;
use crate::types::ProcessorFamily;

/// General read bound.
pub const READ_CAP: usize = 236;
/// Read bound for string files (two 84-byte elements).
pub const STRING_READ_CAP: usize = 168;
/// Read bound for timer/counter files; a multiple of the 6-byte element.
pub const TIMER_READ_CAP: usize = 234;
/// Read bound for the data-monitor file.
pub const MONITOR_READ_CAP: usize = 120;
/// Read bound on SLC 5/02 class processors.
pub const SHORT_READ_CAP: usize = 80;
/// General write bound.
pub const WRITE_CAP: usize = 164;
/// Write bound for high file codes (0xA1 and above).
pub const HIGH_CODE_WRITE_CAP: usize = 120;

/// One wire transfer of a larger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub element: u16,
    pub sub_element: u16,
    pub bytes: usize,
}

/// Per-chunk read bound for a file type on a processor family.
pub fn read_cap(family: ProcessorFamily, file_type_code: u8) -> usize {
    if family.short_read_chunk() {
        return SHORT_READ_CAP;
    }
    match file_type_code {
        0x8D => STRING_READ_CAP,
        0x86 | 0x87 => TIMER_READ_CAP,
        FILE_CODE_DATA_MONITOR => MONITOR_READ_CAP,
        _ => READ_CAP,
    }
}

/// Per-chunk write bound for a file type.
pub fn write_cap(file_type_code: u8) -> usize {
    if file_type_code >= 0xA1 {
        HIGH_CODE_WRITE_CAP
    } else {
        WRITE_CAP
    }
}

fn plan(
    element: u16,
    sub_element: u16,
    total_bytes: usize,
    cap: usize,
    file_type_code: u8,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut element = element;
    let mut sub_element = sub_element;
    let mut remaining = total_bytes;
    while remaining > 0 {
        let bytes = remaining.min(cap);
        chunks.push(Chunk {
            element,
            sub_element,
            bytes,
        });
        remaining -= bytes;
        if file_type_code == FILE_CODE_DATA_MONITOR {
            element += (bytes / 40) as u16;
        } else {
            sub_element += (bytes / 2) as u16;
        }
    }
    chunks
}

/// Split a read of `total_bytes` into chunks within the family bound.
pub fn plan_read(
    family: ProcessorFamily,
    file_type_code: u8,
    element: u16,
    sub_element: u16,
    total_bytes: usize,
) -> Vec<Chunk> {
    plan(
        element,
        sub_element,
        total_bytes,
        read_cap(family, file_type_code),
        file_type_code,
    )
}

/// Split a write of `total_bytes` into chunks within the write bound.
pub fn plan_write(
    file_type_code: u8,
    element: u16,
    sub_element: u16,
    total_bytes: usize,
) -> Vec<Chunk> {
    plan(
        element,
        sub_element,
        total_bytes,
        write_cap(file_type_code),
        file_type_code,
    )
}
