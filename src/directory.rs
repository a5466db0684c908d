//! Program directory scan, full-program upload, and download.
//!
//! File zero of the controller holds a descriptor table covering every
//! program and data file. Its location and stride vary by processor
//! family; byte 0 of each descriptor is a file-type code and bytes 1-2
//! carry the byte length, little-endian. The blobs moved by upload and
//! download stay opaque to this driver.

use crate::address::FileType;
use crate::client::Df1Client;
use crate::protocol::error::ProtocolError;
use crate::protocol::frame::builder::{
    build_complete_download, build_download_command_list, build_sole_access, TablePosition,
};
use crate::protocol::frame::defs::{USER_DATA_CODE_MAX, USER_DATA_CODE_MIN};
use crate::protocol::session::state::SessionEvent;
use crate::types::{DataFileEntry, ProcessorFamily, ProcessorMode, ProgramFile};

/// Pre-download header snapshot: file 0, type 0x24.
const PRE_DOWNLOAD_TYPE: u8 = 0x24;
/// Bytes of the pre-download header the command list may copy from.
const PRE_DOWNLOAD_SNAPSHOT_LEN: usize = 8;

/// Type-code ranges that partition the program section; file numbers
/// restart from zero inside each group, in this order.
const PROGRAM_GROUPS: &[(u8, u8)] = &[
    (0x40, 0x5F),
    (0x20, 0x3F),
    (0x60, 0x7F),
    (0x80, 0x9F),
    (0xA0, 0xBF),
    (0xC0, 0xDF),
    (0xE0, 0xFF),
];

fn group_index(code: u8) -> Option<usize> {
    PROGRAM_GROUPS
        .iter()
        .position(|(lo, hi)| (*lo..=*hi).contains(&code))
}

/// One raw descriptor from the file-zero table.
#[derive(Debug, Clone, Copy)]
struct Descriptor {
    code: u8,
    byte_len: usize,
}

fn walk_descriptors(file_zero: &[u8], family: ProcessorFamily) -> Vec<Descriptor> {
    let offset = family.directory_offset();
    let stride = family.directory_stride();
    let mut out = Vec::new();
    if file_zero.len() <= offset {
        return out;
    }
    for entry in file_zero[offset..].chunks(stride) {
        if entry.len() < 3 {
            break;
        }
        out.push(Descriptor {
            code: entry[0],
            byte_len: usize::from(u16::from_le_bytes([entry[1], entry[2]])),
        });
    }
    out
}

impl Df1Client {
    /// Read the whole of file zero, sized by the family-specific header.
    async fn read_file_zero(&mut self, family: ProcessorFamily) -> Result<Vec<u8>, ProtocolError> {
        let (type_code, element) = family.directory_header();
        let head = self
            .read_raw(
                TablePosition {
                    file_number: 0,
                    file_type_code: type_code,
                    element,
                    sub_element: 0,
                },
                2,
            )
            .await?;
        if head.len() < 2 {
            return Err(ProtocolError::NoDataReturned);
        }
        let size = usize::from(u16::from_le_bytes([head[0], head[1]]));
        if size == 0 {
            return Err(ProtocolError::NoDataReturned);
        }
        self.read_raw(
            TablePosition {
                file_number: 0,
                file_type_code: type_code,
                element: 0,
                sub_element: 0,
            },
            size,
        )
        .await
    }

    /// Enumerate the controller's data tables.
    ///
    /// Only descriptors in the user-data code range are returned; file
    /// numbers count up from zero once the scan reaches the data region.
    pub async fn data_table_directory(&mut self) -> Result<Vec<DataFileEntry>, ProtocolError> {
        let family = self.ensure_processor().await?;
        let file_zero = self.read_file_zero(family).await?;

        let mut entries = Vec::new();
        let mut next_file_number: u8 = 0;
        for descriptor in walk_descriptors(&file_zero, family) {
            if !(USER_DATA_CODE_MIN..=USER_DATA_CODE_MAX).contains(&descriptor.code) {
                continue;
            }
            let (tag, width) = match FileType::from_code(descriptor.code) {
                Some(ft) => (ft.letter().to_string(), ft.bytes_per_element()),
                None => ("Undefined".to_string(), 2),
            };
            entries.push(DataFileEntry {
                file_type: tag,
                file_number: next_file_number,
                elements: (descriptor.byte_len / width) as u16,
            });
            next_file_number += 1;
        }
        Ok(entries)
    }

    /// Stream every program and data file out of the controller.
    pub async fn upload_program(&mut self) -> Result<Vec<ProgramFile>, ProtocolError> {
        let family = self.ensure_processor().await?;
        let file_zero = self.read_file_zero(family).await?;
        let events = self.event_sender();

        let descriptors: Vec<(Descriptor, usize)> = walk_descriptors(&file_zero, family)
            .into_iter()
            .filter(|d| d.byte_len > 0)
            .filter_map(|d| group_index(d.code).map(|group| (d, group)))
            .collect();
        let total = descriptors.len();

        let mut group_counters = [0u8; 7];
        let mut files = Vec::with_capacity(total);
        for (file_index, (descriptor, group)) in descriptors.into_iter().enumerate() {
            let file_number = group_counters[group];
            group_counters[group] += 1;

            let data = self
                .read_raw(
                    TablePosition {
                        file_number,
                        file_type_code: descriptor.code,
                        element: 0,
                        sub_element: 0,
                    },
                    descriptor.byte_len,
                )
                .await?;
            files.push(ProgramFile {
                file_type_code: descriptor.code,
                file_number,
                data,
            });
            let _ = events.send(SessionEvent::UploadProgress {
                file_index: file_index + 1,
                total,
            });
        }
        Ok(files)
    }

    /// Write a program image back to the controller.
    ///
    /// The sequence is: program mode, pre-download command list, sole
    /// access, directory, every file, download completion, sole-access
    /// release. Any failure aborts in place; the controller is left in
    /// program mode.
    pub async fn download_program(
        &mut self,
        directory: &[u8],
        files: &[ProgramFile],
    ) -> Result<(), ProtocolError> {
        if directory.is_empty() {
            return Err(ProtocolError::EmptyData);
        }
        let family = self.ensure_processor().await?;
        let events = self.event_sender();

        self.set_mode(ProcessorMode::Program).await?;

        let snapshot = self
            .read_raw(
                TablePosition {
                    file_number: 0,
                    file_type_code: PRE_DOWNLOAD_TYPE,
                    element: 0,
                    sub_element: 0,
                },
                PRE_DOWNLOAD_SNAPSHOT_LEN,
            )
            .await?;
        self.exchange(build_download_command_list(family, &snapshot))
            .await?;
        self.exchange(build_sole_access(true)).await?;

        let (type_code, element) = family.directory_header();
        self.write_raw(
            TablePosition {
                file_number: 0,
                file_type_code: type_code,
                element,
                sub_element: 0,
            },
            &(directory.len() as u16).to_le_bytes(),
        )
        .await?;
        self.write_raw(
            TablePosition {
                file_number: 0,
                file_type_code: type_code,
                element: 0,
                sub_element: 0,
            },
            directory,
        )
        .await?;

        let total = files.len();
        for (file_index, file) in files.iter().enumerate() {
            self.write_raw(
                TablePosition {
                    file_number: file.file_number,
                    file_type_code: file.file_type_code,
                    element: 0,
                    sub_element: 0,
                },
                &file.data,
            )
            .await?;
            let _ = events.send(SessionEvent::DownloadProgress {
                file_index: file_index + 1,
                total,
            });
        }

        self.exchange(build_complete_download()).await?;
        self.exchange(build_sole_access(false)).await?;
        Ok(())
    }

}
