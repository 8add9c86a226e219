// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Directory transfer area
//!
//! The DTA is a 286-byte packed record living in guest memory. The first 21
//! bytes belong to the program's own search bookkeeping and are never
//! written by the host; a search result fills the attribute, timestamp, size
//! and name fields that follow.

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::dos::DosDateTime;

/// Size of the record in guest memory
pub const DTA_SIZE: usize = 286;

/// Longest file name copied into the record
pub const MAX_NAME: usize = 255;

/// Byte layout of the directory transfer area
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DtaRecord {
    pub search_attributes: u8,
    pub search_drive: u8,
    pub search_name: [u8; 11],
    pub entry_number: U16,
    pub cluster: U16,
    pub reserved: [u8; 4],
    pub attributes: u8,
    pub date: U16,
    pub time: U16,
    pub size_low: U16,
    pub size_high: U16,
    pub name: [u8; 256],
}

/// One search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: Vec<u8>,
    pub attributes: u32,
    pub modified: DosDateTime,
    pub size: u64,
}

impl DirectoryEntry {
    /// Write the result fields into `dta`, leaving the search bookkeeping
    /// bytes alone. Returns `None` if `dta` is shorter than [`DTA_SIZE`].
    pub fn store(&self, dta: &mut [u8]) -> Option<()> {
        let (record, _) = DtaRecord::mut_from_prefix(dta).ok()?;

        record.attributes = (self.attributes & 0xff) as u8;
        record.date = U16::new(self.modified.date);
        record.time = U16::new(self.modified.time);
        record.size_low = U16::new((self.size & 0xffff) as u16);
        record.size_high = U16::new(((self.size >> 16) & 0xffff) as u16);

        let len = self.name.len().min(MAX_NAME);
        record.name.fill(0);
        record.name[..len].copy_from_slice(&self.name[..len]);
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscalls::dos::file_attributes;

    #[test]
    fn test_record_size() {
        assert_eq!(core::mem::size_of::<DtaRecord>(), DTA_SIZE);
    }

    #[test]
    fn test_store_writes_fields_at_fixed_offsets() {
        let mut dta = [0xAAu8; DTA_SIZE];
        let entry = DirectoryEntry {
            name: b"README.TXT".to_vec(),
            attributes: file_attributes::ARCHIVE,
            modified: DosDateTime {
                date: 0x1234,
                time: 0x5678,
            },
            size: 0x0001_2345,
        };
        entry.store(&mut dta).unwrap();

        assert!(dta[..21].iter().all(|&b| b == 0xAA));
        assert_eq!(dta[21], 0x20);
        assert_eq!(&dta[22..24], &[0x34, 0x12]);
        assert_eq!(&dta[24..26], &[0x78, 0x56]);
        assert_eq!(&dta[26..28], &[0x45, 0x23]);
        assert_eq!(&dta[28..30], &[0x01, 0x00]);
        assert_eq!(&dta[30..40], b"README.TXT");
        assert!(dta[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_long_name_is_truncated() {
        let mut dta = [0u8; DTA_SIZE];
        let entry = DirectoryEntry {
            name: vec![b'x'; 400],
            attributes: file_attributes::DIRECTORY,
            modified: DosDateTime::default(),
            size: 0,
        };
        entry.store(&mut dta).unwrap();
        assert!(dta[30..30 + MAX_NAME].iter().all(|&b| b == b'x'));
        assert_eq!(dta[DTA_SIZE - 1], 0);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let mut dta = [0u8; 100];
        let entry = DirectoryEntry {
            name: b"a".to_vec(),
            attributes: 0,
            modified: DosDateTime::default(),
            size: 0,
        };
        assert!(entry.store(&mut dta).is_none());
    }
}
