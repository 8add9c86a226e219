// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Legacy DOS-extender service interface
//!
//! This module defines the host services a loaded program reaches through the
//! wrapper table:
//! - File I/O on small-integer descriptors
//! - Directory search through the directory transfer area
//! - Filesystem and working-directory operations
//! - Process control (spawn, exit, sleep)
//! - Heap growth
//!
//! The trait works on host-side Rust values. Converting raw guest arguments
//! and writing results back into guest memory is left to the platform's
//! native-call thunks.

use std::io;

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Legacy error codes written to the execution context's error slot
pub mod error_code {
    pub const INVALID_FUNCTION: u16 = 1;
    pub const FILE_NOT_FOUND: u16 = 2;
    pub const PATH_NOT_FOUND: u16 = 3;
    pub const TOO_MANY_OPEN_FILES: u16 = 4;
    pub const ACCESS_DENIED: u16 = 5;
    pub const INVALID_HANDLE: u16 = 6;
    pub const NOT_ENOUGH_MEMORY: u16 = 8;
    pub const INVALID_ACCESS: u16 = 12;
    pub const NO_MORE_FILES: u16 = 18;
    pub const SEEK: u16 = 25;
}

/// Legacy file attribute bits
pub mod file_attributes {
    pub const DIRECTORY: u32 = 0x10;
    pub const ARCHIVE: u32 = 0x20;
}

/// Value reported by the isatty wrapper for a terminal
pub const DEVICE_IS_TERMINAL: i32 = 0x80;

/// Synthetic drive number reported as the current drive (C:)
pub const CURRENT_DRIVE: i32 = 2;

/// Legacy OS version reported to the program
pub const DOS_VERSION: i32 = 5;

/// Longest current-directory string, terminator included
pub const MAX_PATH: usize = 1024;

/// Exit status recorded when a spawned child dies from a signal
pub const SIGNALED_EXIT_STATUS: i32 = 255;

/// Per-call failure of a wrapper.
///
/// Every variant except [`DosError::Unreported`] carries the legacy code that
/// is stored in the error slot before the wrapper returns -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DosError {
    #[error("invalid function")]
    InvalidFunction,
    #[error("file not found")]
    FileNotFound,
    #[error("path not found")]
    PathNotFound,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("access denied")]
    AccessDenied,
    #[error("invalid handle")]
    InvalidHandle,
    #[error("not enough memory")]
    NotEnoughMemory,
    #[error("invalid access code")]
    InvalidAccess,
    #[error("seek error")]
    Seek,
    /// Failure the legacy interface never reported through the error slot
    #[error("failed")]
    Unreported,
}

impl DosError {
    /// Legacy error code, or `None` when the slot must be left untouched
    pub fn code(self) -> Option<u16> {
        use error_code::*;
        Some(match self {
            DosError::InvalidFunction => INVALID_FUNCTION,
            DosError::FileNotFound => FILE_NOT_FOUND,
            DosError::PathNotFound => PATH_NOT_FOUND,
            DosError::TooManyOpenFiles => TOO_MANY_OPEN_FILES,
            DosError::AccessDenied => ACCESS_DENIED,
            DosError::InvalidHandle => INVALID_HANDLE,
            DosError::NotEnoughMemory => NOT_ENOUGH_MEMORY,
            DosError::InvalidAccess => INVALID_ACCESS,
            DosError::Seek => SEEK,
            DosError::Unreported => return None,
        })
    }

    /// Map a host failure to a legacy code.
    ///
    /// Permission problems become "access denied"; anything else becomes
    /// `fallback`, the code the operation reports for a missing target.
    pub fn from_host(err: &io::Error, fallback: DosError) -> DosError {
        match err.kind() {
            io::ErrorKind::PermissionDenied => DosError::AccessDenied,
            _ => fallback,
        }
    }
}

pub type DosResult<T> = core::result::Result<T, DosError>;

/// Access modes accepted by the open wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read only, file must exist
    Read,
    /// Write, truncating
    Write,
    /// Read and write without truncation, file must exist
    ReadWrite,
}

impl TryFrom<i32> for AccessMode {
    type Error = DosError;

    fn try_from(mode: i32) -> DosResult<Self> {
        match mode {
            0 => Ok(AccessMode::Read),
            1 => Ok(AccessMode::Write),
            2 => Ok(AccessMode::ReadWrite),
            _ => Err(DosError::InvalidAccess),
        }
    }
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

impl TryFrom<i32> for SeekOrigin {
    type Error = DosError;

    fn try_from(whence: i32) -> DosResult<Self> {
        match whence {
            0 => Ok(SeekOrigin::Start),
            1 => Ok(SeekOrigin::Current),
            2 => Ok(SeekOrigin::End),
            _ => Err(DosError::Seek),
        }
    }
}

/// Broken-down local time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CivilTime {
    pub year: u32,
    /// 1-12
    pub month: u32,
    /// 1-31
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

/// Packed legacy date and time, as written to guest memory
///
/// ```text
/// time: bits 0-4 seconds/2, 5-10 minutes, 11-15 hours
/// date: bits 0-4 day, 5-8 month, 9-15 years since 1980
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl From<CivilTime> for DosDateTime {
    fn from(t: CivilTime) -> Self {
        let years = t.year.saturating_sub(1980).min(0x7f);
        let time = (t.second / 2) | (t.minute << 5) | (t.hour << 11);
        let date = t.day | (t.month << 5) | (years << 9);
        Self {
            date: (date & 0xffff) as u16,
            time: (time & 0xffff) as u16,
        }
    }
}

/// Local time record filled by the local-time wrapper
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SystemTimeRecord {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
}

impl From<CivilTime> for SystemTimeRecord {
    fn from(t: CivilTime) -> Self {
        Self {
            year: t.year,
            month: t.month,
            day: t.day,
            hour: t.hour,
            minute: t.minute,
            second: t.second,
            millisecond: 0,
        }
    }
}

/// Raw request handed to the spawn wrapper
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Command tail as stored by the program, including its leading prefix
    pub command_tail: Vec<u8>,
    /// `KEY=VALUE` strings of the child's environment
    pub environment: Vec<Vec<u8>>,
}

/// Host services behind the wrapper table
///
/// This trait is implemented by the platform layer. File descriptors are the
/// small integers handed out to the program; paths arrive in legacy form and
/// are translated by the implementation.
pub trait DosApi {
    /// Record a legacy error code in the execution context
    fn record_error(&mut self, code: u16);

    /// Grow the heap up to `new_top`
    fn grow_heap(&mut self, new_top: usize) -> DosResult<()>;

    /// Open an existing file with a raw legacy access mode
    fn open(&mut self, path: &str, mode: i32) -> DosResult<i32>;

    /// Create or truncate a file
    fn create(&mut self, path: &str, attributes: i32) -> DosResult<i32>;

    /// Write and flush, returning the byte count
    fn write(&mut self, fd: i32, data: &[u8]) -> DosResult<usize>;

    fn read(&mut self, fd: i32, buffer: &mut [u8]) -> DosResult<usize>;

    fn close(&mut self, fd: i32) -> DosResult<()>;

    /// Reposition a descriptor and return the new absolute offset
    fn seek(&mut self, fd: i32, offset: i64, whence: i32) -> DosResult<u64>;

    /// Legacy attribute mask of a path
    fn get_attributes(&mut self, path: &str) -> DosResult<u32>;

    /// Accepted and ignored
    fn set_attributes(&mut self, path: &str, attributes: u32) -> DosResult<()>;

    /// Register the guest address of the directory transfer area
    fn set_dta(&mut self, address: usize);

    /// Start a directory search and fill the DTA with its first entry.
    /// Any search in progress is discarded.
    fn find_first(&mut self, pattern: &str, attributes: u32) -> DosResult<()>;

    /// Fill the DTA with the next entry of the current search
    fn find_next(&mut self) -> DosResult<()>;

    fn find_close(&mut self);

    fn is_terminal(&mut self, fd: i32) -> DosResult<bool>;

    /// Modification time of the file behind `fd`
    fn file_time(&mut self, fd: i32) -> DosResult<DosDateTime>;

    fn local_time(&mut self) -> DosResult<SystemTimeRecord>;

    /// Not supported by the host
    fn set_file_time(&mut self, fd: i32, stamp: DosDateTime) -> DosResult<()>;

    fn make_dir(&mut self, path: &str) -> DosResult<()>;

    fn remove_dir(&mut self, path: &str) -> DosResult<()>;

    fn remove_file(&mut self, path: &str) -> DosResult<()>;

    fn rename(&mut self, from: &str, to: &str) -> DosResult<()>;

    /// Current directory with legacy separators, shorter than [`MAX_PATH`]
    fn current_dir(&mut self) -> DosResult<String>;

    fn change_dir(&mut self, path: &str) -> DosResult<()>;

    /// Run a program to completion
    fn spawn(&mut self, program: &str, request: &SpawnRequest) -> DosResult<()>;

    /// Exit status of the last spawned child
    fn exit_status(&mut self) -> i32;

    fn dup(&mut self, fd: i32) -> DosResult<i32>;

    /// Rebind `dst` to the resource behind `src` and return `dst`
    fn dup2(&mut self, src: i32, dst: i32) -> DosResult<i32>;

    /// Release everything and end the process
    fn terminate(&mut self, status: i32) -> !;

    fn sleep(&mut self, milliseconds: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DosError::FileNotFound.code(), Some(2));
        assert_eq!(DosError::PathNotFound.code(), Some(3));
        assert_eq!(DosError::InvalidHandle.code(), Some(6));
        assert_eq!(DosError::InvalidAccess.code(), Some(12));
        assert_eq!(DosError::Seek.code(), Some(25));
        assert_eq!(DosError::Unreported.code(), None);
    }

    #[test]
    fn test_host_error_mapping() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(
            DosError::from_host(&denied, DosError::FileNotFound),
            DosError::AccessDenied
        );
        assert_eq!(
            DosError::from_host(&missing, DosError::PathNotFound),
            DosError::PathNotFound
        );
    }

    #[test]
    fn test_access_mode_parsing() {
        assert_eq!(AccessMode::try_from(0), Ok(AccessMode::Read));
        assert_eq!(AccessMode::try_from(2), Ok(AccessMode::ReadWrite));
        assert_eq!(AccessMode::try_from(3), Err(DosError::InvalidAccess));
        assert_eq!(AccessMode::try_from(-1), Err(DosError::InvalidAccess));
    }

    #[test]
    fn test_date_time_packing() {
        let stamp = DosDateTime::from(CivilTime {
            year: 2004,
            month: 7,
            day: 15,
            hour: 13,
            minute: 45,
            second: 31,
        });
        assert_eq!(stamp.time, (15) | (45 << 5) | (13 << 11));
        assert_eq!(stamp.date, 15 | (7 << 5) | (24 << 9));
        assert_eq!(stamp.as_bytes().len(), 4);
    }

    #[test]
    fn test_date_before_1980_clamps() {
        let stamp = DosDateTime::from(CivilTime {
            year: 1970,
            month: 1,
            day: 1,
            ..CivilTime::default()
        });
        assert_eq!(stamp.date >> 9, 0);
    }

    #[test]
    fn test_system_time_record_layout() {
        let record = SystemTimeRecord::from(CivilTime {
            year: 2024,
            month: 2,
            day: 29,
            hour: 23,
            minute: 59,
            second: 58,
        });
        let bytes = record.as_bytes();
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[0..4], &2024u32.to_ne_bytes());
        assert_eq!(&bytes[24..28], &[0, 0, 0, 0]);
    }
}
