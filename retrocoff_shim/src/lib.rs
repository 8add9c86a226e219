// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Platform-independent core for running legacy 32-bit COFF programs.
//!
//! This crate knows how a DOS-extender style COFF image is laid out, how its
//! sections are placed at their link-time addresses, and what the fixed
//! wrapper table handed to the loaded program looks like:
//! - COFF header and section table parsing
//! - Fixed-address region bookkeeping with overlap resolution
//! - The execution context block shared with the guest
//! - Legacy error codes, file attributes, DTA layout and packed date/time
//! - The `DosApi` trait implemented by a host platform
//! - Wrapper-call tracing
//!
//! The host side (mapping memory, talking to the filesystem, calling into
//! the guest) lives in a platform crate.

pub mod loader;
pub mod syscalls;
pub mod tracing;

use thiserror::Error;

pub use loader::coff::{CoffLoader, LoadedImage, LoadedSection, SectionKind};
pub use loader::context::{ContextBlock, ExecutionContext};
pub use loader::memmap::{Mapper, PlacementError, Region, RegionMap};
pub use syscalls::dos::{DosApi, DosError, DosResult};

/// Fatal errors raised while loading an image.
///
/// None of these can be recovered from: the guest has not started yet, so the
/// runner reports the error and terminates with [`LoadError::exit_code`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot load \"{0}\": program not found")]
    NotFound(String),

    #[error("\"{0}\" is not a COFF program")]
    InvalidImage(String),

    #[error("\"{0}\" has no sections")]
    NoSections(String),

    #[error("optional header size is 0x{0:x}, expected 0x1c")]
    BadOptionalHeader(u16),

    #[error("end of file while reading section headers")]
    TruncatedHeaders,

    #[error("end of file while reading section data at 0x{0:x}")]
    TruncatedSection(u32),

    #[error("cannot allocate virtual memory at 0x{address:x} with size 0x{length:x}: {source}")]
    Placement {
        address: usize,
        length: usize,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "section {section} at 0x{address:08x} is not aligned to 0x10000, so its start is not mapped"
    )]
    UnalignedSection { section: String, address: usize },

    #[error("I/O error while reading image: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Process exit code reported for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::NotFound(_) | LoadError::InvalidImage(_) | LoadError::NoSections(_) => 10,
            LoadError::BadOptionalHeader(_)
            | LoadError::TruncatedHeaders
            | LoadError::TruncatedSection(_)
            | LoadError::Io(_) => 11,
            LoadError::Placement { .. } | LoadError::UnalignedSection { .. } => 20,
        }
    }
}

impl From<loader::memmap::PlacementError> for LoadError {
    fn from(e: loader::memmap::PlacementError) -> Self {
        LoadError::Placement {
            address: e.address,
            length: e.length,
            source: e.source,
        }
    }
}

pub type Result<T> = core::result::Result<T, LoadError>;
