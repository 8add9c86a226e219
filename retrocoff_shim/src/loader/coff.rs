// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! COFF image parser and section loader
//!
//! Images are 32-bit i386 COFF executables as produced by DOS-extender
//! toolchains:
//! - 20-byte file header, validated for machine, section count and
//!   optional header size
//! - 28-byte optional header, skipped
//! - 40-byte section headers, read in file order
//!
//! Each section is placed at its link-time virtual address through a
//! [`RegionMap`]; initialized sections are then read straight into the
//! mapped memory.

use std::io::{self, Read, Seek, SeekFrom};

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::memmap::{ALLOCATION_GRANULARITY, Mapper, RegionMap};
use crate::{LoadError, Result};

/// IMAGE_FILE_MACHINE_I386
pub const MACHINE_I386: u16 = 0x014c;

/// Size of the optional header every supported image carries
pub const OPTIONAL_HEADER_SIZE: u16 = 0x1c;

/// Section contains executable code
pub const STYP_TEXT: u32 = 0x20;
/// Section contains initialized data
pub const STYP_DATA: u32 = 0x40;
/// Section is zero-filled at load time
pub const STYP_BSS: u32 = 0x80;

/// COFF file header
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct CoffHeader {
    pub magic: U16,
    pub section_count: U16,
    pub timestamp: U32,
    pub symbol_table: U32,
    pub symbol_count: U32,
    pub optional_header_size: U16,
    pub flags: U16,
}

/// COFF section header
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub physical_address: U32,
    pub virtual_address: U32,
    pub size: U32,
    pub file_offset: U32,
    pub relocations: U32,
    pub line_numbers: U32,
    pub relocation_count: U16,
    pub line_number_count: U16,
    pub flags: U32,
}

/// How a section is treated when it is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Code,
    Data,
    ZeroFill,
}

impl SectionHeader {
    /// Section name up to the first NUL
    pub fn name(&self) -> String {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }

    /// Classify the section by its flags.
    pub fn kind(&self) -> SectionKind {
        let flags = self.flags.get();
        if flags & STYP_TEXT != 0 {
            SectionKind::Code
        } else if flags & STYP_BSS != 0 {
            SectionKind::ZeroFill
        } else {
            SectionKind::Data
        }
    }

    /// Whether section bytes come from the file. Zero-fill sections and
    /// sections without a file offset keep the zeroed mapping.
    pub fn has_file_data(&self) -> bool {
        self.flags.get() & STYP_BSS == 0 && self.file_offset.get() != 0
    }
}

/// Parsed header and section table
#[derive(Debug, Clone)]
pub struct ImageLayout {
    pub header: CoffHeader,
    pub sections: Vec<SectionHeader>,
}

/// Placement record of one loaded section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSection {
    pub name: String,
    pub kind: SectionKind,
    pub virtual_address: usize,
    pub size: usize,
}

/// Result of a successful load
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Address control is transferred to
    pub entry_point: usize,
    /// Sections in file order
    pub sections: Vec<LoadedSection>,
}

/// Read and validate the file header, skip the optional header and read the
/// section table. `name` is only used in error messages.
pub fn read_layout<R: Read>(name: &str, image: &mut R) -> Result<ImageLayout> {
    let mut raw = [0u8; core::mem::size_of::<CoffHeader>()];
    image
        .read_exact(&mut raw)
        .map_err(|_| LoadError::InvalidImage(name.to_string()))?;
    let header = CoffHeader::read_from_bytes(&raw[..])
        .map_err(|_| LoadError::InvalidImage(name.to_string()))?;

    if header.magic.get() != MACHINE_I386 {
        return Err(LoadError::InvalidImage(name.to_string()));
    }
    if header.section_count.get() < 1 {
        return Err(LoadError::NoSections(name.to_string()));
    }
    if header.optional_header_size.get() != OPTIONAL_HEADER_SIZE {
        return Err(LoadError::BadOptionalHeader(
            header.optional_header_size.get(),
        ));
    }

    let mut optional = [0u8; OPTIONAL_HEADER_SIZE as usize];
    image
        .read_exact(&mut optional)
        .map_err(|_| LoadError::TruncatedHeaders)?;

    let count = usize::from(header.section_count.get());
    let mut table = vec![0u8; count * core::mem::size_of::<SectionHeader>()];
    image
        .read_exact(&mut table)
        .map_err(|_| LoadError::TruncatedHeaders)?;

    let sections = table
        .chunks_exact(core::mem::size_of::<SectionHeader>())
        .map(|chunk| {
            SectionHeader::read_from_bytes(chunk).map_err(|_| LoadError::TruncatedHeaders)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ImageLayout { header, sections })
}

/// Loads COFF images into fixed-address memory
pub struct CoffLoader<'a, M: Mapper> {
    memory: &'a mut RegionMap<M>,
}

impl<'a, M: Mapper> CoffLoader<'a, M> {
    /// Create a loader placing sections through `memory`
    pub fn new(memory: &'a mut RegionMap<M>) -> Self {
        Self { memory }
    }

    /// Load every section of `image` and return the entry address.
    ///
    /// The entry point is the virtual address of the first code section, or
    /// of the first section when no section is flagged as code.
    pub fn load<R: Read + Seek>(&mut self, name: &str, image: &mut R) -> Result<LoadedImage> {
        let layout = read_layout(name, image)?;

        let mut entry_point = None;
        let mut loaded = Vec::with_capacity(layout.sections.len());

        for section in &layout.sections {
            let kind = section.kind();
            let address = section.virtual_address.get() as usize;
            let size = section.size.get() as usize;

            if kind == SectionKind::Code && entry_point.is_none() {
                entry_point = Some(address);
            }

            self.memory.place(address, size, kind == SectionKind::Code)?;

            if section.has_file_data() && size > 0 {
                self.copy_section(image, section, address, size)?;
            }

            loaded.push(LoadedSection {
                name: section.name(),
                kind,
                virtual_address: address,
                size,
            });
        }

        let entry_point = entry_point
            .unwrap_or_else(|| layout.sections[0].virtual_address.get() as usize);

        Ok(LoadedImage {
            entry_point,
            sections: loaded,
        })
    }

    fn copy_section<R: Read + Seek>(
        &mut self,
        image: &mut R,
        section: &SectionHeader,
        address: usize,
        size: usize,
    ) -> Result<()> {
        let file_offset = section.file_offset.get();
        // placement rounds the start up, so an unaligned section only has its
        // head mapped when an earlier region already covers it
        let window = self.memory.memory_mut(address, size).ok_or_else(|| {
            if address % ALLOCATION_GRANULARITY == 0 {
                LoadError::Placement {
                    address,
                    length: size,
                    source: io::Error::from(io::ErrorKind::AddrNotAvailable),
                }
            } else {
                LoadError::UnalignedSection {
                    section: section.name(),
                    address,
                }
            }
        })?;

        image.seek(SeekFrom::Start(u64::from(file_offset)))?;
        image
            .read_exact(window)
            .map_err(|_| LoadError::TruncatedSection(file_offset))
    }
}
