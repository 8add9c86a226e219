// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Fixed-address anonymous mappings
//!
//! The [`Mapper`] used by real sessions. Mappings are private, anonymous
//! and zero-filled, and are placed with `MAP_FIXED_NOREPLACE` so that an
//! address already in use by the host is reported instead of clobbered.

use std::io;

use retrocoff_shim::loader::memmap::Mapper;

/// `mmap`-backed mapper
#[derive(Debug, Default)]
pub struct MmapMapper {
    _private: (),
}

impl MmapMapper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mapper for MmapMapper {
    fn map_fixed(&mut self, base: usize, length: usize, executable: bool) -> io::Result<()> {
        let mut prot = libc::PROT_READ | libc::PROT_WRITE;
        if executable {
            prot |= libc::PROT_EXEC;
        }

        // SAFETY: MAP_FIXED_NOREPLACE never replaces an existing mapping, so
        // no memory owned by anyone else is touched.
        let addr = unsafe {
            libc::mmap(
                base as *mut libc::c_void,
                length,
                prot,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Kernels without MAP_FIXED_NOREPLACE treat the address as a hint.
        if addr as usize != base {
            // SAFETY: `addr` was just returned by mmap for `length` bytes.
            unsafe { libc::munmap(addr, length) };
            return Err(io::Error::from(io::ErrorKind::AddrInUse));
        }

        Ok(())
    }

    fn unmap(&mut self, base: usize, length: usize) {
        // SAFETY: only called for regions established by `map_fixed`.
        unsafe { libc::munmap(base as *mut libc::c_void, length) };
    }

    fn memory_mut(&mut self, address: usize, length: usize) -> &mut [u8] {
        // SAFETY: the region map only asks for ranges lying inside mappings
        // made by `map_fixed`, which stay mapped until `unmap`.
        unsafe { core::slice::from_raw_parts_mut(address as *mut u8, length) }
    }
}
