// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Fixed-address region bookkeeping
//!
//! Every byte range the image or its heap asks for is placed at exactly the
//! requested (rounded) address, because the loaded code was linked against
//! absolute addresses. Requests may overlap regions that are already owned;
//! only the bytes not yet owned are mapped, so earlier mappings (and their
//! permissions) are never replaced.
//!
//! The actual mapping primitive is supplied by a [`Mapper`], which lets the
//! overlap policy be exercised without touching the address space.

use std::collections::BTreeMap;
use std::io;

/// Allocation granularity for every placement (64 KiB)
pub const ALLOCATION_GRANULARITY: usize = 0x10000;

/// Base address of the guest heap
pub const HEAP_BASE: usize = 0x0100_0000;

/// Round `value` up to the allocation granularity.
pub fn round_up(value: usize) -> usize {
    (value + (ALLOCATION_GRANULARITY - 1)) & !(ALLOCATION_GRANULARITY - 1)
}

/// Host primitive that establishes and tears down fixed-address mappings.
pub trait Mapper {
    /// Map `[base, base + length)` zero-filled, readable and writable, and
    /// executable when `executable` is set. Must not move the mapping.
    fn map_fixed(&mut self, base: usize, length: usize, executable: bool) -> io::Result<()>;

    /// Remove a mapping previously established by `map_fixed`.
    fn unmap(&mut self, base: usize, length: usize);

    /// Writable view of `[address, address + length)`.
    ///
    /// Only called for ranges that lie entirely inside mappings made by this
    /// mapper.
    fn memory_mut(&mut self, address: usize, length: usize) -> &mut [u8];
}

/// One owned mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: usize,
    pub length: usize,
    pub executable: bool,
}

impl Region {
    /// One past the last byte of the region
    pub fn end(&self) -> usize {
        self.base + self.length
    }

    fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.end()
    }
}

/// Failed placement: the range that could not be mapped and why.
#[derive(Debug)]
pub struct PlacementError {
    pub address: usize,
    pub length: usize,
    pub source: io::Error,
}

/// Ordered set of non-overlapping regions plus the heap cursor.
pub struct RegionMap<M: Mapper> {
    mapper: M,
    regions: BTreeMap<usize, Region>,
    heap_top: usize,
}

impl<M: Mapper> RegionMap<M> {
    /// Create an empty map on top of `mapper`
    pub fn new(mapper: M) -> Self {
        Self {
            mapper,
            regions: BTreeMap::new(),
            heap_top: HEAP_BASE,
        }
    }

    /// Place `[address, address + length)` after rounding both values up.
    ///
    /// Bytes already covered by an owned region are left alone; every gap is
    /// mapped as a new region. On failure the regions placed so far remain
    /// owned.
    pub fn place(
        &mut self,
        address: usize,
        length: usize,
        executable: bool,
    ) -> Result<(), PlacementError> {
        let mut addr = round_up(address);
        let mut len = round_up(length);

        if !self.intersects(addr, len) {
            return self.map_new(addr, len, executable);
        }

        while len > 0 {
            // Skip the part of the request already owned by the region that
            // contains its head.
            if let Some(owner) = self.region_containing(addr).filter(|r| addr > r.base) {
                if owner.end() >= addr + len {
                    return Ok(());
                }
                len -= owner.end() - addr;
                addr = owner.end();
            }

            let Some(next) = self.lowest_at_or_after(addr) else {
                return self.map_new(addr, len, executable);
            };

            if next.base >= addr + len {
                return self.map_new(addr, len, executable);
            }

            if next.base == addr {
                if next.length >= len {
                    return Ok(());
                }
                addr += next.length;
                len -= next.length;
            } else {
                let gap = next.base - addr;
                self.map_new(addr, gap, executable)?;
                len -= gap;
                addr = next.base;
            }
        }

        Ok(())
    }

    /// Extend the heap so that it reaches `new_top`.
    ///
    /// The delta from the current cursor is placed non-executable and the
    /// cursor only moves when the placement succeeded. A `new_top` at or below
    /// the cursor is a no-op.
    pub fn grow_heap(&mut self, new_top: usize) -> Result<(), PlacementError> {
        if new_top <= self.heap_top {
            return Ok(());
        }
        self.place(self.heap_top, new_top - self.heap_top, false)?;
        self.heap_top = new_top;
        Ok(())
    }

    /// Current heap cursor
    pub fn heap_top(&self) -> usize {
        self.heap_top
    }

    /// Owned regions in address order
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Whether `address` lies inside an owned region
    pub fn is_mapped(&self, address: usize) -> bool {
        self.region_containing(address).is_some()
    }

    /// Whether every byte of `[address, address + length)` is owned
    pub fn is_range_mapped(&self, address: usize, length: usize) -> bool {
        let end = address + length;
        let mut probe = address;
        while probe < end {
            match self.region_containing(probe) {
                Some(region) => probe = region.end(),
                None => return false,
            }
        }
        true
    }

    /// Writable view of owned memory, or `None` if part of the range is not
    /// mapped.
    pub fn memory_mut(&mut self, address: usize, length: usize) -> Option<&mut [u8]> {
        if !self.is_range_mapped(address, length) {
            return None;
        }
        Some(self.mapper.memory_mut(address, length))
    }

    /// Unmap every owned region.
    pub fn release_all(&mut self) {
        for region in std::mem::take(&mut self.regions).into_values() {
            self.mapper.unmap(region.base, region.length);
        }
    }

    fn map_new(&mut self, base: usize, length: usize, executable: bool) -> Result<(), PlacementError> {
        if length == 0 {
            return Ok(());
        }
        self.mapper
            .map_fixed(base, length, executable)
            .map_err(|source| PlacementError {
                address: base,
                length,
                source,
            })?;
        self.regions.insert(
            base,
            Region {
                base,
                length,
                executable,
            },
        );
        Ok(())
    }

    fn intersects(&self, addr: usize, len: usize) -> bool {
        let end = addr + len;
        self.regions
            .range(..end)
            .next_back()
            .is_some_and(|(_, r)| r.end() > addr)
    }

    fn region_containing(&self, addr: usize) -> Option<Region> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, r)| *r)
            .filter(|r| r.contains(addr))
    }

    fn lowest_at_or_after(&self, addr: usize) -> Option<Region> {
        self.regions.range(addr..).next().map(|(_, r)| *r)
    }
}
