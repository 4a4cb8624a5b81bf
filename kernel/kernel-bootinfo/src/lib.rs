//! # Kernel Boot Information
//!
//! The memory-map region descriptors the bootloader hands the kernel, in the
//! shape the memory subsystem consumes them. The boot-protocol tag walkers
//! that *produce* this list live elsewhere; this crate only defines the
//! contract between them and the paging core.

#![cfg_attr(not(any(test, doctest)), no_std)]

use kernel_addresses::PhysAddr;

/// The boot argument that enables one diagnostic line per page mapping.
///
/// Arguments are exact-matched against this token; anything else leaves the
/// verbose-mapping output off.
pub const VERBOSE_MAPPING_ARG: &str = "--verbose-mappings";

/// Classification tag of one memory-map region.
///
/// Only [`Available`](RegionKind::Available) regions become free physical
/// frames; every other kind is treated as permanently used.
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RegionKind {
    /// Usable RAM.
    Available = 0,
    /// Firmware-reserved, never usable.
    Reserved = 1,
    /// ACPI tables; reclaimable after they have been parsed, but this
    /// design never reclaims them.
    AcpiReclaimable = 2,
    /// ACPI non-volatile storage.
    NonVolatile = 3,
    /// RAM the firmware flagged as defective.
    Bad = 4,
    /// Any tag this kernel does not know about.
    Unknown = 5,
}

/// One contiguous physical region as described by the bootloader.
#[derive(Copy, Clone, Debug)]
pub struct Region {
    base: PhysAddr,
    size: u32,
    kind: RegionKind,
    /// Some boot protocols pad their region table with blank entries; only
    /// initialized entries carry meaning.
    initialized: bool,
}

impl Region {
    #[must_use]
    pub const fn new(base: PhysAddr, size: u32, kind: RegionKind) -> Self {
        Self {
            base,
            size,
            kind,
            initialized: true,
        }
    }

    /// A blank table entry; skipped during classification.
    #[must_use]
    pub const fn uninitialized() -> Self {
        Self {
            base: PhysAddr::new(0),
            size: 0,
            kind: RegionKind::Unknown,
            initialized: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysAddr {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Exclusive end of the region, saturating at the top of the 4 GiB
    /// space (a map may describe a region running to the very top).
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.base.as_u32().saturating_add(self.size)
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RegionKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// The ordered sequence of regions, consumed exactly once at init.
#[derive(Copy, Clone)]
pub struct MemoryMap<'a> {
    regions: &'a [Region],
}

impl<'a> MemoryMap<'a> {
    #[must_use]
    pub const fn new(regions: &'a [Region]) -> Self {
        Self { regions }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterate over the initialized regions only.
    pub fn regions(&self) -> impl Iterator<Item = &'a Region> {
        self.regions.iter().filter(|r| r.is_initialized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_entries_are_skipped() {
        let regions = [
            Region::new(PhysAddr::new(0), 0x10_0000, RegionKind::Reserved),
            Region::uninitialized(),
            Region::new(PhysAddr::new(0x10_0000), 0x40_0000, RegionKind::Available),
        ];
        let map = MemoryMap::new(&regions);
        assert_eq!(map.len(), 3);
        assert_eq!(map.regions().count(), 2);
    }

    #[test]
    fn region_end_saturates() {
        let region = Region::new(PhysAddr::new(0xFFF0_0000), 0x20_0000, RegionKind::Available);
        assert_eq!(region.end(), u32::MAX);
    }
}
