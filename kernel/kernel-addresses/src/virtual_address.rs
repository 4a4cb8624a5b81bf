use crate::{DIRECTORY_ENTRIES, PAGE_SHIFT, PAGE_SIZE, TABLE_ENTRIES};

/// A **virtual** memory address.
///
/// Newtype over `u32` to prevent mixing with physical addresses.
/// No alignment guarantees by itself.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtAddr(u32);

/// Index into the page directory (derived from VA bits `[31:22]`).
///
/// Strongly typed to avoid mixing with the table-level index. Range is
/// `0..1024` (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct DirectoryIndex(u16);

/// Index into one page table (derived from VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableIndex(u16);

impl VirtAddr {
    #[inline]
    #[must_use]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Build a page-aligned address from a global page index (`0..2^20`).
    #[inline]
    #[must_use]
    pub const fn from_page_index(index: usize) -> Self {
        debug_assert!(index < crate::TOTAL_PAGES);
        Self((index as u32) << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Extract the directory index (bits 31-22 of the virtual address).
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> DirectoryIndex {
        DirectoryIndex::new((self.0 >> 22) as u16)
    }

    /// Extract the table index (bits 21-12 of the virtual address).
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> TableIndex {
        TableIndex::new(((self.0 >> PAGE_SHIFT) & 0x3ff) as u16)
    }

    /// The in-page offset (bits 11-0). Must be zero for any address handed
    /// to the page mapper.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & (PAGE_SIZE - 1)
    }

    /// The global page index (`addr >> 12`), the bit position of this page
    /// in the virtual bitmap.
    #[inline]
    #[must_use]
    pub const fn page_index(self) -> usize {
        (self.0 >> PAGE_SHIFT) as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }
}

impl DirectoryIndex {
    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < DIRECTORY_ENTRIES);
        Self(v)
    }

    /// Return the index as `usize` for table access.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl TableIndex {
    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < TABLE_ENTRIES);
        Self(v)
    }

    /// Return the index as `usize` for table access.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl core::ops::Add<u32> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0.checked_add(rhs).expect("VirtAddr add"))
    }
}

impl From<u32> for VirtAddr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

impl core::fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl core::fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:#010x} (Virtual, pde {}, pte {})",
            self.0,
            self.directory_index().as_usize(),
            self.table_index().as_usize()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposition() {
        // 0xC040_3123: directory 0x301, table 0x003, offset 0x123.
        let va = VirtAddr::new(0xC040_3123);
        assert_eq!(va.directory_index().as_usize(), 0x301);
        assert_eq!(va.table_index().as_usize(), 0x003);
        assert_eq!(va.page_offset(), 0x123);
        assert!(!va.is_page_aligned());
    }

    #[test]
    fn page_index_round_trip() {
        let va = VirtAddr::from_page_index(0xd_eadb);
        assert_eq!(va.page_index(), 0xd_eadb);
        assert!(va.is_page_aligned());
        assert_eq!(
            va.page_index(),
            va.directory_index().as_usize() * 1024 + va.table_index().as_usize()
        );
    }

    #[test]
    fn top_of_address_space() {
        let va = VirtAddr::new(u32::MAX);
        assert_eq!(va.directory_index().as_usize(), 1023);
        assert_eq!(va.table_index().as_usize(), 1023);
        assert_eq!(va.page_index(), crate::TOTAL_PAGES - 1);
    }
}
