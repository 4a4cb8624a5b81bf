//! Typed page directory and page table structures.
//!
//! Both are 4 KiB arrays of 1024 raw entries; the newtype wrappers around
//! [`PageEntryBits`] keep directory and table entries from being confused
//! even though the hardware layout is identical.

use core::ops::{Index, IndexMut};

use kernel_addresses::{DIRECTORY_ENTRIES, DirectoryIndex, PhysAddr, TABLE_ENTRIES, TableIndex};

use crate::entry::PageEntryBits;

/// A page-directory entry: points at a [`PageTable`] when present.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct DirectoryEntry(PageEntryBits);

/// A page-table entry: maps one 4 KiB virtual page to one physical frame.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct TableEntry(PageEntryBits);

macro_rules! entry_common {
    ($name:ident) => {
        impl $name {
            /// A not-present entry with all bits clear.
            #[inline]
            #[must_use]
            pub const fn empty() -> Self {
                Self(PageEntryBits::new())
            }

            /// A present, writable, supervisor-only entry targeting `addr`.
            ///
            /// This is the only flag combination the kernel mappings use.
            #[inline]
            #[must_use]
            pub const fn kernel_rw(addr: PhysAddr) -> Self {
                Self(
                    PageEntryBits::new()
                        .with_present(true)
                        .with_writable(true)
                        .with_frame_address(addr),
                )
            }

            #[inline]
            #[must_use]
            pub const fn is_present(self) -> bool {
                self.0.present()
            }

            /// Physical address of the target frame or table.
            #[inline]
            #[must_use]
            pub const fn address(self) -> PhysAddr {
                self.0.frame_address()
            }

            /// The raw bitfield, for inspection and logging.
            #[inline]
            #[must_use]
            pub const fn bits(self) -> PageEntryBits {
                self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0.into_bits() == other.0.into_bits()
            }
        }

        impl Eq for $name {}

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if self.is_present() {
                    write!(f, "{}({:?})", stringify!($name), self.address())
                } else {
                    write!(f, "{}(not present)", stringify!($name))
                }
            }
        }
    };
}

entry_common!(DirectoryEntry);
entry_common!(TableEntry);

/// The top-level translation structure: 1024 [`DirectoryEntry`]s, indexed
/// by the top ten bits of a virtual address.
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [DirectoryEntry; DIRECTORY_ENTRIES],
}

/// A second-level table: 1024 [`TableEntry`]s, indexed by the middle ten
/// bits of a virtual address.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [TableEntry; TABLE_ENTRIES],
}

impl PageDirectory {
    /// A directory with every entry not present.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [DirectoryEntry::empty(); DIRECTORY_ENTRIES],
        }
    }
}

impl PageTable {
    /// A table with every entry not present.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [TableEntry::empty(); TABLE_ENTRIES],
        }
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<DirectoryIndex> for PageDirectory {
    type Output = DirectoryEntry;

    #[inline]
    fn index(&self, index: DirectoryIndex) -> &Self::Output {
        &self.entries[index.as_usize()]
    }
}

impl IndexMut<DirectoryIndex> for PageDirectory {
    #[inline]
    fn index_mut(&mut self, index: DirectoryIndex) -> &mut Self::Output {
        &mut self.entries[index.as_usize()]
    }
}

impl Index<TableIndex> for PageTable {
    type Output = TableEntry;

    #[inline]
    fn index(&self, index: TableIndex) -> &Self::Output {
        &self.entries[index.as_usize()]
    }
}

impl IndexMut<TableIndex> for PageTable {
    #[inline]
    fn index_mut(&mut self, index: TableIndex) -> &mut Self::Output {
        &mut self.entries[index.as_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structures_are_page_sized() {
        assert_eq!(core::mem::size_of::<PageDirectory>(), 4096);
        assert_eq!(core::mem::size_of::<PageTable>(), 4096);
        assert_eq!(core::mem::align_of::<PageDirectory>(), 4096);
    }

    #[test]
    fn kernel_rw_sets_present_and_writable() {
        let entry = TableEntry::kernel_rw(PhysAddr::new(0x8000));
        assert!(entry.is_present());
        assert!(entry.bits().writable());
        assert!(!entry.bits().user_access());
        assert_eq!(entry.address(), PhysAddr::new(0x8000));
    }

    #[test]
    fn fresh_table_is_all_not_present() {
        let table = PageTable::new();
        for index in 0..TABLE_ENTRIES {
            assert!(!table[TableIndex::new(index as u16)].is_present());
        }
    }
}
