//! Backing storage for the directory and all 1024 page tables.
//!
//! The store is one contiguous, page-aligned block: the directory first,
//! then every table in directory order. Keeping the tables at fixed offsets
//! from the directory makes the physical address of table `n` a pure
//! computation from the store's own physical base, so no table ever has to
//! be allocated or located at map time.

use core::mem::{align_of, size_of};

use kernel_addresses::{DIRECTORY_ENTRIES, DirectoryIndex, PAGE_SIZE, PhysAddr};

use crate::table::{PageDirectory, PageTable};

/// Directory slot reserved for the recursive self-mapping.
///
/// Entry 1023 of the directory points back at the directory itself, so the
/// top 4 MiB of virtual address space (`0xFFC0_0000..`) aliases the paging
/// structures once translation is on. Nothing else may ever be mapped
/// there.
pub const RECURSIVE_SLOT: usize = DIRECTORY_ENTRIES - 1;

/// Why a region cannot hold a [`PageTableStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// The region pointer was null.
    #[error("placement region is null")]
    NullRegion,

    /// The region does not start on a page boundary.
    #[error("placement region at {addr:#010x} is not page aligned")]
    Misaligned {
        /// Address the caller supplied.
        addr: usize,
    },

    /// The region is smaller than the store.
    #[error("placement region holds {got} bytes, the store needs {need}")]
    TooSmall {
        /// Bytes required.
        need: usize,
        /// Bytes supplied.
        got: usize,
    },
}

/// The directory plus all 1024 page tables, as one placement-constructed
/// block (4 KiB + 4 MiB).
#[repr(C, align(4096))]
pub struct PageTableStore {
    directory: PageDirectory,
    tables: [PageTable; DIRECTORY_ENTRIES],
}

impl PageTableStore {
    /// Size of the whole store in bytes.
    pub const SIZE: usize = size_of::<Self>();

    /// Construct a zeroed store inside the caller-provided region.
    ///
    /// The region is validated (non-null, page aligned, large enough) and
    /// then zero-filled, which leaves every entry not present.
    ///
    /// ### Errors
    /// Returns a [`PlacementError`] when the region cannot hold the store.
    ///
    /// ### Safety
    /// The region `ptr..ptr + len` must be owned by the caller, writable,
    /// unused for anything else, and valid for the `'static` lifetime of
    /// the returned reference.
    pub unsafe fn place_at(ptr: *mut u8, len: usize) -> Result<&'static mut Self, PlacementError> {
        if ptr.is_null() {
            return Err(PlacementError::NullRegion);
        }
        if ptr as usize % align_of::<Self>() != 0 {
            return Err(PlacementError::Misaligned { addr: ptr as usize });
        }
        if len < Self::SIZE {
            return Err(PlacementError::TooSmall {
                need: Self::SIZE,
                got: len,
            });
        }
        // SAFETY: the region is non-null, aligned and large enough per the
        // checks above; zeroed bytes are a valid bit pattern for every
        // entry (all not present). Exclusive ownership is the caller's
        // obligation.
        unsafe {
            core::ptr::write_bytes(ptr, 0, Self::SIZE);
            Ok(&mut *ptr.cast::<Self>())
        }
    }

    #[inline]
    #[must_use]
    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    #[inline]
    pub fn directory_mut(&mut self) -> &mut PageDirectory {
        &mut self.directory
    }

    /// The table serving directory slot `index`.
    #[inline]
    #[must_use]
    pub fn table(&self, index: DirectoryIndex) -> &PageTable {
        &self.tables[index.as_usize()]
    }

    #[inline]
    pub fn table_mut(&mut self, index: DirectoryIndex) -> &mut PageTable {
        &mut self.tables[index.as_usize()]
    }

    /// The directory entry occupying [`RECURSIVE_SLOT`].
    #[inline]
    #[must_use]
    pub fn recursive_entry(&self) -> crate::table::DirectoryEntry {
        self.directory[DirectoryIndex::new(RECURSIVE_SLOT as u16)]
    }

    /// Physical address of the directory, given the physical base of the
    /// store itself.
    #[inline]
    #[must_use]
    pub fn directory_phys(store_phys: PhysAddr) -> PhysAddr {
        store_phys
    }

    /// Physical address of the table serving directory slot `index`, given
    /// the physical base of the store itself.
    #[inline]
    #[must_use]
    pub fn table_phys(store_phys: PhysAddr, index: DirectoryIndex) -> PhysAddr {
        store_phys + (PAGE_SIZE * (1 + index.as_usize() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Page-aligned heap block for host-side placement tests. Leaked on
    /// purpose so the `'static` lifetime of the store holds.
    pub(crate) fn leaked_region(len: usize) -> *mut u8 {
        let layout = std::alloc::Layout::from_size_align(len, 4096).unwrap();
        // SAFETY: non-zero size, valid alignment.
        unsafe { std::alloc::alloc_zeroed(layout) }
    }

    #[test]
    fn store_layout() {
        assert_eq!(PageTableStore::SIZE, 4096 * 1025);
    }

    #[test]
    fn place_rejects_null() {
        let result = unsafe { PageTableStore::place_at(core::ptr::null_mut(), PageTableStore::SIZE) };
        assert_eq!(result.err(), Some(PlacementError::NullRegion));
    }

    #[test]
    fn place_rejects_misaligned() {
        let region = leaked_region(PageTableStore::SIZE + 4096);
        let skewed = unsafe { region.add(16) };
        let result = unsafe { PageTableStore::place_at(skewed, PageTableStore::SIZE) };
        assert_eq!(
            result.err(),
            Some(PlacementError::Misaligned {
                addr: skewed as usize
            })
        );
    }

    #[test]
    fn place_rejects_short_region() {
        let region = leaked_region(PageTableStore::SIZE);
        let result = unsafe { PageTableStore::place_at(region, PageTableStore::SIZE - 1) };
        assert_eq!(
            result.err(),
            Some(PlacementError::TooSmall {
                need: PageTableStore::SIZE,
                got: PageTableStore::SIZE - 1
            })
        );
    }

    #[test]
    fn placed_store_is_all_not_present() {
        let region = leaked_region(PageTableStore::SIZE);
        let store = unsafe { PageTableStore::place_at(region, PageTableStore::SIZE) }.unwrap();
        for pde in 0..DIRECTORY_ENTRIES {
            let index = DirectoryIndex::new(pde as u16);
            assert!(!store.directory()[index].is_present());
        }
    }

    #[test]
    fn table_phys_offsets() {
        let base = PhysAddr::new(0x50_0000);
        assert_eq!(PageTableStore::directory_phys(base), base);
        assert_eq!(
            PageTableStore::table_phys(base, DirectoryIndex::new(0)),
            PhysAddr::new(0x50_1000)
        );
        assert_eq!(
            PageTableStore::table_phys(base, DirectoryIndex::new(768)),
            PhysAddr::new(0x50_1000 + 768 * 4096)
        );
    }
}
