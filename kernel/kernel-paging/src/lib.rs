//! # Two-Level Kernel Paging
//!
//! The 32-bit x86 paging subsystem: physical-frame and virtual-page
//! bitmaps, the page directory and its 1024 statically-placed tables, the
//! page mapper, boot-time address-space construction, and the page-granular
//! virtual allocator underneath the kernel heap.
//!
//! The crate is split along the hardware seam: everything except
//! [`mmu::X86Mmu`] is portable code that runs (and is tested) on the host
//! against a [`PageTableStore`] placed in an ordinary buffer.
//!
//! ## Boot sequence
//!
//! [`MemoryManager::init`] runs exactly once:
//!
//! 1. install the page-fault handler (every fault is fatal);
//! 2. classify the boot memory map into the physical bitmap;
//! 3. build the directory, including the recursive slot;
//! 4. identity-map the first MiB;
//! 5. map the kernel image at its higher-half addresses;
//! 6. load the directory register and switch paging on.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod bitmap;
pub mod entry;
pub mod fault;
pub mod mmu;
pub mod paging;
pub mod store;
pub mod table;

pub use bitmap::{Bitmap, FrameBitmap};
pub use entry::PageEntryBits;
pub use fault::{FaultFrame, page_fault};
pub use mmu::Mmu;
pub use paging::Paging;
pub use store::{PageTableStore, PlacementError, RECURSIVE_SLOT};
pub use table::{DirectoryEntry, PageDirectory, PageTable, TableEntry};

use kernel_addresses::{PhysAddr, VirtAddr, VirtRegion};
use kernel_bootinfo::MemoryMap;
use kernel_sync::SpinLock;

/// The one memory-management entry point the rest of the kernel talks to.
///
/// Wraps the paging state in a [`SpinLock`] so concurrent allocation and
/// release serialize; `new_page` and `free_page` hold the lock across the
/// whole multi-page operation. The lock is not re-entrant, so paging
/// methods must never be called from a context that already holds it.
pub struct MemoryManager<'s> {
    paging: SpinLock<Paging<'s>>,
}

impl<'s> MemoryManager<'s> {
    #[must_use]
    pub const fn new(paging: Paging<'s>) -> Self {
        Self {
            paging: SpinLock::new(paging),
        }
    }

    /// Bring up the address space. Runs exactly once at boot; afterwards
    /// the CPU translates through the directory this built.
    pub fn init(&self, map: &MemoryMap<'_>, kernel_image: VirtRegion, mmu: &mut impl Mmu) {
        mmu.install_page_fault_handler(page_fault);

        let mut paging = self.paging.lock();
        paging.classify(map);
        paging.init_directory();
        paging.map_early_identity();
        paging.map_range_physical_offset(kernel_image);
        mmu.load_directory(paging.directory_physical_address());
        mmu.enable_paging();
    }

    /// Allocate and map `size / PAGE_SIZE + 1` fresh pages; `None` on
    /// virtual or physical exhaustion. See [`Paging::new_page`].
    #[must_use]
    pub fn new_page(&self, size: u32, mmu: &mut impl Mmu) -> Option<VirtAddr> {
        self.paging.lock().new_page(size, mmu)
    }

    /// Release an allocation made by [`Self::new_page`]; `size` must be the
    /// allocation-time value.
    pub fn free_page(&self, ptr: VirtAddr, size: u32, mmu: &mut impl Mmu) {
        self.paging.lock().free_page(ptr, size, mmu);
    }

    /// Whether `addr` falls inside a mapped page. Takes the lock briefly.
    #[must_use]
    pub fn is_present(&self, addr: VirtAddr) -> bool {
        self.paging.lock().is_present(addr)
    }

    /// Physical address of the active page directory.
    #[must_use]
    pub fn directory_physical_address(&self) -> PhysAddr {
        self.paging.lock().directory_physical_address()
    }

    /// Feed one boot argument through; `--verbose-mappings` enables the
    /// per-page diagnostic output.
    pub fn observe_boot_arg(&self, arg: &str) {
        self.paging.lock().observe_boot_arg(arg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_addresses::{KERNEL_BASE, PAGE_SIZE, TABLE_ENTRIES};
    use kernel_bootinfo::{Region, RegionKind, VERBOSE_MAPPING_ARG};

    use crate::mmu::RecordingMmu;

    /// Fake physical base for the placed store; tests never dereference
    /// physical addresses.
    const STORE_PHYS: PhysAddr = PhysAddr::new(0x50_0000);

    /// Place a store into a leaked, page-aligned heap block.
    fn placed_store() -> &'static mut PageTableStore {
        let layout = std::alloc::Layout::from_size_align(PageTableStore::SIZE, 4096).unwrap();
        // SAFETY: non-zero size and valid alignment; the block is leaked so
        // the 'static store reference stays valid.
        let region = unsafe { std::alloc::alloc_zeroed(layout) };
        unsafe { PageTableStore::place_at(region, PageTableStore::SIZE) }.unwrap()
    }

    /// A paging instance over 16 MiB of available RAM starting at 1 MiB.
    fn paging_with_ram() -> Paging<'static> {
        let mut paging = Paging::new(placed_store(), STORE_PHYS);
        let regions = [
            Region::new(PhysAddr::new(0), 0x10_0000, RegionKind::Reserved),
            Region::new(PhysAddr::new(0x10_0000), 0x100_0000, RegionKind::Available),
        ];
        paging.classify(&MemoryMap::new(&regions));
        paging.init_directory();
        paging
    }

    #[test]
    fn recursive_slot_points_at_the_directory() {
        let store = placed_store();
        let mut paging = Paging::new(store, STORE_PHYS);
        paging.init_directory();

        let recursive = VirtAddr::new(0xFFC0_0000).directory_index();
        assert_eq!(recursive.as_usize(), RECURSIVE_SLOT);
        // The directory entry for the top 4 MiB targets the directory's
        // own frame, and that whole virtual range is reserved.
        let entry = paging.store().recursive_entry();
        assert!(entry.is_present());
        assert_eq!(entry.address(), paging.directory_physical_address());
        assert!(paging.is_present(VirtAddr::new(0xFFC0_0000)));
        assert!(paging.is_present(VirtAddr::new(u32::MAX)));
        assert!(!paging.is_present(VirtAddr::new(0xFFB0_0000)));
    }

    #[test]
    fn recursive_range_is_never_allocated() {
        let mut paging = paging_with_ram();
        let mut mmu = RecordingMmu::default();
        // Exhaust virtual space except the recursive window by reserving
        // everything below it, then ask for a page.
        for page in 0..RECURSIVE_SLOT * TABLE_ENTRIES {
            if !paging.is_present(VirtAddr::from_page_index(page)) {
                paging.map_page(
                    VirtAddr::from_page_index(page),
                    PhysAddr::from_frame_index(page),
                );
            }
        }
        assert_eq!(paging.new_page(0, &mut mmu), None);
    }

    #[test]
    fn classification_handles_regions_saturating_at_the_top() {
        let store = placed_store();
        let mut paging = Paging::new(store, STORE_PHYS);
        // The available region runs to the very top of the 4 GiB space,
        // where its exclusive end saturates; the final frame stays used.
        let regions = [
            Region::new(PhysAddr::new(0xFFF0_0000), 0x8_0000, RegionKind::Reserved),
            Region::new(PhysAddr::new(0xFFF8_0000), 0x8_0000, RegionKind::Available),
        ];
        paging.classify(&MemoryMap::new(&regions));
        paging.init_directory();

        let mut mmu = RecordingMmu::default();
        // Seven of the eight top frames are free; the very last frame has
        // no full page below the saturated end and stays used.
        for _ in 0..7 {
            let base = paging.new_page(0, &mut mmu).unwrap();
            assert!(paging.is_present(base));
        }
        assert_eq!(paging.new_page(0, &mut mmu), None);
    }

    #[test]
    fn map_then_query() {
        let mut paging = paging_with_ram();
        let vaddr = VirtAddr::new(0x4000_0000);
        paging.map_page(vaddr, PhysAddr::new(0x20_0000));

        assert!(paging.is_present(vaddr));
        assert!(paging.is_present(VirtAddr::new(0x4000_0123)));
        assert!(!paging.is_present(VirtAddr::new(0x4000_1000)));
    }

    #[test]
    fn remapping_to_the_same_frame_is_a_noop() {
        let mut paging = paging_with_ram();
        let vaddr = VirtAddr::new(0x4000_0000);
        paging.map_page(vaddr, PhysAddr::new(0x20_0000));
        paging.map_page(vaddr, PhysAddr::new(0x20_0000));
        assert!(paging.is_present(vaddr));
    }

    #[test]
    #[should_panic(expected = "refusing remap")]
    fn conflicting_remap_is_fatal() {
        let mut paging = paging_with_ram();
        let vaddr = VirtAddr::new(0x4000_0000);
        paging.map_page(vaddr, PhysAddr::new(0x20_0000));
        paging.map_page(vaddr, PhysAddr::new(0x30_0000));
    }

    #[test]
    #[should_panic(expected = "not page aligned")]
    fn mapping_an_unaligned_address_is_fatal() {
        let mut paging = paging_with_ram();
        paging.map_page(VirtAddr::new(0x4000_0123), PhysAddr::new(0x20_0000));
    }

    #[test]
    fn new_page_rounds_up_by_one_extra_page() {
        let mut paging = paging_with_ram();
        let mut mmu = RecordingMmu::default();

        // An exact multiple of the page size still takes one extra page.
        let base = paging.new_page(3 * PAGE_SIZE, &mut mmu).unwrap();
        assert!(base.is_page_aligned());
        for offset in 0..4u32 {
            assert!(paging.is_present(base + offset * PAGE_SIZE));
        }
        assert!(!paging.is_present(base + 4 * PAGE_SIZE));
    }

    #[test]
    fn zero_sized_allocation_still_maps_one_page() {
        let mut paging = paging_with_ram();
        let mut mmu = RecordingMmu::default();
        let base = paging.new_page(0, &mut mmu).unwrap();
        assert!(paging.is_present(base));
        assert!(!paging.is_present(base + PAGE_SIZE));
    }

    #[test]
    fn free_page_unmaps_the_whole_run() {
        let mut paging = paging_with_ram();
        let mut mmu = RecordingMmu::default();

        let size = 2 * PAGE_SIZE + 100;
        let base = paging.new_page(size, &mut mmu).unwrap();
        paging.free_page(base, size, &mut mmu);

        for offset in 0..3u32 {
            assert!(!paging.is_present(base + offset * PAGE_SIZE));
        }
        // The frames went back to the pool: allocating again reuses them.
        let again = paging.new_page(size, &mut mmu).unwrap();
        assert_eq!(again, base);
    }

    #[test]
    fn frame_exhaustion_returns_none_without_rollback() {
        let store = placed_store();
        let mut paging = Paging::new(store, STORE_PHYS);
        // Exactly two free frames in the whole machine.
        let regions = [Region::new(
            PhysAddr::new(0x10_0000),
            2 * PAGE_SIZE,
            RegionKind::Available,
        )];
        paging.classify(&MemoryMap::new(&regions));
        paging.init_directory();

        let mut mmu = RecordingMmu::default();
        // Three pages wanted, two frames present.
        assert_eq!(paging.new_page(2 * PAGE_SIZE, &mut mmu), None);
        // The two pages mapped before exhaustion stay mapped.
        assert!(paging.is_present(VirtAddr::from_page_index(0)));
        assert!(paging.is_present(VirtAddr::from_page_index(1)));
        assert!(!paging.is_present(VirtAddr::from_page_index(2)));
    }

    #[test]
    fn runs_longer_than_a_bitmap_word_are_unsatisfiable() {
        let mut paging = paging_with_ram();
        let mut mmu = RecordingMmu::default();
        // 33 pages asked for; the run search never crosses a word.
        assert_eq!(paging.new_page(32 * PAGE_SIZE, &mut mmu), None);
    }

    #[test]
    fn unmap_invalidates_the_tlb_entry() {
        let mut paging = paging_with_ram();
        let mut mmu = RecordingMmu::default();
        let vaddr = VirtAddr::new(0x4000_0000);
        paging.map_page(vaddr, PhysAddr::new(0x20_0000));
        paging.unmap_page(vaddr, &mut mmu);

        assert!(!paging.is_present(vaddr));
        assert!(mmu.invalidated.contains(&vaddr));
    }

    #[test]
    fn manager_init_brings_up_the_address_space() {
        let manager = MemoryManager::new(Paging::new(placed_store(), STORE_PHYS));
        let regions = [
            Region::new(PhysAddr::new(0), 0x10_0000, RegionKind::Reserved),
            Region::new(PhysAddr::new(0x10_0000), 0x100_0000, RegionKind::Available),
        ];
        let kernel_image = VirtRegion::from_u32(KERNEL_BASE + 0x10_0000, KERNEL_BASE + 0x18_0000);
        let mut mmu = RecordingMmu::default();

        manager.init(&MemoryMap::new(&regions), kernel_image, &mut mmu);

        assert!(mmu.handler_installed);
        assert_eq!(mmu.loaded_directory, Some(STORE_PHYS));
        assert!(mmu.paging_enabled);
        // First MiB identity mapped, kernel image mapped higher-half.
        assert!(manager.is_present(VirtAddr::new(0x9_F000)));
        assert!(!manager.is_present(VirtAddr::new(0x10_0000)));
        assert!(manager.is_present(VirtAddr::new(KERNEL_BASE + 0x10_0000)));
        assert!(manager.is_present(VirtAddr::new(KERNEL_BASE + 0x17_F000)));
        assert!(!manager.is_present(VirtAddr::new(KERNEL_BASE + 0x18_0000)));
    }

    #[test]
    fn boot_arg_toggles_verbose_mappings() {
        let mut paging = paging_with_ram();
        assert!(!paging.verbose_mappings());
        paging.observe_boot_arg("--quiet");
        assert!(!paging.verbose_mappings());
        paging.observe_boot_arg(VERBOSE_MAPPING_ARG);
        assert!(paging.verbose_mappings());
    }
}
