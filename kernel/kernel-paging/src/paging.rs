//! The paging core: classification, directory setup, mapping, and the
//! page-granular virtual allocator.
//!
//! All state lives in [`Paging`]; nothing here is a process-wide static.
//! The structure operates purely on its [`PageTableStore`] and bitmaps, so
//! the whole thing runs unmodified in host tests against a store placed in
//! an ordinary heap buffer with a made-up physical base.

use kernel_addresses::{
    DirectoryIndex, EARLY_IDENTITY_END, PAGE_SIZE, PhysAddr, TABLE_ENTRIES, TOTAL_PAGES, VirtAddr,
    VirtRegion, kernel_virt_to_phys,
};
use kernel_bootinfo::{MemoryMap, RegionKind, VERBOSE_MAPPING_ARG};
use log::{debug, info};

use crate::bitmap::FrameBitmap;
use crate::mmu::Mmu;
use crate::store::{PageTableStore, RECURSIVE_SLOT};
use crate::table::{DirectoryEntry, TableEntry};

/// The full paging state for one address space.
///
/// Owns the mutable view of the table store, both frame bitmaps, and the
/// knobs that used to be globals. Construction records where the store
/// sits physically; the directory and every table address derive from that
/// base, so mapping never allocates.
pub struct Paging<'s> {
    store: &'s mut PageTableStore,
    store_phys: PhysAddr,
    /// Physical frames: 1 = used. Starts fully used; classification frees
    /// what the memory map declares available.
    physical: FrameBitmap,
    /// Virtual pages: 1 = mapped. Starts clear; the recursive range is
    /// reserved by [`Self::init_directory`].
    mapped: FrameBitmap,
    directory_phys: PhysAddr,
    verbose_mappings: bool,
}

impl<'s> Paging<'s> {
    /// Wrap a placed store whose physical base address is `store_phys`.
    #[must_use]
    pub fn new(store: &'s mut PageTableStore, store_phys: PhysAddr) -> Self {
        let directory_phys = PageTableStore::directory_phys(store_phys);
        Self {
            store,
            store_phys,
            physical: FrameBitmap::filled(),
            mapped: FrameBitmap::new(),
            directory_phys,
            verbose_mappings: false,
        }
    }

    /// Walk the boot memory map once and build the physical bitmap from it.
    ///
    /// Available regions free the frames they fully contain; every other
    /// region kind re-reserves all frames it touches, so a reserved region
    /// overlapping an available one wins regardless of table order. Partial
    /// pages at the edges of an available region stay used, which also
    /// keeps the very last frame used when a region saturates at the top
    /// of the 4 GiB space.
    pub fn classify(&mut self, map: &MemoryMap<'_>) {
        let mut available: u64 = 0;
        let mut reserved: u64 = 0;

        for region in map.regions() {
            if region.kind() == RegionKind::Available {
                available += u64::from(region.size());
                let first = region.base().as_u32().div_ceil(PAGE_SIZE);
                let last = region.end() / PAGE_SIZE;
                for frame in first..last {
                    self.physical.clear(frame as usize);
                }
            } else {
                reserved += u64::from(region.size());
            }
        }
        for region in map.regions() {
            if region.kind() != RegionKind::Available {
                let first = region.base().as_u32() / PAGE_SIZE;
                let last = region.end().div_ceil(PAGE_SIZE);
                for frame in first..last {
                    self.physical.set(frame as usize);
                }
            }
        }

        info!(
            "memory map: {} MiB available, {} MiB reserved, {} MiB total",
            available / (1024 * 1024),
            reserved / (1024 * 1024),
            (available + reserved) / (1024 * 1024)
        );
    }

    /// Wire up the directory: entries `0..1023` point at the store's static
    /// tables, entry 1023 points back at the directory itself, and the top
    /// 4 MiB of virtual space is reserved so nothing can ever be mapped
    /// over the recursive window.
    pub fn init_directory(&mut self) {
        for pde in 0..RECURSIVE_SLOT {
            let index = DirectoryIndex::new(pde as u16);
            let table = PageTableStore::table_phys(self.store_phys, index);
            self.store.directory_mut()[index] = DirectoryEntry::kernel_rw(table);
        }

        let recursive = DirectoryIndex::new(RECURSIVE_SLOT as u16);
        self.store.directory_mut()[recursive] = DirectoryEntry::kernel_rw(self.directory_phys);
        for page in RECURSIVE_SLOT * TABLE_ENTRIES..TOTAL_PAGES {
            self.mapped.set(page);
        }

        debug!("page directory initialized at {}", self.directory_phys);
    }

    /// Map one 4 KiB virtual page to one physical frame, kernel read/write.
    ///
    /// Mapping a page to the frame it is already mapped to is a no-op.
    ///
    /// # Panics
    /// - when `vaddr` or `paddr` carries a nonzero page offset;
    /// - when `vaddr` is already mapped to a *different* frame. Remapping
    ///   is a kernel bug, never a recoverable condition.
    pub fn map_page(&mut self, vaddr: VirtAddr, paddr: PhysAddr) {
        assert!(
            vaddr.is_page_aligned(),
            "map_page: virtual address {vaddr} is not page aligned"
        );
        assert!(
            paddr.is_page_aligned(),
            "map_page: physical address {paddr} is not page aligned"
        );

        let pde = vaddr.directory_index();
        let pte = vaddr.table_index();
        let entry = self.store.table(pde)[pte];
        if entry.is_present() {
            assert!(
                entry.address() == paddr,
                "map_page: {vaddr} is already mapped to {}, refusing remap to {paddr}",
                entry.address()
            );
            return;
        }

        self.store.table_mut(pde)[pte] = TableEntry::kernel_rw(paddr);
        self.physical.set(paddr.frame_index());
        self.mapped.set(vaddr.page_index());

        if self.verbose_mappings {
            debug!(
                "map {vaddr} -> {paddr} (pde {}, pte {})",
                pde.as_usize(),
                pte.as_usize()
            );
        }
    }

    /// Identity-map every page the region touches (virtual = physical).
    pub fn map_range(&mut self, region: VirtRegion) {
        for page in region.pages() {
            self.map_page(page, PhysAddr::new(page.as_u32()));
        }
    }

    /// Map every page the region touches to the physical frame the kernel
    /// image occupies at that address, via the fixed higher-half offset.
    pub fn map_range_physical_offset(&mut self, region: VirtRegion) {
        for page in region.pages() {
            self.map_page(page, kernel_virt_to_phys(page));
        }
    }

    /// Tear down the mapping of one page and drop its one TLB entry.
    ///
    /// The backing frame is read out of the entry and returned to the free
    /// pool. Unmapping a page that is not mapped is a no-op.
    pub fn unmap_page(&mut self, vaddr: VirtAddr, mmu: &mut impl Mmu) {
        debug_assert!(vaddr.is_page_aligned());

        let pde = vaddr.directory_index();
        let pte = vaddr.table_index();
        let entry = self.store.table(pde)[pte];
        if !entry.is_present() {
            return;
        }

        self.mapped.clear(vaddr.page_index());
        self.physical.clear(entry.address().frame_index());
        self.store.table_mut(pde)[pte] = TableEntry::empty();
        mmu.invalidate_page(vaddr);
    }

    /// Read-only view of the table store, for inspection.
    #[must_use]
    pub fn store(&self) -> &PageTableStore {
        self.store
    }

    /// Whether `addr` falls inside a mapped page. Pure lookup in the
    /// virtual bitmap, no side effects.
    #[must_use]
    pub fn is_present(&self, addr: VirtAddr) -> bool {
        self.mapped.test(addr.page_index())
    }

    /// Physical address to load into the directory register.
    #[must_use]
    pub fn directory_physical_address(&self) -> PhysAddr {
        self.directory_phys
    }

    pub fn set_verbose_mappings(&mut self, verbose: bool) {
        self.verbose_mappings = verbose;
    }

    #[must_use]
    pub fn verbose_mappings(&self) -> bool {
        self.verbose_mappings
    }

    /// Exact-match a boot argument; [`VERBOSE_MAPPING_ARG`] turns the
    /// per-mapping diagnostic lines on.
    pub fn observe_boot_arg(&mut self, arg: &str) {
        if arg == VERBOSE_MAPPING_ARG {
            self.verbose_mappings = true;
        }
    }

    /// Allocate and map a run of fresh pages, returning the base address.
    ///
    /// The page count is `size / PAGE_SIZE + 1`: one extra page, even when
    /// `size` is an exact multiple of the page size. Callers get at least
    /// one page for `size == 0` and must free with the same `size`.
    ///
    /// Returns `None` when no suitable virtual run exists (runs never span
    /// a bitmap word, so requests above 32 pages always fail) or when
    /// physical frames run out mid-way. Pages mapped before a mid-way
    /// exhaustion are *not* rolled back.
    #[must_use]
    pub fn new_page(&mut self, size: u32, mmu: &mut impl Mmu) -> Option<VirtAddr> {
        let page_count = (size / PAGE_SIZE + 1) as usize;
        let start = self.mapped.find_first_zero_run(page_count)?;

        for offset in 0..page_count {
            let frame = self.physical.find_first_zero()?;
            let vaddr = VirtAddr::from_page_index(start + offset);
            self.map_page(vaddr, PhysAddr::from_frame_index(frame));
            mmu.invalidate_page(vaddr);
        }

        Some(VirtAddr::from_page_index(start))
    }

    /// Release a run allocated by [`Self::new_page`].
    ///
    /// `size` must be the value passed at allocation time; no size metadata
    /// is stored, so the page count is recomputed with the same formula.
    pub fn free_page(&mut self, ptr: VirtAddr, size: u32, mmu: &mut impl Mmu) {
        let page_count = (size / PAGE_SIZE + 1) as usize;
        let base = ptr.page_index();

        for offset in 0..page_count {
            self.unmap_page(VirtAddr::from_page_index(base + offset), mmu);
        }
    }

    /// Identity-map the early-boot window (the first MiB).
    pub fn map_early_identity(&mut self) {
        self.map_range(VirtRegion::from_u32(0, EARLY_IDENTITY_END));
    }
}
