//! Raw 32-bit page entry bits.
//!
//! Both levels of the i386 two-level scheme share one entry layout, so the
//! same bitfield serves page-directory entries (PDEs) and page-table entries
//! (PTEs). Typed wrappers in [`crate::table`] keep the two from mixing.

use bitfield_struct::bitfield;
use kernel_addresses::PhysAddr;

/// A single 32-bit x86 page entry in its raw bitfield form.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning |
/// |-------|-----------------|---------|
/// | 0     | `P` (present)   | Valid entry if set |
/// | 1     | `RW`            | Writable if set |
/// | 2     | `US`            | User-mode accessible if set |
/// | 3     | `PWT`           | Write-through caching |
/// | 4     | `PCD`           | Disable caching |
/// | 5     | `A`             | Accessed |
/// | 6     | `D`             | Dirty (PTE only) |
/// | 7     | `PS` / `PAT`    | 4 MiB page (PDE) / attribute (PTE) |
/// | 8     | `G`             | Global (PTE only) |
/// | 9–11  | OS avail        | Ignored by the MMU |
/// | 12–31 | frame           | Physical frame bits [31:12] |
///
/// ### Notes
/// - The frame field always omits the lower 12 bits, which are implicitly
///   zero due to alignment.
/// - `PS` requires CR4.PSE and is never set here: all mappings are 4 KiB.
///
/// ### Example
/// ```rust
/// # use kernel_addresses::PhysAddr;
/// # use kernel_paging::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_frame_address(PhysAddr::new(0x12000));
/// assert!(e.present());
/// assert_eq!(e.into_bits(), 0x12003);
/// ```
#[bitfield(u32)]
pub struct PageEntryBits {
    /// Present (P, bit 0). Clear implies the rest of the entry is ignored
    /// by the MMU and a translation through it faults.
    pub present: bool,

    /// Writable (RW, bit 1). Set to allow writes; clear for read-only.
    pub writable: bool,

    /// User/Supervisor (US, bit 2). Set to allow user-mode access; clear
    /// restricts to supervisor only.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access through this
    /// entry; software may clear it to track usage.
    pub accessed: bool,

    /// Dirty (D, bit 6) — PTE only. Set by the CPU on first write.
    pub dirty: bool,

    /// Page Size (PS, bit 7) in a PDE, PAT in a PTE. Always clear in this
    /// kernel: only 4 KiB mappings are produced.
    pub page_size: bool,

    /// Global (G, bit 8) — PTE only, requires CR4.PGE.
    pub global: bool,

    /// Available to the OS (bits 9–11), ignored by the MMU.
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12–31 of the target address).
    #[bits(20)]
    frame: u32,
}

impl PageEntryBits {
    /// Physical address of the target frame (or next-level table).
    #[inline]
    #[must_use]
    pub const fn frame_address(self) -> PhysAddr {
        PhysAddr::from_frame_index(self.frame() as usize)
    }

    /// Points the entry at `addr`, which must be page aligned.
    #[inline]
    pub const fn set_frame_address(&mut self, addr: PhysAddr) {
        debug_assert!(addr.as_u32() % 4096 == 0, "frame address must be page aligned");
        self.set_frame(addr.as_u32() >> 12);
    }

    /// Builder-style variant of [`Self::set_frame_address`].
    #[inline]
    #[must_use]
    pub const fn with_frame_address(mut self, addr: PhysAddr) -> Self {
        self.set_frame_address(addr);
        self
    }
}
