//! # Kernel Memory Addresses
//!
//! Strongly-typed 32-bit physical and virtual addresses for a two-level
//! paging architecture, plus the layout constants shared by the paging and
//! heap crates.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! The CPU uses the two upper fields as **indices** into two levels of page
//! tables, each level containing 1024 (2¹⁰) entries of 4 bytes each:
//!
//! ```text
//!  Page Directory  →  Page Table  →  Physical Frame
//!   │                  │
//!   │                  └───► PTE (Page Table Entry) → maps one 4 KiB page
//!   └──────────────────────► PDE (Page Directory Entry)
//! ```
//!
//! The final **Offset** field (bits 11–0) selects the byte inside the 4 KiB
//! page. Any address handed to the mapper must carry a zero offset.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod region;
mod virtual_address;

pub use physical_address::PhysAddr;
pub use region::{PageIter, VirtRegion};
pub use virtual_address::{DirectoryIndex, TableIndex, VirtAddr};

/// Size of one page / page frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// Number of low address bits covered by the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

/// Number of entries in the page directory.
pub const DIRECTORY_ENTRIES: usize = 1024;

/// Number of entries in one page table.
pub const TABLE_ENTRIES: usize = 1024;

/// Number of 4 KiB pages in the full 4 GiB address space.
pub const TOTAL_PAGES: usize = 1 << 20;

/// Where the kernel executes (VMA). The image is loaded low in physical
/// memory and mapped at this higher-half base.
pub const KERNEL_BASE: u32 = 0xC000_0000;

/// End of the identity-mapped early-boot region (first MiB).
pub const EARLY_IDENTITY_END: u32 = 0x10_0000;

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(DIRECTORY_ENTRIES * TABLE_ENTRIES == TOTAL_PAGES);
    assert!(KERNEL_BASE % PAGE_SIZE == 0);
};

/// Translate an address inside the higher-half kernel image to the physical
/// address it was loaded at, by undoing the fixed [`KERNEL_BASE`] offset.
///
/// # Panics
/// Panics when `va` lies below [`KERNEL_BASE`]; handing a non-kernel address
/// to this translation is a kernel bug, not a recoverable condition.
#[inline]
#[must_use]
pub fn kernel_virt_to_phys(va: VirtAddr) -> PhysAddr {
    let Some(pa) = va.as_u32().checked_sub(KERNEL_BASE) else {
        panic!("address {va} is below the kernel base {KERNEL_BASE:#010x}");
    };
    PhysAddr::new(pa)
}

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use kernel_addresses::align_down;
/// assert_eq!(align_down(0, 4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(4096, 4096), 4096);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must not overflow `u32`.
///
/// ### Examples
/// ```rust
/// # use kernel_addresses::align_up;
/// assert_eq!(align_up(0, 4096), 0);
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    (x + a - 1) & !(a - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_half_translation() {
        let va = VirtAddr::new(KERNEL_BASE + 0x1000);
        assert_eq!(kernel_virt_to_phys(va), PhysAddr::new(0x1000));
        assert_eq!(
            kernel_virt_to_phys(VirtAddr::new(KERNEL_BASE)),
            PhysAddr::new(0)
        );
    }

    #[test]
    #[should_panic(expected = "below the kernel base")]
    fn translation_below_base_is_fatal() {
        let _ = kernel_virt_to_phys(VirtAddr::new(0x10_0000));
    }
}
