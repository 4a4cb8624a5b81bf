//! Hardware seam for the paging core.
//!
//! Everything that touches control registers or the TLB goes through the
//! [`Mmu`] trait, so the rest of the crate is ordinary portable code. The
//! real implementation is inline assembly gated to `x86`; host tests plug
//! in a recording stub instead.

use kernel_addresses::{PhysAddr, VirtAddr};

use crate::fault::FaultFrame;

/// The privileged operations paging needs from the CPU.
pub trait Mmu {
    /// Point the translation hardware at a page directory (load CR3).
    /// Loading also flushes all non-global TLB entries.
    fn load_directory(&mut self, directory: PhysAddr);

    /// Turn translation on (set CR0.PG). The directory register must
    /// already hold a valid directory.
    fn enable_paging(&mut self);

    /// Drop the TLB entry covering one page (`invlpg`).
    fn invalidate_page(&mut self, page: VirtAddr);

    /// Route page faults to `handler`.
    fn install_page_fault_handler(&mut self, handler: fn(&FaultFrame) -> !);
}

#[cfg(target_arch = "x86")]
mod x86 {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::{FaultFrame, Mmu, PhysAddr, VirtAddr};

    /// Registered page-fault handler, as a raw fn address. Zero means
    /// nothing is installed yet.
    static PAGE_FAULT_HANDLER: AtomicUsize = AtomicUsize::new(0);

    /// Entry point the interrupt stub jumps to with the captured frame.
    ///
    /// # Panics
    /// Panics when no handler has been installed.
    pub extern "C" fn dispatch_page_fault(frame: &FaultFrame) -> ! {
        let bits = PAGE_FAULT_HANDLER.load(Ordering::Acquire);
        assert!(bits != 0, "page fault before a handler was installed");
        // SAFETY: the only writer stores a valid `fn(&FaultFrame) -> !`.
        let handler = unsafe { core::mem::transmute::<usize, fn(&FaultFrame) -> !>(bits) };
        handler(frame);
    }

    /// The real MMU, driven through privileged inline assembly.
    ///
    /// All methods require ring 0; constructing the value is harmless.
    pub struct X86Mmu;

    impl Mmu for X86Mmu {
        fn load_directory(&mut self, directory: PhysAddr) {
            debug_assert!(directory.is_page_aligned());
            // SAFETY: ring-0 only; the caller hands us a valid directory.
            unsafe {
                core::arch::asm!(
                    "mov cr3, {}",
                    in(reg) directory.as_u32(),
                    options(nostack, preserves_flags)
                );
            }
        }

        fn enable_paging(&mut self) {
            // SAFETY: ring-0 only; CR3 must already be loaded.
            unsafe {
                core::arch::asm!(
                    "mov {tmp}, cr0",
                    "or {tmp}, 0x80000000",
                    "mov cr0, {tmp}",
                    tmp = out(reg) _,
                    options(nostack, preserves_flags)
                );
            }
        }

        fn invalidate_page(&mut self, page: VirtAddr) {
            // SAFETY: invlpg has no side effects beyond the TLB.
            unsafe {
                core::arch::asm!(
                    "invlpg [{}]",
                    in(reg) page.as_u32(),
                    options(nostack, preserves_flags)
                );
            }
        }

        fn install_page_fault_handler(&mut self, handler: fn(&FaultFrame) -> !) {
            PAGE_FAULT_HANDLER.store(handler as usize, Ordering::Release);
        }
    }
}

#[cfg(target_arch = "x86")]
pub use x86::{X86Mmu, dispatch_page_fault};

/// Recording stub for host tests: counts calls and remembers the pages
/// invalidated, in order.
#[cfg(any(test, doctest))]
#[derive(Default)]
pub struct RecordingMmu {
    pub loaded_directory: Option<PhysAddr>,
    pub paging_enabled: bool,
    pub invalidated: std::vec::Vec<VirtAddr>,
    pub handler_installed: bool,
}

#[cfg(any(test, doctest))]
impl Mmu for RecordingMmu {
    fn load_directory(&mut self, directory: PhysAddr) {
        self.loaded_directory = Some(directory);
    }

    fn enable_paging(&mut self) {
        assert!(
            self.loaded_directory.is_some(),
            "paging enabled before a directory was loaded"
        );
        self.paging_enabled = true;
    }

    fn invalidate_page(&mut self, page: VirtAddr) {
        self.invalidated.push(page);
    }

    fn install_page_fault_handler(&mut self, _handler: fn(&FaultFrame) -> !) {
        self.handler_installed = true;
    }
}
