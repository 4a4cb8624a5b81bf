//! # Bucketed Kernel Heap
//!
//! A fine-grained allocator layered on top of the page-granular
//! [`kernel_paging::MemoryManager`]: one virtual allocation becomes the
//! arena, and [`BucketHeap`] carves it into chunks tracked by an intrusive
//! all list plus 32 per-size-class free buckets.
//!
//! [`BucketHeap`] itself does no locking and runs anywhere, including host
//! tests over a plain byte buffer. [`KernelHeap`] is the kernel-facing
//! wrapper: a spin-locked heap plus the one-shot boot glue that obtains the
//! arena from the memory manager.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod bucket;

pub use bucket::{BucketHeap, HEADER_SIZE, HeapCheckError, HeapClaimError, NUM_BUCKETS};

use core::ptr::NonNull;

use kernel_addresses::PAGE_SIZE;
use kernel_paging::{MemoryManager, Mmu};
use kernel_sync::SpinLock;
use log::info;

/// Why the kernel heap could not be brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapInitError {
    /// The heap was already initialized.
    #[error("kernel heap is already initialized")]
    AlreadyInitialized,

    /// The memory manager could not provide the arena.
    #[error("no virtual pages available for the heap arena")]
    OutOfPages,

    /// The arena was handed over but could not be claimed.
    #[error(transparent)]
    Claim(#[from] HeapClaimError),
}

/// Point-in-time byte counters of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub free_bytes: usize,
    pub used_bytes: usize,
    pub meta_bytes: usize,
}

/// The spin-locked, kernel-wide heap.
pub struct KernelHeap {
    heap: SpinLock<BucketHeap>,
}

impl KernelHeap {
    /// An uninitialized heap, suitable for a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heap: SpinLock::new(BucketHeap::new()),
        }
    }

    /// One-shot boot glue: allocate `size` bytes worth of fresh pages from
    /// the memory manager and claim them as the arena.
    ///
    /// # Errors
    /// [`HeapInitError`] on double initialization, page exhaustion, or a
    /// failed claim.
    ///
    /// # Safety
    /// Paging must be live so the returned virtual addresses are backed;
    /// kernel context only.
    pub unsafe fn init(
        &self,
        memory: &MemoryManager<'_>,
        size: u32,
        mmu: &mut impl Mmu,
    ) -> Result<(), HeapInitError> {
        let base = memory.new_page(size, mmu).ok_or(HeapInitError::OutOfPages)?;
        // new_page maps one page more than size / PAGE_SIZE.
        let arena_len = (size / PAGE_SIZE + 1) * PAGE_SIZE;
        // SAFETY: the pages were just mapped and belong to nobody else.
        unsafe { self.claim(base.as_u32() as usize as *mut u8, arena_len as usize)? };

        info!("kernel heap: {} KiB arena at {base}", arena_len / 1024);
        Ok(())
    }

    /// Claim a caller-provided arena. [`Self::init`] uses this; tests hand
    /// in an ordinary buffer directly.
    ///
    /// # Errors
    /// [`HeapInitError`] on double initialization or a failed claim.
    ///
    /// # Safety
    /// Same contract as [`BucketHeap::claim`].
    pub unsafe fn claim(&self, base: *mut u8, len: usize) -> Result<(), HeapInitError> {
        let mut heap = self.heap.lock();
        if heap.is_claimed() {
            return Err(HeapInitError::AlreadyInitialized);
        }
        // SAFETY: forwarded contract; the claimed-flag check above keeps
        // this a one-shot.
        unsafe { heap.claim(base, len)? };
        Ok(())
    }

    /// Allocate `size` bytes; `None` when no bucket can serve the request.
    #[must_use]
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.heap.lock().allocate(size)
    }

    /// Return an allocation to the heap.
    ///
    /// # Safety
    /// `ptr` must come from [`Self::allocate`] and not have been freed
    /// already.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded contract.
        unsafe { self.heap.lock().free(ptr) };
    }

    /// Snapshot of the byte counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let heap = self.heap.lock();
        HeapStats {
            free_bytes: heap.free_bytes(),
            used_bytes: heap.used_bytes(),
            meta_bytes: heap.meta_bytes(),
        }
    }

    /// Run the diagnostic walker under the lock.
    ///
    /// # Errors
    /// The first inconsistency found, as a [`HeapCheckError`].
    pub fn check(&self) -> Result<(), HeapCheckError> {
        self.heap.lock().check()
    }
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(len: usize) -> *mut u8 {
        let layout = std::alloc::Layout::from_size_align(len, 16).unwrap();
        // SAFETY: non-zero size, valid alignment.
        unsafe { std::alloc::alloc_zeroed(layout) }
    }

    #[test]
    fn claim_is_one_shot() {
        let heap = KernelHeap::new();
        let len = 16 * 4096;
        unsafe {
            heap.claim(arena(len), len).unwrap();
            assert_eq!(
                heap.claim(arena(len), len),
                Err(HeapInitError::AlreadyInitialized)
            );
        }
    }

    #[test]
    fn locked_round_trip() {
        let heap = KernelHeap::new();
        let len = 16 * 4096;
        unsafe { heap.claim(arena(len), len) }.unwrap();
        let baseline = heap.stats();

        let ptr = heap.allocate(512).unwrap();
        assert_eq!(heap.stats().used_bytes, 512);
        unsafe { heap.free(ptr) };

        assert_eq!(heap.stats(), baseline);
        heap.check().unwrap();
    }

    #[test]
    fn claim_failure_passes_through() {
        let heap = KernelHeap::new();
        assert_eq!(
            unsafe { heap.claim(core::ptr::null_mut(), 4096) },
            Err(HeapInitError::Claim(HeapClaimError::NullArena))
        );
    }
}
