//! The bucketed free-list heap.
//!
//! Every chunk in the arena carries a [`ChunkHeader`] directly in front of
//! its payload. Headers form one address-ordered doubly-linked **all** list
//! bounded by two permanently-used sentinels, so coalescing can look at
//! both neighbors without ever running off the arena. Free chunks are
//! additionally threaded into one of 32 size-class buckets (class =
//! `floor(log2(capacity))`), each a null-terminated LIFO list.
//!
//! A chunk's capacity is never stored: it is the distance to its all-list
//! successor minus the header size. Splitting and merging therefore only
//! ever rewrite links, and the derived capacities cannot drift out of sync
//! with the layout.
//!
//! ```text
//! +------+---------+----------------+---------+---------+------+
//! | head | header  |    payload     | header  | payload | tail |
//! +------+---------+----------------+---------+---------+------+
//! ^ used           ^ hdr + HEADER_SIZE                   ^ used
//! ```

use core::ptr::{self, NonNull, null_mut};

/// Number of size-class buckets; covers every possible 32-bit capacity.
pub const NUM_BUCKETS: usize = 32;

/// Payload alignment. Headers are padded to this too, so every header and
/// every payload in the arena stays aligned.
const ALIGN: usize = 16;

/// Smallest payload a chunk is ever split down to.
const MIN_PAYLOAD: usize = ALIGN;

/// Bytes of metadata in front of every payload.
pub const HEADER_SIZE: usize = size_of::<ChunkHeader>();

const fn align_up(x: usize, a: usize) -> usize {
    (x + a - 1) & !(a - 1)
}

const fn align_down(x: usize, a: usize) -> usize {
    x & !(a - 1)
}

/// Header in front of every chunk, sentinels included.
///
/// `prev_all`/`next_all` are the address-ordered all list; null only at the
/// outer ends of the sentinels. `prev_free`/`next_free` are the bucket
/// membership and only meaningful while `used` is false.
#[repr(C, align(16))]
struct ChunkHeader {
    prev_all: *mut ChunkHeader,
    next_all: *mut ChunkHeader,
    prev_free: *mut ChunkHeader,
    next_free: *mut ChunkHeader,
    used: bool,
}

/// Payload bytes of `chunk`, derived from the all-list successor.
///
/// # Safety
/// `chunk` must be a live non-tail header in a claimed arena.
unsafe fn capacity(chunk: *mut ChunkHeader) -> usize {
    unsafe { (*chunk).next_all as usize - chunk as usize - HEADER_SIZE }
}

/// First payload byte of `chunk`.
unsafe fn payload(chunk: *mut ChunkHeader) -> *mut u8 {
    unsafe { chunk.cast::<u8>().add(HEADER_SIZE) }
}

/// Recover the header in front of a payload pointer.
unsafe fn header_of(ptr: NonNull<u8>) -> *mut ChunkHeader {
    unsafe { ptr.as_ptr().sub(HEADER_SIZE).cast::<ChunkHeader>() }
}

/// Why an arena cannot be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapClaimError {
    /// The arena pointer was null.
    #[error("heap arena is null")]
    NullArena,

    /// The arena cannot hold the sentinels plus one minimal chunk.
    #[error("heap arena holds {got} usable bytes, at least {need} are needed")]
    TooSmall {
        /// Bytes required after alignment.
        need: usize,
        /// Bytes available after alignment.
        got: usize,
    },
}

/// Findings of the diagnostic walker, [`BucketHeap::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapCheckError {
    /// An all-list node's back link does not point at its predecessor.
    #[error("all-list back link broken at chunk {at:#x}")]
    BrokenAllLink { at: usize },

    /// The all list does not terminate at the tail sentinel.
    #[error("all list terminates at {at:#x}, not at the tail sentinel")]
    WrongTailSentinel { at: usize },

    /// A bucket node's back link does not point at its predecessor.
    #[error("bucket {bucket} back link broken")]
    BrokenBucketLink { bucket: usize },

    /// A chunk marked used is threaded into a free bucket.
    #[error("bucket {bucket} contains a used chunk")]
    UsedChunkInBucket { bucket: usize },
}

/// A bucketed free-list heap over one caller-provided arena.
///
/// No internal locking: wrap the heap in a `SpinLock` (as
/// [`KernelHeap`](crate::KernelHeap) does) for anything multi-threaded.
pub struct BucketHeap {
    /// Head sentinel; null until [`Self::claim`].
    first: *mut ChunkHeader,
    /// Tail sentinel.
    last: *mut ChunkHeader,
    /// LIFO free lists, one per size class.
    buckets: [*mut ChunkHeader; NUM_BUCKETS],
    free_bytes: usize,
    used_bytes: usize,
    meta_bytes: usize,
}

// Safety: raw pointers are only touched through &mut self; cross-thread use
// goes through a lock.
unsafe impl Send for BucketHeap {}

impl BucketHeap {
    /// An unclaimed heap; every allocation fails until [`Self::claim`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            first: null_mut(),
            last: null_mut(),
            buckets: [null_mut(); NUM_BUCKETS],
            free_bytes: 0,
            used_bytes: 0,
            meta_bytes: 0,
        }
    }

    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        !self.first.is_null()
    }

    /// The size class of a chunk of `size` bytes: `floor(log2(size))`.
    ///
    /// Monotonic in `size`; class 0 covers 0 and 1.
    #[must_use]
    pub const fn size_class(size: usize) -> usize {
        let mut size = size;
        let mut class = 0;
        while size > 1 {
            size >>= 1;
            class += 1;
        }
        class
    }

    /// Sum of the capacities of all free chunks.
    #[must_use]
    pub const fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Sum of the capacities of all used chunks (at least what was asked
    /// for; more when a chunk was too small to split).
    #[must_use]
    pub const fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Bytes eaten by chunk headers, sentinels included.
    #[must_use]
    pub const fn meta_bytes(&self) -> usize {
        self.meta_bytes
    }

    /// Number of free chunks across all buckets. Diagnostic only.
    #[must_use]
    pub fn free_chunk_count(&self) -> usize {
        let mut count = 0;
        for &head in &self.buckets {
            let mut cursor = head;
            while !cursor.is_null() {
                count += 1;
                // Safety: bucket members are live headers in the arena.
                cursor = unsafe { (*cursor).next_free };
            }
        }
        count
    }

    /// Take ownership of the arena `base..base + len`.
    ///
    /// The edges are aligned inward, the two sentinels are carved off, and
    /// the remainder becomes one large free chunk.
    ///
    /// # Errors
    /// [`HeapClaimError`] when the pointer is null or the aligned arena is
    /// too small for the sentinels plus one minimal chunk.
    ///
    /// # Safety
    /// The range must be valid, writable, exclusive to this heap, and live
    /// for as long as the heap is used. Must be called at most once.
    pub unsafe fn claim(&mut self, base: *mut u8, len: usize) -> Result<(), HeapClaimError> {
        if base.is_null() {
            return Err(HeapClaimError::NullArena);
        }
        let start = align_up(base as usize, ALIGN);
        let end = align_down(base as usize + len, ALIGN);
        let need = 3 * HEADER_SIZE + MIN_PAYLOAD;
        let got = end.saturating_sub(start);
        if got < need {
            return Err(HeapClaimError::TooSmall { need, got });
        }

        let head = start as *mut ChunkHeader;
        let chunk = (start + HEADER_SIZE) as *mut ChunkHeader;
        let tail = (end - HEADER_SIZE) as *mut ChunkHeader;

        // Safety: the three headers lie inside the validated range and do
        // not overlap (got >= 3 headers + one payload).
        unsafe {
            ptr::write(
                head,
                ChunkHeader {
                    prev_all: null_mut(),
                    next_all: chunk,
                    prev_free: null_mut(),
                    next_free: null_mut(),
                    used: true,
                },
            );
            ptr::write(
                chunk,
                ChunkHeader {
                    prev_all: head,
                    next_all: tail,
                    prev_free: null_mut(),
                    next_free: null_mut(),
                    used: false,
                },
            );
            ptr::write(
                tail,
                ChunkHeader {
                    prev_all: chunk,
                    next_all: null_mut(),
                    prev_free: null_mut(),
                    next_free: null_mut(),
                    used: true,
                },
            );
        }

        self.first = head;
        self.last = tail;
        self.used_bytes = 0;
        self.meta_bytes = 3 * HEADER_SIZE;
        // Safety: chunk is live; its capacity derives from the tail link.
        unsafe {
            let cap = capacity(chunk);
            self.bucket_push(Self::size_class(cap), chunk);
            self.free_bytes = cap;
        }
        Ok(())
    }

    /// Allocate `size` bytes; the payload is 16-byte aligned.
    ///
    /// The request is rounded up to alignment (and to the minimum payload),
    /// then served from the first non-empty bucket whose chunks are all
    /// large enough, popping the most recently freed chunk. The chunk is
    /// split when the remainder can at least hold another header.
    ///
    /// Returns `None` when no bucket can serve the request.
    #[must_use]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let size = align_up(size.max(MIN_PAYLOAD), ALIGN);

        // Smallest class where every chunk is at least `size` big.
        let mut class = Self::size_class(size - 1) + 1;
        while class < NUM_BUCKETS && self.buckets[class].is_null() {
            class += 1;
        }
        if class >= NUM_BUCKETS {
            return None;
        }

        let chunk = self.buckets[class];
        // Safety: bucket members are live free headers; all link writes
        // stay inside the claimed arena.
        unsafe {
            self.bucket_remove(class, chunk);
            self.free_bytes -= capacity(chunk);

            if size + HEADER_SIZE <= capacity(chunk) {
                let rest = payload(chunk).add(size).cast::<ChunkHeader>();
                ptr::write(
                    rest,
                    ChunkHeader {
                        prev_all: chunk,
                        next_all: (*chunk).next_all,
                        prev_free: null_mut(),
                        next_free: null_mut(),
                        used: false,
                    },
                );
                (*(*chunk).next_all).prev_all = rest;
                (*chunk).next_all = rest;
                self.meta_bytes += HEADER_SIZE;

                let rest_cap = capacity(rest);
                self.bucket_push(Self::size_class(rest_cap), rest);
                self.free_bytes += rest_cap;
            }

            (*chunk).used = true;
            self.used_bytes += capacity(chunk);
            NonNull::new(payload(chunk))
        }
    }

    /// Return a chunk to the heap, merging it with free neighbors.
    ///
    /// A free successor is folded in first (its header is reclaimed as
    /// payload); then, if the predecessor is free, the chunk dissolves into
    /// it. Either way the surviving chunk is re-bucketed under its new
    /// capacity.
    ///
    /// # Safety
    /// `ptr` must come from [`Self::allocate`] on this heap and must not
    /// have been freed already.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        // Safety: per contract, a header precedes the payload; neighbors
        // are live headers because sentinels bound the all list.
        unsafe {
            let mut chunk = header_of(ptr);
            debug_assert!((*chunk).used, "double free or foreign pointer");
            self.used_bytes -= capacity(chunk);

            let next = (*chunk).next_all;
            if !(*next).used {
                self.free_bytes -= capacity(next);
                self.bucket_remove(Self::size_class(capacity(next)), next);
                (*chunk).next_all = (*next).next_all;
                (*(*next).next_all).prev_all = chunk;
                self.meta_bytes -= HEADER_SIZE;
            }

            let prev = (*chunk).prev_all;
            if !(*prev).used {
                self.free_bytes -= capacity(prev);
                self.bucket_remove(Self::size_class(capacity(prev)), prev);
                (*prev).next_all = (*chunk).next_all;
                (*(*chunk).next_all).prev_all = prev;
                self.meta_bytes -= HEADER_SIZE;
                chunk = prev;
            }

            (*chunk).used = false;
            let cap = capacity(chunk);
            self.bucket_push(Self::size_class(cap), chunk);
            self.free_bytes += cap;
        }
    }

    /// Walk every structure and verify link consistency.
    ///
    /// Checks that each all-list node's back link points at the node just
    /// visited and that the list terminates at the tail sentinel, then the
    /// same for every bucket plus that no bucket member is marked used.
    /// Diagnostic use only; never called on the allocation path.
    ///
    /// # Errors
    /// The first inconsistency found, as a [`HeapCheckError`].
    pub fn check(&self) -> Result<(), HeapCheckError> {
        if !self.is_claimed() {
            return Ok(());
        }
        // Safety: all reachable headers are live while the arena is.
        unsafe {
            let mut prev = self.first;
            let mut cursor = (*self.first).next_all;
            while !cursor.is_null() {
                if (*cursor).prev_all != prev {
                    return Err(HeapCheckError::BrokenAllLink { at: cursor as usize });
                }
                prev = cursor;
                cursor = (*cursor).next_all;
            }
            if prev != self.last {
                return Err(HeapCheckError::WrongTailSentinel { at: prev as usize });
            }

            for (bucket, &head) in self.buckets.iter().enumerate() {
                let mut prev: *mut ChunkHeader = null_mut();
                let mut cursor = head;
                while !cursor.is_null() {
                    if (*cursor).prev_free != prev {
                        return Err(HeapCheckError::BrokenBucketLink { bucket });
                    }
                    if (*cursor).used {
                        return Err(HeapCheckError::UsedChunkInBucket { bucket });
                    }
                    prev = cursor;
                    cursor = (*cursor).next_free;
                }
            }
        }
        Ok(())
    }

    /// Push `chunk` onto the front of bucket `class`.
    unsafe fn bucket_push(&mut self, class: usize, chunk: *mut ChunkHeader) {
        let head = self.buckets[class];
        // Safety: caller guarantees chunk (and head, when non-null) are
        // live headers.
        unsafe {
            (*chunk).prev_free = null_mut();
            (*chunk).next_free = head;
            if !head.is_null() {
                (*head).prev_free = chunk;
            }
        }
        self.buckets[class] = chunk;
    }

    /// Unlink `chunk` from bucket `class`.
    unsafe fn bucket_remove(&mut self, class: usize, chunk: *mut ChunkHeader) {
        // Safety: caller guarantees chunk is a member of bucket `class`.
        unsafe {
            let prev = (*chunk).prev_free;
            let next = (*chunk).next_free;
            if prev.is_null() {
                debug_assert!(self.buckets[class] == chunk);
                self.buckets[class] = next;
            } else {
                (*prev).next_free = next;
            }
            if !next.is_null() {
                (*next).prev_free = prev;
            }
            (*chunk).prev_free = null_mut();
            (*chunk).next_free = null_mut();
        }
    }
}

impl Default for BucketHeap {
    fn default() -> Self {
        Self::new()
    }
}
