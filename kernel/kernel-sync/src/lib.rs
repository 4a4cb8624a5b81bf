//! # Kernel synchronization primitives
//!
//! A single coarse [`SpinLock`] is all the memory subsystem needs: the page
//! allocator holds it across entire multi-page operations, and callers that
//! share the heap across cores wrap it in the same way.
//!
//! The lock is blocking and has no timeout. Re-entrant acquisition from the
//! same context deadlocks; callers must not invoke a locked operation from
//! inside another one.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
