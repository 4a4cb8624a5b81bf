use crate::{PAGE_SHIFT, PAGE_SIZE};

/// A **physical** memory address (machine bus address).
///
/// Newtype over `u32` to prevent mixing with virtual addresses.
/// No alignment guarantees by itself.
///
/// ### Notes
/// - When stored inside a page-table entry, only the upper 20 bits (the
///   frame index) are kept; the low 12 bits must be zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(u32);

impl PhysAddr {
    #[inline]
    #[must_use]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Build a page-aligned address from a physical frame index (`0..2^20`).
    #[inline]
    #[must_use]
    pub const fn from_frame_index(index: usize) -> Self {
        debug_assert!(index < crate::TOTAL_PAGES);
        Self((index as u32) << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The 20-bit frame index (`addr >> 12`) as stored in page-table
    /// entries and tracked in the physical bitmap.
    #[inline]
    #[must_use]
    pub const fn frame_index(self) -> usize {
        (self.0 >> PAGE_SHIFT) as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }
}

impl core::ops::Add<u32> for PhysAddr {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0.checked_add(rhs).expect("PhysAddr add"))
    }
}

impl From<u32> for PhysAddr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

impl core::fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl core::fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010x} (Physical, frame {})", self.0, self.frame_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index() {
        assert_eq!(PhysAddr::new(0).frame_index(), 0);
        assert_eq!(PhysAddr::new(0x1000).frame_index(), 1);
        assert_eq!(PhysAddr::new(0xFFFF_F000).frame_index(), 0xf_ffff);
        assert_eq!(PhysAddr::from_frame_index(42), PhysAddr::new(42 * 4096));
    }
}
