use crate::{PAGE_SIZE, VirtAddr};

/// A half-open byte range `[start, end)` of virtual addresses.
///
/// Used to describe the identity-mapped early-boot window and the
/// higher-half kernel image; the page mapper walks regions one page at a
/// time via [`pages`](Self::pages).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct VirtRegion {
    start: VirtAddr,
    end: VirtAddr,
}

impl VirtRegion {
    /// ### Debug assertions
    /// - Asserts `start <= end` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(start: VirtAddr, end: VirtAddr) -> Self {
        debug_assert!(start.as_u32() <= end.as_u32());
        Self { start, end }
    }

    #[inline]
    #[must_use]
    pub const fn from_u32(start: u32, end: u32) -> Self {
        Self::new(VirtAddr::new(start), VirtAddr::new(end))
    }

    #[inline]
    #[must_use]
    pub const fn start(self) -> VirtAddr {
        self.start
    }

    /// Exclusive end of the region.
    #[inline]
    #[must_use]
    pub const fn end(self) -> VirtAddr {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn len_bytes(self) -> u32 {
        self.end.as_u32() - self.start.as_u32()
    }

    /// Iterate over the page-aligned base address of every page touching
    /// the region, starting at `start` rounded to its containing page.
    #[inline]
    #[must_use]
    pub const fn pages(self) -> PageIter {
        PageIter {
            next: crate::align_down(self.start.as_u32(), PAGE_SIZE),
            end: self.end.as_u32(),
            done: false,
        }
    }
}

/// Iterator over the pages of a [`VirtRegion`], 4 KiB at a time.
pub struct PageIter {
    next: u32,
    end: u32,
    // set once the cursor can no longer advance (top of address space)
    done: bool,
}

impl Iterator for PageIter {
    type Item = VirtAddr;

    fn next(&mut self) -> Option<VirtAddr> {
        if self.done || self.next >= self.end {
            return None;
        }
        let page = VirtAddr::new(self.next);
        match self.next.checked_add(PAGE_SIZE) {
            Some(n) => self.next = n,
            None => self.done = true,
        }
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mebibyte_is_256_pages() {
        let region = VirtRegion::from_u32(0, 0x10_0000);
        let pages: Vec<_> = region.pages().collect();
        assert_eq!(pages.len(), 256);
        assert_eq!(pages[0], VirtAddr::new(0));
        assert_eq!(pages[255], VirtAddr::new(0xF_F000));
    }

    #[test]
    fn unaligned_edges_cover_touched_pages() {
        let region = VirtRegion::from_u32(0x1100, 0x3100);
        let pages: Vec<_> = region.pages().collect();
        assert_eq!(
            pages,
            [
                VirtAddr::new(0x1000),
                VirtAddr::new(0x2000),
                VirtAddr::new(0x3000)
            ]
        );
    }

    #[test]
    fn empty_region_yields_nothing() {
        let region = VirtRegion::from_u32(0x4000, 0x4000);
        assert_eq!(region.pages().count(), 0);
    }

    #[test]
    fn iteration_stops_at_top_of_address_space() {
        let region = VirtRegion::from_u32(0xFFFF_E000, 0xFFFF_FFFF);
        let pages: Vec<_> = region.pages().collect();
        assert_eq!(
            pages,
            [VirtAddr::new(0xFFFF_E000), VirtAddr::new(0xFFFF_F000)]
        );
    }
}
