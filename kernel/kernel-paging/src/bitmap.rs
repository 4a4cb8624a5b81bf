//! Flat bit-per-page bitmaps.
//!
//! One bitmap tracks physical frames (1 = used), a second tracks virtual
//! pages (1 = mapped). Both cover the full 4 GiB space at one bit per 4 KiB
//! page and are never resized.

use kernel_addresses::TOTAL_PAGES;

/// Bits per bitmap word.
const WORD_BITS: usize = u32::BITS as usize;

/// Number of `u32` words in a full-address-space bitmap.
pub const FRAME_BITMAP_WORDS: usize = TOTAL_PAGES / WORD_BITS;

/// A bitmap covering every 4 KiB page of the 4 GiB address space.
pub type FrameBitmap = Bitmap<FRAME_BITMAP_WORDS>;

/// A fixed-size bitmap over `WORDS * 32` bits.
///
/// Setting and clearing bits is the only mutation; searches never modify
/// state.
pub struct Bitmap<const WORDS: usize> {
    words: [u32; WORDS],
}

impl<const WORDS: usize> Bitmap<WORDS> {
    /// A bitmap with every bit clear.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// A bitmap with every bit set. The physical bitmap starts out this
    /// way: frames only become free when the memory map says so.
    #[must_use]
    pub const fn filled() -> Self {
        Self {
            words: [u32::MAX; WORDS],
        }
    }

    /// Total number of bits.
    #[must_use]
    pub const fn len(&self) -> usize {
        WORDS * WORD_BITS
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        WORDS == 0
    }

    #[inline]
    pub const fn set(&mut self, index: usize) {
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    #[inline]
    pub const fn clear(&mut self, index: usize) {
        self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
    }

    #[inline]
    #[must_use]
    pub const fn test(&self, index: usize) -> bool {
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Lowest-indexed clear bit, or `None` when every bit is set.
    #[must_use]
    pub fn find_first_zero(&self) -> Option<usize> {
        self.words
            .iter()
            .position(|&word| word != u32::MAX)
            .map(|index| index * WORD_BITS + self.words[index].trailing_ones() as usize)
    }

    /// Lowest starting index of `len` contiguous clear bits, or `None`.
    ///
    /// The search operates word by word: a run is only found when it lies
    /// entirely inside one 32-bit word. Runs that would span a word
    /// boundary are not found, and no run longer than 32 bits can ever be
    /// found. This is a known limitation of the search, kept deliberately;
    /// callers that need larger runs must carve them out some other way.
    #[must_use]
    pub fn find_first_zero_run(&self, len: usize) -> Option<usize> {
        debug_assert!(len > 0);
        if len > WORD_BITS {
            return None;
        }
        let mask = (u64::from(u32::MAX) >> (WORD_BITS - len)) as u32;
        for (index, &word) in self.words.iter().enumerate() {
            for start in 0..=(WORD_BITS - len) {
                if word & (mask << start) == 0 {
                    return Some(index * WORD_BITS + start);
                }
            }
        }
        None
    }
}

impl<const WORDS: usize> Default for Bitmap<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}
