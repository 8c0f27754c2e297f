//! Aligned free-run search over 64-bit occupancy masks.
//!
//! A set bit means the slot is free. Each finder returns the index of the
//! first run of `L` free bits that starts at a multiple of `L`, or `None`.
//!
//! All finders run in constant time: runs that fit inside one byte come from a
//! precomputed per-byte table, wider runs combine whole-byte flags, and the
//! answer is a single bit scan. Nothing here marks the run occupied; that is
//! the caller's job.

#![allow(clippy::cast_possible_truncation)]

/// A finder for one run length.
pub type RunFinder = fn(u64) -> Option<u32>;

/// Builds the per-byte table for runs of `run` bits (`run` in {2, 4, 8}).
///
/// Bit `i` of `table[b]` is set when bits `[i, i + run)` of `b` are all set
/// and `i % run == 0`. For `run == 8` this degenerates to a "byte is full"
/// flag in bit 0.
const fn run_table(run: u32) -> [u8; 256] {
    let run_mask: u16 = (1u16 << run) - 1;
    let mut table = [0u8; 256];
    let mut byte = 0usize;
    while byte < 256 {
        let mut starts = 0u8;
        let mut start = 0u32;
        while start < 8 {
            let window = run_mask << start;
            if (byte as u16) & window == window {
                starts |= 1 << start;
            }
            start += run;
        }
        table[byte] = starts;
        byte += 1;
    }
    table
}

static PAIRS: [u8; 256] = run_table(2);
static QUADS: [u8; 256] = run_table(4);
static FULL: [u8; 256] = run_table(8);

#[inline]
const fn first_set(mask: u64) -> Option<u32> {
    if mask == 0 {
        None
    } else {
        Some(mask.trailing_zeros())
    }
}

/// Replaces every byte of `mask` with its table entry.
#[inline]
fn spread(mask: u64, table: &[u8; 256]) -> u64 {
    let bytes = mask.to_le_bytes();
    let mut out = [0u8; 8];
    for (dst, src) in out.iter_mut().zip(bytes) {
        *dst = table[src as usize];
    }
    u64::from_le_bytes(out)
}

/// One bit per byte of `mask`: bit `k` is set when byte `k` is all ones.
#[inline]
fn full_bytes(mask: u64) -> u8 {
    let bytes = mask.to_le_bytes();
    let mut flags = 0u8;
    for (k, byte) in bytes.into_iter().enumerate() {
        flags |= FULL[byte as usize] << k;
    }
    flags
}

/// First free slot.
#[must_use]
pub const fn one(mask: u64) -> Option<u32> {
    first_set(mask)
}

/// First free pair starting at an even index.
#[must_use]
pub fn two(mask: u64) -> Option<u32> {
    first_set(spread(mask, &PAIRS))
}

/// First free run of four starting at a multiple of four.
#[must_use]
pub fn four(mask: u64) -> Option<u32> {
    first_set(spread(mask, &QUADS))
}

/// First fully free byte.
#[must_use]
pub fn eight(mask: u64) -> Option<u32> {
    first_set(spread(mask, &FULL))
}

/// First free run of sixteen starting at a multiple of sixteen.
#[must_use]
pub fn sixteen(mask: u64) -> Option<u32> {
    let bytes = full_bytes(mask);
    let halves = bytes & (bytes >> 1) & 0b0101_0101;
    first_set(u64::from(halves)).map(|k| k * 8)
}

/// First free run of thirty-two starting at bit 0 or bit 32.
#[must_use]
pub fn thirty_two(mask: u64) -> Option<u32> {
    let bytes = full_bytes(mask);
    let words = bytes & (bytes >> 1) & (bytes >> 2) & (bytes >> 3) & 0b0001_0001;
    first_set(u64::from(words)).map(|k| k * 8)
}

/// `Some(0)` iff every slot is free.
#[must_use]
pub const fn sixty_four(mask: u64) -> Option<u32> {
    if mask == u64::MAX {
        Some(0)
    } else {
        None
    }
}

static FINDERS: [RunFinder; 7] = [one, two, four, eight, sixteen, thirty_two, sixty_four];

/// Supported run lengths, in slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunLength {
    /// A single slot.
    One = 1,
    /// Two slots.
    Two = 2,
    /// Four slots.
    Four = 4,
    /// Eight slots.
    Eight = 8,
    /// Sixteen slots.
    Sixteen = 16,
    /// Thirty-two slots.
    ThirtyTwo = 32,
    /// The whole mask.
    SixtyFour = 64,
}

impl RunLength {
    /// All run lengths, shortest first.
    pub const ALL: [Self; 7] = [
        Self::One,
        Self::Two,
        Self::Four,
        Self::Eight,
        Self::Sixteen,
        Self::ThirtyTwo,
        Self::SixtyFour,
    ];

    /// Maps a power-of-two slot count to its run length.
    ///
    /// Returns `None` for zero, non-powers of two, and counts above 64.
    #[must_use]
    pub const fn from_slots(slots: u32) -> Option<Self> {
        if !slots.is_power_of_two() || slots > 64 {
            return None;
        }
        Some(Self::ALL[slots.trailing_zeros() as usize])
    }

    /// Number of slots in the run.
    #[must_use]
    pub const fn slots(self) -> u32 {
        self as u32
    }

    /// The finder for this run length.
    #[must_use]
    pub fn finder(self) -> RunFinder {
        FINDERS[self.slots().trailing_zeros() as usize]
    }
}

/// Finds the first aligned free run of `len` slots in `mask`.
///
/// # Example
///
/// ```
/// use run_finder::{find_run, RunLength};
///
/// let mask = 0xff00; // only bits 8..16 free
/// assert_eq!(find_run(mask, RunLength::Eight), Some(8));
/// assert_eq!(find_run(mask, RunLength::Sixteen), None);
/// ```
#[must_use]
pub fn find_run(mask: u64, len: RunLength) -> Option<u32> {
    (len.finder())(mask)
}
