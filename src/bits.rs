//! Bit utilities shared by the processor map walker and the address calculator.

/// Number of byte lanes packed into one 32-bit accelerator word.
pub const LANES_PER_WORD: usize = 4;

/// Width of a single byte lane in bits.
pub const LANE_BITS: u32 = 8;

/// Index of the least significant set bit.
///
/// Returns `None` for zero, which has no set bit.
#[must_use]
#[inline]
pub fn ffs(value: u64) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(value.trailing_zeros())
    }
}

/// Number of set bits.
#[must_use]
#[inline]
pub fn popcount(value: u64) -> u32 {
    value.count_ones()
}

/// Extract byte lane `lane` (bits `[8 * lane, 8 * lane + 8)`) of a 32-bit word.
#[must_use]
#[inline]
pub fn byte_lane(word: u32, lane: usize) -> u8 {
    debug_assert!(lane < LANES_PER_WORD);
    ((word >> (lane as u32 * LANE_BITS)) & 0xff) as u8
}

/// Round `value` down to a multiple of `granularity`, which must be a power of two.
#[must_use]
#[inline]
pub fn align_down(value: u32, granularity: u32) -> u32 {
    debug_assert!(granularity.is_power_of_two());
    value & !(granularity - 1)
}
