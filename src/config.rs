//! Configuration-time bounds for parsing and allocation.
//!
//! These are fixed at compile time; a row that exceeds any of them is a
//! fatal parse error, never a silent truncation.

/// Maximum length of a chromosome name, in bytes.
pub const MAX_CHROM_LEN: usize = 127;

/// Maximum length of the id (4th) column, in bytes.
pub const MAX_ID_LEN: usize = 16_383;

/// Maximum length of everything past the 3rd column, in bytes.
pub const MAX_TAIL_LEN: usize = 131_071;

/// Coordinate cap, kept below `u64::MAX` so padded and summed coordinates
/// never wrap.
pub const MAX_COORD: u64 = 1 << 44;

/// Maximum number of decimal digits a coordinate field may carry.
pub const MAX_COORD_DIGITS: usize = 14;

/// Slots per pool slab. Must be a power of two and a multiple of 64.
pub const SLAB_CAPACITY: usize = 512;

/// The sentinel rendered for statistics over an empty window.
pub const NAN_TEXT: &str = "NAN";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_capacity_is_word_aligned_power_of_two() {
        assert!(SLAB_CAPACITY.is_power_of_two());
        assert_eq!(SLAB_CAPACITY % 64, 0);
    }

    #[test]
    fn coord_cap_has_room_for_padding() {
        assert!(MAX_COORD.checked_mul(4).is_some());
        assert_eq!(MAX_COORD.to_string().len(), MAX_COORD_DIGITS);
    }
}
