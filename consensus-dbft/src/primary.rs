//! Primary selection.
//!
//! The primary for a (height, view) pair is a pure function of the pair
//! and the committee size, so every validator agrees on it without
//! exchanging any messages and it never needs to be stored.

use crate::{
    types::{BlockIndex, ValidatorIndex, ViewNumber},
    validator_set::ValidatorSet,
};

/// Rotating primary: `(block_index - view) mod n`, computed without ever
/// going negative.
///
/// Successive heights rotate forward through the committee, and each view
/// change within a height steps one position backwards.
///
/// # Panics
///
/// Never; returns 0 for an empty committee.
pub fn primary_index(block_index: BlockIndex, view: ViewNumber, n: usize) -> ValidatorIndex {
    let n = match u64::try_from(n) {
        Ok(n) if n > 0 => n,
        _ => return 0,
    };
    let height = u64::from(block_index) % n;
    let view = u64::from(view) % n;
    let index = height.wrapping_add(n).wrapping_sub(view) % n;
    // `index < n <= 255`
    ValidatorIndex::try_from(index).unwrap_or(0)
}

/// Check if `index` is the primary for the given (height, view).
pub fn is_primary(
    validator_set: &ValidatorSet,
    index: ValidatorIndex,
    block_index: BlockIndex,
    view: ViewNumber,
) -> bool {
    primary_index(block_index, view, validator_set.len()) == index
}
