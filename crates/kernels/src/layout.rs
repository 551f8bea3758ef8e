//! Axis-order conversion from the abstract convention into the native one.

use implmap_ir::{is_permutation, NATIVE_MIN_RANK};

/// Convert a permutation order given in the abstract (`bfyx`) convention into
/// the native (`bfxy`) convention.
///
/// The order is first padded with identity axes up to `max(min_rank, 4)`.
/// Spatial axis values are then relabelled (`o -> 1 + N - o` for `o >= 2`),
/// and finally spatial positions are swapped pairwise around the middle of
/// the spatial range, skipping the innermost pair.
///
/// `order` must be a permutation; use [`checked_convert_permute_order`] for
/// unvalidated input.
pub fn convert_permute_order(order: &[u16], min_rank: Option<usize>) -> Vec<u16> {
    debug_assert!(is_permutation(order), "{order:?} is not a permutation");
    let rank = min_rank.unwrap_or(NATIVE_MIN_RANK).max(NATIVE_MIN_RANK);
    let padded = pad_order(order, rank);
    let n = padded.len();

    let mut native: Vec<u16> = padded
        .iter()
        .map(|&o| if o >= 2 { (1 + n - o as usize) as u16 } else { o })
        .collect();

    let swaps = ((n - 2) / 2).saturating_sub(1);
    for i in 0..swaps {
        native.swap(2 + i, 1 + n - (2 + i));
    }

    native
}

/// Like [`convert_permute_order`], but `None` when `order` is not a
/// permutation of `0..order.len()`.
pub fn checked_convert_permute_order(order: &[u16], min_rank: Option<usize>) -> Option<Vec<u16>> {
    is_permutation(order).then(|| convert_permute_order(order, min_rank))
}

/// Extend `order` with identity axes until it has `rank` entries.
pub fn pad_order(order: &[u16], rank: usize) -> Vec<u16> {
    let mut padded = order.to_vec();
    for axis in order.len()..rank {
        padded.push(axis as u16);
    }
    padded
}
