//! Binary-search helpers locating the column sub-range of one row that
//! falls inside an m/z window.
//!
//! Both functions operate on a row sorted ascending by m/z and return signed
//! indexes so that an empty sub-range is representable. Their saturating
//! behavior at the array boundaries is load-bearing: box rectangles and
//! serialized row lengths are derived from these exact indexes, so the
//! clamp rules below must not change.

use crate::model::Peak;
use std::cmp::Ordering;

/// Smallest index `i` with `row[i].mz >= mz`; clamped to `len - 1` when
/// `mz` exceeds every element.
///
/// The clamp means the returned peak can have `mz` *below* the target when
/// the target is past the end of the row. Returns `-1` only for an empty
/// row.
pub fn lower_index(row: &[Peak], mz: f32) -> isize {
    let idx = match search(row, mz) {
        Ok(found) => found as isize,
        Err(insertion) => insertion as isize,
    };
    if idx >= row.len() as isize {
        row.len() as isize - 1
    } else {
        idx
    }
}

/// Index of the exact match when `mz` is present, otherwise the largest
/// index `i` with `row[i].mz < mz`; `-1` when `mz` precedes all elements.
pub fn upper_index(row: &[Peak], mz: f32) -> isize {
    match search(row, mz) {
        Ok(found) => found as isize,
        Err(insertion) => insertion as isize - 1,
    }
}

fn search(row: &[Peak], mz: f32) -> Result<usize, usize> {
    row.binary_search_by(|peak| peak.mz.partial_cmp(&mz).unwrap_or(Ordering::Equal))
}
