//! Recursive partitioning of a strip into bounded-width bounding boxes.
//!
//! The m/z axis is split at its midpoint until a window no wider than the
//! configured maximum remains, then every row of the strip is scanned for
//! peaks inside that window. Emitted boxes are tightened to the observed
//! data: their row extent covers only rows that actually contain peaks and
//! their m/z bounds are the lowest and highest peak found, which can make a
//! box narrower than the window that produced it.

use crate::column_index::{lower_index, upper_index};
use crate::model::{BoundingBox, Strip};

/// Partition `strip` over the m/z window `[mz_min, mz_max]` into boxes no
/// wider than `max_bb_mz_width`.
///
/// Pure function of its inputs: same strip and window, same boxes. Empty
/// windows produce no box. The returned order follows the left-to-right
/// recursion but callers must not rely on it; the index layer owns ordering.
pub fn build_boxes(
    strip: &Strip,
    mz_min: f32,
    mz_max: f32,
    max_bb_mz_width: f32,
) -> Vec<BoundingBox> {
    let mut boxes = Vec::new();
    split(strip, mz_min, mz_max, max_bb_mz_width, &mut boxes);
    boxes
}

fn split(strip: &Strip, mz_min: f32, mz_max: f32, max_width: f32, out: &mut Vec<BoundingBox>) {
    if mz_max - mz_min > max_width {
        let mid = (mz_min + mz_max) / 2.0;
        split(strip, mz_min, mid, max_width, out);
        split(strip, mid, mz_max, max_width, out);
        return;
    }

    let mut min_row = i64::MAX;
    let mut max_row = i64::MIN;
    let mut min_mz = f32::MAX;
    let mut max_mz = f32::MIN;
    let mut non_zero_count: i64 = 0;

    for (local, row) in strip.rows().iter().enumerate() {
        let lo = lower_index(row, mz_min);
        let hi = upper_index(row, mz_max);
        if lo < 0 || hi < lo {
            continue;
        }
        let absolute = strip.first_row() + local as i64;
        for peak in &row[lo as usize..=hi as usize] {
            non_zero_count += 1;
            min_row = min_row.min(absolute);
            max_row = max_row.max(absolute);
            min_mz = min_mz.min(peak.mz);
            max_mz = max_mz.max(peak.mz);
        }
    }

    if non_zero_count > 0 {
        out.push(BoundingBox {
            min_row,
            max_row,
            min_mz,
            max_mz,
            non_zero_count,
            is_sparse: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Peak;

    fn strip_of(rows: &[&[(f32, f32)]]) -> Strip {
        let mut strip = Strip::new(0, rows.len().max(1));
        for row in rows {
            strip.push_row(row.iter().map(|&(mz, i)| Peak::new(mz, i)).collect());
        }
        strip
    }

    #[test]
    fn test_single_box_with_tight_bounds() {
        let strip = strip_of(&[&[(5.0, 10.0), (8.0, 20.0)], &[], &[(5.5, 5.0)]]);
        let boxes = build_boxes(&strip, 5.0, 8.0, 5.0);

        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!(b.min_row, 0);
        assert_eq!(b.max_row, 2);
        assert_eq!(b.min_mz, 5.0);
        assert_eq!(b.max_mz, 8.0);
        assert_eq!(b.non_zero_count, 3);
        assert!(b.is_sparse);
    }

    #[test]
    fn test_wide_window_splits_recursively() {
        let strip = strip_of(&[&[(1.0, 1.0), (6.0, 1.0), (12.0, 1.0)]]);
        let boxes = build_boxes(&strip, 0.0, 10.0, 5.0);

        // windows [0, 5] and [5, 10]; the 12.0 peak lies outside both
        assert_eq!(boxes.len(), 2);
        assert_eq!((boxes[0].min_mz, boxes[0].max_mz), (1.0, 1.0));
        assert_eq!(boxes[0].non_zero_count, 1);
        assert_eq!((boxes[1].min_mz, boxes[1].max_mz), (6.0, 6.0));
        assert_eq!(boxes[1].non_zero_count, 1);
    }

    #[test]
    fn test_empty_window_emits_nothing() {
        let strip = strip_of(&[&[(5.0, 1.0)], &[]]);
        let boxes = build_boxes(&strip, 100.0, 104.0, 5.0);
        assert!(boxes.is_empty());

        // no box may ever carry a zero count
        let all = build_boxes(&strip, 0.0, 200.0, 5.0);
        assert!(all.iter().all(|b| b.non_zero_count > 0));
    }

    #[test]
    fn test_rows_without_peaks_do_not_stretch_the_box() {
        let strip = strip_of(&[&[], &[(7.0, 1.0)], &[]]);
        let boxes = build_boxes(&strip, 5.0, 8.0, 5.0);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].min_row, 1);
        assert_eq!(boxes[0].max_row, 1);
    }

    #[test]
    fn test_saturated_search_recounts_trailing_peak() {
        // A sub-window entirely above a row's last peak still picks that
        // peak up through the saturating lower bound; the resulting box can
        // start below the window that produced it. Inherited behavior that
        // downstream data depends on.
        let strip = strip_of(&[&[(12.0, 1.0)], &[(18.0, 1.0)]]);
        let boxes = build_boxes(&strip, 10.0, 20.0, 5.0);

        assert_eq!(boxes.len(), 2);
        assert_eq!((boxes[0].min_mz, boxes[0].max_mz), (12.0, 12.0));
        assert_eq!(boxes[0].non_zero_count, 1);
        // second window [15, 20] reaches back to the 12.0 peak
        assert_eq!((boxes[1].min_mz, boxes[1].max_mz), (12.0, 18.0));
        assert_eq!(boxes[1].non_zero_count, 2);
        assert_eq!((boxes[1].min_row, boxes[1].max_row), (0, 1));
    }

    #[test]
    fn test_builder_is_idempotent() {
        let strip = strip_of(&[
            &[(400.1, 3.0), (402.7, 8.0), (404.9, 1.5)],
            &[(401.3, 2.0)],
            &[],
            &[(400.1, 9.0), (403.0, 4.0)],
        ]);
        let first = build_boxes(&strip, 400.0, 410.0, 2.5);
        let second = build_boxes(&strip, 400.0, 410.0, 2.5);
        assert_eq!(first, second);
    }

    #[test]
    fn test_absolute_rows_use_strip_offset() {
        let mut strip = Strip::new(2, 4);
        strip.push_row(vec![Peak::new(5.0, 1.0)]);
        let boxes = build_boxes(&strip, 0.0, 10.0, 10.0);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].min_row, 8);
        assert_eq!(boxes[0].max_row, 8);
    }
}
