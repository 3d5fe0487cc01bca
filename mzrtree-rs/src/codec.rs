//! Binary serialization of bounding-box payloads.
//!
//! Sparse layout, all multi-byte values big-endian:
//!
//! ```text
//! payload := "SPAR" row*
//! row     := byte_length(u32) peak*      byte_length = 8 * peak_count
//! peak    := mz(f32) intensity(f32)
//! ```
//!
//! One row record per absolute row from `min_row` to `max_row` of the box,
//! in that order; a row with no peaks in the box's column range is a record
//! with `byte_length = 0`. The length prefix is what makes windowed decoding
//! cheap: rows outside the requested window are skipped by advancing the
//! cursor, without touching their peaks.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::column_index::{lower_index, upper_index};
use crate::model::{BoundingBox, Peak, Strip};

/// Leading tag of a sparse payload.
pub const SPARSE_TAG: [u8; 4] = *b"SPAR";

/// A payload that cannot be decoded. Scoped to a single box: the query
/// engine records it and keeps going with the remaining candidates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown payload tag {found:?}, expected {SPARSE_TAG:?}")]
    TagMismatch { found: [u8; 4] },
    #[error("payload truncated at byte {offset}, {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },
}

/// Serialize the peaks of `bbox` out of its source strip.
///
/// Each row's column range is resolved against the box's own m/z bounds,
/// so encoding is consistent with the ranges the builder counted.
pub fn encode_box(bbox: &BoundingBox, strip: &Strip) -> Bytes {
    let row_records = bbox.row_count() as usize;
    let mut buf =
        BytesMut::with_capacity(4 + 4 * row_records + 8 * bbox.non_zero_count as usize);
    buf.put_slice(&SPARSE_TAG);

    for absolute in bbox.min_row..=bbox.max_row {
        let row = strip.row_at(absolute);
        let lo = lower_index(row, bbox.min_mz);
        let hi = upper_index(row, bbox.max_mz);
        if lo < 0 || hi < lo {
            buf.put_u32(0);
            continue;
        }
        let slice = &row[lo as usize..=hi as usize];
        buf.put_u32((8 * slice.len()) as u32);
        for peak in slice {
            buf.put_f32(peak.mz);
            buf.put_f32(peak.intensity);
        }
    }

    buf.freeze()
}

/// Decode the rows `row_lo..=row_hi` out of a payload whose first row record
/// is `payload_first_row`, keeping only peaks with
/// `mz - mz_min > 0 && mz <= mz_max` (strict lower bound, inclusive upper —
/// the on-disk convention).
///
/// Returns one peak sequence per requested row, in row order; rows whose
/// record is empty come back as empty sequences. `row_lo` must not precede
/// `payload_first_row`, and the window must lie within the payload's rows.
pub fn decode_row_range(
    payload: &[u8],
    payload_first_row: i64,
    row_lo: i64,
    row_hi: i64,
    mz_min: f32,
    mz_max: f32,
) -> Result<Vec<Vec<Peak>>, DecodeError> {
    let mut cursor = payload;

    need(payload.len(), &cursor, 4)?;
    let mut found = [0u8; 4];
    cursor.copy_to_slice(&mut found);
    if found != SPARSE_TAG {
        return Err(DecodeError::TagMismatch { found });
    }

    if row_hi < row_lo {
        return Ok(Vec::new());
    }

    // rows before the window: length prefix only, no peak parsing
    let skipped = (row_lo - payload_first_row).max(0) as usize;
    for _ in 0..skipped {
        let byte_length = row_byte_length(payload.len(), &mut cursor)?;
        need(payload.len(), &cursor, byte_length)?;
        cursor.advance(byte_length);
    }

    let mut rows = Vec::with_capacity((1 + row_hi - row_lo) as usize);
    for _ in row_lo..=row_hi {
        let byte_length = row_byte_length(payload.len(), &mut cursor)?;
        need(payload.len(), &cursor, byte_length)?;

        let mut kept = Vec::new();
        for _ in 0..byte_length / 8 {
            let mz = cursor.get_f32();
            let intensity = cursor.get_f32();
            if mz - mz_min > 0.0 && mz <= mz_max {
                kept.push(Peak::new(mz, intensity));
            }
        }
        cursor.advance(byte_length % 8);
        rows.push(kept);
    }

    Ok(rows)
}

fn row_byte_length(total: usize, cursor: &mut &[u8]) -> Result<usize, DecodeError> {
    need(total, cursor, 4)?;
    Ok(cursor.get_u32() as usize)
}

fn need(total: usize, cursor: &&[u8], wanted: usize) -> Result<(), DecodeError> {
    if cursor.remaining() < wanted {
        Err(DecodeError::Truncated {
            offset: total - cursor.remaining(),
            needed: wanted - cursor.remaining(),
        })
    } else {
        Ok(())
    }
}
