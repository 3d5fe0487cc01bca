//! Reconstruction of a queried sub-matrix from candidate boxes.
//!
//! The engine asks the spatial index for candidate descriptors, fetches
//! their payloads, decodes only each candidate's overlap with the requested
//! row window and merges the decoded rows into one dense, window-local
//! output. Candidate decodes are independent and run on the rayon pool;
//! each candidate is fully decoded before its rows are merged, so an
//! abandoned decode never leaves a partially written row behind.

use anyhow::{Result, bail};
use anyhow_ext::Context;
use log::debug;
use rayon::prelude::*;

use crate::codec::{DecodeError, decode_row_range};
use crate::model::{BoxEntry, Peak};
use crate::store::{BlobStore, SpatialIndex};

/// The query rectangle plus the precursor value selecting the stream.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QueryRegion {
    /// First requested row, inclusive, absolute.
    pub min_row: i64,
    /// Last requested row, inclusive, absolute.
    pub max_row: i64,
    pub min_mz: f32,
    pub max_mz: f32,
    /// Precursor point; boxes whose stored window contains it (half-open)
    /// are candidates. Use a value inside the fallback window (e.g. 0.0)
    /// for the base stream.
    pub precursor_mz: f32,
}

/// A candidate box whose payload could not be decoded. The query keeps
/// going; the failure is reported alongside the partial result.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateFailure {
    pub box_id: i64,
    pub error: DecodeError,
}

/// Dense per-row result of a range query.
///
/// Every row of the requested window is present; rows no candidate touched
/// are empty sequences. Row 0 is the window-local row `min_row`.
#[derive(Clone, Debug)]
pub struct QueryResult {
    min_row: i64,
    rows: Vec<Vec<Peak>>,
    failures: Vec<CandidateFailure>,
}

impl QueryResult {
    fn empty(min_row: i64, row_count: usize) -> Self {
        QueryResult {
            min_row,
            rows: vec![Vec::new(); row_count],
            failures: Vec::new(),
        }
    }

    /// Absolute index of the first row in the window.
    pub fn min_row(&self) -> i64 {
        self.min_row
    }

    /// Window-local rows, each sorted ascending by m/z.
    pub fn rows(&self) -> &[Vec<Peak>] {
        &self.rows
    }

    /// Row by absolute index; rows outside the window are empty.
    pub fn row(&self, absolute: i64) -> &[Peak] {
        let local = absolute - self.min_row;
        if local < 0 {
            return &[];
        }
        self.rows.get(local as usize).map_or(&[], Vec::as_slice)
    }

    pub fn failures(&self) -> &[CandidateFailure] {
        &self.failures
    }

    pub fn peak_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    pub fn into_rows(self) -> Vec<Vec<Peak>> {
        self.rows
    }
}

/// Run a range query against a spatial index and its blob store.
///
/// An empty candidate set is not an error and yields an all-empty result.
/// Per-candidate decode failures degrade that candidate to empty and are
/// accumulated; the call fails only when a store operation fails or when
/// every candidate's payload is undecodable.
pub fn range_query<I, B>(index: &I, blobs: &B, region: QueryRegion) -> Result<QueryResult>
where
    I: SpatialIndex + ?Sized,
    B: BlobStore + ?Sized,
{
    if region.max_row < region.min_row {
        return Ok(QueryResult::empty(region.min_row, 0));
    }
    let row_count = (1 + region.max_row - region.min_row) as usize;

    let candidates = index
        .query(
            region.min_row,
            region.max_row,
            region.min_mz,
            region.max_mz,
            region.precursor_mz,
        )
        .dot()?;

    let mut result = QueryResult::empty(region.min_row, row_count);
    if candidates.is_empty() {
        debug!(
            "no candidate box for rows [{}, {}] mz [{}, {}] precursor {}",
            region.min_row, region.max_row, region.min_mz, region.max_mz, region.precursor_mz
        );
        return Ok(result);
    }

    // payloads come out of the store sequentially; decoding fans out below
    let mut payloads = Vec::with_capacity(candidates.len());
    for entry in &candidates {
        payloads.push(blobs.get(entry.payload.key).dot()?);
    }

    let decoded: Vec<Result<DecodedOverlap, CandidateFailure>> = candidates
        .par_iter()
        .zip(payloads.par_iter())
        .map(|(entry, blob)| decode_candidate(entry, blob, &region))
        .collect();

    let mut decoded_count = 0usize;
    for outcome in decoded {
        match outcome {
            Ok(overlap) => {
                decoded_count += 1;
                for (i, peaks) in overlap.rows.into_iter().enumerate() {
                    result.rows[overlap.first_local_row + i].extend(peaks);
                }
            }
            Err(failure) => result.failures.push(failure),
        }
    }

    if decoded_count == 0 {
        let first = &result.failures[0];
        bail!(
            "all {} candidate boxes failed to decode (box {}: {})",
            result.failures.len(),
            first.box_id,
            first.error
        );
    }

    debug!(
        "range query decoded {}/{} candidate boxes, {} peaks",
        decoded_count,
        candidates.len(),
        result.peak_count()
    );
    Ok(result)
}

struct DecodedOverlap {
    first_local_row: usize,
    rows: Vec<Vec<Peak>>,
}

fn decode_candidate(
    entry: &BoxEntry,
    blob: &[u8],
    region: &QueryRegion,
) -> Result<DecodedOverlap, CandidateFailure> {
    let span = entry.payload;
    let payload = blob
        .get(span.start..span.end)
        .ok_or_else(|| CandidateFailure {
            box_id: entry.id,
            error: DecodeError::Truncated {
                offset: blob.len(),
                needed: span.end.saturating_sub(blob.len()).max(1),
            },
        })?;

    let row_lo = region.min_row.max(entry.bbox.min_row);
    let row_hi = region.max_row.min(entry.bbox.max_row);

    let rows = decode_row_range(
        payload,
        entry.bbox.min_row,
        row_lo,
        row_hi,
        region.min_mz,
        region.max_mz,
    )
    .map_err(|error| CandidateFailure {
        box_id: entry.id,
        error,
    })?;

    Ok(DecodedOverlap {
        first_local_row: (row_lo - region.min_row) as usize,
        rows,
    })
}
