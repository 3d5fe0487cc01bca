//! Core data structures shared by the builder, the codec, the query engine
//! and the stores.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Width in Da of an evenly spaced precursor isolation window.
pub const DEFAULT_SWATH_WIDTH: f32 = 25.0;
/// Lower m/z bound of the first real precursor window.
pub const FIRST_SWATH_MIN_MZ: f32 = 400.0;
/// Number of evenly spaced precursor windows in a default acquisition cycle.
pub const DEFAULT_SWATH_COUNT: usize = 32;

/// The placeholder window attached to the base (non precursor-selected) stream.
pub const FALLBACK_WINDOW: PrecursorWindow = PrecursorWindow {
    min_mz: 0.0,
    max_mz: DEFAULT_SWATH_WIDTH,
};

/// A single centroided measurement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Peak {
    pub mz: f32,
    pub intensity: f32,
}

impl Peak {
    pub fn new(mz: f32, intensity: f32) -> Self {
        Peak { mz, intensity }
    }
}

/// A bounded buffer of consecutive scan rows, processed as one unit.
///
/// Each row holds the peaks of one scan, sorted ascending by m/z. The strip
/// addresses its rows in absolute coordinates:
/// `index * max_rows + local_row_index`.
#[derive(Clone, Debug)]
pub struct Strip {
    index: usize,
    max_rows: usize,
    rows: Vec<Vec<Peak>>,
}

impl Strip {
    pub fn new(index: usize, max_rows: usize) -> Self {
        Strip {
            index,
            max_rows,
            rows: Vec::with_capacity(max_rows),
        }
    }

    /// Absolute index of the strip's first row.
    pub fn first_row(&self) -> i64 {
        (self.index * self.max_rows) as i64
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.max_rows
    }

    /// Append one scan's peaks. The row must already be sorted ascending by
    /// m/z; an empty row is a valid scan that produced no accepted peaks.
    pub fn push_row(&mut self, row: Vec<Peak>) {
        assert!(!self.is_full(), "strip already holds {} rows", self.max_rows);
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Vec<Peak>] {
        &self.rows
    }

    /// Row by absolute index; rows outside the strip are empty.
    pub fn row_at(&self, absolute: i64) -> &[Peak] {
        let local = absolute - self.first_row();
        if local < 0 {
            return &[];
        }
        self.rows.get(local as usize).map_or(&[], Vec::as_slice)
    }
}

/// A tight rectangle over (row, m/z) space together with its peak count.
///
/// Boxes are produced by the builder with bounds tightened to the observed
/// data and are immutable afterwards. A box with `non_zero_count == 0` is
/// never created.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// First row covered, inclusive, absolute.
    pub min_row: i64,
    /// Last row covered, inclusive, absolute.
    pub max_row: i64,
    /// Lowest peak m/z inside the box.
    pub min_mz: f32,
    /// Highest peak m/z inside the box.
    pub max_mz: f32,
    /// Number of peaks inside the rectangle.
    pub non_zero_count: i64,
    /// Whether the payload uses the sparse row layout. Always true: the
    /// sparse layout is the only one written.
    pub is_sparse: bool,
}

impl BoundingBox {
    pub fn row_count(&self) -> i64 {
        1 + self.max_row - self.min_row
    }

    pub fn mz_width(&self) -> f32 {
        self.max_mz - self.min_mz
    }

    pub fn intersects_rows(&self, min_row: i64, max_row: i64) -> bool {
        self.min_row <= max_row && self.max_row >= min_row
    }

    pub fn intersects_mz(&self, min_mz: f32, max_mz: f32) -> bool {
        self.min_mz <= max_mz && self.max_mz >= min_mz
    }

    /// Compare two boxes on one rectangle field in the given direction.
    pub fn compare_by(&self, other: &BoundingBox, field: SortField, order: SortOrder) -> Ordering {
        let ordering = match field {
            SortField::MinRow => self.min_row.cmp(&other.min_row),
            SortField::MaxRow => self.max_row.cmp(&other.max_row),
            SortField::MinMz => cmp_f32(self.min_mz, other.min_mz),
            SortField::MaxMz => cmp_f32(self.max_mz, other.max_mz),
        };
        match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

fn cmp_f32(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Rectangle field a box sequence can be ordered on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum SortField {
    MinRow,
    MaxRow,
    MinMz,
    MaxMz,
}

/// Sort direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum SortOrder {
    Ascending,
    Descending,
}

pub fn sort_boxes(boxes: &mut [BoundingBox], field: SortField, order: SortOrder) {
    boxes.sort_by(|a, b| a.compare_by(b, field, order));
}

pub fn sort_entries(entries: &mut [BoxEntry], field: SortField, order: SortOrder) {
    entries.sort_by(|a, b| a.bbox.compare_by(&b.bbox, field, order));
}

/// Opaque reference to a serialized payload: a blob key plus the byte range
/// holding this box inside the blob.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobRef {
    pub key: i64,
    pub start: usize,
    pub end: usize,
}

impl BlobRef {
    /// Reference covering an entire blob of the given length.
    pub fn whole(key: i64, len: usize) -> Self {
        BlobRef {
            key,
            start: 0,
            end: len,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// The precursor isolation m/z range a stream was acquired with.
///
/// Containment tests against stored boxes are half-open: a precursor value
/// `p` belongs to the window when `min_mz <= p < max_mz`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrecursorWindow {
    pub min_mz: f32,
    pub max_mz: f32,
}

impl PrecursorWindow {
    pub fn new(min_mz: f32, max_mz: f32) -> Self {
        PrecursorWindow { min_mz, max_mz }
    }

    /// Half-open containment used when matching stored boxes.
    pub fn contains(&self, precursor_mz: f32) -> bool {
        self.min_mz <= precursor_mz && self.max_mz > precursor_mz
    }

    /// Inclusive containment used when resolving a precursor to its window.
    pub fn covers(&self, precursor_mz: f32) -> bool {
        self.min_mz <= precursor_mz && self.max_mz >= precursor_mz
    }
}

/// A persisted box descriptor: rectangle, acquisition window and payload
/// location. This is what the spatial index stores and returns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxEntry {
    pub id: i64,
    pub bbox: BoundingBox,
    pub window: PrecursorWindow,
    pub payload: BlobRef,
}

/// The ordered per-stream precursor window list.
///
/// Entry 0 is always [`FALLBACK_WINDOW`], carried by the base stream;
/// entries `1..n` describe the precursor-selected streams.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowTable {
    windows: Vec<PrecursorWindow>,
}

impl WindowTable {
    /// `count` evenly spaced fixed-width windows starting at
    /// [`FIRST_SWATH_MIN_MZ`], preceded by the fallback window.
    pub fn evenly_spaced(count: usize) -> Self {
        let mut windows = Vec::with_capacity(count + 1);
        windows.push(FALLBACK_WINDOW);
        for i in 0..count {
            let min_mz = FIRST_SWATH_MIN_MZ + DEFAULT_SWATH_WIDTH * i as f32;
            windows.push(PrecursorWindow::new(min_mz, min_mz + DEFAULT_SWATH_WIDTH));
        }
        WindowTable { windows }
    }

    /// Build a table from an imported window list (acquisition method
    /// export). The fallback window is prepended automatically.
    pub fn from_windows(imported: Vec<PrecursorWindow>) -> Result<Self, ConfigError> {
        if imported.is_empty() {
            return Err(ConfigError::NoWindows);
        }
        for (i, w) in imported.iter().enumerate() {
            if !(w.min_mz < w.max_mz) {
                return Err(ConfigError::InvalidWindow { index: i + 1 });
            }
        }
        let mut windows = Vec::with_capacity(imported.len() + 1);
        windows.push(FALLBACK_WINDOW);
        windows.extend(imported);
        Ok(WindowTable { windows })
    }

    pub fn windows(&self) -> &[PrecursorWindow] {
        &self.windows
    }

    pub fn get(&self, stream: usize) -> Option<&PrecursorWindow> {
        self.windows.get(stream)
    }

    /// Number of streams, the fallback stream included.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Ingestion thresholds, validated once at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexConfig {
    /// Upper bound on rows buffered per strip.
    pub max_rows_per_strip: usize,
    /// Upper bound on the m/z width of a produced box.
    pub max_bb_mz_width: f32,
    /// Lower bound of the accepted peak m/z range.
    pub lowest_mz: f32,
    /// Upper bound of the accepted peak m/z range.
    pub highest_mz: f32,
}

impl IndexConfig {
    pub fn new(
        max_rows_per_strip: usize,
        max_bb_mz_width: f32,
        lowest_mz: f32,
        highest_mz: f32,
    ) -> Result<Self, ConfigError> {
        if max_rows_per_strip == 0 {
            return Err(ConfigError::ZeroStripRows);
        }
        if !(max_bb_mz_width > 0.0) || !max_bb_mz_width.is_finite() {
            return Err(ConfigError::InvalidBoxWidth(max_bb_mz_width));
        }
        if !(lowest_mz < highest_mz) {
            return Err(ConfigError::EmptyAcceptanceWindow {
                lowest_mz,
                highest_mz,
            });
        }
        Ok(IndexConfig {
            max_rows_per_strip,
            max_bb_mz_width,
            lowest_mz,
            highest_mz,
        })
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            max_rows_per_strip: 512,
            max_bb_mz_width: 5.0,
            lowest_mz: 0.0,
            highest_mz: 2500.0,
        }
    }
}

/// Invalid construction-time parameters. Always fatal.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_rows_per_strip must be positive")]
    ZeroStripRows,
    #[error("max_bb_mz_width must be positive and finite, got {0}")]
    InvalidBoxWidth(f32),
    #[error("acceptance window is empty: lowest_mz {lowest_mz} >= highest_mz {highest_mz}")]
    EmptyAcceptanceWindow { lowest_mz: f32, highest_mz: f32 },
    #[error("precursor window list is empty")]
    NoWindows,
    #[error("precursor window {index} is empty or inverted")]
    InvalidWindow { index: usize },
}
