//! mzrtree: a bounded spatial index over mass spectrometry acquisitions.
//!
//! An acquisition is treated as a matrix of scans × (m/z, intensity) peaks.
//! Ingestion partitions it into tight rectangular bounding boxes with a
//! bounded m/z width, serializes each box into a compact sparse payload and
//! persists descriptors and payloads through pluggable store contracts.
//! Queries run the other way: an R-tree lookup yields candidate boxes, and
//! a streaming decoder reconstructs exactly the requested sub-matrix.
//!
//! # Features
//!
//! - **SWATH/DIA aware**: interleaved acquisitions are demultiplexed into
//!   per-precursor-window streams, queryable by precursor m/z
//! - **Bounded memory ingestion**: one strip of scans resident at a time
//! - **Windowed decoding**: payload rows outside the queried scan range are
//!   skipped via length prefixes without parsing peaks
//! - **Pluggable storage**: SQLite R-tree implementation included, plus
//!   in-memory stores for tests and embedding
//!
//! # Quick Start
//!
//! ```no_run
//! use mzrtree::{IndexConfig, MzRTree, Peak, Scan, VecScanSource, WindowTable};
//!
//! let config = IndexConfig::default();
//! let windows = WindowTable::evenly_spaced(32);
//! let scans = vec![Scan {
//!     index: 0,
//!     time: 0.42,
//!     ms_level: 1,
//!     precursor_mz: None,
//!     peaks: vec![Peak::new(501.3, 1250.0)],
//! }];
//!
//! let (index, stats) = MzRTree::create(
//!     "acquisition.mzrtree",
//!     config,
//!     windows,
//!     |_stream| Ok(VecScanSource::new(scans.clone())),
//! )
//! .unwrap();
//! println!("{} boxes persisted", stats.boxes);
//!
//! let result = index.query_rows(0, 100, 500.0, 510.0, 0.0).unwrap();
//! println!("{} peaks found", result.peak_count());
//! ```
//!
//! # Module Organization
//!
//! - [`model`]: core data structures (peaks, strips, boxes, windows)
//! - [`column_index`]: binary-search helpers over sorted rows
//! - [`bb_builder`]: recursive partitioning of strips into boxes
//! - [`codec`]: the sparse binary payload format
//! - [`query`]: range-query engine over candidate boxes
//! - [`ingest`]: per-stream demultiplexing and strip flushing
//! - [`store`]: storage contracts and in-memory implementations
//! - [`sqlite`]: the SQLite R-tree backed store

pub mod bb_builder;
pub mod codec;
pub mod column_index;
pub mod ingest;
pub mod model;
pub mod query;
pub mod sqlite;
pub mod store;

// Re-export main types for convenience
pub use model::{
    BlobRef, BoundingBox, BoxEntry, ConfigError, IndexConfig, Peak, PrecursorWindow, SortField,
    SortOrder, Strip, WindowTable, sort_boxes, sort_entries,
};

pub use bb_builder::build_boxes;
pub use codec::{DecodeError, SPARSE_TAG, decode_row_range, encode_box};
pub use column_index::{lower_index, upper_index};
pub use ingest::{IngestStats, StreamFailure, SwathIngester};
pub use query::{CandidateFailure, QueryRegion, QueryResult, range_query};
pub use sqlite::{IndexMetadata, MzRTreeDb};
pub use store::{
    BlobStore, IndexStore, MemoryStore, PrecursorWindowTable, Scan, ScanSource, SpatialIndex,
    VecScanSource,
};

use anyhow::Result;
use anyhow_ext::Context;
use std::path::Path;

/// High-level entry point over an SQLite-backed index.
///
/// `MzRTree` bundles the database with its persisted metadata and exposes
/// the two query entry points: by absolute scan rows and by retention-time
/// range. Lower-level access goes through [`MzRTree::db`].
pub struct MzRTree {
    db: MzRTreeDb,
    metadata: IndexMetadata,
}

impl MzRTree {
    /// Build a new index at `path` by ingesting every stream of an
    /// acquisition.
    ///
    /// Scan sources are single-pass; `make_source` is called once per
    /// stream and must return a fresh source over the full acquisition.
    pub fn create<Src, F>(
        path: impl AsRef<Path>,
        config: IndexConfig,
        windows: WindowTable,
        make_source: F,
    ) -> Result<(Self, IngestStats)>
    where
        Src: ScanSource,
        F: FnMut(usize) -> Result<Src>,
    {
        let mut db = MzRTreeDb::create(path).dot()?;

        db.begin().dot()?;
        db.insert_windows(&windows).dot()?;
        db.set_metadata(&config, windows.len()).dot()?;
        let stats = SwathIngester::new(&config, &windows)
            .ingest(make_source, &mut db)
            .dot()?;
        db.commit().dot()?;

        let metadata = IndexMetadata {
            config,
            stream_count: windows.len(),
        };
        Ok((MzRTree { db, metadata }, stats))
    }

    /// Open an index created earlier.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = MzRTreeDb::open(path).dot()?;
        let metadata = db.metadata().dot()?;
        Ok(MzRTree { db, metadata })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.metadata.config
    }

    pub fn stream_count(&self) -> usize {
        self.metadata.stream_count
    }

    pub fn box_count(&self) -> Result<i64> {
        self.db.box_count()
    }

    /// The underlying store, for advanced queries.
    pub fn db(&self) -> &MzRTreeDb {
        &self.db
    }

    /// Query by absolute scan rows on the stream selected by
    /// `precursor_mz` (use 0.0 for the base stream).
    pub fn query_rows(
        &self,
        min_row: i64,
        max_row: i64,
        min_mz: f32,
        max_mz: f32,
        precursor_mz: f32,
    ) -> Result<QueryResult> {
        range_query(
            &self.db,
            &self.db,
            QueryRegion {
                min_row,
                max_row,
                min_mz,
                max_mz,
                precursor_mz,
            },
        )
    }

    /// Query by retention-time range.
    ///
    /// The time range is resolved to stream-local rows through the recorded
    /// scan times of the stream owning `precursor_mz`. A time range no scan
    /// falls into yields an empty result, not an error.
    pub fn query_time_range(
        &self,
        time_lo: f32,
        time_hi: f32,
        min_mz: f32,
        max_mz: f32,
        precursor_mz: Option<f32>,
    ) -> Result<QueryResult> {
        let stream = self.db.stream_index(precursor_mz).dot()?;
        let point = precursor_mz.unwrap_or(0.0);

        match self.db.scan_range_for_time(stream, time_lo, time_hi).dot()? {
            Some((row_lo, row_hi)) => self.query_rows(row_lo, row_hi, min_mz, max_mz, point),
            None => self.query_rows(0, -1, min_mz, max_mz, point),
        }
    }
}
