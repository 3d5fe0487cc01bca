//! Contracts the core consumes from its storage collaborators, together
//! with in-memory implementations suitable for tests and small embedded
//! indexes. The SQLite-backed implementation lives in [`crate::sqlite`].

use anyhow::{Result, anyhow};
use fallible_iterator::FallibleIterator;
use std::collections::HashMap;

use crate::model::{
    BoxEntry, Peak, PrecursorWindow, SortField, SortOrder, WindowTable, sort_entries,
};

/// One scan pulled from an acquisition source.
///
/// `peaks` carries the raw (m/z, intensity) pairs in source order, which is
/// not guaranteed to be sorted; the ingest side sorts before building rows.
#[derive(Clone, Debug, PartialEq)]
pub struct Scan {
    /// Absolute position of the scan in the acquisition.
    pub index: i64,
    /// Retention time in seconds.
    pub time: f32,
    pub ms_level: i64,
    /// Precursor selection m/z, absent on non-selected scans.
    pub precursor_mz: Option<f32>,
    pub peaks: Vec<Peak>,
}

/// Rectangle-containment search over persisted box descriptors.
pub trait SpatialIndex {
    fn insert(&mut self, entry: &BoxEntry) -> Result<()>;

    /// All entries whose rectangle intersects the query rectangle and whose
    /// precursor window contains `precursor_mz` (half-open containment),
    /// sorted ascending by `min_mz`. Callers must not assume any ordering
    /// among entries sharing a `min_mz`.
    fn query(
        &self,
        min_row: i64,
        max_row: i64,
        min_mz: f32,
        max_mz: f32,
        precursor_mz: f32,
    ) -> Result<Vec<BoxEntry>>;
}

/// Payload bytes keyed by box identifier.
pub trait BlobStore {
    fn put(&mut self, key: i64, bytes: &[u8]) -> Result<()>;
    fn get(&self, key: i64) -> Result<Vec<u8>>;
}

/// Resolution of precursor values to isolation windows and stream indexes.
pub trait PrecursorWindowTable {
    /// Window covering the precursor (inclusive bounds); `None` resolves to
    /// the fallback window of the base stream.
    fn lookup(&self, precursor_mz: Option<f32>) -> Result<PrecursorWindow>;

    fn stream_count(&self) -> Result<usize>;

    /// Stream a precursor value is acquired on; 0 for the base stream.
    fn stream_index(&self, precursor_mz: Option<f32>) -> Result<usize>;
}

/// A lazy, finite, non-restartable sequence of scans.
pub trait ScanSource {
    fn next_scan(&mut self) -> Result<Option<Scan>>;
}

/// Any fallible iterator over scans is a scan source.
impl<I> ScanSource for I
where
    I: FallibleIterator<Item = Scan, Error = anyhow::Error>,
{
    fn next_scan(&mut self) -> Result<Option<Scan>> {
        self.next()
    }
}

/// A scan source draining a pre-built list.
pub struct VecScanSource {
    scans: std::vec::IntoIter<Scan>,
}

impl VecScanSource {
    pub fn new(scans: Vec<Scan>) -> Self {
        VecScanSource {
            scans: scans.into_iter(),
        }
    }
}

impl ScanSource for VecScanSource {
    fn next_scan(&mut self) -> Result<Option<Scan>> {
        Ok(self.scans.next())
    }
}

/// Everything ingestion hands its results to.
pub trait IndexStore: SpatialIndex + BlobStore {
    /// Record the retention time of one stream-local row. Stores that do not
    /// answer time-range queries keep the default no-op.
    fn record_scan_time(&mut self, stream: usize, row: i64, time: f32) -> Result<()> {
        let _ = (stream, row, time);
        Ok(())
    }
}

impl PrecursorWindowTable for WindowTable {
    fn lookup(&self, precursor_mz: Option<f32>) -> Result<PrecursorWindow> {
        match precursor_mz {
            None => Ok(self.windows()[0]),
            Some(p) => self
                .windows()
                .iter()
                .find(|w| w.covers(p))
                .copied()
                .ok_or_else(|| anyhow!("precursor {p} lies outside every isolation window")),
        }
    }

    fn stream_count(&self) -> Result<usize> {
        Ok(self.len())
    }

    fn stream_index(&self, precursor_mz: Option<f32>) -> Result<usize> {
        Ok(match precursor_mz {
            None => 0,
            Some(p) => self
                .windows()
                .iter()
                .filter(|w| w.min_mz <= p)
                .count()
                .saturating_sub(1),
        })
    }
}

/// Fully in-memory store: linear-scan spatial index plus a blob map.
#[derive(Default, Clone, Debug)]
pub struct MemoryStore {
    entries: Vec<BoxEntry>,
    blobs: HashMap<i64, Vec<u8>>,
    scan_times: Vec<(usize, i64, f32)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn entries(&self) -> &[BoxEntry] {
        &self.entries
    }

    pub fn box_count(&self) -> usize {
        self.entries.len()
    }

    /// Stream-local row range acquired inside `[time_lo, time_hi]`.
    pub fn scan_range_for_time(
        &self,
        stream: usize,
        time_lo: f32,
        time_hi: f32,
    ) -> Option<(i64, i64)> {
        let mut range: Option<(i64, i64)> = None;
        for &(s, row, time) in &self.scan_times {
            if s == stream && time >= time_lo && time <= time_hi {
                range = Some(match range {
                    None => (row, row),
                    Some((lo, hi)) => (lo.min(row), hi.max(row)),
                });
            }
        }
        range
    }
}

impl SpatialIndex for MemoryStore {
    fn insert(&mut self, entry: &BoxEntry) -> Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn query(
        &self,
        min_row: i64,
        max_row: i64,
        min_mz: f32,
        max_mz: f32,
        precursor_mz: f32,
    ) -> Result<Vec<BoxEntry>> {
        let mut hits: Vec<BoxEntry> = self
            .entries
            .iter()
            .filter(|e| {
                e.bbox.intersects_rows(min_row, max_row)
                    && e.bbox.intersects_mz(min_mz, max_mz)
                    && e.window.contains(precursor_mz)
            })
            .cloned()
            .collect();
        sort_entries(&mut hits, SortField::MinMz, SortOrder::Ascending);
        Ok(hits)
    }
}

impl BlobStore for MemoryStore {
    fn put(&mut self, key: i64, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(key, bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: i64) -> Result<Vec<u8>> {
        self.blobs
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("no payload stored for box {key}"))
    }
}

impl IndexStore for MemoryStore {
    fn record_scan_time(&mut self, stream: usize, row: i64, time: f32) -> Result<()> {
        self.scan_times.push((stream, row, time));
        Ok(())
    }
}
