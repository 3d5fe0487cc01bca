//! SQLite-backed store: an R-tree virtual table for box rectangles, a blob
//! table for payloads, plus the precursor-window, scan-time and metadata
//! tables that make a persisted index self-describing.
//!
//! The R-tree carries the rectangle and precursor-window coordinates; the
//! peak count, layout flag and payload byte range ride along as auxiliary
//! columns. Candidate queries come back ordered by ascending `min_mz`, the
//! order the query engine merges in.

use anyhow::{Result, anyhow, bail};
use anyhow_ext::Context;
use log::info;
use rusqlite::{Connection, DatabaseName, OptionalExtension, params};
use serde::Deserialize;
use serde_rusqlite::from_rows;
use std::io::Read;
use std::path::Path;

use crate::model::{
    BlobRef, BoundingBox, BoxEntry, IndexConfig, PrecursorWindow, WindowTable,
};
use crate::store::{BlobStore, IndexStore, PrecursorWindowTable, SpatialIndex};

const SCHEMA: &str = "
    CREATE VIRTUAL TABLE bounding_box_rtree USING rtree (
        id,
        min_row, max_row,
        min_mz, max_mz,
        min_mz_prec, max_mz_prec,
        +non_zero_count, +is_sparse, +payload_start, +payload_end
    );
    CREATE TABLE bounding_box_data (
        id INTEGER NOT NULL PRIMARY KEY,
        data BLOB NOT NULL
    );
    CREATE TABLE precursor_window (
        stream INTEGER NOT NULL PRIMARY KEY,
        min_mz REAL NOT NULL,
        max_mz REAL NOT NULL
    );
    CREATE TABLE scan_time (
        stream INTEGER NOT NULL,
        scan_row INTEGER NOT NULL,
        time REAL NOT NULL,
        PRIMARY KEY (stream, scan_row)
    );
    CREATE TABLE index_metadata (
        max_rows_per_strip INTEGER NOT NULL,
        max_bb_mz_width REAL NOT NULL,
        lowest_mz REAL NOT NULL,
        highest_mz REAL NOT NULL,
        stream_count INTEGER NOT NULL
    );";

const CANDIDATE_SQL: &str = "
    SELECT id, min_row, max_row, min_mz, max_mz, min_mz_prec, max_mz_prec,
           non_zero_count, is_sparse, payload_start, payload_end
    FROM bounding_box_rtree
    WHERE min_row <= ?1 AND max_row >= ?2
      AND min_mz <= ?3 AND max_mz >= ?4
      AND min_mz_prec <= ?5 AND max_mz_prec > ?5
    ORDER BY min_mz";

/// Everything the ingester writes and the reader queries, in one SQLite
/// database file.
pub struct MzRTreeDb {
    connection: Connection,
}

/// The persisted ingestion parameters of an index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexMetadata {
    pub config: IndexConfig,
    pub stream_count: usize,
}

impl MzRTreeDb {
    /// Create a fresh database at `path` with write-side pragmas applied.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let connection = Connection::open(path.as_ref()).dot()?;
        connection
            .execute_batch(
                "PRAGMA synchronous=OFF;
                 PRAGMA journal_mode=WAL;
                 PRAGMA temp_store=2;
                 PRAGMA cache_size=-100000;",
            )
            .dot()?;
        connection.execute_batch(SCHEMA).dot()?;
        info!("created index database at {:?}", path.as_ref());
        Ok(MzRTreeDb { connection })
    }

    /// Open an existing index database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let connection = Connection::open(path.as_ref()).dot()?;
        Ok(MzRTreeDb { connection })
    }

    /// In-memory database with the schema applied.
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().dot()?;
        connection.execute_batch(SCHEMA).dot()?;
        Ok(MzRTreeDb { connection })
    }

    /// The underlying connection, for ad-hoc queries.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn begin(&self) -> Result<()> {
        self.connection.execute_batch("BEGIN TRANSACTION;").dot()
    }

    pub fn commit(&self) -> Result<()> {
        self.connection.execute_batch("COMMIT TRANSACTION;").dot()
    }

    pub fn insert_windows(&mut self, table: &WindowTable) -> Result<()> {
        for (stream, window) in table.windows().iter().enumerate() {
            self.connection
                .execute(
                    "INSERT INTO precursor_window VALUES (?1, ?2, ?3)",
                    params![stream as i64, window.min_mz, window.max_mz],
                )
                .dot()?;
        }
        Ok(())
    }

    /// Rebuild the window table persisted at ingestion time.
    pub fn window_table(&self) -> Result<WindowTable> {
        let mut stmt = self
            .connection
            .prepare("SELECT min_mz, max_mz FROM precursor_window WHERE stream > 0 ORDER BY stream")
            .dot()?;
        let windows = stmt
            .query_map([], |row| {
                Ok(PrecursorWindow::new(row.get(0)?, row.get(1)?))
            })
            .dot()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .dot()?;

        if windows.is_empty() {
            Ok(WindowTable::evenly_spaced(0))
        } else {
            WindowTable::from_windows(windows).map_err(Into::into)
        }
    }

    pub fn set_metadata(&self, config: &IndexConfig, stream_count: usize) -> Result<()> {
        self.connection
            .execute(
                "INSERT INTO index_metadata VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    config.max_rows_per_strip as i64,
                    config.max_bb_mz_width,
                    config.lowest_mz,
                    config.highest_mz,
                    stream_count as i64,
                ],
            )
            .dot()?;
        Ok(())
    }

    pub fn metadata(&self) -> Result<IndexMetadata> {
        let mut stmt = self
            .connection
            .prepare(
                "SELECT max_rows_per_strip, max_bb_mz_width, lowest_mz, highest_mz, stream_count
                 FROM index_metadata LIMIT 1",
            )
            .dot()?;
        let mut records = from_rows::<MetadataRecord>(stmt.query([]).dot()?);
        let record = match records.next() {
            Some(record) => record.dot()?,
            None => bail!("index database holds no metadata"),
        };

        let config = IndexConfig::new(
            record.max_rows_per_strip as usize,
            record.max_bb_mz_width,
            record.lowest_mz,
            record.highest_mz,
        )?;
        Ok(IndexMetadata {
            config,
            stream_count: record.stream_count as usize,
        })
    }

    /// Stream-local row range acquired inside `[time_lo, time_hi]`, `None`
    /// when no scan of the stream falls in the range.
    pub fn scan_range_for_time(
        &self,
        stream: usize,
        time_lo: f32,
        time_hi: f32,
    ) -> Result<Option<(i64, i64)>> {
        let range: (Option<i64>, Option<i64>) = self
            .connection
            .query_row(
                "SELECT MIN(scan_row), MAX(scan_row) FROM scan_time
                 WHERE stream = ?1 AND time >= ?2 AND time <= ?3",
                params![stream as i64, time_lo, time_hi],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .dot()?;
        Ok(match range {
            (Some(lo), Some(hi)) => Some((lo, hi)),
            _ => None,
        })
    }

    pub fn box_count(&self) -> Result<i64> {
        self.connection
            .query_row("SELECT COUNT(*) FROM bounding_box_rtree", [], |row| row.get(0))
            .dot()
    }
}

#[derive(Deserialize)]
struct MetadataRecord {
    max_rows_per_strip: i64,
    max_bb_mz_width: f32,
    lowest_mz: f32,
    highest_mz: f32,
    stream_count: i64,
}

/// Row shape of [`CANDIDATE_SQL`]. The R-tree stores its coordinates as
/// 32-bit floats, so they come back as REALs and are narrowed here.
#[derive(Deserialize)]
struct BoxEntryRecord {
    id: i64,
    min_row: f64,
    max_row: f64,
    min_mz: f64,
    max_mz: f64,
    min_mz_prec: f64,
    max_mz_prec: f64,
    non_zero_count: i64,
    is_sparse: i64,
    payload_start: i64,
    payload_end: i64,
}

impl From<BoxEntryRecord> for BoxEntry {
    fn from(record: BoxEntryRecord) -> Self {
        BoxEntry {
            id: record.id,
            bbox: BoundingBox {
                min_row: record.min_row as i64,
                max_row: record.max_row as i64,
                min_mz: record.min_mz as f32,
                max_mz: record.max_mz as f32,
                non_zero_count: record.non_zero_count,
                is_sparse: record.is_sparse != 0,
            },
            window: PrecursorWindow::new(record.min_mz_prec as f32, record.max_mz_prec as f32),
            payload: BlobRef {
                key: record.id,
                start: record.payload_start as usize,
                end: record.payload_end as usize,
            },
        }
    }
}

impl SpatialIndex for MzRTreeDb {
    fn insert(&mut self, entry: &BoxEntry) -> Result<()> {
        self.connection
            .execute(
                "INSERT INTO bounding_box_rtree
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.id,
                    entry.bbox.min_row,
                    entry.bbox.max_row,
                    entry.bbox.min_mz,
                    entry.bbox.max_mz,
                    entry.window.min_mz,
                    entry.window.max_mz,
                    entry.bbox.non_zero_count,
                    entry.bbox.is_sparse as i64,
                    entry.payload.start as i64,
                    entry.payload.end as i64,
                ],
            )
            .dot()?;
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
        let mut stmt = self.connection.prepare(CANDIDATE_SQL).dot()?;
        let rows = stmt
            .query(params![max_row, min_row, max_mz, min_mz, precursor_mz])
            .dot()?;

        let mut entries = Vec::new();
        for record in from_rows::<BoxEntryRecord>(rows) {
            entries.push(BoxEntry::from(record.dot()?));
        }
        Ok(entries)
    }
}

impl BlobStore for MzRTreeDb {
    fn put(&mut self, key: i64, bytes: &[u8]) -> Result<()> {
        self.connection
            .execute(
                "INSERT OR REPLACE INTO bounding_box_data VALUES (?1, ?2)",
                params![key, bytes],
            )
            .dot()?;
        Ok(())
    }

    fn get(&self, key: i64) -> Result<Vec<u8>> {
        let mut blob = self
            .connection
            .blob_open(DatabaseName::Main, "bounding_box_data", "data", key, true)
            .dot()?;
        let mut bytes = vec![0u8; blob.size() as usize];
        blob.read_exact(&mut bytes).dot()?;
        Ok(bytes)
    }
}

impl PrecursorWindowTable for MzRTreeDb {
    fn lookup(&self, precursor_mz: Option<f32>) -> Result<PrecursorWindow> {
        let window = match precursor_mz {
            None => self
                .connection
                .query_row(
                    "SELECT min_mz, max_mz FROM precursor_window WHERE stream = 0",
                    [],
                    |row| Ok(PrecursorWindow::new(row.get(0)?, row.get(1)?)),
                )
                .optional()
                .dot()?,
            Some(p) => self
                .connection
                .query_row(
                    "SELECT min_mz, max_mz FROM precursor_window
                     WHERE min_mz <= ?1 AND max_mz >= ?1
                     ORDER BY stream LIMIT 1",
                    [p],
                    |row| Ok(PrecursorWindow::new(row.get(0)?, row.get(1)?)),
                )
                .optional()
                .dot()?,
        };
        window.ok_or_else(|| {
            anyhow!("no isolation window covers precursor {precursor_mz:?}")
        })
    }

    fn stream_count(&self) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM precursor_window", [], |row| row.get(0))
            .dot()?;
        Ok(count as usize)
    }

    fn stream_index(&self, precursor_mz: Option<f32>) -> Result<usize> {
        match precursor_mz {
            None => Ok(0),
            Some(p) => {
                let below: i64 = self
                    .connection
                    .query_row(
                        "SELECT COUNT(*) FROM precursor_window WHERE min_mz <= ?1",
                        [p],
                        |row| row.get(0),
                    )
                    .dot()?;
                Ok((below as usize).saturating_sub(1))
            }
        }
    }
}

impl IndexStore for MzRTreeDb {
    fn record_scan_time(&mut self, stream: usize, row: i64, time: f32) -> Result<()> {
        self.connection
            .execute(
                "INSERT OR REPLACE INTO scan_time VALUES (?1, ?2, ?3)",
                params![stream as i64, row, time],
            )
            .dot()?;
        Ok(())
    }
}
