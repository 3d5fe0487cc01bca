//! Ingestion: demultiplexes an interleaved acquisition into per-stream row
//! sequences, buffers bounded strips and flushes every strip through the
//! builder and the codec into the store.
//!
//! Streams are processed strictly one after another and only one strip is
//! resident at a time; the strip is dropped as soon as its boxes are
//! persisted, which bounds peak memory to a single strip regardless of
//! acquisition size.

use anyhow::Result;
use anyhow_ext::Context;
use itertools::{Itertools, MinMaxResult};
use log::{debug, info, warn};
use std::cmp::Ordering;

use crate::bb_builder::build_boxes;
use crate::codec::encode_box;
use crate::model::{BlobRef, BoxEntry, IndexConfig, Peak, PrecursorWindow, Strip, WindowTable};
use crate::store::{IndexStore, ScanSource};

/// A stream that had to be abandoned mid-ingestion. Data persisted for
/// streams that completed earlier stays valid.
#[derive(Debug)]
pub struct StreamFailure {
    pub stream: usize,
    pub error: anyhow::Error,
}

/// Counters for one ingestion run.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub streams: usize,
    pub rows: u64,
    pub boxes: u64,
    pub accepted_peaks: u64,
    pub dropped_peaks: u64,
    pub failures: Vec<StreamFailure>,
}

/// Drives ingestion of one acquisition into an [`IndexStore`].
pub struct SwathIngester<'a> {
    config: &'a IndexConfig,
    windows: &'a WindowTable,
}

impl<'a> SwathIngester<'a> {
    pub fn new(config: &'a IndexConfig, windows: &'a WindowTable) -> Self {
        SwathIngester { config, windows }
    }

    /// Ingest every stream of the acquisition.
    ///
    /// Scan sources are single-pass, so the ingester asks `make_source` for
    /// a fresh source per stream and takes every `stream_count`-th scan
    /// starting at the stream's offset. A failing stream is logged,
    /// recorded in the returned stats and does not stop the run.
    pub fn ingest<St, Src, F>(&self, mut make_source: F, store: &mut St) -> Result<IngestStats>
    where
        St: IndexStore + ?Sized,
        Src: ScanSource,
        F: FnMut(usize) -> Result<Src>,
    {
        let stream_count = self.windows.len();
        let mut stats = IngestStats {
            streams: stream_count,
            ..IngestStats::default()
        };
        let mut next_box_id: i64 = 1;

        for stream in 0..stream_count {
            let window = self.windows.windows()[stream];
            let outcome = make_source(stream).and_then(|mut source| {
                self.ingest_stream(
                    &mut source,
                    stream,
                    stream_count,
                    window,
                    store,
                    &mut next_box_id,
                    &mut stats,
                )
            });
            if let Err(error) = outcome {
                warn!("stream {stream} aborted: {error:#}");
                stats.failures.push(StreamFailure { stream, error });
            }
        }

        info!(
            "ingestion finished: {} streams, {} rows, {} boxes, {} peaks kept, {} dropped, {} failed streams",
            stats.streams,
            stats.rows,
            stats.boxes,
            stats.accepted_peaks,
            stats.dropped_peaks,
            stats.failures.len()
        );
        Ok(stats)
    }

    fn ingest_stream<St, Src>(
        &self,
        source: &mut Src,
        stream: usize,
        stream_count: usize,
        window: PrecursorWindow,
        store: &mut St,
        next_box_id: &mut i64,
        stats: &mut IngestStats,
    ) -> Result<()>
    where
        St: IndexStore + ?Sized,
        Src: ScanSource,
    {
        let mut strip = Strip::new(0, self.config.max_rows_per_strip);
        let mut position: usize = 0;
        let mut row: i64 = 0;

        while let Some(scan) = source.next_scan().dot()? {
            let at = position;
            position += 1;
            if at % stream_count != stream {
                continue;
            }

            let peaks = self.accept_peaks(scan.peaks, stats);
            store.record_scan_time(stream, row, scan.time).dot()?;
            strip.push_row(peaks);
            row += 1;
            stats.rows += 1;

            if strip.is_full() {
                self.flush_strip(&strip, window, store, next_box_id, stats)
                    .dot()?;
                let next = Strip::new(strip.index() + 1, self.config.max_rows_per_strip);
                strip = next;
            }
        }

        // the source ran out mid-strip: flush what is buffered
        if !strip.is_empty() {
            self.flush_strip(&strip, window, store, next_box_id, stats)
                .dot()?;
        }

        debug!("stream {stream} complete: {row} rows");
        Ok(())
    }

    /// Acceptance filter and row normalization: keep peaks inside the
    /// configured m/z window with positive intensity, sorted ascending by
    /// m/z (sources do not guarantee sortedness).
    fn accept_peaks(&self, raw: Vec<Peak>, stats: &mut IngestStats) -> Vec<Peak> {
        let before = raw.len();
        let mut peaks: Vec<Peak> = raw
            .into_iter()
            .filter(|p| {
                p.mz >= self.config.lowest_mz
                    && p.mz <= self.config.highest_mz
                    && p.intensity > 0.0
            })
            .collect();
        peaks.sort_by(|a, b| a.mz.partial_cmp(&b.mz).unwrap_or(Ordering::Equal));

        stats.accepted_peaks += peaks.len() as u64;
        stats.dropped_peaks += (before - peaks.len()) as u64;
        peaks
    }

    fn flush_strip<St>(
        &self,
        strip: &Strip,
        window: PrecursorWindow,
        store: &mut St,
        next_box_id: &mut i64,
        stats: &mut IngestStats,
    ) -> Result<()>
    where
        St: IndexStore + ?Sized,
    {
        let (mz_lo, mz_hi) = match strip.rows().iter().flatten().map(|p| p.mz).minmax() {
            MinMaxResult::NoElements => {
                debug!("strip {} holds no peaks, nothing to flush", strip.index());
                return Ok(());
            }
            MinMaxResult::OneElement(mz) => (mz, mz),
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };

        let boxes = build_boxes(strip, mz_lo, mz_hi, self.config.max_bb_mz_width);
        debug!(
            "strip {}: {} rows, mz extent [{mz_lo}, {mz_hi}], {} boxes",
            strip.index(),
            strip.len(),
            boxes.len()
        );

        for bbox in boxes {
            let payload = encode_box(&bbox, strip);
            let id = *next_box_id;
            *next_box_id += 1;

            store.put(id, &payload).dot()?;
            store
                .insert(&BoxEntry {
                    id,
                    bbox,
                    window,
                    payload: BlobRef::whole(id, payload.len()),
                })
                .dot()?;
            stats.boxes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryRegion, range_query};
    use crate::store::{MemoryStore, Scan, VecScanSource};

    /// Two interleaved streams: the base stream and one precursor window.
    /// Every scan carries a single peak encoding its source position so the
    /// demultiplexing is visible in the results.
    fn interleaved_scans(count: usize) -> Vec<Scan> {
        (0..count)
            .map(|i| {
                let stream = i % 2;
                Scan {
                    index: i as i64,
                    time: i as f32,
                    ms_level: if stream == 0 { 1 } else { 2 },
                    precursor_mz: if stream == 0 { None } else { Some(410.0) },
                    peaks: vec![Peak::new(500.0 + i as f32, 1.0 + i as f32)],
                }
            })
            .collect()
    }

    fn windows() -> WindowTable {
        WindowTable::from_windows(vec![PrecursorWindow::new(400.0, 425.0)]).unwrap()
    }

    #[test]
    fn test_streams_are_demultiplexed_by_position() {
        let config = IndexConfig::new(8, 5.0, 0.0, 2500.0).unwrap();
        let windows = windows();
        let scans = interleaved_scans(6);
        let mut store = MemoryStore::new();

        let stats = SwathIngester::new(&config, &windows)
            .ingest(|_| Ok(VecScanSource::new(scans.clone())), &mut store)
            .unwrap();

        assert!(stats.failures.is_empty());
        assert_eq!(stats.rows, 6);
        assert_eq!(stats.accepted_peaks, 6);

        // base stream: source positions 0, 2, 4 land on rows 0, 1, 2
        let base = range_query(
            &store,
            &store,
            QueryRegion {
                min_row: 0,
                max_row: 2,
                min_mz: 0.0,
                max_mz: 2500.0,
                precursor_mz: 0.0,
            },
        )
        .unwrap();
        assert_eq!(base.row(0), &[Peak::new(500.0, 1.0)]);
        assert_eq!(base.row(1), &[Peak::new(502.0, 3.0)]);
        assert_eq!(base.row(2), &[Peak::new(504.0, 5.0)]);

        // precursor stream: positions 1, 3, 5
        let swath = range_query(
            &store,
            &store,
            QueryRegion {
                min_row: 0,
                max_row: 2,
                min_mz: 0.0,
                max_mz: 2500.0,
                precursor_mz: 410.0,
            },
        )
        .unwrap();
        assert_eq!(swath.row(0), &[Peak::new(501.0, 2.0)]);
        assert_eq!(swath.row(2), &[Peak::new(505.0, 6.0)]);
    }

    #[test]
    fn test_partial_strip_is_flushed_on_exhaustion() {
        // strip capacity 2, three rows per stream: the trailing row must
        // still be persisted, addressed past the first strip
        let config = IndexConfig::new(2, 5.0, 0.0, 2500.0).unwrap();
        let windows = windows();
        let scans = interleaved_scans(6);
        let mut store = MemoryStore::new();

        SwathIngester::new(&config, &windows)
            .ingest(|_| Ok(VecScanSource::new(scans.clone())), &mut store)
            .unwrap();

        let base = range_query(
            &store,
            &store,
            QueryRegion {
                min_row: 2,
                max_row: 2,
                min_mz: 0.0,
                max_mz: 2500.0,
                precursor_mz: 0.0,
            },
        )
        .unwrap();
        assert_eq!(base.row(2), &[Peak::new(504.0, 5.0)]);

        // boxes from different strips never share rows
        for entry in store.entries() {
            assert!(entry.bbox.min_row / 2 == entry.bbox.max_row / 2);
        }
    }

    #[test]
    fn test_acceptance_filter_and_row_sorting() {
        let config = IndexConfig::new(4, 50.0, 400.0, 1200.0).unwrap();
        let windows = windows();
        let scans = vec![Scan {
            index: 0,
            time: 0.0,
            ms_level: 1,
            precursor_mz: None,
            peaks: vec![
                Peak::new(900.0, 4.0),
                Peak::new(100.0, 9.0),  // below lowest_mz
                Peak::new(880.0, 2.0),  // out of order on purpose
                Peak::new(1500.0, 3.0), // above highest_mz
                Peak::new(890.0, 0.0),  // non-positive intensity
            ],
        }];
        let mut store = MemoryStore::new();

        let stats = SwathIngester::new(&config, &windows)
            .ingest(
                |stream| {
                    Ok(VecScanSource::new(if stream == 0 {
                        scans.clone()
                    } else {
                        Vec::new()
                    }))
                },
                &mut store,
            )
            .unwrap();

        assert_eq!(stats.accepted_peaks, 2);
        assert_eq!(stats.dropped_peaks, 3);

        let result = range_query(
            &store,
            &store,
            QueryRegion {
                min_row: 0,
                max_row: 0,
                min_mz: 400.0,
                max_mz: 1200.0,
                precursor_mz: 0.0,
            },
        )
        .unwrap();
        assert_eq!(result.row(0), &[Peak::new(880.0, 2.0), Peak::new(900.0, 4.0)]);
    }

    #[test]
    fn test_failing_stream_does_not_stop_the_run() {
        let config = IndexConfig::new(4, 5.0, 0.0, 2500.0).unwrap();
        let windows = windows();
        let scans = interleaved_scans(4);
        let mut store = MemoryStore::new();

        let stats = SwathIngester::new(&config, &windows)
            .ingest(
                |stream| {
                    if stream == 0 {
                        anyhow::bail!("source unavailable")
                    }
                    Ok(VecScanSource::new(scans.clone()))
                },
                &mut store,
            )
            .unwrap();

        assert_eq!(stats.failures.len(), 1);
        assert_eq!(stats.failures[0].stream, 0);
        // stream 1 still made it in
        assert!(store.box_count() > 0);
    }

    #[test]
    fn test_scan_times_are_recorded_per_stream() {
        let config = IndexConfig::new(8, 5.0, 0.0, 2500.0).unwrap();
        let windows = windows();
        let scans = interleaved_scans(6);
        let mut store = MemoryStore::new();

        SwathIngester::new(&config, &windows)
            .ingest(|_| Ok(VecScanSource::new(scans.clone())), &mut store)
            .unwrap();

        // base stream rows 0..=2 were acquired at times 0, 2, 4
        assert_eq!(store.scan_range_for_time(0, 1.5, 4.5), Some((1, 2)));
        // precursor stream at times 1, 3, 5
        assert_eq!(store.scan_range_for_time(1, 1.0, 3.0), Some((0, 1)));
    }
}
