//! Hybrid time-series store for integration records.
//!
//! [`TimeSeriesStore`] combines a write-behind buffer (records waiting to
//! be flushed), a date-partitioned on-disk archive, and a rolling
//! in-memory cache of the most recent persisted records. A producer
//! thread feeds [`put`]; any number of reader threads serve point and
//! range queries concurrently.
//!
//! # Locking
//!
//! Two mutexes guard disjoint state:
//!
//! - the **store lock** covers the two rings and the in-memory bounds and
//!   is only ever held for short, bounded operations;
//! - the **directory lock** covers path construction, directory creation,
//!   and file search/open, which can take arbitrarily long.
//!
//! A range query releases the store lock while it walks the disk, so the
//! producer is never blocked behind storage I/O, and re-acquires it only
//! to splice in the in-memory tail. The store lock is acquired before the
//! directory lock wherever both are needed; the directory lock is never
//! held while acquiring the store lock.
//!
//! # Record lifetime
//!
//! `Pending` (write buffer) → `Committed & cached` (on disk, mirrored in
//! the cache) → `Committed & cold` (evicted from the cache) → `Purged`
//! (removed by the retention sweep).
//!
//! [`put`]: TimeSeriesStore::put

pub mod layout;
pub mod retention;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::record::IntegrationRecord;
use crate::ring::EpochRing;
use layout::ArchiveLayout;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// State guarded by the store lock.
struct StoreState {
    /// Records awaiting flush, oldest first.
    write_buf: EpochRing<Arc<IntegrationRecord>>,
    /// Most recent persisted records, mirroring the tail of the archive.
    cache: EpochRing<Arc<IntegrationRecord>>,
    /// Timestamp of the oldest cached record; 0 while the cache is empty.
    oldest_in_memory: i64,
    /// Timestamp of the newest cached record; 0 while the cache is empty.
    newest_in_memory: i64,
}

/// Bounded, thread-safe archive of integration records.
pub struct TimeSeriesStore {
    state: Mutex<StoreState>,
    /// The directory lock; owns all filesystem layout operations.
    disk: Mutex<ArchiveLayout>,
    config: StoreConfig,
}

impl TimeSeriesStore {
    /// Creates a store over the archive rooted at `root`.
    ///
    /// Nothing is touched on disk until the first flush; an existing
    /// archive is served as-is.
    pub fn new(root: impl AsRef<Path>, config: StoreConfig) -> Self {
        Self {
            state: Mutex::new(StoreState {
                write_buf: EpochRing::new(config.write_buffer_size),
                cache: EpochRing::new(config.cache_size),
                oldest_in_memory: 0,
                newest_in_memory: 0,
            }),
            disk: Mutex::new(ArchiveLayout::new(root)),
            config,
        }
    }

    /// Adds a record to the store, taking ownership of it.
    ///
    /// The record is queued for the next flush and mirrored into the
    /// cache. When the queue reaches its capacity the flush happens
    /// synchronously on the calling thread, so a producer stalls briefly
    /// under back-pressure rather than losing data. A flush failure is
    /// logged; the producer keeps running.
    pub fn put(&self, record: IntegrationRecord) {
        let record = Arc::new(record);
        let mut state = self.lock_state();

        state.write_buf.put(Arc::clone(&record));
        if state.write_buf.len() == self.config.write_buffer_size {
            if let Err(err) = self.flush_locked(&mut state) {
                error!("flush failed: {err}");
            }
        }

        // Cache the record; a full ring drops its evicted entry.
        state.cache.put(Arc::clone(&record));
        if let Some(oldest) = state.cache.get(state.cache.oldest_epoch()) {
            state.oldest_in_memory = oldest.timestamp;
        }
        state.newest_in_memory = record.timestamp;
    }

    /// Writes all queued records to the archive.
    ///
    /// # Errors
    ///
    /// Returns the first write failure. Files written before the failure
    /// stay on disk; the queue is cleared either way, so the caller is
    /// expected to alert an operator rather than retry blindly.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock_state();
        self.flush_locked(&mut state)
    }

    /// Flush with the store lock already held. Takes the directory lock
    /// for the duration of the pass.
    fn flush_locked(&self, state: &mut StoreState) -> Result<()> {
        let disk = self.lock_disk();

        // Reclaim disk space before adding to it.
        if let Some(max_age) = self.config.max_age {
            let removed = retention::sweep(&disk, max_age.as_micros() as i64, now_micros());
            if removed > 0 {
                debug!(removed, "retention sweep removed files");
            }
        }

        let result = Self::write_queue(&disk, &state.write_buf);
        state.write_buf.clear();
        result
    }

    /// Walks the queue oldest to newest, appending runs of records that
    /// share a destination minute file in one open.
    fn write_queue(disk: &ArchiveLayout, queue: &EpochRing<Arc<IntegrationRecord>>) -> Result<()> {
        let newest = queue.latest_epoch();
        let mut epoch = queue.oldest_epoch();

        while epoch <= newest {
            let Some(first) = queue.get(epoch) else {
                break;
            };
            let path = disk.minute_path(first.timestamp);
            disk.ensure_dirs(&path)?;
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut writer = BufWriter::new(file);
            debug!(path = %path.display(), "flushing to minute file");

            while epoch <= newest {
                let Some(record) = queue.get(epoch) else {
                    break;
                };
                if disk.minute_path(record.timestamp) != path {
                    // Destination changed; close this file and open the next.
                    break;
                }
                record.write_to(&mut writer)?;
                epoch += 1;
            }
            writer.flush()?;
        }
        Ok(())
    }

    /// Returns the first record with timestamp strictly greater than
    /// `micros`, or `None` when no such record exists.
    ///
    /// Served from the cache when `micros` falls inside the in-memory
    /// window; otherwise the minute file that would hold `micros` is
    /// scanned, continuing into following files when that minute is
    /// absent or exhausted.
    pub fn get_after(&self, micros: i64) -> Option<IntegrationRecord> {
        let state = self.lock_state();
        if state.oldest_in_memory != 0
            && micros >= state.oldest_in_memory
            && micros < state.newest_in_memory
        {
            return Self::cache_after(&state, micros);
        }

        // Outside the window: search the archive, store lock still held
        // so a concurrent flush cannot race the scan.
        let disk = self.lock_disk();
        let positioned = match disk.find_after(micros) {
            Ok(found) => found,
            Err(err) => {
                warn!("point lookup scan failed: {err}");
                return None;
            }
        };
        if let Some(mut file) = positioned {
            drop(disk);
            return Self::decode_one(&mut file);
        }

        // No record in that minute; walk forward until one shows up.
        let mut epoch = micros;
        loop {
            match disk.next_file(epoch) {
                Ok(Some((file_epoch, mut file))) => {
                    // Every record here is in a later minute than the
                    // argument, so the first decodable one is the answer.
                    if let Some(record) = Self::decode_one(&mut file) {
                        return Some(record);
                    }
                    epoch = file_epoch;
                }
                Ok(None) => return None,
                Err(err) => {
                    warn!("forward search failed: {err}");
                    return None;
                }
            }
        }
    }

    /// Returns the most recent record, or `None` while the store has
    /// never been fed.
    pub fn get_recent(&self) -> Option<IntegrationRecord> {
        let state = self.lock_state();
        if state.newest_in_memory == 0 {
            return None;
        }
        state
            .cache
            .latest()
            .map(|(_, record)| (*record).clone())
    }

    /// Returns every record with timestamp in `[start, end]`, ascending;
    /// `end == 0` means open-ended up to the newest data.
    ///
    /// The result is truncated (never an error) once it reaches the
    /// configured `max_results`. An empty vector means no record matched.
    ///
    /// The disk half of the walk runs without the store lock so the
    /// producer keeps going; the lock is re-acquired as the walk nears
    /// the in-memory window and held through the splice. A record is
    /// served from disk iff its timestamp is below `oldest_in_memory` as
    /// read under that lock; everything at or past the bound comes from
    /// the cache, which guarantees the two halves join with no gap and no
    /// duplicate.
    ///
    /// # Errors
    ///
    /// Returns an error only when the initial archive access fails
    /// outright. Corruption or I/O trouble part way through the walk
    /// ends the disk phase with what was read so far, and is logged.
    pub fn get_range(&self, start: i64, end: i64) -> Result<Vec<IntegrationRecord>> {
        let mut results: Vec<IntegrationRecord> = Vec::new();
        let max_results = self.config.max_results;

        let mut state = Some(self.lock_state());
        let snapshot_oldest = state.as_ref().unwrap().oldest_in_memory;
        let in_memory = {
            let st = state.as_ref().unwrap();
            st.oldest_in_memory != 0 && start >= st.oldest_in_memory && start < st.newest_in_memory
        };

        // Set when the requested end (or the result cap) was reached on
        // disk; the memory half is skipped entirely in that case.
        let mut full = false;

        if !in_memory {
            // Release the store lock for the disk walk.
            state = None;
            full = self.walk_disk(start, end, snapshot_oldest, &mut state, &mut results)?;
        }

        if !full {
            if state.is_none() {
                state = Some(self.lock_state());
            }
            let st = state.as_ref().unwrap();
            if st.oldest_in_memory != 0 {
                let mut epoch = st.cache.oldest_epoch();
                let newest = st.cache.latest_epoch();
                while epoch <= newest && results.len() < max_results {
                    if let Some(record) = st.cache.get(epoch) {
                        if record.timestamp >= start
                            && record.timestamp > results.last().map_or(i64::MIN, |r| r.timestamp)
                            && (end == 0 || record.timestamp <= end)
                        {
                            results.push((*record).clone());
                        }
                    }
                    epoch += 1;
                }
            }
        }

        Ok(results)
    }

    /// Disk phase of a range query. Appends matches to `results` and
    /// returns true when the query is complete (end bound or cap hit)
    /// and the memory half must be skipped. On return with `false`, the
    /// store lock has been re-acquired into `state` whenever the walk
    /// reached the in-memory boundary.
    fn walk_disk<'a>(
        &'a self,
        start: i64,
        end: i64,
        snapshot_oldest: i64,
        state: &mut Option<MutexGuard<'a, StoreState>>,
        results: &mut Vec<IntegrationRecord>,
    ) -> Result<bool> {
        // Position at the first record with timestamp >= start.
        let origin = start.saturating_sub(1);
        let mut file = {
            let disk = self.lock_disk();
            match disk.find_after(origin)? {
                Some(file) => Some((origin, file)),
                None => disk.next_file(origin)?,
            }
        };

        while let Some((file_epoch, mut handle)) = file.take() {
            loop {
                let record = match IntegrationRecord::read_from(&mut handle) {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("range walk stopping on corrupt record: {err}");
                        return Ok(false);
                    }
                };

                // Nearing the cached window: take the store lock so the
                // boundary cannot move under a concurrent flush.
                if state.is_none() && snapshot_oldest != 0 && record.timestamp >= snapshot_oldest {
                    *state = Some(self.lock_state());
                }
                if let Some(st) = state.as_ref() {
                    if st.oldest_in_memory != 0 && record.timestamp >= st.oldest_in_memory {
                        // This record and everything later is cached; the
                        // memory half takes over from here.
                        return Ok(false);
                    }
                }
                if end != 0 && record.timestamp > end {
                    return Ok(true);
                }
                if record.timestamp >= start {
                    results.push(record);
                    if results.len() >= self.config.max_results {
                        warn!(
                            max_results = self.config.max_results,
                            "range query truncated at result cap"
                        );
                        return Ok(true);
                    }
                }
            }

            let disk = self.lock_disk();
            file = match disk.next_file(file_epoch) {
                Ok(next) => next,
                Err(err) => {
                    warn!("range walk stopping, next-file search failed: {err}");
                    None
                }
            };
        }
        Ok(false)
    }

    /// Linear scan of the cache for the first record past `micros`.
    fn cache_after(state: &StoreState, micros: i64) -> Option<IntegrationRecord> {
        let newest = state.cache.latest_epoch();
        let mut epoch = state.cache.oldest_epoch();
        while epoch <= newest {
            if let Some(record) = state.cache.get(epoch) {
                if record.timestamp > micros {
                    return Some((*record).clone());
                }
            }
            epoch += 1;
        }
        None
    }

    fn decode_one(file: &mut std::fs::File) -> Option<IntegrationRecord> {
        match IntegrationRecord::read_from(file) {
            Ok(found) => found,
            Err(err) => {
                warn!("failed to decode record: {err}");
                None
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_disk(&self) -> MutexGuard<'_, ArchiveLayout> {
        self.disk.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TimeSeriesStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!("flush on close failed: {err}");
        }
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
