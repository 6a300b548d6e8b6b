//! Integration tests for the time-series store.
//!
//! These verify the full record lifecycle: write-behind buffering,
//! grouped flushes into minute files, range queries that straddle the
//! memory/disk boundary, point lookups across data gaps, retention, and
//! serving a cold archive after a restart.

use fringe::record::IntegrationRecord;
use fringe::store::layout::{ArchiveLayout, DAY_MICROS, MINUTE_MICROS};
use fringe::store::now_micros;
use fringe::{StoreConfig, TimeSeriesStore};
use std::time::Duration;
use tempfile::TempDir;

// 2020-01-01 00:00:00 UTC.
const BASE: i64 = 1_577_836_800_000_000;

/// A record whose scalars encode its timestamp, so any mix-up between
/// records shows as a field mismatch.
fn rec(timestamp: i64) -> IntegrationRecord {
    IntegrationRecord {
        timestamp,
        power1: (timestamp % 1_000_000_007) as f32,
        power2: 2.0,
        cross_power: 3.0,
        amplitude: 0.5,
        phase: -0.25,
        ..IntegrationRecord::default()
    }
}

fn timestamps(records: &[IntegrationRecord]) -> Vec<i64> {
    records.iter().map(|r| r.timestamp).collect()
}

// ============================================================================
// Flush behavior
// ============================================================================

#[test]
fn test_full_write_buffer_flushes_into_grouped_minute_files() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::default()
        .with_write_buffer_size(4)
        .with_cache_size(8);
    let store = TimeSeriesStore::new(dir.path(), config);

    // Two records in one minute, two in the next; the fourth put
    // triggers the flush.
    let times = [
        BASE,
        BASE + 10_000_000,
        BASE + MINUTE_MICROS,
        BASE + MINUTE_MICROS + 10_000_000,
    ];
    for &ts in &times {
        store.put(rec(ts));
    }

    let layout = ArchiveLayout::new(dir.path());
    for chunk in times.chunks(2) {
        let path = layout.minute_path(chunk[0]);
        assert!(path.exists(), "missing minute file {}", path.display());
        let mut file = std::fs::File::open(&path).unwrap();
        for &ts in chunk {
            let decoded = IntegrationRecord::read_from(&mut file).unwrap().unwrap();
            assert_eq!(decoded, rec(ts));
        }
        assert!(IntegrationRecord::read_from(&mut file).unwrap().is_none());
    }
}

#[test]
fn test_flush_failure_preserves_earlier_files() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::default()
        .with_write_buffer_size(16)
        .with_cache_size(4);
    let store = TimeSeriesStore::new(dir.path(), config);

    let day1 = BASE;
    let day2 = BASE + DAY_MICROS;
    store.put(rec(day1));
    store.put(rec(day2));

    // Block the second destination: a plain file where the day directory
    // should go.
    let layout = ArchiveLayout::new(dir.path());
    let blocked_dir = layout.minute_path(day2).parent().unwrap().to_path_buf();
    std::fs::create_dir_all(blocked_dir.parent().unwrap()).unwrap();
    std::fs::write(&blocked_dir, b"in the way").unwrap();

    assert!(store.flush().is_err());

    // The first day's file made it to disk intact.
    let mut file = std::fs::File::open(layout.minute_path(day1)).unwrap();
    let decoded = IntegrationRecord::read_from(&mut file).unwrap().unwrap();
    assert_eq!(decoded, rec(day1));

    // The queue was cleared; a retry has nothing left to write.
    assert!(store.flush().is_ok());
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_range_query_straddles_memory_and_disk() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::default()
        .with_write_buffer_size(2)
        .with_cache_size(3);
    let store = TimeSeriesStore::new(dir.path(), config);

    // 40-second cadence; flushes happen after every second put, so the
    // tail lives in memory while the head is only on disk.
    let times: Vec<i64> = (0..6).map(|i| BASE + i * 40_000_000).collect();
    for &ts in &times {
        store.put(rec(ts));
    }

    let all = store.get_range(times[0], 0).unwrap();
    assert_eq!(timestamps(&all), times);
    for record in &all {
        assert_eq!(record, &rec(record.timestamp));
    }

    // Inclusive on both bounds, straddling the boundary.
    let middle = store.get_range(times[1], times[4]).unwrap();
    assert_eq!(timestamps(&middle), times[1..=4]);

    // A range entirely inside the cached window never touches disk.
    let tail = store.get_range(times[4], 0).unwrap();
    assert_eq!(timestamps(&tail), times[4..]);

    // No match is an empty result, not a failure.
    let none = store.get_range(times[5] + 1, times[5] + 2).unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_range_query_truncates_at_result_cap() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::default()
        .with_write_buffer_size(1)
        .with_cache_size(2)
        .with_max_results(3);
    let store = TimeSeriesStore::new(dir.path(), config);

    let times: Vec<i64> = (0..6).map(|i| BASE + i * MINUTE_MICROS).collect();
    for &ts in &times {
        store.put(rec(ts));
    }

    let capped = store.get_range(times[0], 0).unwrap();
    assert_eq!(timestamps(&capped), times[..3]);
}

#[test]
fn test_point_lookup_crosses_data_gaps() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::default()
        .with_write_buffer_size(1)
        .with_cache_size(2);
    let store = TimeSeriesStore::new(dir.path(), config);

    let t0 = BASE;
    let t1 = BASE + 5 * MINUTE_MICROS; // gap of four empty minutes
    let t2 = t1 + MINUTE_MICROS;
    for &ts in &[t0, t1, t2] {
        store.put(rec(ts));
    }

    // t0 is older than the cache window; its own minute file is
    // exhausted, so the lookup walks forward across the gap.
    assert_eq!(store.get_after(t0).unwrap().timestamp, t1);
    // Inside the window: served from the cache.
    assert_eq!(store.get_after(t1 + 1).unwrap().timestamp, t2);
    // Nothing follows the newest record.
    assert!(store.get_after(t2).is_none());
}

#[test]
fn test_spec_scenario_small_store() {
    let dir = TempDir::new().unwrap();
    let store = TimeSeriesStore::new(dir.path(), StoreConfig::default());

    let mut first = rec(100);
    first.input1_spec = Some(vec![1.0, 2.0, 3.0]);
    first.raw_audio = Some(vec![5, -5]);
    store.put(first.clone());
    store.put(rec(200));
    store.put(rec(300));

    let range = store.get_range(150, 300).unwrap();
    assert_eq!(timestamps(&range), vec![200, 300]);

    assert_eq!(store.get_recent().unwrap().timestamp, 300);

    store.flush().unwrap();
    drop(store);

    // Re-open over the same directory: everything must come from disk
    // with identical field values.
    let reopened = TimeSeriesStore::new(dir.path(), StoreConfig::default());
    let all = reopened.get_range(0, 400).unwrap();
    assert_eq!(timestamps(&all), vec![100, 200, 300]);
    assert_eq!(all[0], first);
    assert_eq!(all[1], rec(200));
}

// ============================================================================
// Retention
// ============================================================================

#[test]
fn test_flush_sweeps_expired_files_within_safety_floor() {
    let dir = TempDir::new().unwrap();
    let layout = ArchiveLayout::new(dir.path());
    let now = now_micros();

    // Two days expired: inside the sweep window.
    let expired = layout.minute_path(now - 2 * DAY_MICROS);
    // Twenty days old: beyond the 7-day floor, must survive any single
    // sweep even though it is long past the horizon.
    let ancient = layout.minute_path(now - 20 * DAY_MICROS);
    for path in [&expired, &ancient] {
        layout.ensure_dirs(path).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    let config = StoreConfig::default()
        .with_write_buffer_size(1)
        .with_max_age(Some(Duration::from_secs(86_400)));
    let store = TimeSeriesStore::new(dir.path(), config);
    store.put(rec(now));

    assert!(!expired.exists());
    assert!(ancient.exists());
    assert!(layout.minute_path(now).exists());
}
