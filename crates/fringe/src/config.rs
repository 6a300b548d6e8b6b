//! Store configuration.

use std::time::Duration;

/// Default number of records batched before a flush.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 5;

/// Default number of recent records mirrored in memory.
pub const DEFAULT_CACHE_SIZE: usize = 5;

/// Default cap on the number of records a single range query may return.
///
/// Protects the process from a pathological request consuming all memory;
/// queries that would exceed it are truncated, not failed.
pub const DEFAULT_MAX_RESULTS: usize = 1_000_000;

/// Configuration for a [`TimeSeriesStore`](crate::store::TimeSeriesStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Records accumulated in the write-behind buffer before a
    /// synchronous flush. Default: 5.
    pub write_buffer_size: usize,

    /// Most recent records kept in the in-memory cache, independent of
    /// the write buffer size. Default: 5.
    pub cache_size: usize,

    /// Retention horizon. Files older than this are removed by the sweep
    /// that precedes each flush. `None` retains data forever.
    pub max_age: Option<Duration>,

    /// Safety cap on records returned by one range query.
    pub max_results: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            max_age: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl StoreConfig {
    /// Sets the write-behind batch size.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Sets the in-memory cache size.
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets the retention horizon; `None` retains forever.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the range-query result cap.
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }
}
