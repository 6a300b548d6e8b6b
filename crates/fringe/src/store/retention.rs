//! Age-based retention sweep for the on-disk archive.
//!
//! The sweep deletes minute files older than the configured horizon, but
//! deliberately refuses to reach back more than seven days past that
//! horizon in a single pass. A misconfigured retention value or a clock
//! jump can therefore destroy at most one extra week of data per sweep
//! instead of the whole archive. Keep that floor; it is a safety valve,
//! not an optimization target.
//!
//! Emptied directories are left behind. That is a known limitation of
//! the layout, not something the sweep quietly repairs.

use crate::store::layout::{ArchiveLayout, DAY_MICROS};
use std::fs;
use tracing::{debug, error};

/// How far past the expiry horizon a single sweep may reach.
pub const SWEEP_FLOOR_MICROS: i64 = 7 * DAY_MICROS;

/// Deletes files whose minute falls strictly between `now - max_age - 7d`
/// and `now - max_age`, one find-forward at a time from the floor upward.
///
/// Returns the number of files removed. Individual deletion failures end
/// the pass; files already removed stay removed.
pub fn sweep(layout: &ArchiveLayout, max_age_micros: i64, now_micros: i64) -> usize {
    let expiry = now_micros - max_age_micros;
    let floor = expiry - SWEEP_FLOOR_MICROS;
    let mut removed = 0;

    loop {
        let found = match layout.search_forward(floor) {
            Ok(Some(found)) => found,
            Ok(None) => break,
            Err(err) => {
                error!("retention search failed: {err}");
                break;
            }
        };

        if found.epoch > floor && found.epoch < expiry {
            debug!(path = %found.path.display(), "retention removing file");
            if let Err(err) = fs::remove_file(&found.path) {
                error!(path = %found.path.display(), "retention unlink failed: {err}");
                break;
            }
            removed += 1;
        } else {
            // First file at or past the horizon: nothing left to expire.
            break;
        }
    }

    removed
}
