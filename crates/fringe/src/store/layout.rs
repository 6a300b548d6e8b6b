//! On-disk archive layout: UTC minute partitions and directory search.
//!
//! Records are stored under `<root>/<YYYY>/<MM>/<DD>/<HHMM>` (zero-padded,
//! UTC). Each leaf file holds the records of one UTC minute as a
//! contiguous, time-ascending run of serialized
//! [`IntegrationRecord`](crate::record::IntegrationRecord)s appended by
//! the flush path.
//!
//! Directory and file names are fixed-width digit strings, so sorting
//! them lexicographically is the same as sorting chronologically; the
//! forward search below leans on that to walk the tree in time order.
//!
//! All date arithmetic is done in UTC with plain integer civil-calendar
//! conversions; nothing here consults the local timezone.

use crate::error::Result;
use crate::record::{IntegrationRecord, PREFIX_LEN};
use std::fs::{self, File};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Microseconds per minute, the partition granularity.
pub const MINUTE_MICROS: i64 = 60_000_000;

/// Microseconds per day.
pub const DAY_MICROS: i64 = 86_400_000_000;

/// Broken-down UTC time for a microsecond epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcParts {
    /// Civil year.
    pub year: i32,
    /// Month 1-12.
    pub month: u32,
    /// Day of month 1-31.
    pub day: u32,
    /// Hour 0-23.
    pub hour: u32,
    /// Minute 0-59.
    pub minute: u32,
}

/// Converts a microsecond epoch to broken-down UTC.
pub fn utc_parts(micros: i64) -> UtcParts {
    let (seconds, _) = div_floor(micros, 1_000_000);
    let (days, second_of_day) = div_floor(seconds, 86_400);
    let (year, month, day) = civil_from_days(days);
    UtcParts {
        year,
        month,
        day,
        hour: (second_of_day / 3600) as u32,
        minute: ((second_of_day % 3600) / 60) as u32,
    }
}

/// Converts broken-down UTC back to a microsecond epoch.
pub fn micros_from_parts(parts: UtcParts) -> i64 {
    let days = days_from_civil(parts.year, parts.month, parts.day);
    (days * 86_400 + parts.hour as i64 * 3600 + parts.minute as i64 * 60) * 1_000_000
}

/// Truncates an epoch to the start of its UTC minute.
pub fn minute_floor(micros: i64) -> i64 {
    let (quotient, _) = div_floor(micros, MINUTE_MICROS);
    quotient * MINUTE_MICROS
}

fn div_floor(value: i64, divisor: i64) -> (i64, i64) {
    let mut quotient = value / divisor;
    let mut remainder = value % divisor;
    if remainder < 0 {
        quotient -= 1;
        remainder += divisor;
    }
    (quotient, remainder)
}

fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 {
        z / 146_097
    } else {
        (z - 146_096) / 146_097
    };
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = mp + if mp < 10 { 3 } else { -9 };
    let year = y + if month <= 2 { 1 } else { 0 };
    (year as i32, month as u32, day as u32)
}

fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = i64::from(year) - i64::from(month <= 2);
    let m = i64::from(month);
    let d = i64::from(day);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * (m + if m > 2 { -3 } else { 9 }) + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// A minute file located by the directory search, with the epoch of the
/// minute it covers.
#[derive(Debug)]
pub struct FoundFile {
    /// Path of the leaf file.
    pub path: PathBuf,
    /// Start of the UTC minute the file covers, microseconds.
    pub epoch: i64,
}

/// Filesystem paths and directory search for the date-partitioned
/// archive.
///
/// Every operation here touches path construction, directory listing, or
/// file opening; the store serializes them behind its directory lock.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    /// Creates a layout rooted at `root`. The directory itself is only
    /// created once the first flush writes to it.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the archive root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the leaf file path that covers `micros`.
    pub fn minute_path(&self, micros: i64) -> PathBuf {
        let p = utc_parts(micros);
        self.root
            .join(format!("{:04}", p.year))
            .join(format!("{:02}", p.month))
            .join(format!("{:02}", p.day))
            .join(format!("{:02}{:02}", p.hour, p.minute))
    }

    /// Creates every missing directory on the way to `path`'s parent.
    /// Idempotent.
    pub fn ensure_dirs(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Opens the minute file that would hold `micros`, if it exists.
    ///
    /// A missing file is a normal "no data in this minute" outcome.
    pub fn open_minute(&self, micros: i64) -> Result<Option<File>> {
        match File::open(self.minute_path(micros)) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Opens the minute file for `micros` and positions it at the first
    /// record with timestamp strictly greater than `micros`.
    ///
    /// Scans record prefixes and seeks past bodies; files cannot be
    /// binary-searched because records are variable length, but the scan
    /// is bounded by the one-minute partition size. Returns `None` when
    /// the file does not exist or holds no later record.
    pub fn find_after(&self, micros: i64) -> Result<Option<File>> {
        let Some(mut file) = self.open_minute(micros)? else {
            return Ok(None);
        };
        while let Some((total_len, timestamp)) = IntegrationRecord::read_prefix(&mut file)? {
            if timestamp <= micros {
                file.seek(SeekFrom::Current(i64::from(total_len) - PREFIX_LEN))?;
            } else {
                file.seek(SeekFrom::Current(-PREFIX_LEN))?;
                return Ok(Some(file));
            }
        }
        Ok(None)
    }

    /// Opens the file chronologically after the one covering `micros`.
    ///
    /// Fast path: the file exactly one minute later (data is usually
    /// dense). Otherwise falls back to the recursive forward search for
    /// the first leaf strictly after `micros`'s minute.
    pub fn next_file(&self, micros: i64) -> Result<Option<(i64, File)>> {
        let following = minute_floor(micros) + MINUTE_MICROS;
        if let Some(file) = self.open_minute(following)? {
            return Ok(Some((following, file)));
        }
        match self.search_forward(micros)? {
            Some(found) => {
                let file = File::open(&found.path)?;
                Ok(Some((found.epoch, file)))
            }
            None => Ok(None),
        }
    }

    /// Opens the file exactly one minute before the one covering
    /// `micros`. Fast path only: there is no backward recursive search.
    pub fn prev_file(&self, micros: i64) -> Result<Option<(i64, File)>> {
        let preceding = minute_floor(micros) - MINUTE_MICROS;
        Ok(self.open_minute(preceding)?.map(|file| (preceding, file)))
    }

    /// Finds the first leaf file strictly after the minute covering
    /// `micros`, walking `year/month/day/HHMM` in lexicographic (and
    /// therefore chronological) order.
    pub fn search_forward(&self, micros: i64) -> Result<Option<FoundFile>> {
        let target = utc_parts(micros);
        let target_file = format!("{:02}{:02}", target.hour, target.minute);

        for year_name in list_numeric(&self.root, 4)? {
            let year: i32 = year_name.parse().unwrap_or(0);
            if year < target.year {
                continue;
            }
            let same_year = year == target.year;
            let year_dir = self.root.join(&year_name);

            for month_name in list_numeric(&year_dir, 2)? {
                let month: u32 = month_name.parse().unwrap_or(0);
                if same_year && month < target.month {
                    continue;
                }
                let same_month = same_year && month == target.month;
                let month_dir = year_dir.join(&month_name);

                for day_name in list_numeric(&month_dir, 2)? {
                    let day: u32 = day_name.parse().unwrap_or(0);
                    if same_month && day < target.day {
                        continue;
                    }
                    let same_day = same_month && day == target.day;
                    let day_dir = month_dir.join(&day_name);

                    for file_name in list_numeric(&day_dir, 4)? {
                        // On the target day itself, skip up to and
                        // including the target minute.
                        if same_day && file_name.as_str() <= target_file.as_str() {
                            continue;
                        }
                        let hour: u32 = file_name[..2].parse().unwrap_or(0);
                        let minute: u32 = file_name[2..].parse().unwrap_or(0);
                        let epoch = micros_from_parts(UtcParts {
                            year,
                            month,
                            day,
                            hour,
                            minute,
                        });
                        return Ok(Some(FoundFile {
                            path: day_dir.join(&file_name),
                            epoch,
                        }));
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Lists entries of `dir` whose names are exactly `width` ASCII digits,
/// sorted ascending. A missing directory lists as empty.
fn list_numeric(dir: &Path, width: usize) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.len() == width && name.bytes().all(|b| b.is_ascii_digit()) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
