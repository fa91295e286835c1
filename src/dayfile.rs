//! Day partitioning and day-file discovery.
//!
//! Day files are named `YYYYMMDD.<ext>` where the date is the UTC civil
//! date of the partition's first second. Readers discover files by listing
//! a product directory, keeping only names with an eight-digit stem and the
//! expected extension, filtering by an inclusive date range, and sorting
//! ascending.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use eyre::{eyre, Result};

use crate::config::SECONDS_PER_DAY;

/// Start of the UTC day containing `hour_s` (both in epoch seconds).
#[inline]
pub fn day_from_hour(hour_s: u64) -> u64 {
    hour_s - (hour_s % SECONDS_PER_DAY)
}

/// UTC civil date of a day-partition start, as a `YYYYMMDD` integer.
pub fn yyyymmdd_from_day_start(day_start_s: u64) -> Result<u32> {
    let secs = i64::try_from(day_start_s)
        .map_err(|_| eyre!("day start {} exceeds representable time", day_start_s))?;
    let date = DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| eyre!("day start {} is out of calendar range", day_start_s))?;
    Ok(date.year() as u32 * 10_000 + date.month() * 100 + date.day())
}

/// One discovered day file.
#[derive(Debug, Clone)]
pub struct DayFile {
    pub yyyymmdd: u32,
    pub path: PathBuf,
}

/// Lists `dir` for `YYYYMMDD.<extension>` files with dates inside
/// `[date_from, date_to]`, sorted ascending by date. A missing or
/// unreadable directory yields an empty list; readers treat that the same
/// as "no data".
pub fn scan_day_files(dir: &Path, extension: &str, date_from: u32, date_to: u32) -> Vec<DayFile> {
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return files;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(yyyymmdd) = stem.parse::<u32>() else {
            continue;
        };
        if yyyymmdd < date_from || yyyymmdd > date_to {
            continue;
        }
        files.push(DayFile { yyyymmdd, path });
    }

    files.sort_by_key(|f| f.yyyymmdd);
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn day_floor_of_hour() {
        assert_eq!(day_from_hour(0), 0);
        assert_eq!(day_from_hour(3_600), 0);
        assert_eq!(day_from_hour(86_400), 86_400);
        assert_eq!(day_from_hour(90_000), 86_400);
    }

    #[test]
    fn epoch_day_is_19700101() {
        assert_eq!(yyyymmdd_from_day_start(0).unwrap(), 19_700_101);
    }

    #[test]
    fn utc_date_of_known_day() {
        // 2024-08-15T00:00:00Z
        assert_eq!(yyyymmdd_from_day_start(1_723_680_000).unwrap(), 20_240_815);
        // 2024-01-01T00:00:00Z
        assert_eq!(yyyymmdd_from_day_start(1_704_067_200).unwrap(), 20_240_101);
    }

    #[test]
    fn scan_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in [
            "20240103.bin",
            "20240101.bin",
            "20240102.bin",
            "20240102.blocks",
            "2024010.bin",
            "202401011.bin",
            "notadate.bin",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let files = scan_day_files(dir.path(), "bin", 0, 99_999_999);
        let days: Vec<u32> = files.iter().map(|f| f.yyyymmdd).collect();
        assert_eq!(days, vec![20_240_101, 20_240_102, 20_240_103]);
    }

    #[test]
    fn scan_honors_inclusive_range() {
        let dir = tempdir().unwrap();
        for name in ["20240101.bin", "20240102.bin", "20240103.bin"] {
            File::create(dir.path().join(name)).unwrap();
        }

        let files = scan_day_files(dir.path(), "bin", 20_240_102, 20_240_102);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].yyyymmdd, 20_240_102);
    }

    #[test]
    fn scan_of_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let files = scan_day_files(&dir.path().join("absent"), "bin", 0, 99_999_999);
        assert!(files.is_empty());
    }
}
