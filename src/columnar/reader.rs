//! # Columnar Day-File Reader
//!
//! Maps day files read-only and hands the caller per-column views, in date
//! order. Two iteration modes exist:
//!
//! - **zero-copy**: the [`Segment`] borrows the mapping directly. Cheapest,
//!   but the borrow ends with the callback because the next file replaces
//!   the mapping.
//! - **staged**: each column is first copied into a huge-page-backed slab
//!   (64-byte aligned per column). The copy is isolated from mmap churn and
//!   sits on 2 MiB TLB entries where the host provides them. The slab is
//!   grown monotonically and recycled across files when the next file fits.
//!
//! Files that cannot be opened or fail validation (too small, wrong magic
//! or version, regions past end of file) are skipped without raising;
//! a day directory is allowed to contain foreign files.

use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use eyre::{bail, eyre, Result};
use memmap2::Mmap;
use smallvec::SmallVec;
use tracing::debug;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use super::header::ColFileHeader;
use crate::config::MAX_COLS;
use crate::dayfile::{scan_day_files, DayFile};
use crate::mapio::advise_sequential;
use crate::memory::HugeSlab;
use crate::schema::Schema;

/// Columnar reader configuration. Date bounds are inclusive `YYYYMMDD`
/// values and default to an open range.
#[derive(Debug, Clone)]
pub struct ReaderOpt {
    pub base_dir: PathBuf,
    pub product: String,
    pub date_from: u32,
    pub date_to: u32,
}

impl ReaderOpt {
    pub fn new(base_dir: impl Into<PathBuf>, product: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            product: product.into(),
            date_from: 0,
            date_to: 99_999_999,
        }
    }
}

/// Per-column view over one day file: column `i` is exactly
/// `rows * col_size(i)` bytes of the written prefix.
pub struct Segment<'a> {
    cols: SmallVec<[&'a [u8]; MAX_COLS]>,
    rows: u64,
}

impl<'a> Segment<'a> {
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn col_count(&self) -> usize {
        self.cols.len()
    }

    /// Raw bytes of column `col`.
    pub fn col_bytes(&self, col: usize) -> &'a [u8] {
        self.cols[col]
    }

    /// Column `col` viewed as a slice of `T`. Fails when the element size
    /// does not match or the region is misaligned for `T`.
    pub fn col<T>(&self, col: usize) -> Result<&'a [T]>
    where
        T: FromBytes + Immutable + KnownLayout,
    {
        <[T]>::ref_from_bytes(self.cols[col])
            .map_err(|e| eyre!("column {} cannot be viewed as typed slice: {:?}", col, e))
    }
}

struct MappedDayFile {
    map: Mmap,
    header: ColFileHeader,
}

impl MappedDayFile {
    /// Maps and validates one day file; `None` means "skip this file".
    fn open<S: Schema>(path: &Path) -> Option<Self> {
        let file = File::open(path).ok()?;
        let len = file.metadata().ok()?.len();

        // SAFETY: read-only mapping; the engine's contract forbids another
        // process from mutating a closed day file.
        let map = unsafe { Mmap::map(&file) }.ok()?;
        advise_sequential(&file, map.as_ptr(), map.len());

        let header = match ColFileHeader::decode::<S>(&map) {
            Ok(header) => header,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping invalid column file");
                return None;
            }
        };
        if header.file_bytes() > len {
            debug!(path = %path.display(), "skipping truncated column file");
            return None;
        }

        Some(Self { map, header })
    }

    fn segment(&self) -> Segment<'_> {
        let rows = self.header.rows;
        let mut cols: SmallVec<[&[u8]; MAX_COLS]> = SmallVec::new();
        for (off, sz) in self.header.col_off.iter().zip(self.header.col_sz.iter()) {
            let start = *off as usize;
            let bytes = (rows * sz) as usize;
            cols.push(&self.map[start..start + bytes]);
        }
        Segment { cols, rows }
    }
}

/// Staging slab shared across files; grows monotonically.
struct Stage {
    slab: Option<HugeSlab>,
}

impl Stage {
    fn fill<'a>(&'a mut self, mapped: &MappedDayFile) -> Result<Segment<'a>> {
        let rows = mapped.header.rows;

        let mut offsets: SmallVec<[usize; MAX_COLS]> = SmallVec::new();
        let mut lens: SmallVec<[usize; MAX_COLS]> = SmallVec::new();
        let mut need = 0usize;
        for sz in mapped.header.col_sz.iter() {
            let bytes = (rows * sz) as usize;
            offsets.push(need);
            lens.push(bytes);
            // Keep every staged column cache-line aligned.
            need += bytes.div_ceil(64) * 64;
        }

        if self.slab.as_ref().map_or(true, |s| s.len() < need) {
            self.slab = Some(HugeSlab::alloc(need.max(1))?);
        }
        let Some(slab) = self.slab.as_mut() else {
            bail!("staging slab unavailable");
        };

        let buf = slab.as_mut_slice();
        let src = mapped.segment();
        for c in 0..offsets.len() {
            buf[offsets[c]..offsets[c] + lens[c]].copy_from_slice(src.col_bytes(c));
        }

        let buf = slab.as_slice();
        let mut cols: SmallVec<[&[u8]; MAX_COLS]> = SmallVec::new();
        for c in 0..offsets.len() {
            cols.push(&buf[offsets[c]..offsets[c] + lens[c]]);
        }
        Ok(Segment { cols, rows })
    }
}

/// Columnar day-file reader for schema `S`.
pub struct Reader<S: Schema> {
    files: Vec<DayFile>,
    stage: Stage,
    _schema: PhantomData<S>,
}

impl<S: Schema> Reader<S> {
    pub fn new(opt: ReaderOpt) -> Self {
        let dir = if opt.product.is_empty() {
            opt.base_dir.clone()
        } else {
            opt.base_dir.join(&opt.product)
        };
        let files = scan_day_files(&dir, "bin", opt.date_from, opt.date_to);
        Self {
            files,
            stage: Stage { slab: None },
            _schema: PhantomData,
        }
    }

    /// Day files selected by the date range, ascending.
    pub fn files(&self) -> &[DayFile] {
        &self.files
    }

    pub fn days(&self) -> Vec<u32> {
        self.files.iter().map(|f| f.yyyymmdd).collect()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Visits each selected file zero-copy. The callback returns `false`
    /// to stop the iteration early. Invalid files are skipped.
    pub fn for_each_segment<F>(&mut self, mut f: F)
    where
        F: FnMut(&Segment<'_>) -> bool,
    {
        for file in &self.files {
            let Some(mapped) = MappedDayFile::open::<S>(&file.path) else {
                continue;
            };
            let segment = mapped.segment();
            if !f(&segment) {
                break;
            }
        }
    }

    /// Visits each selected file through the staging slab. Empty files are
    /// skipped; slab allocation failures raise.
    pub fn for_each_staged<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Segment<'_>) -> bool,
    {
        for file in &self.files {
            let Some(mapped) = MappedDayFile::open::<S>(&file.path) else {
                continue;
            };
            if mapped.header.rows == 0 {
                continue;
            }
            let segment = self.stage.fill(&mapped)?;
            if !f(&segment) {
                break;
            }
        }
        Ok(())
    }

    /// Visits a single file (bypassing the date-range list) zero-copy.
    /// Returns the number of rows visited; 0 when the file was invalid.
    pub fn visit_file<F>(&mut self, path: &Path, mut f: F) -> u64
    where
        F: FnMut(&Segment<'_>),
    {
        let Some(mapped) = MappedDayFile::open::<S>(path) else {
            return 0;
        };
        let segment = mapped.segment();
        f(&segment);
        segment.rows()
    }
}
