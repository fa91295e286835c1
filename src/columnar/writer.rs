//! # Columnar Day-File Writer
//!
//! Consumes rows from the SPSC queue on a dedicated worker thread and
//! appends them into per-column slots of a memory-mapped day file.
//!
//! ## Worker Loop
//!
//! The worker pops one row at a time. The row's partition day decides file
//! identity: the first row of a new day rotates the file (flush header,
//! unmap, close, open the next day). Within a file, the row takes the next
//! logical index from the shared row counter; when the index hits capacity
//! the file is grown in place (capacity doubles, the file is re-reserved,
//! remapped, and every column region is relocated to its new offset so
//! existing rows keep their logical index). The row is then scattered into
//! the column slots. Optionally, every `fsync_every_rows` rows the header's
//! row count is rewritten and the first page msync'd.
//!
//! ## Failure Handling
//!
//! - A failed rotation leaves no file open; each subsequent row retries the
//!   rotation for its own day and is dropped (counted) if that fails too.
//! - A failed grow clamps the row counter back to capacity and drops the
//!   row; the rows already written stay valid and the grow is retried on
//!   the next overflowing row.
//! - msync failures are logged and otherwise ignored.
//!
//! ## Out-Of-Order Days
//!
//! The partition key is monotonically non-decreasing in production.
//! Stragglers whose day is *earlier* than the open file's day are written
//! into the open file rather than rotating backwards; rotation only moves
//! forward.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use eyre::{bail, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};
use smallvec::SmallVec;
use tracing::{info, warn};

use super::header::ColFileHeader;
use crate::config::{COL_HEADER_SIZE, DEFAULT_QUEUE_SLOTS, DEFAULT_ROWS_PER_HOUR, MAX_COLS};
use crate::dayfile;
use crate::mapio::preallocate;
use crate::queue::{self, Consumer, Producer};
use crate::schema::Schema;

/// Columnar writer configuration.
#[derive(Debug, Clone)]
pub struct WriterOpt {
    pub base_dir: PathBuf,
    pub product: String,
    /// Sizing hint; a fresh day file holds `2 * rows_per_hour` rows before
    /// its first grow.
    pub rows_per_hour: u64,
    /// Rewrite the header row count and msync every this many rows.
    /// 0 disables the periodic flush (the header is still flushed on
    /// rotation and shutdown).
    pub fsync_every_rows: u32,
    /// SPSC queue capacity in slots.
    pub queue_slots: usize,
}

impl WriterOpt {
    pub fn new(base_dir: impl Into<PathBuf>, product: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            product: product.into(),
            rows_per_hour: DEFAULT_ROWS_PER_HOUR,
            fsync_every_rows: 0,
            queue_slots: DEFAULT_QUEUE_SLOTS,
        }
    }
}

/// Sentinel for "no day open" in the observable day-start atomic.
const NO_OPEN_DAY: u64 = u64::MAX;

struct Counters {
    rows: AtomicU64,
    dropped: AtomicU64,
    running: AtomicBool,
    stop: AtomicBool,
    day_start: AtomicU64,
}

/// Columnar day-file writer for schema `S`.
///
/// One worker thread per writer; the caller thread is the single producer.
/// Dropping the writer requests a stop, drains the queue and joins the
/// worker.
pub struct Writer<S: Schema> {
    opt: WriterOpt,
    producer: Producer<S::Row>,
    consumer: Option<Consumer<S::Row>>,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
}

impl<S: Schema> Writer<S> {
    pub fn new(opt: WriterOpt) -> Self {
        let (producer, consumer) = queue::bounded(opt.queue_slots);
        Self {
            opt,
            producer,
            consumer: Some(consumer),
            counters: Arc::new(Counters {
                rows: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                running: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                day_start: AtomicU64::new(NO_OPEN_DAY),
            }),
            worker: None,
        }
    }

    /// Spawns the worker thread. May be called once.
    pub fn start(&mut self) -> Result<()> {
        let Some(consumer) = self.consumer.take() else {
            bail!("writer for '{}' already started", self.opt.product);
        };

        self.counters.running.store(true, Ordering::Release);
        self.counters.stop.store(false, Ordering::Release);

        let worker = DayWorker::<S> {
            opt: self.opt.clone(),
            counters: Arc::clone(&self.counters),
            consumer,
            open: None,
            since_fsync: 0,
            last_failed_day: None,
        };

        let handle = thread::Builder::new()
            .name(format!("tickstore-{}", self.opt.product))
            .spawn(move || worker.run())
            .wrap_err("failed to spawn writer worker thread")?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Enqueues a row for the worker. Never blocks; returns `false` when
    /// the queue is full.
    #[inline]
    pub fn enqueue(&mut self, row: S::Row) -> bool {
        self.producer.push(row)
    }

    /// Requests shutdown. The worker drains the queue, flushes the header
    /// and exits; use [`Writer::join`] (or drop) to wait for it.
    pub fn stop(&self) {
        self.counters.stop.store(true, Ordering::Release);
    }

    /// Waits for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Rows written into the currently open day file.
    pub fn rows(&self) -> u64 {
        self.counters.rows.load(Ordering::Acquire)
    }

    /// Rows dropped because of queue-independent failures (failed
    /// rotation or failed grow).
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Day-partition start of the open file, if one is open.
    pub fn day_start(&self) -> Option<u64> {
        match self.counters.day_start.load(Ordering::Acquire) {
            NO_OPEN_DAY => None,
            day => Some(day),
        }
    }
}

impl<S: Schema> Drop for Writer<S> {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// Worker-thread state: the open day file and its mapping.
struct DayWorker<S: Schema> {
    opt: WriterOpt,
    counters: Arc<Counters>,
    consumer: Consumer<S::Row>,
    open: Option<OpenDayFile>,
    since_fsync: u32,
    last_failed_day: Option<u64>,
}

struct OpenDayFile {
    file: File,
    path: PathBuf,
    map: MmapMut,
    header: ColFileHeader,
    day_start: u64,
}

impl<S: Schema> DayWorker<S> {
    fn run(mut self) {
        while self.counters.running.load(Ordering::Acquire) {
            if self.counters.stop.load(Ordering::Acquire) && self.consumer.is_empty() {
                break;
            }
            let Some(row) = self.consumer.pop() else {
                thread::yield_now();
                continue;
            };
            self.write_row(row);
        }

        self.flush_header();
        if let Some(open) = self.open.take() {
            info!(
                path = %open.path.display(),
                rows = open.header.rows,
                "closing column day file"
            );
        }
        self.counters.day_start.store(NO_OPEN_DAY, Ordering::Release);
        self.counters.running.store(false, Ordering::Release);
    }

    fn write_row(&mut self, row: S::Row) {
        let day = dayfile::day_from_hour(S::hour_from_row(&row));

        // Forward-only rotation; stragglers land in the open file.
        let rotate = match &self.open {
            Some(open) => day > open.day_start,
            None => true,
        };
        if rotate {
            if let Err(err) = self.rotate_to_day(day) {
                if self.last_failed_day != Some(day) {
                    warn!(day, error = %err, "day rotation failed; dropping rows");
                    self.last_failed_day = Some(day);
                }
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.last_failed_day = None;
        }

        let Some(open) = self.open.as_mut() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let idx = self.counters.rows.fetch_add(1, Ordering::AcqRel);
        if idx >= open.header.capacity {
            if let Err(err) = open.grow() {
                self.counters
                    .rows
                    .store(open.header.capacity, Ordering::Release);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "grow failed; dropping row");
                return;
            }
        }

        let base = open.map.as_mut_ptr();
        let mut cols: SmallVec<[*mut u8; MAX_COLS]> = SmallVec::with_capacity(S::COLS);
        for &off in open.header.col_off.iter() {
            // SAFETY: every column offset lies inside the mapping.
            cols.push(unsafe { base.add(off as usize) });
        }
        // SAFETY: idx < capacity and each region holds `capacity` elements.
        unsafe { S::write_row(&row, &cols, idx) };

        if self.opt.fsync_every_rows != 0 {
            self.since_fsync += 1;
            if self.since_fsync >= self.opt.fsync_every_rows {
                self.flush_header();
                self.since_fsync = 0;
            }
        }
    }

    /// Rewrites the header row count into the mapping and msyncs the first
    /// page. msync failure is reported, not fatal.
    fn flush_header(&mut self) {
        if let Some(open) = self.open.as_mut() {
            open.header.rows = self.counters.rows.load(Ordering::Acquire);
            open.write_header();
        }
    }

    fn rotate_to_day(&mut self, day_start: u64) -> Result<()> {
        self.flush_header();
        if let Some(open) = self.open.take() {
            info!(
                path = %open.path.display(),
                rows = open.header.rows,
                "rotating column day file"
            );
        }
        self.counters.rows.store(0, Ordering::Release);
        self.counters.day_start.store(NO_OPEN_DAY, Ordering::Release);
        self.since_fsync = 0;

        let open = OpenDayFile::create::<S>(&self.opt, day_start)?;
        self.counters.day_start.store(day_start, Ordering::Release);
        self.open = Some(open);
        Ok(())
    }
}

impl OpenDayFile {
    fn create<S: Schema>(opt: &WriterOpt, day_start: u64) -> Result<Self> {
        // Doubled so the capacity stays even across grows, which keeps
        // every column region naturally aligned.
        let capacity = opt.rows_per_hour.max(1) * 2;
        let header = ColFileHeader::for_day::<S>(&opt.product, day_start, capacity);
        let file_bytes = header.file_bytes();

        let dir = opt.base_dir.join(&opt.product);
        fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("failed to create product directory '{}'", dir.display()))?;

        let yyyymmdd = dayfile::yyyymmdd_from_day_start(day_start)?;
        let path = dir.join(format!("{yyyymmdd:08}.bin"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open column day file '{}'", path.display()))?;

        preallocate(&file, file_bytes)
            .wrap_err_with(|| format!("failed to preallocate '{}'", path.display()))?;

        // SAFETY: the writer owns this file exclusively for its lifetime;
        // no other process or mapping mutates it (see crate concurrency
        // contract). Length was just reserved via preallocate.
        let map = unsafe { MmapOptions::new().len(file_bytes as usize).map_mut(&file) }
            .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?;

        info!(path = %path.display(), capacity, "opened column day file");

        let mut open = Self {
            file,
            path,
            map,
            header,
            day_start,
        };
        open.write_header();
        Ok(open)
    }

    /// Doubles capacity in place: re-reserve the file, remap, relocate the
    /// column regions to their new offsets and rewrite the header. Existing
    /// rows keep their logical index.
    fn grow(&mut self) -> Result<()> {
        let old_capacity = self.header.capacity;
        let new_capacity = old_capacity * 2;
        let old_off = self.header.col_off.clone();

        self.header.relayout(new_capacity);
        let file_bytes = self.header.file_bytes();
        info!(
            path = %self.path.display(),
            old_capacity,
            new_capacity,
            "growing column day file"
        );

        let grown = (|| -> Result<MmapMut> {
            preallocate(&self.file, file_bytes)?;
            // SAFETY: same exclusive-ownership argument as in create; the
            // file was extended before mapping the larger length.
            unsafe { MmapOptions::new().len(file_bytes as usize).map_mut(&self.file) }
                .wrap_err("failed to remap column day file after grow")
        })();

        let new_map = match grown {
            Ok(map) => map,
            Err(err) => {
                // Restore the old layout; the small mapping is still valid.
                self.header.relayout(old_capacity);
                return Err(err);
            }
        };
        self.map = new_map;

        // Relocate columns highest-first: each destination only overlaps
        // regions that have already been moved out (or the column's own old
        // bytes, which copy_within handles).
        for c in (0..old_off.len()).rev() {
            let bytes = (old_capacity * self.header.col_sz[c]) as usize;
            let src = old_off[c] as usize;
            let dst = self.header.col_off[c] as usize;
            if src != dst && bytes != 0 {
                self.map.copy_within(src..src + bytes, dst);
            }
        }

        self.write_header();
        Ok(())
    }

    /// Copies the header into the first 256 bytes and msyncs them. msync
    /// failure is logged, not fatal.
    fn write_header(&mut self) {
        let mut buf = [0u8; COL_HEADER_SIZE];
        self.header.encode(&mut buf);
        self.map[..COL_HEADER_SIZE].copy_from_slice(&buf);
        if let Err(err) = self.map.flush_range(0, COL_HEADER_SIZE) {
            warn!(
                path = %self.path.display(),
                error = %err,
                "msync of column file header failed"
            );
        }
    }
}
