//! # Block Day-File Writer
//!
//! Accumulates rows in an in-memory batch; every `block_rows` rows the
//! batch is encoded into one compressed block and appended to the mapped
//! day file. Appends go through a memory-mapped window that is extended in
//! 256 MiB steps, over a file reservation extended in 1 GiB fallocate
//! chunks, so the append path never touches `write(2)`.
//!
//! ## Durability
//!
//! An fdatasync is issued whenever 64 MiB have been appended since the last
//! one, and additionally every `fsync_every_blocks` blocks when that knob
//! is non-zero. `close()` flushes the partial batch, truncates the file to
//! its exact used length, rewrites the day header with the final totals
//! and fdatasyncs. Failed syncs are logged, never fatal; failed opens,
//! reservations and maps raise.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};
use tracing::{info, warn};
use zerocopy::IntoBytes;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use super::codec::BlockCodec;
use super::{DayFileHeader, DAY_HEADER_SIZE};
use crate::config::{
    DEFAULT_BLOCK_ROWS, FALLOCATE_CHUNK_BYTES, MAP_WINDOW_BYTES, SYNC_INTERVAL_BYTES,
};
use crate::mapio::{advise_sequential, preallocate};

/// Block writer configuration.
#[derive(Debug, Clone)]
pub struct BlockWriterOpt {
    pub base_dir: PathBuf,
    pub product: String,
    /// Rows per block; a full batch is encoded and appended.
    pub block_rows: u32,
    /// fdatasync every this many appended blocks; 0 leaves only the hard
    /// 64 MiB threshold.
    pub fsync_every_blocks: u32,
    /// Granularity of mapping extension. Tests shrink this; production
    /// keeps the 256 MiB default.
    pub map_window_bytes: u64,
    /// Granularity of the fallocate reservation. Tests shrink this;
    /// production keeps the 1 GiB default.
    pub reserve_chunk_bytes: u64,
}

impl BlockWriterOpt {
    pub fn new(base_dir: impl Into<PathBuf>, product: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            product: product.into(),
            block_rows: DEFAULT_BLOCK_ROWS,
            fsync_every_blocks: 0,
            map_window_bytes: MAP_WINDOW_BYTES,
            reserve_chunk_bytes: FALLOCATE_CHUNK_BYTES,
        }
    }
}

/// Append-only writer of block-compressed day files.
pub struct BlockWriter<C: BlockCodec> {
    opt: BlockWriterOpt,
    open: Option<OpenBlockFile>,
    batch: Vec<C::Row>,
    block_buf: Vec<u8>,
}

struct OpenBlockFile {
    file: File,
    path: PathBuf,
    map: MmapMut,
    header: DayFileHeader,
    map_window: u64,
    reserve_chunk: u64,
    allocated: u64,
    file_off: u64,
    bytes_since_sync: u64,
    blocks_since_sync: u32,
}

impl<C: BlockCodec> BlockWriter<C> {
    pub fn new(opt: BlockWriterOpt) -> Self {
        Self {
            opt,
            open: None,
            batch: Vec::new(),
            block_buf: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Opens (or switches to) the day file for `yyyymmdd`. A partial batch
    /// destined for the previous day is flushed into the previous file
    /// before it is closed. Re-opening the current day is a no-op.
    pub fn begin_day(&mut self, yyyymmdd: u32) -> Result<()> {
        if self.open.as_ref().map(|o| o.header.yyyymmdd()) == Some(yyyymmdd) {
            return Ok(());
        }
        self.close()?;
        self.open = Some(OpenBlockFile::create(&self.opt, yyyymmdd)?);
        Ok(())
    }

    /// Adds one row to the batch, appending a block when the batch fills.
    pub fn write_row(&mut self, row: C::Row) -> Result<()> {
        self.batch.push(row);
        if self.batch.len() >= self.opt.block_rows as usize {
            self.flush_batch()?;
        }
        Ok(())
    }

    /// Appends `rows` as a single block, after flushing any partial batch
    /// so ordering is preserved.
    pub fn write_block(&mut self, rows: &[C::Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        ensure!(
            self.is_open(),
            "write_block on '{}' without an open day file",
            self.opt.product
        );
        self.flush_batch()?;
        self.append_block(rows)
    }

    /// Flushes the partial batch, finalizes the day header and closes the
    /// file, truncated to its exact used length. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.open.is_none() {
            return Ok(());
        }
        self.flush_batch()?;
        if let Some(open) = self.open.take() {
            open.finish()?;
        }
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.batch.is_empty() || self.open.is_none() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        let result = self.append_block(&batch);
        self.batch = batch;
        self.batch.clear();
        result
    }

    fn append_block(&mut self, rows: &[C::Row]) -> Result<()> {
        self.block_buf.clear();
        C::encode_block(rows, &mut self.block_buf);
        if self.block_buf.is_empty() {
            return Ok(());
        }
        let Some(open) = self.open.as_mut() else {
            bail!("no open block day file");
        };
        open.append(
            &self.block_buf,
            rows.len() as u64,
            self.opt.fsync_every_blocks,
        )
    }
}

impl<C: BlockCodec> Drop for BlockWriter<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(product = %self.opt.product, error = %err, "failed to close block writer");
        }
    }
}

impl OpenBlockFile {
    fn create(opt: &BlockWriterOpt, yyyymmdd: u32) -> Result<Self> {
        let dir = opt.base_dir.join(format!("{}-BLOCKS", opt.product));
        fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("failed to create block directory '{}'", dir.display()))?;

        let path = dir.join(format!("{yyyymmdd:08}.blocks"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open block day file '{}'", path.display()))?;

        let map_window = opt.map_window_bytes.max(1);
        let reserve_chunk = opt.reserve_chunk_bytes.max(map_window);

        let first_target = DAY_HEADER_SIZE as u64 + map_window;
        let allocated = first_target.div_ceil(reserve_chunk) * reserve_chunk;
        preallocate(&file, allocated)
            .wrap_err_with(|| format!("failed to preallocate '{}'", path.display()))?;

        let map_len = DAY_HEADER_SIZE as u64 + map_window;
        // SAFETY: the writer owns the file exclusively while it is open;
        // the mapped length was just reserved.
        let mut map = unsafe { MmapOptions::new().len(map_len as usize).map_mut(&file) }
            .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?;
        advise_sequential(&file, map.as_ptr(), map.len());

        let header = DayFileHeader::new(yyyymmdd);
        map[..DAY_HEADER_SIZE].copy_from_slice(header.as_bytes());
        if let Err(err) = map.flush_range(0, DAY_HEADER_SIZE) {
            warn!(path = %path.display(), error = %err, "msync of day header failed");
        }

        info!(path = %path.display(), yyyymmdd, "opened block day file");

        Ok(Self {
            file,
            path,
            map,
            header,
            map_window,
            reserve_chunk,
            allocated,
            file_off: DAY_HEADER_SIZE as u64,
            bytes_since_sync: 0,
            blocks_since_sync: 0,
        })
    }

    fn append(&mut self, block: &[u8], rows: u64, fsync_every_blocks: u32) -> Result<()> {
        self.ensure_mapped(block.len() as u64)?;

        let at = self.file_off as usize;
        self.map[at..at + block.len()].copy_from_slice(block);
        self.file_off += block.len() as u64;

        self.header.set_rows_total(self.header.rows_total() + rows);
        self.header
            .set_bytes_total(self.header.bytes_total() + block.len() as u64);
        self.header.set_blocks_total(self.header.blocks_total() + 1);

        self.bytes_since_sync += block.len() as u64;
        self.blocks_since_sync += 1;
        let hard = self.bytes_since_sync >= SYNC_INTERVAL_BYTES;
        let cadence = fsync_every_blocks != 0 && self.blocks_since_sync >= fsync_every_blocks;
        if hard || cadence {
            if let Err(err) = self.file.sync_data() {
                warn!(path = %self.path.display(), error = %err, "fdatasync failed");
            }
            self.bytes_since_sync = 0;
            self.blocks_since_sync = 0;
        }
        Ok(())
    }

    /// Extends the mapping (and, first, the fallocate reservation) until at
    /// least `need` more bytes fit behind the current append offset. The
    /// remap may move; the append offset is file-relative so nothing else
    /// changes.
    fn ensure_mapped(&mut self, need: u64) -> Result<()> {
        let min_len = self.file_off + need;
        if self.map.len() as u64 >= min_len {
            return Ok(());
        }

        self.ensure_allocated(min_len)?;

        let mut new_len = self.map.len() as u64;
        while new_len < min_len {
            new_len += self.map_window;
        }

        // SAFETY: exclusive ownership as in create; the reservation covers
        // new_len.
        let map = unsafe { MmapOptions::new().len(new_len as usize).map_mut(&self.file) }
            .wrap_err_with(|| format!("failed to remap '{}'", self.path.display()))?;
        self.map = map;
        advise_sequential(&self.file, self.map.as_ptr(), self.map.len());
        Ok(())
    }

    fn ensure_allocated(&mut self, required: u64) -> Result<()> {
        if required <= self.allocated {
            return Ok(());
        }
        let rounded = required.div_ceil(self.reserve_chunk) * self.reserve_chunk;
        preallocate(&self.file, rounded)
            .wrap_err_with(|| format!("failed to grow reservation of '{}'", self.path.display()))?;
        self.allocated = rounded;
        Ok(())
    }

    /// Tears down the mapping, trims the file to its used length and
    /// persists the final day header.
    fn finish(self) -> Result<()> {
        let OpenBlockFile {
            file,
            path,
            map,
            header,
            file_off,
            ..
        } = self;
        drop(map);

        file.set_len(file_off)
            .wrap_err_with(|| format!("failed to truncate '{}'", path.display()))?;
        file.write_all_at(header.as_bytes(), 0)
            .wrap_err_with(|| format!("failed to rewrite day header of '{}'", path.display()))?;
        if let Err(err) = file.sync_data() {
            warn!(path = %path.display(), error = %err, "fdatasync on close failed");
        }

        info!(
            path = %path.display(),
            rows = header.rows_total(),
            blocks = header.blocks_total(),
            bytes = header.bytes_total(),
            "closed block day file"
        );
        Ok(())
    }
}
