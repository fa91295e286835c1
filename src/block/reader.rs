//! # Block Day-File Reader
//!
//! Streams a date range of block day files back to the caller, one decoded
//! block at a time. Each file is mapped read-only; the walk starts at byte
//! 24 and is bounded by `min(24 + bytes_total, file size)`, so trailing
//! bytes left behind by a crashed writer are never interpreted. The walk
//! stops when `blocks_total` blocks have been visited, when a decode
//! consumes nothing, or when a declared block length would run past the
//! body.
//!
//! Unlike the columnar reader, open and decode failures here raise: a
//! block file is an archival artifact and silent truncation of results
//! would be worse than an error.

use std::fs::File;
use std::marker::PhantomData;
use std::path::PathBuf;

use eyre::{ensure, Result, WrapErr};
use memmap2::Mmap;

use super::codec::BlockCodec;
use super::{DayFileHeader, DAY_HEADER_SIZE};
use crate::dayfile::{scan_day_files, DayFile};
use crate::mapio::advise_sequential;

/// Block reader configuration. Date bounds are inclusive `YYYYMMDD` values
/// and default to an open range.
#[derive(Debug, Clone)]
pub struct BlockReaderOpt {
    pub base_dir: PathBuf,
    pub product: String,
    pub date_from: u32,
    pub date_to: u32,
}

impl BlockReaderOpt {
    pub fn new(base_dir: impl Into<PathBuf>, product: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            product: product.into(),
            date_from: 0,
            date_to: 99_999_999,
        }
    }
}

/// One decoded block handed to the visitor.
pub struct RowsView<'a, R> {
    pub rows: &'a [R],
    /// Byte offset of the block inside its day file.
    pub file_offset: u64,
    pub yyyymmdd: u32,
}

/// Streaming reader over block day files.
pub struct BlockReader<C: BlockCodec> {
    files: Vec<DayFile>,
    _codec: PhantomData<C>,
}

impl<C: BlockCodec> BlockReader<C> {
    pub fn new(opt: BlockReaderOpt) -> Self {
        let dir = opt.base_dir.join(format!("{}-BLOCKS", opt.product));
        let files = scan_day_files(&dir, "blocks", opt.date_from, opt.date_to);
        Self {
            files,
            _codec: PhantomData,
        }
    }

    /// Day files selected by the date range, ascending.
    pub fn files(&self) -> &[DayFile] {
        &self.files
    }

    pub fn days(&self) -> Vec<u32> {
        self.files.iter().map(|f| f.yyyymmdd).collect()
    }

    /// Walks every selected file in date order, invoking `f` once per
    /// decoded block.
    pub fn visit_day_files<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&RowsView<'_, C::Row>),
    {
        let mut rows: Vec<C::Row> = Vec::new();

        for day_file in &self.files {
            let path = &day_file.path;
            let file = File::open(path)
                .wrap_err_with(|| format!("failed to open block day file '{}'", path.display()))?;
            let len = file
                .metadata()
                .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
                .len() as usize;
            ensure!(
                len >= DAY_HEADER_SIZE,
                "block day file '{}' shorter than its header",
                path.display()
            );

            // SAFETY: read-only mapping of a closed day file; the engine's
            // contract forbids concurrent mutation.
            let map = unsafe { Mmap::map(&file) }
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?;
            advise_sequential(&file, map.as_ptr(), map.len());

            let header = DayFileHeader::from_bytes(&map)?;
            let limit = (DAY_HEADER_SIZE as u64 + header.bytes_total()).min(len as u64) as usize;

            let mut off = DAY_HEADER_SIZE;
            let mut count = 0u32;
            while off < limit && count < header.blocks_total() {
                let consumed = C::decode_block(&map[off..limit], &mut rows)
                    .wrap_err_with(|| {
                        format!("corrupt block at offset {} in '{}'", off, path.display())
                    })?;
                if consumed == 0 || off + consumed > limit {
                    break;
                }

                f(&RowsView {
                    rows: &rows,
                    file_offset: off as u64,
                    yyyymmdd: header.yyyymmdd(),
                });

                off += consumed;
                count += 1;
            }
        }
        Ok(())
    }
}
