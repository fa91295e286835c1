//! # Columnar Day-File Header
//!
//! Every columnar day file starts with a fixed 256-byte header followed by
//! the structure-of-arrays body. The header layout is:
//!
//! ```text
//! Offset  Size  Description
//! 0       6     Schema magic (e.g. "L2COL\n")
//! 6       2     Header size (always 256)
//! 8       2     Format version
//! 10      6     Padding
//! 16      16    Product name, NUL-padded
//! 32      8     Day partition start, epoch seconds
//! 40      8     Row count (rewritten as rows land)
//! 48      8     Capacity in rows
//! 56      8*C   Per-column byte offset of each column region
//! 56+8C   8*C   Per-column element size in bytes
//! ...     pad   Zero padding up to byte 256
//! ```
//!
//! The fixed prefix is a zerocopy struct; the two per-column tables are
//! encoded explicitly because their length varies with the schema's column
//! count. Column `i`'s region spans
//! `[col_off[i], col_off[i] + capacity * col_sz[i])`; regions are ascending
//! and disjoint, and the first starts at byte 256.

use eyre::{ensure, Result};
use smallvec::SmallVec;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{COL_HEADER_PREFIX_SIZE, COL_HEADER_SIZE, MAX_COLS};
use crate::schema::Schema;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct HeaderPrefix {
    magic: [u8; 6],
    header_size: U16,
    version: U16,
    pad16: U16,
    pad32: U32,
    product: [u8; 16],
    day_epoch_start: U64,
    rows: U64,
    capacity: U64,
}

const _: () = assert!(std::mem::size_of::<HeaderPrefix>() == COL_HEADER_PREFIX_SIZE);

/// Decoded (or to-be-encoded) columnar day-file header.
#[derive(Debug, Clone)]
pub struct ColFileHeader {
    pub magic: [u8; 6],
    pub version: u16,
    pub product: [u8; 16],
    pub day_epoch_start: u64,
    pub rows: u64,
    pub capacity: u64,
    pub col_off: SmallVec<[u64; MAX_COLS]>,
    pub col_sz: SmallVec<[u64; MAX_COLS]>,
}

impl ColFileHeader {
    /// Builds the header of a fresh day file for schema `S`: zero rows,
    /// column regions laid out back-to-back behind the header.
    pub fn for_day<S: Schema>(product: &str, day_epoch_start: u64, capacity: u64) -> Self {
        let mut name = [0u8; 16];
        let n = product.len().min(name.len() - 1);
        name[..n].copy_from_slice(&product.as_bytes()[..n]);

        let mut col_off = SmallVec::new();
        let mut col_sz = SmallVec::new();
        let mut off = COL_HEADER_SIZE as u64;
        for c in 0..S::COLS {
            let sz = S::col_size(c) as u64;
            col_off.push(off);
            col_sz.push(sz);
            off += capacity * sz;
        }

        Self {
            magic: S::MAGIC,
            version: S::VERSION,
            product: name,
            day_epoch_start,
            rows: 0,
            capacity,
            col_off,
            col_sz,
        }
    }

    /// Total file size implied by the header: header plus all column
    /// regions at full capacity.
    pub fn file_bytes(&self) -> u64 {
        match self.col_off.last() {
            Some(&off) => off + self.capacity * self.col_sz[self.col_sz.len() - 1],
            None => COL_HEADER_SIZE as u64,
        }
    }

    /// Recomputes the column offsets for a new capacity, keeping element
    /// sizes. Used on grow, where every region inflates in place.
    pub fn relayout(&mut self, capacity: u64) {
        let mut off = COL_HEADER_SIZE as u64;
        for (slot, &sz) in self.col_off.iter_mut().zip(self.col_sz.iter()) {
            *slot = off;
            off += capacity * sz;
        }
        self.capacity = capacity;
    }

    /// Serializes into the 256-byte on-disk form.
    pub fn encode(&self, out: &mut [u8; COL_HEADER_SIZE]) {
        out.fill(0);
        let prefix = HeaderPrefix {
            magic: self.magic,
            header_size: U16::new(COL_HEADER_SIZE as u16),
            version: U16::new(self.version),
            pad16: U16::new(0),
            pad32: U32::new(0),
            product: self.product,
            day_epoch_start: U64::new(self.day_epoch_start),
            rows: U64::new(self.rows),
            capacity: U64::new(self.capacity),
        };
        out[..COL_HEADER_PREFIX_SIZE].copy_from_slice(prefix.as_bytes());

        let cols = self.col_off.len();
        for (i, &off) in self.col_off.iter().enumerate() {
            let at = COL_HEADER_PREFIX_SIZE + 8 * i;
            out[at..at + 8].copy_from_slice(&off.to_le_bytes());
        }
        for (i, &sz) in self.col_sz.iter().enumerate() {
            let at = COL_HEADER_PREFIX_SIZE + 8 * (cols + i);
            out[at..at + 8].copy_from_slice(&sz.to_le_bytes());
        }
    }

    /// Parses and validates a header for schema `S` from the start of a
    /// mapped day file.
    pub fn decode<S: Schema>(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= COL_HEADER_SIZE,
            "column file too small for header: {} < {}",
            bytes.len(),
            COL_HEADER_SIZE
        );

        let prefix = HeaderPrefix::ref_from_bytes(&bytes[..COL_HEADER_PREFIX_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse column file header: {:?}", e))?;

        ensure!(
            prefix.magic == S::MAGIC,
            "column file magic mismatch: {:?} != {:?}",
            prefix.magic,
            S::MAGIC
        );
        ensure!(
            prefix.header_size.get() as usize == COL_HEADER_SIZE,
            "unexpected column header size: {}",
            prefix.header_size.get()
        );
        ensure!(
            prefix.version.get() == S::VERSION,
            "unsupported column file version: {} (expected {})",
            prefix.version.get(),
            S::VERSION
        );
        ensure!(
            prefix.rows.get() <= prefix.capacity.get(),
            "corrupt column header: rows {} exceed capacity {}",
            prefix.rows.get(),
            prefix.capacity.get()
        );

        let mut col_off: SmallVec<[u64; MAX_COLS]> = SmallVec::new();
        let mut col_sz: SmallVec<[u64; MAX_COLS]> = SmallVec::new();
        for c in 0..S::COLS {
            let at = COL_HEADER_PREFIX_SIZE + 8 * c;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            col_off.push(u64::from_le_bytes(raw));

            let at = COL_HEADER_PREFIX_SIZE + 8 * (S::COLS + c);
            raw.copy_from_slice(&bytes[at..at + 8]);
            col_sz.push(u64::from_le_bytes(raw));
        }

        for c in 0..S::COLS {
            ensure!(
                col_sz[c] == S::col_size(c) as u64,
                "column {} element size mismatch: {} != {}",
                c,
                col_sz[c],
                S::col_size(c)
            );
        }

        Ok(Self {
            magic: prefix.magic,
            version: prefix.version.get(),
            product: prefix.product,
            day_epoch_start: prefix.day_epoch_start.get(),
            rows: prefix.rows.get(),
            capacity: prefix.capacity.get(),
            col_off,
            col_sz,
        })
    }

    /// Product name with NUL padding stripped.
    pub fn product_str(&self) -> &str {
        let end = self
            .product
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.product.len());
        std::str::from_utf8(&self.product[..end]).unwrap_or("")
    }
}
