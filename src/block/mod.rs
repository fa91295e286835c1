//! # Block-Compressed Day-File Store
//!
//! Append-only variant of the day file: an open-ended sequence of
//! self-describing compressed blocks behind a small day header, suited to
//! archival and whole-day sequential scans.
//!
//! ```text
//! <base_dir>/<product>-BLOCKS/YYYYMMDD.blocks
//!
//! +---------------------------+
//! | DayFileHeader (24 B)      |  rows_total, bytes_total, yyyymmdd,
//! +---------------------------+  blocks_total
//! | Block 0                   |  BlockHeader + 5 column payloads
//! +---------------------------+
//! | Block 1                   |
//! +---------------------------+
//! | ...                       |
//! +---------------------------+
//! ```
//!
//! The day header is zero at open and rewritten with the final totals on
//! close; a crashed writer leaves totals of a consistent prefix plus
//! possibly some trailing garbage, which readers ignore once
//! `blocks_total` blocks have been walked.

mod codec;
mod reader;
mod writer;

pub use codec::{
    bitpack_bits, bitpack_u32, bitpack_u64, bitunpack_bits, bitunpack_u32, bitunpack_u64,
    ceil_log2, packed_len, zigzag_dec32, zigzag_enc32, BlockCodec, BlockHeader, EventKind,
    TradeBlockCodec, TradeRow, BLOCK_HEADER_SIZE, BLOCK_MAGIC, BLOCK_VERSION,
};
pub use reader::{BlockReader, BlockReaderOpt, RowsView};
pub use writer::{BlockWriter, BlockWriterOpt};

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Size of the on-disk day-file header.
pub const DAY_HEADER_SIZE: usize = 24;

/// Header at the start of every block day file.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DayFileHeader {
    rows_total: U64,
    bytes_total: U64,
    yyyymmdd: U32,
    blocks_total: U32,
}

const _: () = assert!(std::mem::size_of::<DayFileHeader>() == DAY_HEADER_SIZE);

impl DayFileHeader {
    pub fn new(yyyymmdd: u32) -> Self {
        Self {
            rows_total: U64::new(0),
            bytes_total: U64::new(0),
            yyyymmdd: U32::new(yyyymmdd),
            blocks_total: U32::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= DAY_HEADER_SIZE,
            "buffer too small for day file header: {} < {}",
            bytes.len(),
            DAY_HEADER_SIZE
        );
        Self::read_from_bytes(&bytes[..DAY_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse day file header: {:?}", e))
    }

    pub fn rows_total(&self) -> u64 {
        self.rows_total.get()
    }

    pub fn set_rows_total(&mut self, rows: u64) {
        self.rows_total = U64::new(rows);
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.get()
    }

    pub fn set_bytes_total(&mut self, bytes: u64) {
        self.bytes_total = U64::new(bytes);
    }

    pub fn yyyymmdd(&self) -> u32 {
        self.yyyymmdd.get()
    }

    pub fn blocks_total(&self) -> u32 {
        self.blocks_total.get()
    }

    pub fn set_blocks_total(&mut self, blocks: u32) {
        self.blocks_total = U32::new(blocks);
    }
}
