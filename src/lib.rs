//! # tickstore - Columnar Market-Data Storage Engine
//!
//! tickstore is a write-once, read-many storage engine for high-frequency
//! market data: timestamped event streams (order-book updates, trades,
//! derived factors) are laid out in day-partitioned, memory-mapped column
//! files that a later analytical pass can traverse at memory-bandwidth
//! speed, with no per-row parsing.
//!
//! ## Architecture
//!
//! ```text
//! feed thread                     writer thread
//!     │                                │
//!     │  enqueue()   ┌──────────┐  pop │
//!     ├─────────────>│ SPSC ring├──────┤
//!     │              └──────────┘      ▼
//!     │                         ┌─────────────┐     mmap
//!     │                         │ columnar    ├──> <product>/YYYYMMDD.bin
//!     │                         │ Writer      │
//!     │                         └─────────────┘
//!     │
//!     │  archival / compaction pass (caller-driven)
//!     │   ┌────────┐  rows   ┌─────────────┐     mmap
//!     └──>│ Reader ├────────>│ BlockWriter ├──> <product>-BLOCKS/YYYYMMDD.blocks
//!         └────────┘         └─────────────┘
//! ```
//!
//! Two on-disk layouts cover the two access patterns:
//!
//! - **Columnar day files** ([`columnar`]): fixed-capacity
//!   structure-of-arrays segments behind a 256-byte header, filled by a
//!   background writer drained from a bounded lock-free queue, grown in
//!   place on overflow and rotated at UTC day boundaries.
//! - **Block day files** ([`block`]): an append-only sequence of
//!   self-describing compressed blocks (delta + zig-zag + bit-packing),
//!   preallocated in large chunks, for archival and sequential scans.
//!
//! Both are driven by a compile-time [`schema`] registry; writers and
//! readers are monomorphized over the record shape, so the hot loops carry
//! no runtime dispatch.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tickstore::{L2, L2Row, Writer, WriterOpt};
//!
//! let mut writer = Writer::<L2>::new(WriterOpt::new("/data/ticks", "BTCUSD"));
//! writer.start()?;
//! writer.enqueue(L2Row { ts_ns, price, qty, side });
//! writer.stop();
//! ```
//!
//! ## Concurrency Contract
//!
//! One producer thread and one writer thread per columnar writer; the SPSC
//! queue is the only mutable state they share. Block writers and all
//! readers are single-threaded and caller-driven. Files are single-writer:
//! nothing may mutate a day file concurrently with the process that owns
//! it, and readers only open files that are no longer being written.
//!
//! ## Module Overview
//!
//! - [`schema`]: record shapes, partition keys, marshaling
//! - [`queue`]: bounded lock-free SPSC ring
//! - [`columnar`]: column day-file writer and reader
//! - [`block`]: block codec, block day-file writer and reader
//! - [`memory`]: huge-page staging slab
//! - [`dayfile`]: UTC day arithmetic and day-file discovery
//! - [`config`]: tunables and size constants

pub mod block;
pub mod columnar;
pub mod config;
pub mod dayfile;
pub mod mapio;
pub mod memory;
pub mod queue;
pub mod schema;

pub use block::{
    BlockCodec, BlockReader, BlockReaderOpt, BlockWriter, BlockWriterOpt, EventKind, RowsView,
    TradeBlockCodec, TradeRow,
};
pub use columnar::{ColFileHeader, Reader, ReaderOpt, Segment, Writer, WriterOpt};
pub use memory::HugeSlab;
pub use schema::{
    Imbalance, ImbalanceRow, L2Row, L3Row, Schema, Voi, VoiRow, Vwap, VwapRow, L2, L3,
};
