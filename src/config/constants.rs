//! # Configuration Constants
//!
//! This module centralizes the tunables and size constants of the engine.
//! Constants that depend on each other are co-located and their
//! relationships documented, so a change in one place cannot silently
//! invalidate another.
//!
//! ## Dependency Graph
//!
//! ```text
//! COL_HEADER_SIZE (256 bytes)
//!       │
//!       ├─> COL_HEADER_PREFIX_SIZE (56 bytes, fixed fields)
//!       │
//!       └─> MAX_COLS (8): the two per-column u64 tables (offset + element
//!           size) must fit between the prefix and byte 256:
//!           56 + 16 * MAX_COLS <= 256
//!
//! DEFAULT_ROWS_PER_HOUR (2^24)
//!       │
//!       └─> initial day-file capacity = 2 * rows_per_hour. Doubling keeps
//!           the capacity even, which keeps every u64/u32 column region
//!           naturally aligned behind the 256-byte header.
//!
//! MAP_WINDOW_BYTES (256 MiB)
//!       │
//!       └─> FALLOCATE_CHUNK_BYTES (1 GiB): the block writer reserves file
//!           space in 1 GiB chunks and extends its mapping in 256 MiB
//!           windows, so a reservation always covers the next window.
//!
//! SYNC_INTERVAL_BYTES (64 MiB)
//!       └─> hard fdatasync threshold for the block writer, applied on top
//!           of the configurable per-block cadence.
//! ```

/// Size of the columnar day-file header. The first column region starts
/// immediately after it.
pub const COL_HEADER_SIZE: usize = 256;

/// Size of the fixed (schema-independent) header prefix; the per-column
/// offset and element-size tables follow it.
pub const COL_HEADER_PREFIX_SIZE: usize = 56;

/// Upper bound on columns per schema. Bounds the inline capacity of the
/// per-column tables and keeps the header tables inside 256 bytes.
pub const MAX_COLS: usize = 8;

/// Default sizing hint for a day file: capacity = 2 * rows_per_hour.
pub const DEFAULT_ROWS_PER_HOUR: u64 = 1 << 24;

/// Default SPSC queue capacity in slots. Sized to absorb feed bursts that
/// exceed the writer's instantaneous throughput without allocating.
/// Writers used in tests should pass something much smaller.
pub const DEFAULT_QUEUE_SLOTS: usize = 1 << 26;

/// Default rows per compressed block.
pub const DEFAULT_BLOCK_ROWS: u32 = 8192;

/// Default timestamp quantization for block encoding: nanoseconds are
/// stored as deltas in units of this scale (1e6 ns = 1 ms).
pub const DEFAULT_TS_SCALE_NS: u32 = 1_000_000;

/// Hard fdatasync threshold for the block writer.
pub const SYNC_INTERVAL_BYTES: u64 = 64 << 20;

/// Granularity by which the block writer extends its memory mapping.
pub const MAP_WINDOW_BYTES: u64 = 256 << 20;

/// Granularity by which the block writer extends its fallocate reservation.
pub const FALLOCATE_CHUNK_BYTES: u64 = 1 << 30;

/// Huge page size targeted by the staging slab (2 MiB).
pub const HUGE_PAGE_BYTES: usize = 2 * 1024 * 1024;

pub const SECONDS_PER_HOUR: u64 = 3_600;
pub const SECONDS_PER_DAY: u64 = 86_400;

const _: () = assert!(COL_HEADER_PREFIX_SIZE + 16 * MAX_COLS <= COL_HEADER_SIZE);
const _: () = assert!(DEFAULT_QUEUE_SLOTS.is_power_of_two());
const _: () = assert!(MAP_WINDOW_BYTES <= FALLOCATE_CHUNK_BYTES);
const _: () = assert!(SYNC_INTERVAL_BYTES <= MAP_WINDOW_BYTES);
