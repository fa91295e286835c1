//! # Schema Registry
//!
//! Describes the record shapes the engine can persist: column count,
//! per-column element widths, file magic, format version, the partition key
//! and the marshal/unmarshal operations that move a row into and out of
//! column base pointers.
//!
//! Schemas are zero-sized types implementing [`Schema`]; writers and readers
//! are generic over them, so all per-schema decisions are monomorphized and
//! the write/read inner loops stay branch-free. There is no runtime
//! dispatch anywhere on the hot path.
//!
//! ## Provided Schemas
//!
//! | schema        | magic      | columns                                             |
//! |---------------|------------|-----------------------------------------------------|
//! | [`L2`]        | `L2COL\n`  | ts_ns u64, price u32, qty f32, side u8              |
//! | [`L3`]        | `L3COL\n`  | id u64, ts_ns u64, price u32, size u32, action u8, side u8 |
//! | [`Imbalance`] | `IMBAL\n`  | imbalance f32, ts_ns u64                            |
//! | [`Vwap`]      | `VWAP\n`   | vwap f32, ts_ns u64                                 |
//! | [`Voi`]       | `VOIEVT`   | mid_price u32, voi u32, ts_ns u64                   |
//!
//! ## Partition Key
//!
//! Every row carries an event timestamp in nanoseconds since the epoch. The
//! partition key is the containing hour, `floor(ts_ns / 1e9 / 3600) * 3600`
//! seconds; the columnar writer coarsens it further to the containing UTC
//! day to decide file identity.

use crate::config::{MAX_COLS, SECONDS_PER_HOUR};

/// Partition key: start of the hour containing `ts_ns`, in epoch seconds.
#[inline]
pub fn hour_from_ts_ns(ts_ns: u64) -> u64 {
    let secs = ts_ns / 1_000_000_000;
    (secs / SECONDS_PER_HOUR) * SECONDS_PER_HOUR
}

/// A record shape the columnar store can persist.
///
/// Implementations must keep `COLS <= MAX_COLS` and report a non-zero
/// element width for every column index below `COLS`. The `'static` bound
/// lets writer worker threads be generic over the schema.
pub trait Schema: 'static {
    /// In-memory row type produced by the feed and handed to the writer.
    type Row: Copy + Send + 'static;

    /// Number of columns.
    const COLS: usize;

    /// Six-byte file magic written into every day-file header.
    const MAGIC: [u8; 6];

    /// On-disk format version.
    const VERSION: u16;

    /// Element width in bytes of column `col`.
    fn col_size(col: usize) -> usize;

    /// Partition key of a row (start of its hour, epoch seconds).
    fn hour_from_row(row: &Self::Row) -> u64;

    /// Scatters `row` into the column regions at logical index `idx`.
    ///
    /// # Safety
    ///
    /// `cols` must hold `COLS` pointers, where `cols[i]` points to a region
    /// with room for at least `idx + 1` elements of `col_size(i)` bytes.
    /// Stores are unaligned, so the regions carry no alignment requirement.
    unsafe fn write_row(row: &Self::Row, cols: &[*mut u8], idx: u64);

    /// Gathers the row at logical index `idx` out of the column regions.
    ///
    /// # Safety
    ///
    /// Same contract as [`Schema::write_row`], with read-only pointers.
    unsafe fn read_row(cols: &[*const u8], idx: u64) -> Self::Row;
}

const _: () = assert!(L2::COLS <= MAX_COLS);
const _: () = assert!(L3::COLS <= MAX_COLS);
const _: () = assert!(Imbalance::COLS <= MAX_COLS);
const _: () = assert!(Vwap::COLS <= MAX_COLS);
const _: () = assert!(Voi::COLS <= MAX_COLS);

/// One price-level update of an L2 order book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct L2Row {
    pub ts_ns: u64,
    pub price: u32,
    pub qty: f32,
    pub side: u8,
}

/// L2 quote schema.
pub struct L2;

impl L2 {
    pub const COL_TS: usize = 0;
    pub const COL_PX: usize = 1;
    pub const COL_QTY: usize = 2;
    pub const COL_SIDE: usize = 3;
}

impl Schema for L2 {
    type Row = L2Row;

    const COLS: usize = 4;
    const MAGIC: [u8; 6] = *b"L2COL\n";
    const VERSION: u16 = 1;

    #[inline]
    fn col_size(col: usize) -> usize {
        match col {
            Self::COL_TS => 8,
            Self::COL_PX | Self::COL_QTY => 4,
            _ => 1,
        }
    }

    #[inline]
    fn hour_from_row(row: &L2Row) -> u64 {
        hour_from_ts_ns(row.ts_ns)
    }

    #[inline]
    unsafe fn write_row(row: &L2Row, cols: &[*mut u8], idx: u64) {
        let i = idx as usize;
        unsafe {
            cols[Self::COL_TS].cast::<u64>().add(i).write_unaligned(row.ts_ns);
            cols[Self::COL_PX].cast::<u32>().add(i).write_unaligned(row.price);
            cols[Self::COL_QTY].cast::<f32>().add(i).write_unaligned(row.qty);
            cols[Self::COL_SIDE].add(i).write(row.side);
        }
    }

    #[inline]
    unsafe fn read_row(cols: &[*const u8], idx: u64) -> L2Row {
        let i = idx as usize;
        unsafe {
            L2Row {
                ts_ns: cols[Self::COL_TS].cast::<u64>().add(i).read_unaligned(),
                price: cols[Self::COL_PX].cast::<u32>().add(i).read_unaligned(),
                qty: cols[Self::COL_QTY].cast::<f32>().add(i).read_unaligned(),
                side: cols[Self::COL_SIDE].add(i).read(),
            }
        }
    }
}

/// One order-level event of an L3 feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct L3Row {
    pub id: u64,
    pub ts_ns: u64,
    pub price: u32,
    pub size: u32,
    pub action: u8,
    pub side: u8,
}

/// L3 order schema.
pub struct L3;

impl L3 {
    pub const COL_ID: usize = 0;
    pub const COL_TS: usize = 1;
    pub const COL_PX: usize = 2;
    pub const COL_SZ: usize = 3;
    pub const COL_ACT: usize = 4;
    pub const COL_SIDE: usize = 5;
}

impl Schema for L3 {
    type Row = L3Row;

    const COLS: usize = 6;
    const MAGIC: [u8; 6] = *b"L3COL\n";
    const VERSION: u16 = 1;

    #[inline]
    fn col_size(col: usize) -> usize {
        match col {
            Self::COL_ID | Self::COL_TS => 8,
            Self::COL_PX | Self::COL_SZ => 4,
            _ => 1,
        }
    }

    #[inline]
    fn hour_from_row(row: &L3Row) -> u64 {
        hour_from_ts_ns(row.ts_ns)
    }

    #[inline]
    unsafe fn write_row(row: &L3Row, cols: &[*mut u8], idx: u64) {
        let i = idx as usize;
        unsafe {
            cols[Self::COL_ID].cast::<u64>().add(i).write_unaligned(row.id);
            cols[Self::COL_TS].cast::<u64>().add(i).write_unaligned(row.ts_ns);
            cols[Self::COL_PX].cast::<u32>().add(i).write_unaligned(row.price);
            cols[Self::COL_SZ].cast::<u32>().add(i).write_unaligned(row.size);
            cols[Self::COL_ACT].add(i).write(row.action);
            cols[Self::COL_SIDE].add(i).write(row.side);
        }
    }

    #[inline]
    unsafe fn read_row(cols: &[*const u8], idx: u64) -> L3Row {
        let i = idx as usize;
        unsafe {
            L3Row {
                id: cols[Self::COL_ID].cast::<u64>().add(i).read_unaligned(),
                ts_ns: cols[Self::COL_TS].cast::<u64>().add(i).read_unaligned(),
                price: cols[Self::COL_PX].cast::<u32>().add(i).read_unaligned(),
                size: cols[Self::COL_SZ].cast::<u32>().add(i).read_unaligned(),
                action: cols[Self::COL_ACT].add(i).read(),
                side: cols[Self::COL_SIDE].add(i).read(),
            }
        }
    }
}

/// Order-book imbalance factor sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImbalanceRow {
    pub imbalance: f32,
    pub ts_ns: u64,
}

/// Imbalance factor schema.
pub struct Imbalance;

impl Imbalance {
    pub const COL_VALUE: usize = 0;
    pub const COL_TS: usize = 1;
}

impl Schema for Imbalance {
    type Row = ImbalanceRow;

    const COLS: usize = 2;
    const MAGIC: [u8; 6] = *b"IMBAL\n";
    const VERSION: u16 = 1;

    #[inline]
    fn col_size(col: usize) -> usize {
        if col == Self::COL_VALUE {
            4
        } else {
            8
        }
    }

    #[inline]
    fn hour_from_row(row: &ImbalanceRow) -> u64 {
        hour_from_ts_ns(row.ts_ns)
    }

    #[inline]
    unsafe fn write_row(row: &ImbalanceRow, cols: &[*mut u8], idx: u64) {
        let i = idx as usize;
        unsafe {
            cols[Self::COL_VALUE].cast::<f32>().add(i).write_unaligned(row.imbalance);
            cols[Self::COL_TS].cast::<u64>().add(i).write_unaligned(row.ts_ns);
        }
    }

    #[inline]
    unsafe fn read_row(cols: &[*const u8], idx: u64) -> ImbalanceRow {
        let i = idx as usize;
        unsafe {
            ImbalanceRow {
                imbalance: cols[Self::COL_VALUE].cast::<f32>().add(i).read_unaligned(),
                ts_ns: cols[Self::COL_TS].cast::<u64>().add(i).read_unaligned(),
            }
        }
    }
}

/// Volume-weighted average price sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VwapRow {
    pub vwap: f32,
    pub ts_ns: u64,
}

/// VWAP factor schema.
pub struct Vwap;

impl Vwap {
    pub const COL_VALUE: usize = 0;
    pub const COL_TS: usize = 1;
}

impl Schema for Vwap {
    type Row = VwapRow;

    const COLS: usize = 2;
    // Five magic characters; the sixth stored byte stays NUL.
    const MAGIC: [u8; 6] = *b"VWAP\n\0";
    const VERSION: u16 = 1;

    #[inline]
    fn col_size(col: usize) -> usize {
        if col == Self::COL_VALUE {
            4
        } else {
            8
        }
    }

    #[inline]
    fn hour_from_row(row: &VwapRow) -> u64 {
        hour_from_ts_ns(row.ts_ns)
    }

    #[inline]
    unsafe fn write_row(row: &VwapRow, cols: &[*mut u8], idx: u64) {
        let i = idx as usize;
        unsafe {
            cols[Self::COL_VALUE].cast::<f32>().add(i).write_unaligned(row.vwap);
            cols[Self::COL_TS].cast::<u64>().add(i).write_unaligned(row.ts_ns);
        }
    }

    #[inline]
    unsafe fn read_row(cols: &[*const u8], idx: u64) -> VwapRow {
        let i = idx as usize;
        unsafe {
            VwapRow {
                vwap: cols[Self::COL_VALUE].cast::<f32>().add(i).read_unaligned(),
                ts_ns: cols[Self::COL_TS].cast::<u64>().add(i).read_unaligned(),
            }
        }
    }
}

/// Volume-order-imbalance sample with its mid price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiRow {
    pub mid_price: u32,
    pub voi: u32,
    pub ts_ns: u64,
}

/// VOI factor schema.
pub struct Voi;

impl Voi {
    pub const COL_MID: usize = 0;
    pub const COL_VOI: usize = 1;
    pub const COL_TS: usize = 2;
}

impl Schema for Voi {
    type Row = VoiRow;

    const COLS: usize = 3;
    const MAGIC: [u8; 6] = *b"VOIEVT";
    const VERSION: u16 = 1;

    #[inline]
    fn col_size(col: usize) -> usize {
        if col == Self::COL_TS {
            8
        } else {
            4
        }
    }

    #[inline]
    fn hour_from_row(row: &VoiRow) -> u64 {
        hour_from_ts_ns(row.ts_ns)
    }

    #[inline]
    unsafe fn write_row(row: &VoiRow, cols: &[*mut u8], idx: u64) {
        let i = idx as usize;
        unsafe {
            cols[Self::COL_MID].cast::<u32>().add(i).write_unaligned(row.mid_price);
            cols[Self::COL_VOI].cast::<u32>().add(i).write_unaligned(row.voi);
            cols[Self::COL_TS].cast::<u64>().add(i).write_unaligned(row.ts_ns);
        }
    }

    #[inline]
    unsafe fn read_row(cols: &[*const u8], idx: u64) -> VoiRow {
        let i = idx as usize;
        unsafe {
            VoiRow {
                mid_price: cols[Self::COL_MID].cast::<u32>().add(i).read_unaligned(),
                voi: cols[Self::COL_VOI].cast::<u32>().add(i).read_unaligned(),
                ts_ns: cols[Self::COL_TS].cast::<u64>().add(i).read_unaligned(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marshal_roundtrip<S: Schema>(row: S::Row, rows: usize, idx: u64) -> S::Row {
        let mut regions: Vec<Vec<u8>> = (0..S::COLS)
            .map(|c| vec![0u8; rows * S::col_size(c)])
            .collect();

        let mut cols: Vec<*mut u8> = regions.iter_mut().map(|r| r.as_mut_ptr()).collect();
        unsafe { S::write_row(&row, &cols, idx) };

        let cols_ro: Vec<*const u8> = cols.iter_mut().map(|p| *p as *const u8).collect();
        unsafe { S::read_row(&cols_ro, idx) }
    }

    #[test]
    fn l2_marshal_roundtrip() {
        let row = L2Row {
            ts_ns: 1_723_680_000_123_456_789,
            price: 10_000,
            qty: 0.25,
            side: 1,
        };
        assert_eq!(marshal_roundtrip::<L2>(row, 16, 7), row);
    }

    #[test]
    fn l3_marshal_roundtrip() {
        let row = L3Row {
            id: 42,
            ts_ns: 3_600_000_000_000,
            price: 9_999,
            size: 17,
            action: 2,
            side: 0,
        };
        assert_eq!(marshal_roundtrip::<L3>(row, 8, 0), row);
    }

    #[test]
    fn factor_marshal_roundtrips() {
        let imb = ImbalanceRow {
            imbalance: -0.75,
            ts_ns: 86_400_000_000_000,
        };
        assert_eq!(marshal_roundtrip::<Imbalance>(imb, 4, 3), imb);

        let vwap = VwapRow {
            vwap: 101.5,
            ts_ns: 86_400_000_000_001,
        };
        assert_eq!(marshal_roundtrip::<Vwap>(vwap, 4, 1), vwap);

        let voi = VoiRow {
            mid_price: 50_000,
            voi: 12,
            ts_ns: 7_200_000_000_000,
        };
        assert_eq!(marshal_roundtrip::<Voi>(voi, 4, 2), voi);
    }

    #[test]
    fn hour_partition_floors_to_hour() {
        assert_eq!(hour_from_ts_ns(0), 0);
        assert_eq!(hour_from_ts_ns(3_599_999_999_999), 0);
        assert_eq!(hour_from_ts_ns(3_600_000_000_000), 3_600);
        assert_eq!(hour_from_ts_ns(7_261_000_000_000), 7_200);
    }

    #[test]
    fn magics_are_six_bytes_and_distinct() {
        let magics = [L2::MAGIC, L3::MAGIC, Imbalance::MAGIC, Vwap::MAGIC, Voi::MAGIC];
        for (i, a) in magics.iter().enumerate() {
            for b in magics.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
