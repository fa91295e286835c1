//! # Block Codec
//!
//! Encodes a batch of trade-flavored rows into one self-describing
//! compressed block:
//!
//! - timestamps as deltas from the block's first timestamp, quantized to
//!   `ts_scale_ns` (1 ms by default) and bit-packed at the minimal width;
//! - prices as zig-zag-encoded deltas from the first price, bit-packed at
//!   the minimal width;
//! - sizes verbatim (4 bytes each);
//! - side and event kind as one bit each, byte-padded.
//!
//! The 76-byte block header records the bases, the bit widths, and an
//! `(offset, length)` pair per column, all relative to the block start.
//! Column payloads follow the header; the header itself is written last
//! into its reserved prefix once every length is known.
//!
//! Bit streams are little-endian, LSB-first within each byte. Packing uses
//! a 128-bit accumulator so every width up to 64 bits round-trips exactly.

use eyre::{ensure, Result};
use zerocopy::little_endian::{F32, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::DEFAULT_TS_SCALE_NS;

pub const BLOCK_MAGIC: [u8; 8] = *b"TRDBLK\n\0";
pub const BLOCK_VERSION: u16 = 1;

/// Size of the on-disk block header.
pub const BLOCK_HEADER_SIZE: usize = 76;

/// Whether a row was a resting-book event or a trade print. Packed as one
/// bit in the block's kind column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Quote,
    Trade,
}

/// Trade-flavored row consumed and produced by the block store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeRow {
    pub ts_ns: u64,
    pub price: u32,
    pub size: f32,
    pub side: u8,
    pub kind: EventKind,
}

/// Self-describing header at the start of every block.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockHeader {
    magic: [u8; 8],
    version: U16,
    flags: U16,
    n_rows: U32,
    base_ts: U64,
    base_px: U32,
    ts_scale_ns: U32,
    ts_bw: u8,
    px_bw: u8,
    reserved0: U16,
    off_ts: U32,
    len_ts: U32,
    off_px: U32,
    len_px: U32,
    off_sz: U32,
    len_sz: U32,
    off_side: U32,
    len_side: U32,
    off_kind: U32,
    len_kind: U32,
}

const _: () = assert!(std::mem::size_of::<BlockHeader>() == BLOCK_HEADER_SIZE);

impl BlockHeader {
    /// Parses and validates a block header from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= BLOCK_HEADER_SIZE,
            "block too small for header: {} < {}",
            bytes.len(),
            BLOCK_HEADER_SIZE
        );
        let header = Self::ref_from_bytes(&bytes[..BLOCK_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse block header: {:?}", e))?;
        ensure!(header.magic == BLOCK_MAGIC, "block magic mismatch");
        ensure!(
            header.version.get() == BLOCK_VERSION,
            "unsupported block version: {}",
            header.version.get()
        );
        Ok(header)
    }

    pub fn n_rows(&self) -> u32 {
        self.n_rows.get()
    }

    pub fn base_ts(&self) -> u64 {
        self.base_ts.get()
    }

    pub fn base_px(&self) -> u32 {
        self.base_px.get()
    }

    pub fn ts_scale_ns(&self) -> u32 {
        self.ts_scale_ns.get()
    }

    pub fn ts_bw(&self) -> u8 {
        self.ts_bw
    }

    pub fn px_bw(&self) -> u8 {
        self.px_bw
    }
}

/// Number of bits needed to represent every value below `x`; clamped to a
/// minimum of 1 so a zero width only ever means "no rows".
#[inline]
pub fn ceil_log2(x: u64) -> u32 {
    if x <= 1 {
        1
    } else {
        64 - (x - 1).leading_zeros()
    }
}

#[inline]
pub fn zigzag_enc32(v: i32) -> u32 {
    ((v as u32) << 1) ^ ((v >> 31) as u32)
}

#[inline]
pub fn zigzag_dec32(v: u32) -> i32 {
    ((v >> 1) ^ (v & 1).wrapping_neg()) as i32
}

/// Bytes occupied by `n` values packed at `bw` bits each.
#[inline]
pub fn packed_len(n: usize, bw: u32) -> usize {
    (n * bw as usize).div_ceil(8)
}

pub fn bitpack_u64(vals: &[u64], bw: u32, out: &mut Vec<u8>) {
    debug_assert!(bw <= 64);
    if bw == 0 || vals.is_empty() {
        return;
    }
    let mask = if bw == 64 { u64::MAX } else { (1u64 << bw) - 1 };
    let mut acc: u128 = 0;
    let mut bits: u32 = 0;
    for &v in vals {
        acc |= ((v & mask) as u128) << bits;
        bits += bw;
        while bits >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push((acc & 0xff) as u8);
    }
}

/// Inverse of [`bitpack_u64`]. `src` must hold at least
/// `packed_len(out.len(), bw)` bytes.
pub fn bitunpack_u64(src: &[u8], bw: u32, out: &mut [u64]) {
    debug_assert!(bw <= 64);
    if bw == 0 {
        out.fill(0);
        return;
    }
    let mask = if bw == 64 { u64::MAX } else { (1u64 << bw) - 1 };
    let mut idx = 0usize;
    let mut acc: u128 = 0;
    let mut bits: u32 = 0;
    for slot in out.iter_mut() {
        while bits < bw {
            acc |= (src[idx] as u128) << bits;
            idx += 1;
            bits += 8;
        }
        *slot = (acc as u64) & mask;
        acc >>= bw;
        bits -= bw;
    }
}

pub fn bitpack_u32(vals: &[u32], bw: u32, out: &mut Vec<u8>) {
    debug_assert!(bw <= 32);
    if bw == 0 || vals.is_empty() {
        return;
    }
    let mask = if bw == 32 { u32::MAX } else { (1u32 << bw) - 1 };
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;
    for &v in vals {
        acc |= ((v & mask) as u64) << bits;
        bits += bw;
        while bits >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push((acc & 0xff) as u8);
    }
}

/// Inverse of [`bitpack_u32`]. `src` must hold at least
/// `packed_len(out.len(), bw)` bytes.
pub fn bitunpack_u32(src: &[u8], bw: u32, out: &mut [u32]) {
    debug_assert!(bw <= 32);
    if bw == 0 {
        out.fill(0);
        return;
    }
    let mask = if bw == 32 { u32::MAX } else { (1u32 << bw) - 1 };
    let mut idx = 0usize;
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;
    for slot in out.iter_mut() {
        while bits < bw {
            acc |= (src[idx] as u64) << bits;
            idx += 1;
            bits += 8;
        }
        *slot = (acc as u32) & mask;
        acc >>= bw;
        bits -= bw;
    }
}

/// Packs the low bit of each input byte, LSB-first, byte-padded.
pub fn bitpack_bits(vals: &[u8], out: &mut Vec<u8>) {
    for chunk in vals.chunks(8) {
        let mut b = 0u8;
        for (bit, &v) in chunk.iter().enumerate() {
            b |= (v & 1) << bit;
        }
        out.push(b);
    }
}

/// Inverse of [`bitpack_bits`]. `src` must hold at least
/// `(out.len() + 7) / 8` bytes.
pub fn bitunpack_bits(src: &[u8], out: &mut [u8]) {
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (src[i / 8] >> (i % 8)) & 1;
    }
}

/// A block encoding for some row shape. Monomorphic; the block writer and
/// reader are generic over it.
pub trait BlockCodec {
    type Row: Copy + Send + 'static;

    /// Appends one encoded block for `rows` to `out`. Encoding an empty
    /// batch appends nothing.
    fn encode_block(rows: &[Self::Row], out: &mut Vec<u8>);

    /// Decodes one block from the start of `src` into `rows_out`
    /// (replacing its contents) and returns the bytes consumed.
    fn decode_block(src: &[u8], rows_out: &mut Vec<Self::Row>) -> Result<usize>;
}

/// Delta + zig-zag + bit-packing codec for [`TradeRow`] batches.
pub struct TradeBlockCodec;

impl BlockCodec for TradeBlockCodec {
    type Row = TradeRow;

    fn encode_block(rows: &[TradeRow], out: &mut Vec<u8>) {
        if rows.is_empty() {
            return;
        }
        debug_assert!(rows.len() <= u32::MAX as usize);
        let n = rows.len();
        let base_ts = rows[0].ts_ns;
        let base_px = rows[0].price;
        let scale = DEFAULT_TS_SCALE_NS as u64;

        let mut ts_delta = Vec::with_capacity(n);
        let mut px_zz = Vec::with_capacity(n);
        let mut side = Vec::with_capacity(n);
        let mut kind = Vec::with_capacity(n);
        let mut max_dt = 0u64;
        let mut max_zz = 0u32;

        for row in rows {
            let dt = row.ts_ns.wrapping_sub(base_ts) / scale;
            max_dt = max_dt.max(dt);
            ts_delta.push(dt);

            let dx = (row.price as i64 - base_px as i64) as i32;
            let zz = zigzag_enc32(dx);
            max_zz = max_zz.max(zz);
            px_zz.push(zz);

            side.push(row.side);
            kind.push((row.kind == EventKind::Trade) as u8);
        }

        let ts_bw = ceil_log2(max_dt.saturating_add(1)) as u8;
        let px_bw = ceil_log2(max_zz as u64 + 1) as u8;

        let start = out.len();
        out.resize(start + BLOCK_HEADER_SIZE, 0);

        let off_ts = BLOCK_HEADER_SIZE as u32;
        let before = out.len();
        bitpack_u64(&ts_delta, ts_bw as u32, out);
        let len_ts = (out.len() - before) as u32;

        let off_px = off_ts + len_ts;
        let before = out.len();
        bitpack_u32(&px_zz, px_bw as u32, out);
        let len_px = (out.len() - before) as u32;

        let off_sz = off_px + len_px;
        let len_sz = (n * 4) as u32;
        for row in rows {
            out.extend_from_slice(&row.size.to_le_bytes());
        }

        let off_side = off_sz + len_sz;
        let before = out.len();
        bitpack_bits(&side, out);
        let len_side = (out.len() - before) as u32;

        let off_kind = off_side + len_side;
        let before = out.len();
        bitpack_bits(&kind, out);
        let len_kind = (out.len() - before) as u32;

        let header = BlockHeader {
            magic: BLOCK_MAGIC,
            version: U16::new(BLOCK_VERSION),
            flags: U16::new(0),
            n_rows: U32::new(n as u32),
            base_ts: U64::new(base_ts),
            base_px: U32::new(base_px),
            ts_scale_ns: U32::new(DEFAULT_TS_SCALE_NS),
            ts_bw,
            px_bw,
            reserved0: U16::new(0),
            off_ts: U32::new(off_ts),
            len_ts: U32::new(len_ts),
            off_px: U32::new(off_px),
            len_px: U32::new(len_px),
            off_sz: U32::new(off_sz),
            len_sz: U32::new(len_sz),
            off_side: U32::new(off_side),
            len_side: U32::new(len_side),
            off_kind: U32::new(off_kind),
            len_kind: U32::new(len_kind),
        };
        out[start..start + BLOCK_HEADER_SIZE].copy_from_slice(header.as_bytes());
    }

    fn decode_block(src: &[u8], rows_out: &mut Vec<TradeRow>) -> Result<usize> {
        let header = BlockHeader::from_bytes(src)?;
        let n = header.n_rows() as usize;
        rows_out.clear();
        if n == 0 {
            return Ok(BLOCK_HEADER_SIZE);
        }

        let ts_bytes = column_slice(src, header.off_ts, header.len_ts, "ts")?;
        ensure!(
            ts_bytes.len() >= packed_len(n, header.ts_bw() as u32),
            "block ts column shorter than {} packed rows",
            n
        );
        let px_bytes = column_slice(src, header.off_px, header.len_px, "px")?;
        ensure!(
            px_bytes.len() >= packed_len(n, header.px_bw() as u32),
            "block px column shorter than {} packed rows",
            n
        );
        let sz_bytes = column_slice(src, header.off_sz, header.len_sz, "size")?;
        ensure!(
            sz_bytes.len() >= n * 4,
            "block size column shorter than {} rows",
            n
        );
        let side_bytes = column_slice(src, header.off_side, header.len_side, "side")?;
        ensure!(
            side_bytes.len() >= n.div_ceil(8),
            "block side column shorter than {} rows",
            n
        );
        let kind_bytes = column_slice(src, header.off_kind, header.len_kind, "kind")?;
        ensure!(
            kind_bytes.len() >= n.div_ceil(8),
            "block kind column shorter than {} rows",
            n
        );

        let mut ts_delta = vec![0u64; n];
        bitunpack_u64(ts_bytes, header.ts_bw() as u32, &mut ts_delta);
        let mut px_zz = vec![0u32; n];
        bitunpack_u32(px_bytes, header.px_bw() as u32, &mut px_zz);
        let mut side = vec![0u8; n];
        bitunpack_bits(side_bytes, &mut side);
        let mut kind = vec![0u8; n];
        bitunpack_bits(kind_bytes, &mut kind);

        let sizes = <[F32]>::ref_from_bytes(&sz_bytes[..n * 4])
            .map_err(|e| eyre::eyre!("block size column unreadable: {:?}", e))?;

        let base_ts = header.base_ts();
        let base_px = header.base_px() as i64;
        let scale = header.ts_scale_ns() as u64;

        rows_out.reserve(n);
        for i in 0..n {
            let px = base_px + zigzag_dec32(px_zz[i]) as i64;
            ensure!(
                (0..=u32::MAX as i64).contains(&px),
                "price overflow in block decode: base {} delta {}",
                base_px,
                zigzag_dec32(px_zz[i])
            );
            rows_out.push(TradeRow {
                ts_ns: base_ts.wrapping_add(ts_delta[i].wrapping_mul(scale)),
                price: px as u32,
                size: sizes[i].get(),
                side: side[i],
                kind: if kind[i] == 1 {
                    EventKind::Trade
                } else {
                    EventKind::Quote
                },
            });
        }

        let end = [
            header.off_ts.get() + header.len_ts.get(),
            header.off_px.get() + header.len_px.get(),
            header.off_sz.get() + header.len_sz.get(),
            header.off_side.get() + header.len_side.get(),
            header.off_kind.get() + header.len_kind.get(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0) as usize;
        Ok(end.max(BLOCK_HEADER_SIZE))
    }
}

fn column_slice<'a>(src: &'a [u8], off: U32, len: U32, what: &str) -> Result<&'a [u8]> {
    let off = off.get() as usize;
    let len = len.get() as usize;
    let end = off
        .checked_add(len)
        .ok_or_else(|| eyre::eyre!("block {} column range overflows", what))?;
    ensure!(
        off >= BLOCK_HEADER_SIZE && end <= src.len(),
        "block {} column [{}, {}) outside block of {} bytes",
        what,
        off,
        end,
        src.len()
    );
    Ok(&src[off..end])
}
