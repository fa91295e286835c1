//! End-to-end tests of the block-compressed day-file store: randomized
//! codec round-trips, writer/reader flows, and day-header accounting.

use std::fs;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use tickstore::block::{ceil_log2, BlockHeader, DayFileHeader, DAY_HEADER_SIZE};
use tickstore::{
    BlockCodec, BlockReader, BlockReaderOpt, BlockWriter, BlockWriterOpt, EventKind,
    TradeBlockCodec, TradeRow,
};

const TS_SCALE_NS: u64 = 1_000_000;

/// Writer options with a small map window and reservation so tests
/// exercise remapping without reserving gigabytes under tmpdirs.
fn small_opt(base: &std::path::Path, product: &str) -> BlockWriterOpt {
    let mut opt = BlockWriterOpt::new(base, product);
    opt.map_window_bytes = 64 << 10;
    opt.reserve_chunk_bytes = 1 << 20;
    opt
}

fn trade(ts_ns: u64, price: u32, size: f32, side: u8, kind: EventKind) -> TradeRow {
    TradeRow {
        ts_ns,
        price,
        size,
        side,
        kind,
    }
}

fn random_rows(rng: &mut StdRng, n: usize, base_ts: u64, base_px: u32) -> Vec<TradeRow> {
    (0..n)
        .map(|i| {
            let ts_ns = if i == 0 {
                base_ts
            } else {
                base_ts + rng.gen_range(0..1_000_000_000)
            };
            let price = if i == 0 {
                base_px
            } else {
                rng.gen_range(base_px - 50..=base_px + 50)
            };
            trade(
                ts_ns,
                price,
                rng.gen_range(0.0f32..100.0),
                rng.gen_range(0..=1),
                if rng.gen_bool(0.3) {
                    EventKind::Trade
                } else {
                    EventKind::Quote
                },
            )
        })
        .collect()
}

/// What a row should decode to: timestamps are quantized to whole
/// multiples of the scale relative to the block base.
fn quantized(row: &TradeRow, base_ts: u64) -> TradeRow {
    let delta = row.ts_ns.wrapping_sub(base_ts) / TS_SCALE_NS;
    TradeRow {
        ts_ns: base_ts.wrapping_add(delta.wrapping_mul(TS_SCALE_NS)),
        ..*row
    }
}

#[test]
fn randomized_block_roundtrip_with_minimal_widths() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let base_ts = 1_700_000_000_000_000_000u64;
    let base_px = 50_000u32;
    let rows = random_rows(&mut rng, 1_000, base_ts, base_px);

    let mut buf = Vec::new();
    TradeBlockCodec::encode_block(&rows, &mut buf);

    let mut decoded = Vec::new();
    let consumed = TradeBlockCodec::decode_block(&buf, &mut decoded).unwrap();
    assert_eq!(consumed, buf.len());

    let expected: Vec<TradeRow> = rows.iter().map(|r| quantized(r, base_ts)).collect();
    assert_eq!(decoded, expected);

    // Bit widths must be minimal for the observed maxima.
    let max_dt = rows
        .iter()
        .map(|r| (r.ts_ns - base_ts) / TS_SCALE_NS)
        .max()
        .unwrap();
    let max_zz = rows
        .iter()
        .map(|r| {
            let dx = r.price as i64 - base_px as i64;
            ((dx << 1) ^ (dx >> 63)) as u64
        })
        .max()
        .unwrap();

    let header = BlockHeader::from_bytes(&buf).unwrap();
    assert_eq!(header.n_rows(), 1_000);
    assert_eq!(header.base_ts(), base_ts);
    assert_eq!(header.base_px(), base_px);
    assert_eq!(header.ts_bw() as u32, ceil_log2(max_dt + 1));
    assert_eq!(header.px_bw() as u32, ceil_log2(max_zz + 1));
}

#[test]
fn three_full_blocks_roundtrip_through_day_file() {
    let dir = tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let base_ts = 1_704_153_600_000_000_000u64; // 2024-01-02
    let rows = random_rows(&mut rng, 3 * 8_192, base_ts, 30_000);

    let mut writer = BlockWriter::<TradeBlockCodec>::new(small_opt(dir.path(), "BTCUSD"));
    writer.begin_day(20_240_102).unwrap();
    for row in &rows {
        writer.write_row(*row).unwrap();
    }
    writer.close().unwrap();

    let path = dir.path().join("BTCUSD-BLOCKS").join("20240102.blocks");
    assert!(path.exists());

    // Day header accounting: exact truncation and consistent totals.
    let bytes = fs::read(&path).unwrap();
    let day_header = DayFileHeader::from_bytes(&bytes).unwrap();
    assert_eq!(day_header.yyyymmdd(), 20_240_102);
    assert_eq!(day_header.rows_total(), 3 * 8_192);
    assert_eq!(day_header.blocks_total(), 3);
    assert_eq!(
        bytes.len() as u64,
        DAY_HEADER_SIZE as u64 + day_header.bytes_total()
    );

    let reader = BlockReader::<TradeBlockCodec>::new(BlockReaderOpt::new(dir.path(), "BTCUSD"));
    assert_eq!(reader.days(), vec![20_240_102]);

    let mut views = 0u32;
    let mut total_rows = 0u64;
    let mut last_offset = 0u64;
    let mut decoded: Vec<TradeRow> = Vec::new();
    reader
        .visit_day_files(|view| {
            views += 1;
            total_rows += view.rows.len() as u64;
            assert!(view.file_offset > last_offset, "offsets must ascend");
            last_offset = view.file_offset;
            assert_eq!(view.yyyymmdd, 20_240_102);
            decoded.extend_from_slice(view.rows);
        })
        .unwrap();

    assert_eq!(views, 3);
    assert_eq!(total_rows, 3 * 8_192);

    // Each block quantizes against its own first row.
    let mut expected = Vec::with_capacity(rows.len());
    for chunk in rows.chunks(8_192) {
        let base = chunk[0].ts_ns;
        expected.extend(chunk.iter().map(|r| quantized(r, base)));
    }
    assert_eq!(decoded, expected);
}

#[test]
fn partial_batch_is_flushed_on_close() {
    let dir = tempdir().unwrap();
    let base_ts = 1_704_067_200_000_000_000u64;
    let rows: Vec<TradeRow> = (0..100)
        .map(|i| trade(base_ts + i * TS_SCALE_NS, 500, 1.0, 0, EventKind::Quote))
        .collect();

    let mut writer = BlockWriter::<TradeBlockCodec>::new(small_opt(dir.path(), "ETHUSD"));
    writer.begin_day(20_240_101).unwrap();
    for row in &rows {
        writer.write_row(*row).unwrap();
    }
    writer.close().unwrap();

    let reader = BlockReader::<TradeBlockCodec>::new(BlockReaderOpt::new(dir.path(), "ETHUSD"));
    let mut blocks = Vec::new();
    reader
        .visit_day_files(|view| blocks.push(view.rows.len()))
        .unwrap();
    assert_eq!(blocks, vec![100]);
}

#[test]
fn begin_day_switch_flushes_into_previous_file() {
    let dir = tempdir().unwrap();
    let base_ts = 1_704_067_200_000_000_000u64;

    let mut writer = BlockWriter::<TradeBlockCodec>::new(small_opt(dir.path(), "BTCUSD"));
    writer.begin_day(20_240_101).unwrap();
    for i in 0..10u64 {
        writer
            .write_row(trade(base_ts + i * TS_SCALE_NS, 100, 1.0, 0, EventKind::Quote))
            .unwrap();
    }
    // Same day again: no-op, batch survives.
    writer.begin_day(20_240_101).unwrap();
    writer.begin_day(20_240_102).unwrap();
    for i in 0..20u64 {
        writer
            .write_row(trade(base_ts + i * TS_SCALE_NS, 200, 1.0, 1, EventKind::Trade))
            .unwrap();
    }
    writer.close().unwrap();

    let reader = BlockReader::<TradeBlockCodec>::new(BlockReaderOpt::new(dir.path(), "BTCUSD"));
    assert_eq!(reader.days(), vec![20_240_101, 20_240_102]);

    let mut per_day: Vec<(u32, usize)> = Vec::new();
    reader
        .visit_day_files(|view| per_day.push((view.yyyymmdd, view.rows.len())))
        .unwrap();
    assert_eq!(per_day, vec![(20_240_101, 10), (20_240_102, 20)]);
}

#[test]
fn write_block_appends_explicit_batches() {
    let dir = tempdir().unwrap();
    let base_ts = 1_704_067_200_000_000_000u64;
    let make = |n: u64, px: u32| -> Vec<TradeRow> {
        (0..n)
            .map(|i| trade(base_ts + i * TS_SCALE_NS, px, 2.0, 0, EventKind::Quote))
            .collect()
    };

    let mut writer = BlockWriter::<TradeBlockCodec>::new(small_opt(dir.path(), "BTCUSD"));
    writer.begin_day(20_240_101).unwrap();
    writer.write_block(&make(5, 10)).unwrap();
    writer.write_block(&make(7, 20)).unwrap();
    writer.close().unwrap();

    let reader = BlockReader::<TradeBlockCodec>::new(BlockReaderOpt::new(dir.path(), "BTCUSD"));
    let mut blocks = Vec::new();
    reader
        .visit_day_files(|view| blocks.push((view.rows.len(), view.rows[0].price)))
        .unwrap();
    assert_eq!(blocks, vec![(5, 10), (7, 20)]);
}

#[test]
fn write_block_without_open_day_fails() {
    let dir = tempdir().unwrap();
    let mut writer = BlockWriter::<TradeBlockCodec>::new(small_opt(dir.path(), "BTCUSD"));
    let rows = vec![trade(0, 1, 1.0, 0, EventKind::Quote)];
    assert!(writer.write_block(&rows).is_err());
}

#[test]
fn drop_closes_day_file_cleanly() {
    let dir = tempdir().unwrap();
    let base_ts = 1_704_067_200_000_000_000u64;
    {
        let mut writer =
            BlockWriter::<TradeBlockCodec>::new(small_opt(dir.path(), "BTCUSD"));
        writer.begin_day(20_240_101).unwrap();
        for i in 0..17u64 {
            writer
                .write_row(trade(base_ts + i * TS_SCALE_NS, 300, 1.0, 0, EventKind::Quote))
                .unwrap();
        }
    }

    let reader = BlockReader::<TradeBlockCodec>::new(BlockReaderOpt::new(dir.path(), "BTCUSD"));
    let mut total = 0usize;
    reader.visit_day_files(|view| total += view.rows.len()).unwrap();
    assert_eq!(total, 17);
}

#[test]
fn reader_date_range_is_inclusive() {
    let dir = tempdir().unwrap();
    let base_ts = 1_704_067_200_000_000_000u64;

    let mut writer = BlockWriter::<TradeBlockCodec>::new(small_opt(dir.path(), "BTCUSD"));
    for (day, n) in [(20_240_101u32, 1u64), (20_240_102, 2), (20_240_103, 3)] {
        writer.begin_day(day).unwrap();
        for i in 0..n {
            writer
                .write_row(trade(base_ts + i * TS_SCALE_NS, 100, 1.0, 0, EventKind::Quote))
                .unwrap();
        }
    }
    writer.close().unwrap();

    let mut opt = BlockReaderOpt::new(dir.path(), "BTCUSD");
    opt.date_from = 20_240_102;
    opt.date_to = 20_240_102;
    let reader = BlockReader::<TradeBlockCodec>::new(opt);
    assert_eq!(reader.days(), vec![20_240_102]);

    let mut total = 0usize;
    reader.visit_day_files(|view| total += view.rows.len()).unwrap();
    assert_eq!(total, 2);
}

#[test]
fn corrupt_block_magic_raises_on_read() {
    let dir = tempdir().unwrap();
    let base_ts = 1_704_067_200_000_000_000u64;

    let mut writer = BlockWriter::<TradeBlockCodec>::new(small_opt(dir.path(), "BTCUSD"));
    writer.begin_day(20_240_101).unwrap();
    for i in 0..4u64 {
        writer
            .write_row(trade(base_ts + i * TS_SCALE_NS, 100, 1.0, 0, EventKind::Quote))
            .unwrap();
    }
    writer.close().unwrap();

    let path = dir.path().join("BTCUSD-BLOCKS").join("20240101.blocks");
    let mut bytes = fs::read(&path).unwrap();
    bytes[DAY_HEADER_SIZE] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let reader = BlockReader::<TradeBlockCodec>::new(BlockReaderOpt::new(dir.path(), "BTCUSD"));
    assert!(reader.visit_day_files(|_| {}).is_err());
}
