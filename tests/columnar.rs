//! End-to-end tests of the columnar day-file store: writer lifecycle, day
//! rotation, in-place grow, and both reader modes.

use std::fs;

use tempfile::tempdir;
use tickstore::columnar::ColFileHeader;
use tickstore::{Reader, ReaderOpt, Writer, WriterOpt, L2, L2Row};

const DAY_NS: u64 = 86_400_000_000_000;
/// 2024-01-01T00:00:00Z in nanoseconds.
const D20240101_NS: u64 = 1_704_067_200_000_000_000;

fn l2(ts_ns: u64, price: u32, qty: f32, side: u8) -> L2Row {
    L2Row {
        ts_ns,
        price,
        qty,
        side,
    }
}

fn small_opt(base: &std::path::Path, product: &str) -> WriterOpt {
    let mut opt = WriterOpt::new(base, product);
    opt.rows_per_hour = 2;
    opt.queue_slots = 1 << 12;
    opt
}

fn write_rows(opt: WriterOpt, rows: &[L2Row]) -> (u64, u64) {
    let mut writer = Writer::<L2>::new(opt);
    writer.start().unwrap();
    for row in rows {
        assert!(writer.enqueue(*row), "queue unexpectedly full");
    }
    writer.stop();
    writer.join();
    (writer.rows(), writer.dropped())
}

#[test]
fn three_rows_land_in_epoch_day_file() {
    let dir = tempdir().unwrap();
    let base = 3_600_000_000_000u64;
    let rows = [
        l2(base, 10_000, 0.5, 1),
        l2(base + 500, 10_001, 0.25, 0),
        l2(base + 1_000, 9_999, 1.0, 1),
    ];

    let (written, dropped) = write_rows(small_opt(dir.path(), "BTCUSD"), &rows);
    assert_eq!(written, 3);
    assert_eq!(dropped, 0);

    let path = dir.path().join("BTCUSD").join("19700101.bin");
    assert!(path.exists());

    let bytes = fs::read(&path).unwrap();
    let header = ColFileHeader::decode::<L2>(&bytes).unwrap();
    assert_eq!(header.rows, 3);
    assert_eq!(header.day_epoch_start, 0);
    assert_eq!(header.product_str(), "BTCUSD");

    let mut reader = Reader::<L2>::new(ReaderOpt::new(dir.path(), "BTCUSD"));
    assert_eq!(reader.days(), vec![19_700_101]);

    let mut visited = 0;
    reader.for_each_segment(|seg| {
        visited += 1;
        assert_eq!(seg.rows(), 3);
        assert_eq!(
            seg.col::<u64>(L2::COL_TS).unwrap(),
            &[base, base + 500, base + 1_000]
        );
        assert_eq!(seg.col::<u32>(L2::COL_PX).unwrap(), &[10_000, 10_001, 9_999]);
        assert_eq!(seg.col::<u8>(L2::COL_SIDE).unwrap(), &[1, 0, 1]);
        true
    });
    assert_eq!(visited, 1);
}

#[test]
fn grow_preserves_rows_and_doubles_capacity() {
    let dir = tempdir().unwrap();
    let base = D20240101_NS;
    let rows: Vec<L2Row> = (0..5)
        .map(|i| l2(base + i * 1_000, 20_000 + i as u32, i as f32 + 0.5, (i % 2) as u8))
        .collect();

    let (written, dropped) = write_rows(small_opt(dir.path(), "ETHUSD"), &rows);
    assert_eq!(written, 5);
    assert_eq!(dropped, 0);

    let path = dir.path().join("ETHUSD").join("20240101.bin");
    let bytes = fs::read(&path).unwrap();
    let header = ColFileHeader::decode::<L2>(&bytes).unwrap();
    assert_eq!(header.rows, 5);
    // Initial capacity 4 (2 * rows_per_hour), doubled at least once.
    assert!(header.capacity >= 8, "capacity {}", header.capacity);

    let mut reader = Reader::<L2>::new(ReaderOpt::new(dir.path(), "ETHUSD"));
    reader.for_each_segment(|seg| {
        assert_eq!(seg.rows(), 5);
        let ts = seg.col::<u64>(L2::COL_TS).unwrap();
        let px = seg.col::<u32>(L2::COL_PX).unwrap();
        let qty = seg.col::<f32>(L2::COL_QTY).unwrap();
        for i in 0..5 {
            assert_eq!(ts[i], base + i as u64 * 1_000);
            assert_eq!(px[i], 20_000 + i as u32);
            assert_eq!(qty[i].to_bits(), (i as f32 + 0.5).to_bits());
        }
        true
    });
}

#[test]
fn day_boundary_rotates_into_second_file() {
    let dir = tempdir().unwrap();
    let rows = [
        l2(D20240101_NS, 1, 1.0, 0),
        l2(D20240101_NS + 1_000, 2, 1.0, 1),
        l2(D20240101_NS + DAY_NS, 3, 1.0, 0),
        l2(D20240101_NS + DAY_NS + 1_000, 4, 1.0, 1),
    ];

    write_rows(small_opt(dir.path(), "BTCUSD"), &rows);

    for (name, expect_px) in [("20240101.bin", [1u32, 2]), ("20240102.bin", [3, 4])] {
        let bytes = fs::read(dir.path().join("BTCUSD").join(name)).unwrap();
        let header = ColFileHeader::decode::<L2>(&bytes).unwrap();
        assert_eq!(header.rows, 2, "file {}", name);

        let off = header.col_off[L2::COL_PX] as usize;
        let px0 = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        let px1 = u32::from_le_bytes(bytes[off + 4..off + 8].try_into().unwrap());
        assert_eq!([px0, px1], expect_px, "file {}", name);
    }

    let reader = Reader::<L2>::new(ReaderOpt::new(dir.path(), "BTCUSD"));
    assert_eq!(reader.days(), vec![20_240_101, 20_240_102]);
}

#[test]
fn stragglers_from_earlier_day_stay_in_open_file() {
    let dir = tempdir().unwrap();
    let rows = [
        l2(D20240101_NS + DAY_NS, 10, 1.0, 0),
        // Straggler from the previous day: no backward rotation.
        l2(D20240101_NS, 11, 1.0, 1),
    ];

    let (written, dropped) = write_rows(small_opt(dir.path(), "BTCUSD"), &rows);
    assert_eq!(written, 2);
    assert_eq!(dropped, 0);

    let reader = Reader::<L2>::new(ReaderOpt::new(dir.path(), "BTCUSD"));
    assert_eq!(reader.days(), vec![20_240_102]);

    let bytes = fs::read(dir.path().join("BTCUSD").join("20240102.bin")).unwrap();
    assert_eq!(ColFileHeader::decode::<L2>(&bytes).unwrap().rows, 2);
}

#[test]
fn date_range_selects_single_file() {
    let dir = tempdir().unwrap();
    let rows = [
        l2(D20240101_NS, 1, 1.0, 0),
        l2(D20240101_NS + DAY_NS, 2, 1.0, 0),
        l2(D20240101_NS + 2 * DAY_NS, 3, 1.0, 0),
    ];
    write_rows(small_opt(dir.path(), "BTCUSD"), &rows);

    let mut opt = ReaderOpt::new(dir.path(), "BTCUSD");
    opt.date_from = 20_240_102;
    opt.date_to = 20_240_102;
    let mut reader = Reader::<L2>::new(opt);
    assert_eq!(reader.days(), vec![20_240_102]);

    let mut visited = Vec::new();
    reader.for_each_segment(|seg| {
        visited.push(seg.col::<u32>(L2::COL_PX).unwrap()[0]);
        true
    });
    assert_eq!(visited, vec![2]);
}

#[test]
fn staged_iteration_matches_zero_copy() {
    let dir = tempdir().unwrap();
    let rows: Vec<L2Row> = (0..7)
        .map(|i| l2(D20240101_NS + i * 1_000, 100 + i as u32, i as f32, (i % 2) as u8))
        .collect();
    write_rows(small_opt(dir.path(), "SOLUSD"), &rows);

    let mut reader = Reader::<L2>::new(ReaderOpt::new(dir.path(), "SOLUSD"));

    let mut direct: Vec<(Vec<u64>, Vec<u32>, Vec<u8>)> = Vec::new();
    reader.for_each_segment(|seg| {
        direct.push((
            seg.col::<u64>(L2::COL_TS).unwrap().to_vec(),
            seg.col::<u32>(L2::COL_PX).unwrap().to_vec(),
            seg.col::<u8>(L2::COL_SIDE).unwrap().to_vec(),
        ));
        true
    });
    assert_eq!(direct.len(), 1);

    let mut staged: Vec<(Vec<u64>, Vec<u32>, Vec<u8>)> = Vec::new();
    reader
        .for_each_staged(|seg| {
            staged.push((
                seg.col::<u64>(L2::COL_TS).unwrap().to_vec(),
                seg.col::<u32>(L2::COL_PX).unwrap().to_vec(),
                seg.col::<u8>(L2::COL_SIDE).unwrap().to_vec(),
            ));
            true
        })
        .unwrap();

    assert_eq!(direct, staged);
}

#[test]
fn foreign_and_corrupt_files_are_skipped() {
    let dir = tempdir().unwrap();
    let rows = [l2(D20240101_NS, 7, 1.0, 0)];
    write_rows(small_opt(dir.path(), "BTCUSD"), &rows);

    let product_dir = dir.path().join("BTCUSD");
    // Too short for a header.
    fs::write(product_dir.join("20240102.bin"), vec![0u8; 64]).unwrap();
    // Header-sized but wrong magic.
    fs::write(product_dir.join("20240103.bin"), vec![0u8; 512]).unwrap();

    let mut reader = Reader::<L2>::new(ReaderOpt::new(dir.path(), "BTCUSD"));
    assert_eq!(reader.days().len(), 3);

    let mut visited = 0;
    reader.for_each_segment(|seg| {
        visited += 1;
        assert_eq!(seg.rows(), 1);
        true
    });
    assert_eq!(visited, 1);
}

#[test]
fn callback_can_stop_iteration_early() {
    let dir = tempdir().unwrap();
    let rows = [
        l2(D20240101_NS, 1, 1.0, 0),
        l2(D20240101_NS + DAY_NS, 2, 1.0, 0),
    ];
    write_rows(small_opt(dir.path(), "BTCUSD"), &rows);

    let mut reader = Reader::<L2>::new(ReaderOpt::new(dir.path(), "BTCUSD"));
    let mut visited = 0;
    reader.for_each_segment(|_| {
        visited += 1;
        false
    });
    assert_eq!(visited, 1);
}

#[test]
fn visit_file_reads_one_file_directly() {
    let dir = tempdir().unwrap();
    let rows = [l2(D20240101_NS, 42, 1.0, 1)];
    write_rows(small_opt(dir.path(), "BTCUSD"), &rows);

    let path = dir.path().join("BTCUSD").join("20240101.bin");
    let mut reader = Reader::<L2>::new(ReaderOpt::new(dir.path(), "BTCUSD"));
    let mut seen = 0;
    let rows_visited = reader.visit_file(&path, |seg| {
        seen = seg.col::<u32>(L2::COL_PX).unwrap()[0];
    });
    assert_eq!(rows_visited, 1);
    assert_eq!(seen, 42);
}

#[test]
fn restart_does_not_lose_enqueued_rows() {
    // A writer that is stopped while rows are still queued must drain them
    // before exiting.
    let dir = tempdir().unwrap();
    let mut writer = Writer::<L2>::new(small_opt(dir.path(), "BTCUSD"));
    for i in 0..100u64 {
        assert!(writer.enqueue(l2(D20240101_NS + i, 1, 1.0, 0)));
    }
    // Worker starts only now; everything is already queued.
    writer.start().unwrap();
    writer.stop();
    writer.join();
    assert_eq!(writer.rows(), 100);
    assert_eq!(writer.dropped(), 0);
}
