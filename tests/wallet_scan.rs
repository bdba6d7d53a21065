//! End-to-end scan scenarios over synthesized fixtures.
//!
//! # Scope
//! These tests exercise the full pipeline: block production, container
//! expansion (ZIP entries, gzip streams, and recursion through both),
//! needle matching, ordering guarantees, and clean termination.
//!
//! # Assumptions
//! - Fixtures are synthesized at test time: a zeroed wallet image with
//!   needles planted at known offsets, wrapped in ZIP/gzip as needed.
//! - Detection strings are asserted bit-exactly; their format is part of
//!   the scanner's contract.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;
use walletfind::{scan, ScanStats, BLOCK_LEN};

fn plant(data: &mut [u8], at: usize, needle: &[u8]) {
    data[at..at + needle.len()].copy_from_slice(needle);
}

/// 96 KiB wallet image: needles inside the blocks at offsets 49152 (x2)
/// and 81920.
fn wallet_bytes() -> Vec<u8> {
    let mut data = vec![0u8; 6 * BLOCK_LEN];
    plant(&mut data, 3 * BLOCK_LEN + 1000, b"bestblock");
    plant(&mut data, 3 * BLOCK_LEN + 2000, b"defaultkey");
    plant(&mut data, 5 * BLOCK_LEN + 512, b"bestblock");
    data
}

fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, bytes).unwrap();
    path
}

fn write_zip(dir: &TempDir, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.path().join(name);
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    let opts =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (entry_name, data) in entries {
        writer.start_file(*entry_name, opts).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn run(path: &Path, start_offset: u64) -> (Vec<String>, ScanStats) {
    let mut detections = Vec::new();
    let stats = scan(
        start_offset,
        path,
        |d| detections.push(d.description),
        |_| {},
    )
    .expect("scan completes");
    (detections, stats)
}

#[test]
fn finds_regular_wallet() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "test_wallet.dat", &wallet_bytes());
    let p = path.display();

    let (detections, stats) = run(&path, 0);

    assert_eq!(
        detections,
        vec![
            format!("Found 'bestblock' at {p} in 16kB block at byte offset 49152"),
            format!("Found 'defaultkey' at {p} in 16kB block at byte offset 49152"),
            format!("Found 'bestblock' at {p} in 16kB block at byte offset 81920"),
        ]
    );
    assert_eq!(stats.targets, 1);
    assert_eq!(stats.blocks, 6);
    assert_eq!(stats.bytes_scanned, 6 * BLOCK_LEN as u64);
    assert_eq!(stats.detections, 3);
}

#[test]
fn finds_wallet_in_zip_file() {
    let dir = TempDir::new().unwrap();
    let path = write_zip(
        &dir,
        "test_wallet.dat.zip",
        &[("test_wallet.dat", &wallet_bytes())],
    );
    let p = path.display();

    let (detections, stats) = run(&path, 0);

    assert_eq!(
        detections,
        vec![
            format!(
                "Found 'bestblock' at Zipfile #0 @ byte 0 in [{p}] in 16kB block at byte offset 49152"
            ),
            format!(
                "Found 'defaultkey' at Zipfile #0 @ byte 0 in [{p}] in 16kB block at byte offset 49152"
            ),
            format!(
                "Found 'bestblock' at Zipfile #0 @ byte 0 in [{p}] in 16kB block at byte offset 81920"
            ),
        ]
    );
    // The raw archive plus its one expanded entry.
    assert_eq!(stats.targets, 2);
}

#[test]
fn finds_wallet_in_gzip_file() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "test_wallet.dat.gz", &gzip_bytes(&wallet_bytes()));
    let p = path.display();

    let (detections, stats) = run(&path, 0);

    assert_eq!(
        detections,
        vec![
            format!(
                "Found 'bestblock' at Gzipfile @ byte 0 in [{p}] in 16kB block at byte offset 49152"
            ),
            format!(
                "Found 'defaultkey' at Gzipfile @ byte 0 in [{p}] in 16kB block at byte offset 49152"
            ),
            format!(
                "Found 'bestblock' at Gzipfile @ byte 0 in [{p}] in 16kB block at byte offset 81920"
            ),
        ]
    );
    assert_eq!(stats.targets, 2);
}

#[test]
fn finds_wallet_through_nested_gzip() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        &dir,
        "wallet.gz.gz",
        &gzip_bytes(&gzip_bytes(&wallet_bytes())),
    );
    let p = path.display();

    let (detections, stats) = run(&path, 0);

    let prefix = format!("Gzipfile @ byte 0 in [Gzipfile @ byte 0 in [{p}]]");
    assert_eq!(
        detections,
        vec![
            format!("Found 'bestblock' at {prefix} in 16kB block at byte offset 49152"),
            format!("Found 'defaultkey' at {prefix} in 16kB block at byte offset 49152"),
            format!("Found 'bestblock' at {prefix} in 16kB block at byte offset 81920"),
        ]
    );
    // Root, the outer stream, and the inner stream.
    assert_eq!(stats.targets, 3);
}

#[test]
fn scans_every_entry_of_an_archive() {
    let dir = TempDir::new().unwrap();
    let mut second = vec![0u8; 1024];
    plant(&mut second, 10, b"acentry");
    let path = write_zip(
        &dir,
        "two.zip",
        &[
            ("test_wallet.dat", &wallet_bytes()),
            ("ledger.dat", &second),
        ],
    );
    let p = path.display();

    let (detections, stats) = run(&path, 0);

    assert_eq!(
        detections,
        vec![
            format!(
                "Found 'bestblock' at Zipfile #0 @ byte 0 in [{p}] in 16kB block at byte offset 49152"
            ),
            format!(
                "Found 'defaultkey' at Zipfile #0 @ byte 0 in [{p}] in 16kB block at byte offset 49152"
            ),
            format!(
                "Found 'bestblock' at Zipfile #0 @ byte 0 in [{p}] in 16kB block at byte offset 81920"
            ),
            format!(
                "Found 'acentry' at Zipfile #1 @ byte 0 in [{p}] in 16kB block at byte offset 0"
            ),
        ]
    );
    assert_eq!(stats.targets, 3);
}

#[test]
fn empty_file_terminates_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "empty.dat", &[]);

    let (detections, stats) = run(&path, 0);

    assert!(detections.is_empty());
    assert_eq!(stats.targets, 1);
    assert_eq!(stats.blocks, 0);
    assert_eq!(stats.detections, 0);
}

#[test]
fn single_needle_in_short_file_reports_block_zero() {
    let dir = TempDir::new().unwrap();
    let mut data = vec![0u8; 4096];
    plant(&mut data, 100, b"bestblock");
    let path = write_file(&dir, "short.dat", &data);
    let p = path.display();

    let (detections, _) = run(&path, 0);

    assert_eq!(
        detections,
        vec![format!(
            "Found 'bestblock' at {p} in 16kB block at byte offset 0"
        )]
    );
}

#[test]
fn zip_signature_over_junk_produces_nothing() {
    let dir = TempDir::new().unwrap();
    let mut data = vec![0x50, 0x4b, 0x05, 0x06];
    data.extend_from_slice(&[0xAA; 64]);
    let path = write_file(&dir, "junk.dat", &data);

    let (detections, stats) = run(&path, 0);

    assert!(detections.is_empty());
    // The false positive registered no child targets.
    assert_eq!(stats.targets, 1);
}

#[test]
fn needle_is_reported_once_per_block() {
    let dir = TempDir::new().unwrap();
    let mut data = vec![0u8; 4096];
    plant(&mut data, 100, b"bestblock");
    plant(&mut data, 200, b"bestblock");
    let path = write_file(&dir, "twice.dat", &data);

    let (detections, _) = run(&path, 0);
    assert_eq!(detections.len(), 1);
}

#[test]
fn detections_within_a_block_follow_needle_order() {
    let dir = TempDir::new().unwrap();
    let mut data = vec![0u8; 8192];
    // Planted out of needle order on purpose.
    plant(&mut data, 10, b"acentry");
    plant(&mut data, 5000, b"orderposnext");
    let path = write_file(&dir, "ordered.dat", &data);
    let p = path.display();

    let (detections, _) = run(&path, 0);
    assert_eq!(
        detections,
        vec![
            format!("Found 'orderposnext' at {p} in 16kB block at byte offset 0"),
            format!("Found 'acentry' at {p} in 16kB block at byte offset 0"),
        ]
    );
}

#[test]
fn start_offset_skips_the_head_of_the_target() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "test_wallet.dat", &wallet_bytes());
    let p = path.display();

    let (detections, _) = run(&path, 3 * BLOCK_LEN as u64);

    assert_eq!(
        detections,
        vec![
            format!("Found 'bestblock' at {p} in 16kB block at byte offset 49152"),
            format!("Found 'defaultkey' at {p} in 16kB block at byte offset 49152"),
            format!("Found 'bestblock' at {p} in 16kB block at byte offset 81920"),
        ]
    );
}

#[test]
fn large_target_recycles_the_block_pool() {
    // 32 blocks, well past the 20-block pool: only completes if every
    // block makes it back to the pool.
    let dir = TempDir::new().unwrap();
    let mut data = vec![0u8; 32 * BLOCK_LEN];
    plant(&mut data, 31 * BLOCK_LEN + 100, b"defaultkey");
    let path = write_file(&dir, "big.dd", &data);
    let p = path.display();

    let (detections, stats) = run(&path, 0);

    assert_eq!(
        detections,
        vec![format!(
            "Found 'defaultkey' at {p} in 16kB block at byte offset {}",
            31 * BLOCK_LEN
        )]
    );
    assert_eq!(stats.blocks, 32);
}

#[test]
fn progress_reports_cover_the_whole_target() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "test_wallet.dat", &wallet_bytes());

    let mut reports = Vec::new();
    scan(0, &path, |_| {}, |info| {
        reports.push((info.current_target.clone(), info.scanned_bytes, info.total_bytes));
    })
    .expect("scan completes");

    assert_eq!(reports.len(), 6);
    let expected_target = path.display().to_string();
    for (i, (target, scanned, total)) in reports.iter().enumerate() {
        assert_eq!(*target, expected_target);
        assert_eq!(*scanned, (i as u64 + 1) * BLOCK_LEN as u64);
        assert_eq!(*total, 6 * BLOCK_LEN as i64);
    }
}

#[test]
fn missing_root_path_fails_the_scan() {
    let err = scan(0, Path::new("./no/such/image.dd"), |_| {}, |_| {})
        .expect_err("root target must be fatal");
    assert!(err.to_string().contains("cannot determine size"));
}
