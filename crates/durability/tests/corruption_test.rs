//! Corruption detection simulation tests
//!
//! These tests build store files directly from format records and then
//! damage them with the testing helpers:
//! - CRC32 seals detect flipped bytes
//! - Torn commits fall back to the previous footer
//! - Trailing garbage marks the store dirty without hiding commits
//! - The commit chain is walked newest first

use k2v_core::Error;
use k2v_durability::testing::{flip_byte, StoreCorruptionTester};
use k2v_durability::{
    commit_history, recover, CommitFooter, FileHeader, FolderRecord, RecordFile, Seal,
    HEADER_SIZE, MIN_STORE_SIZE, SEPARATOR_SIZE,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SEPARATOR: [u8; SEPARATOR_SIZE] = *b"k2v-test-sep-016";

/// Append one commit holding an empty root folder with `padding` bytes of
/// document data in front of it. Returns the new file length.
fn append_commit(bytes: &mut Vec<u8>, version: u64, padding: usize, checksum: bool) -> u64 {
    let prior = if bytes.len() == HEADER_SIZE {
        0
    } else {
        bytes.len() as u64
    };
    bytes.extend(std::iter::repeat(version as u8).take(padding));
    FolderRecord::empty(version, 0).encode(bytes);
    bytes.extend_from_slice(&CommitFooter::unsealed_bytes(prior, &SEPARATOR));
    let seal = if checksum {
        Seal::Checksum(crc32fast::hash(&bytes[prior as usize..]))
    } else {
        Seal::DoubleSync
    };
    bytes.extend_from_slice(&seal.to_raw().to_be_bytes());
    bytes.len() as u64
}

/// Write a store with one commit per entry of `versions`, returning its
/// path and the file length after each commit.
fn write_store(dir: &TempDir, versions: &[u64]) -> (PathBuf, Vec<u64>) {
    let mut bytes = FileHeader::new(1, SEPARATOR).to_bytes().to_vec();
    let mut ends = Vec::new();
    for (i, &version) in versions.iter().enumerate() {
        let padding = if i == 0 { 0 } else { 40 };
        ends.push(append_commit(&mut bytes, version, padding, true));
    }
    let path = dir.path().join("store.k2v");
    std::fs::write(&path, &bytes).unwrap();
    (path, ends)
}

fn recover_path(path: &Path) -> k2v_core::Result<(u64, u64, bool)> {
    let file = RecordFile::open(path)?;
    let checkpoint = recover(&file, 64)?;
    Ok((
        checkpoint.file_length,
        checkpoint.root.version,
        checkpoint.is_dirty(),
    ))
}

// ============================================================================
// Torn writes
// ============================================================================

/// Test: every cut inside the last commit recovers the one before it
#[test]
fn test_torn_last_commit() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = write_store(&dir, &[10, 20, 30]);
    let tester = StoreCorruptionTester::new(&path);

    let original = std::fs::read(&path).unwrap();
    for cut in 1..(ends[2] - ends[1]) {
        std::fs::write(&path, &original).unwrap();
        let result = tester.truncate_tail(cut).unwrap();
        assert_eq!(result.bytes_removed, cut);

        let (length, version, dirty) = recover_path(&path).unwrap();
        assert_eq!(length, ends[1], "cut {cut}");
        assert_eq!(version, 20);
        assert!(dirty);
    }
}

/// Test: cutting into the first commit leaves nothing to open
#[test]
fn test_torn_first_commit_is_format_error() {
    let dir = TempDir::new().unwrap();
    let (path, _) = write_store(&dir, &[10]);
    StoreCorruptionTester::new(&path)
        .truncate_to(MIN_STORE_SIZE - 1)
        .unwrap();

    let err = recover_path(&path).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
}

/// Test: garbage after the last commit is reported as trailing bytes
#[test]
fn test_appended_garbage_is_trailing() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = write_store(&dir, &[10, 20]);
    let tester = StoreCorruptionTester::new(&path);
    let garbage = tester.append_garbage(&[0xC3; 1000]).unwrap();
    assert_eq!(garbage.bytes_appended, 1000);

    let file = RecordFile::open(&path).unwrap();
    let checkpoint = recover(&file, 64).unwrap();
    assert_eq!(checkpoint.file_length, ends[1]);
    assert_eq!(checkpoint.trailing_bytes(), 1000);
}

// ============================================================================
// Bit flips
// ============================================================================

/// Test: a flipped byte in a checksummed body invalidates that commit only
#[test]
fn test_flipped_body_byte() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = write_store(&dir, &[10, 20, 30]);

    flip_byte(&path, ends[1] + 5, 0x01).unwrap();
    let (length, version, _) = recover_path(&path).unwrap();
    assert_eq!(length, ends[1]);
    assert_eq!(version, 20);
}

/// Test: a flipped checksum byte invalidates the commit
#[test]
fn test_flipped_seal_byte() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = write_store(&dir, &[10, 20]);

    flip_byte(&path, ends[1] - 1, 0x80).unwrap();
    let (length, version, dirty) = recover_path(&path).unwrap();
    assert_eq!(length, ends[0]);
    assert_eq!(version, 10);
    assert!(dirty);
}

/// Test: a double-sync commit is trusted without a checksum
#[test]
fn test_double_sync_commit_needs_no_checksum() {
    let dir = TempDir::new().unwrap();
    let mut bytes = FileHeader::new(1, SEPARATOR).to_bytes().to_vec();
    let first = append_commit(&mut bytes, 10, 0, true);
    let second = append_commit(&mut bytes, 20, 100, false);
    let path = dir.path().join("store.k2v");
    std::fs::write(&path, &bytes).unwrap();

    // Damage to document bytes of a double-sync commit is not detected.
    flip_byte(&path, first + 10, 0xFF).unwrap();
    let (length, version, dirty) = recover_path(&path).unwrap();
    assert_eq!(length, second);
    assert_eq!(version, 20);
    assert!(!dirty);
}

/// Test: random bit rot never produces a checkpoint off a commit boundary
#[test]
fn test_bit_rot_lands_on_commit_boundary() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = write_store(&dir, &[1, 2, 3, 4, 5, 6]);
    let original = std::fs::read(&path).unwrap();
    let tester = StoreCorruptionTester::new(&path);

    for seed in 0..50u64 {
        std::fs::write(&path, &original).unwrap();
        let result = tester.corrupt_bytes(2, seed).unwrap();
        assert_eq!(result.offsets.len(), 2);
        if let Ok((length, _, _)) = recover_path(&path) {
            assert!(ends.contains(&length), "seed {seed} recovered at {length}");
        }
    }
}

// ============================================================================
// Commit chain
// ============================================================================

/// Test: history follows prior lengths back to the first commit
#[test]
fn test_history_walks_every_commit() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = write_store(&dir, &[10, 20, 30]);
    let file = RecordFile::open(&path).unwrap();

    let history = commit_history(&file, &SEPARATOR, ends[2]).unwrap();
    let versions: Vec<u64> = history.iter().map(|c| c.version).collect();
    assert_eq!(versions, vec![30, 20, 10]);
    assert_eq!(history[0].prior_file_length, ends[1]);
    assert_eq!(history[2].prior_file_length, 0);
    assert!(history
        .iter()
        .all(|c| matches!(c.seal, Seal::Checksum(_))));
}

/// Test: a damaged middle commit cuts the history short
#[test]
fn test_history_stops_at_damaged_commit() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = write_store(&dir, &[10, 20, 30]);
    flip_byte(&path, ends[0] + 3, 0x10).unwrap();

    let file = RecordFile::open(&path).unwrap();
    let history = commit_history(&file, &SEPARATOR, ends[2]).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].file_length, ends[2]);
}
