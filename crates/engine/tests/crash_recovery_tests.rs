//! Crash Recovery Tests
//!
//! Simulate crashes by cutting, extending or corrupting the store file
//! between a clean close and the next open. The store must always come back
//! at the newest commit that was completely written.

use k2v_durability::testing::{flip_byte, truncate_file, StoreCorruptionTester};
use k2v_engine::{CommitMode, Seal, Store, StoreConfig, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Recovery warnings show up in the output of failing tests.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn config() -> StoreConfig {
    init_tracing();
    StoreConfig::for_testing()
}

fn put(store: &Store, key: &[u8], value: &[u8]) {
    let mut update = store.update().unwrap();
    let root = update.root();
    update.put(&root, key, value).unwrap();
    update.commit().unwrap();
}

fn read(store: &Store, key: &[u8]) -> Option<Vec<u8>> {
    let query = store.query().unwrap();
    match query.find(&query.root(), key).unwrap() {
        Value::Document(doc) => Some(query.read_to_vec(&doc).unwrap()),
        _ => None,
    }
}

/// Two commits: "k" = "first" then "k" = "second". Returns the file
/// lengths after each.
fn two_commits(path: &Path, mode: CommitMode) -> (u64, u64) {
    let config = config().with_commit_mode(mode);
    let store = Store::create_with(path, config, &mut rand::thread_rng()).unwrap();
    put(&store, b"k", b"first value");
    let first = store.file_length();
    put(&store, b"k", b"second value");
    let second = store.file_length();
    (first, second)
}

fn copy_of(path: &Path, dir: &Path, name: &str) -> PathBuf {
    let copy = dir.join(name);
    std::fs::copy(path, &copy).unwrap();
    copy
}

// ============================================================================
// Torn commits
// ============================================================================

/// Test: cutting the second commit anywhere falls back to the first
#[test]
fn test_truncation_inside_last_commit_recovers_previous() {
    let dir = TempDir::new().unwrap();
    let original = dir.path().join("store.k2v");
    let (first, second) = two_commits(&original, CommitMode::Checksum);

    for length in first..second {
        let path = copy_of(&original, dir.path(), "cut.k2v");
        truncate_file(&path, length).unwrap();

        let store = Store::open_with_config(&path, config()).unwrap();
        assert_eq!(store.file_length(), first, "cut at {length}");
        assert_eq!(read(&store, b"k").unwrap(), b"first value");
        drop(store);
        std::fs::remove_file(&path).unwrap();
    }
}

/// Test: the same holds for double-sync commits
#[test]
fn test_truncation_with_double_sync() {
    let dir = TempDir::new().unwrap();
    let original = dir.path().join("store.k2v");
    let (first, second) = two_commits(&original, CommitMode::DoubleSync);

    for length in (first..second).step_by(3) {
        let path = copy_of(&original, dir.path(), "cut.k2v");
        truncate_file(&path, length).unwrap();
        let store = Store::open_with_config(&path, config()).unwrap();
        assert_eq!(store.file_length(), first, "cut at {length}");
        drop(store);
        std::fs::remove_file(&path).unwrap();
    }

    let store = Store::open_with_config(&original, config()).unwrap();
    let history = store.commit_history().unwrap();
    assert_eq!(history[0].seal, Seal::DoubleSync);
    assert_eq!(history[0].prior_file_length, first);
}

/// Test: a flipped byte in the last commit fails its checksum
#[test]
fn test_corrupt_last_commit_recovers_previous() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.k2v");
    let (first, second) = two_commits(&path, CommitMode::Checksum);

    flip_byte(&path, first + (second - first) / 2, 0x40).unwrap();
    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(store.file_length(), first);
    assert_eq!(read(&store, b"k").unwrap(), b"first value");
}

/// Test: a file cut before its first commit does not open
#[test]
fn test_file_without_checkpoint_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.k2v");
    two_commits(&path, CommitMode::Checksum);

    truncate_file(&path, 60).unwrap();
    let err = Store::open_with_config(&path, config()).unwrap_err();
    assert!(err.is_data_error(), "unexpected error {err}");
}

// ============================================================================
// Trailing bytes
// ============================================================================

/// Test: garbage after the last commit is ignored, then cut off by the
/// next update
#[test]
fn test_trailing_garbage_is_discarded_by_next_update() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.k2v");
    let (_, second) = two_commits(&path, CommitMode::Checksum);

    let tester = StoreCorruptionTester::new(&path);
    tester.append_garbage(&[0xAB; 777]).unwrap();

    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(store.file_length(), second);
    assert_eq!(read(&store, b"k").unwrap(), b"second value");

    put(&store, b"k", b"third value");
    let third = store.file_length();
    drop(store);

    assert_eq!(tester.size().unwrap(), third);
    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(read(&store, b"k").unwrap(), b"third value");
    let history = store.commit_history().unwrap();
    assert_eq!(history[0].prior_file_length, second);
}

/// Test: an update abandoned after writing a large document leaves the
/// store at its last commit, even across a crash
#[test]
fn test_abandoned_update_is_invisible() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.k2v");
    let (_, second) = two_commits(&path, CommitMode::Checksum);

    {
        let store = Store::open_with_config(&path, config()).unwrap();
        let mut update = store.update().unwrap();
        let root = update.root();
        let mut writer = update.open(&root, b"big").unwrap();
        writer.write_all(&vec![1u8; 100_000]).unwrap();
        // Crash: neither finish nor commit.
    }
    assert!(std::fs::metadata(&path).unwrap().len() > second);

    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(store.file_length(), second);
    assert_eq!(read(&store, b"big"), None);

    put(&store, b"small", b"ok");
    drop(store);
    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(read(&store, b"small").unwrap(), b"ok");
    assert_eq!(read(&store, b"k").unwrap(), b"second value");
}

/// Test: random bit rot anywhere past the header never yields a store
/// that opens at a version which was never committed
#[test]
fn test_bit_rot_never_invents_versions() {
    let dir = TempDir::new().unwrap();
    let original = dir.path().join("store.k2v");
    let mut lengths = Vec::new();
    {
        let store =
            Store::create_with(&original, config(), &mut rand::thread_rng()).unwrap();
        lengths.push(store.file_length());
        for i in 0..5u8 {
            put(&store, &[b'k', i], &vec![i; 300]);
            lengths.push(store.file_length());
        }
    }

    for seed in 0..20u64 {
        let path = copy_of(&original, dir.path(), "rot.k2v");
        StoreCorruptionTester::new(&path).corrupt_bytes(3, seed).unwrap();
        if let Ok(store) = Store::open_with_config(&path, config()) {
            assert!(
                lengths.contains(&store.file_length()),
                "seed {seed} opened at {}",
                store.file_length()
            );
        }
        std::fs::remove_file(&path).unwrap();
    }
}
