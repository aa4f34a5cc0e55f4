//! Record storage through the indexed facade: payload bytes round-tripping
//! through heap, index and the per-block tuple cache together.

use blocktree::{IndexedHeap, TreeConfig};
use tempfile::tempdir;

const RECORD_SIZE: usize = 16;

// Two cache entries per free slot: (64 - 6) / (4 + 16) = 2.
fn heap_config() -> TreeConfig {
    TreeConfig::new(1024, 64, 4).with_record_size(RECORD_SIZE)
}

fn record(seed: u32) -> Vec<u8> {
    (0..RECORD_SIZE)
        .map(|i| (seed as usize * 13 + i * 29) as u8)
        .collect()
}

fn open_heap() -> (IndexedHeap, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let heap = IndexedHeap::create(
        dir.path().join("index"),
        dir.path().join("records"),
        heap_config(),
    )
    .unwrap();
    (heap, dir)
}

#[test]
fn records_round_trip_cached_and_uncached() {
    let (mut heap, _dir) = open_heap();

    let n = 500u32;
    for i in 0..n {
        let key = (i * 37) % n;
        heap.insert(key, &record(key)).unwrap();
    }

    assert_eq!(heap.tree().content(), n as u64);
    assert!(
        heap.tree().blocks_alloc() > 1,
        "five hundred keys were meant to outgrow one block"
    );

    let mut out = vec![0u8; RECORD_SIZE];
    for key in 0..n {
        assert!(heap.get_uncached(key, &mut out).unwrap());
        assert_eq!(out, record(key), "uncached read of key {key}");

        // First cached read may fill the cache, the second may serve from
        // it; both must return the same bytes.
        assert!(heap.get(key, &mut out).unwrap());
        assert_eq!(out, record(key), "cached read of key {key}");
        assert!(heap.get(key, &mut out).unwrap());
        assert_eq!(out, record(key), "repeated cached read of key {key}");
    }
}

#[test]
fn reinsert_repoints_to_the_latest_record() {
    let (mut heap, _dir) = open_heap();

    heap.insert(7, &record(1)).unwrap();
    heap.insert(7, &record(2)).unwrap();
    heap.insert(7, &record(3)).unwrap();

    // Append-only: superseded records stay in the file.
    assert_eq!(heap.heap().count(), 3);
    assert_eq!(heap.tree().content(), 1);

    let mut out = vec![0u8; RECORD_SIZE];
    assert!(heap.get(7, &mut out).unwrap());
    assert_eq!(out, record(3));
    assert!(heap.get_uncached(7, &mut out).unwrap());
    assert_eq!(out, record(3));
}

#[test]
fn update_after_cached_read_does_not_serve_stale_bytes() {
    let (mut heap, _dir) = open_heap();

    heap.insert(11, &record(100)).unwrap();

    let mut out = vec![0u8; RECORD_SIZE];
    // Pull the record into the block cache, then overwrite the key.
    assert!(heap.get(11, &mut out).unwrap());
    heap.insert(11, &record(200)).unwrap();

    assert!(heap.get(11, &mut out).unwrap());
    assert_eq!(out, record(200));
}

#[test]
fn missing_keys_report_false() {
    let (mut heap, _dir) = open_heap();

    let mut out = vec![0u8; RECORD_SIZE];
    assert!(!heap.get(5, &mut out).unwrap());
    assert!(!heap.get_uncached(5, &mut out).unwrap());

    heap.insert(5, &record(5)).unwrap();
    assert!(heap.get(5, &mut out).unwrap());
    assert!(!heap.get(6, &mut out).unwrap());
}

#[test]
fn sync_flushes_both_files() {
    let (mut heap, _dir) = open_heap();

    heap.insert(1, &record(1)).unwrap();
    heap.sync().unwrap();
}
