//! B+ tree workloads over the storage engine, including bulk ingestion.
#![allow(missing_docs)]

use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use stripedb::{ingest, Bptree, Disk, StoreConfig};
use tempfile::tempdir;

fn config(dir: &Path) -> StoreConfig {
    StoreConfig::from_toml(&format!(
        r#"
            encrypted = false

            [disks]
            paths = ["{0}/d0.disk", "{0}/d1.disk", "{0}/d2.disk", "{0}/d3.disk"]

            [superblock]
            offset = 0
            size = 1024

            [cache]
            offset = 1024
            size = 2048
            level_elements = 16

            [keys]
            count = 500
            domain_start = 1
            domain_end = 100000

            [nodes]
            base_offsets = [4096, 4096, 4096, 4096]

            [tree]
            inner_degree = 4
            leaf_degree = 4
            min_root_keys = 1
            value_pad_len = 16
        "#,
        dir.display()
    ))
    .unwrap()
}

fn value(key: u64) -> Vec<u8> {
    format!("payload {key:07}\n").into_bytes()
}

#[test]
fn shuffled_inserts_stay_searchable_across_reopen() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());

    let mut keys: Vec<u64> = (1..=200).collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(42));

    let mut tree = Bptree::create(Disk::create(&cfg).unwrap()).unwrap();
    for &key in &keys {
        tree.insert(key, &value(key)).unwrap();
    }
    assert_eq!(tree.key_count(), 200);
    let height = tree.height();
    assert!(height >= 3, "degree-4 tree with 200 keys is at least 3 deep");
    for key in 1..=200u64 {
        assert_eq!(tree.search(key).unwrap(), Some(value(key)));
    }
    tree.close().unwrap();

    let mut tree = Bptree::open(Disk::open(&cfg).unwrap()).unwrap();
    assert_eq!(tree.key_count(), 200);
    assert_eq!(tree.height(), height);
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(7));
    for &key in &keys {
        assert_eq!(tree.search(key).unwrap(), Some(value(key)));
    }
    assert_eq!(tree.search(0).unwrap(), None);
    assert_eq!(tree.search(201).unwrap(), None);
    tree.close().unwrap();
}

#[test]
fn superblock_counters_match_the_tree() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());

    let mut tree = Bptree::create(Disk::create(&cfg).unwrap()).unwrap();
    for key in 1..=100u64 {
        tree.insert(key, &value(key)).unwrap();
    }
    tree.close().unwrap();

    let disk = Disk::open(&cfg).unwrap();
    let sb = disk.super_block();
    assert_eq!(sb.key_count(), 100);
    assert!(sb.leaf_count() >= 25, "at least ceil(100/4) leaves");
    assert!(sb.inner_count() > 0);
    assert!(sb.root().is_some());
    // Everything landed on disk 0; the other cursors never moved.
    assert!(sb.next_write_offset(0) > 4096);
    for d in 1..4 {
        assert_eq!(sb.next_write_offset(d), 4096);
    }
    disk.close().unwrap();
}

#[test]
fn csv_ingestion_end_to_end() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());

    let csv_path = dir.path().join("data.csv");
    let mut rows = String::new();
    for i in 0..50 {
        rows.push_str(&format!("row number {i:03};ignored column\n"));
    }
    std::fs::write(&csv_path, rows).unwrap();

    let mut tree = Bptree::create(Disk::create(&cfg).unwrap()).unwrap();
    let loaded = ingest::load_csv(&mut tree, &cfg, &csv_path).unwrap();
    assert_eq!(loaded, 50);
    tree.close().unwrap();

    let mut tree = Bptree::open(Disk::open(&cfg).unwrap()).unwrap();
    assert_eq!(tree.key_count(), 50);
    // value_pad_len = 16: "row number 000" space-padded to the slot.
    assert_eq!(tree.search(1).unwrap(), Some(b"row number 000  ".to_vec()));
    assert_eq!(tree.search(50).unwrap(), Some(b"row number 049  ".to_vec()));
    assert_eq!(tree.search(51).unwrap(), None);
    tree.close().unwrap();
}
