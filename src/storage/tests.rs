use super::*;
use crate::buffer::{EvictionPolicy, PageCache};
use crate::config::BTreeConfig;
use crate::record::{Field, FieldType};
use crate::transaction::run_in_transaction;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn schema() -> Schema {
    Schema::from_types(&[FieldType::Int, FieldType::Int, FieldType::Int])
}

fn rec(key: i32, n: i32) -> Record {
    Record::new(vec![Field::Int(key), Field::Int(n), Field::Int(0)])
}

/// One heap file and one B-tree file over the same schema, behind the common trait
fn setup() -> (TempDir, Arc<PageCache>, Vec<Arc<dyn StorageFile>>) {
    let temp_dir = TempDir::new().unwrap();
    let cache = Arc::new(PageCache::new(
        1024,
        Duration::from_millis(200),
        EvictionPolicy::LeastRecent,
    ));
    let heap = HeapFile::open(Arc::clone(&cache), temp_dir.path().join("t.heap"), schema()).unwrap();
    let tree = BTreeFile::open(
        Arc::clone(&cache),
        temp_dir.path().join("t.btree"),
        schema(),
        0,
        &BTreeConfig {
            leaf_capacity: Some(8),
            internal_capacity: Some(8),
        },
    )
    .unwrap();
    (temp_dir, cache, vec![Arc::new(heap), Arc::new(tree)])
}

fn sorted_keys(file: &dyn StorageFile, txn: TransactionId) -> Vec<i32> {
    let mut keys: Vec<i32> = file
        .scan(txn)
        .map(|r| r.unwrap().get_int(0).unwrap())
        .collect();
    keys.sort();
    keys
}

#[test]
fn test_ids_differ_per_file() {
    let (_temp, _cache, files) = setup();
    assert_ne!(files[0].id(), files[1].id());
    assert_eq!(files[0].kind(), StorageKind::Heap);
    assert_eq!(files[1].kind(), StorageKind::BTree { key_field: 0 });
    assert_eq!(files[0].schema(), files[1].schema());
}

#[test]
fn test_equality_lookup_needs_an_index() {
    let (_temp, _cache, files) = setup();
    let txn = TransactionId::new();
    assert!(matches!(
        files[0].equality_lookup(txn, 1),
        Err(DbError::Unsupported(_))
    ));
    assert!(files[1].equality_lookup(txn, 1).is_ok());
}

#[test]
fn test_only_committed_records_are_visible() {
    let (_temp, cache, files) = setup();

    for file in &files {
        for round in 0..6 {
            let txn = TransactionId::new();
            for i in 0..20 {
                file.insert_record(txn, &rec(round * 100 + i, round)).unwrap();
            }
            if round % 2 == 0 {
                cache.commit(txn).unwrap();
            } else {
                cache.abort(txn);
            }
        }

        let expected: Vec<i32> = [0, 2, 4]
            .iter()
            .flat_map(|round| (0..20).map(move |i| round * 100 + i))
            .collect();
        let reader = TransactionId::new();
        assert_eq!(sorted_keys(file.as_ref(), reader), expected);
        cache.commit(reader).unwrap();
    }
}

#[test]
fn test_committed_pages_reach_disk() {
    let (_temp, cache, files) = setup();
    for file in &files {
        let txn = TransactionId::new();
        let dirtied = file.insert_record(txn, &rec(1, 1)).unwrap();
        assert!(!dirtied.is_empty());
        assert!(dirtied.iter().all(|pid| pid.file == file.id()));
        cache.commit(txn).unwrap();

        for pid in &dirtied {
            assert!(!cache.holds_lock(txn, *pid));
            let on_disk = file.read_page(pid.page_no).unwrap();
            let cached = cache
                .get_page(TransactionId::new(), *pid, crate::buffer::LockMode::Shared)
                .unwrap();
            assert_eq!(on_disk.as_slice(), cached.read().data());
        }
    }
}

#[test]
fn test_concurrent_transactions_on_both_files() {
    let (_temp, cache, files) = setup();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let files = files.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let key = t * 1000 + i;
                    let abort = i % 5 == 4;
                    let result = run_in_transaction(&cache, 50, |txn| {
                        for file in &files {
                            file.insert_record(txn, &rec(key, t))?;
                        }
                        if abort {
                            // Rolled back by the driver, not retried
                            return Err(DbError::Unsupported("rolled back".into()));
                        }
                        Ok(())
                    });
                    assert_eq!(result.is_err(), abort);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut expected: Vec<i32> = (0..4)
        .flat_map(|t| (0..25).filter(|i| i % 5 != 4).map(move |i| t * 1000 + i))
        .collect();
    expected.sort();

    let reader = TransactionId::new();
    for file in &files {
        assert_eq!(sorted_keys(file.as_ref(), reader), expected);
    }
    cache.commit(reader).unwrap();
    assert_eq!(cache.dirty_page_count(), 0);
    assert!(cache.lock_manager().locked_pages().is_empty());
}
