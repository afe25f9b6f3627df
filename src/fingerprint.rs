//! Audio fingerprint records on top of the storage core.
//!
//! A fingerprint is a `(hash, offset, track_id)` triple. Records are kept in a
//! B-tree keyed on the hash so matching can fetch every candidate for a hash
//! with one equality lookup. Track names live in a heap file beside it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::buffer::PageCache;
use crate::config::StorageConfig;
use crate::error::{DbError, DbResult};
use crate::record::{Field, FieldDef, FieldType, Record, RecordError, Schema};
use crate::storage::{BTreeFile, HeapFile, StorageFile};
use crate::transaction::{TransactionId, run_in_transaction};

pub const HASH_FIELD: usize = 0;

/// Longest track name in bytes
pub const TRACK_NAME_LEN: usize = 64;

const FINGERPRINT_FILE: &str = "fingerprints.idx";
const TRACK_FILE: &str = "tracks.dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintRecord {
    pub hash: i32,
    pub offset: i32,
    pub track_id: i32,
}

impl FingerprintRecord {
    pub fn new(hash: i32, offset: i32, track_id: i32) -> Self {
        Self {
            hash,
            offset,
            track_id,
        }
    }
}

/// (Hash INT, Time Offset INT, Track ID INT)
pub fn fingerprint_schema() -> Schema {
    Schema::new(vec![
        FieldDef::new("Hash", FieldType::Int),
        FieldDef::new("Time Offset", FieldType::Int),
        FieldDef::new("Track ID", FieldType::Int),
    ])
}

/// (Track ID INT, Name STR(64))
pub fn track_schema() -> Schema {
    Schema::new(vec![
        FieldDef::new("Track ID", FieldType::Int),
        FieldDef::new("Name", FieldType::Str(TRACK_NAME_LEN)),
    ])
}

impl From<FingerprintRecord> for Record {
    fn from(fp: FingerprintRecord) -> Self {
        Record::new(vec![
            Field::Int(fp.hash),
            Field::Int(fp.offset),
            Field::Int(fp.track_id),
        ])
    }
}

impl TryFrom<&Record> for FingerprintRecord {
    type Error = RecordError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        match record.fields() {
            [Field::Int(hash), Field::Int(offset), Field::Int(track_id)] => {
                Ok(Self::new(*hash, *offset, *track_id))
            }
            other => Err(RecordError::SchemaMismatch(format!(
                "expected three integer fields, got {:?}",
                other
            ))),
        }
    }
}

impl TryFrom<Record> for FingerprintRecord {
    type Error = RecordError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        Self::try_from(&record)
    }
}

/// Fingerprint table backed by a hash-keyed B-tree, plus the registry of
/// track names the fingerprints refer to
pub struct FingerprintStore {
    cache: Arc<PageCache>,
    tree: BTreeFile,
    tracks: HeapFile,
    /// Held while a new track id is chosen and inserted
    registration: Mutex<()>,
    max_attempts: usize,
}

impl FingerprintStore {
    /// Open (or create) the fingerprint index and track registry inside `dir`
    pub fn open<P: AsRef<Path>>(
        cache: Arc<PageCache>,
        dir: P,
        config: &StorageConfig,
    ) -> DbResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let tree = BTreeFile::open(
            Arc::clone(&cache),
            dir.join(FINGERPRINT_FILE),
            fingerprint_schema(),
            HASH_FIELD,
            &config.btree,
        )?;
        let tracks = HeapFile::open(Arc::clone(&cache), dir.join(TRACK_FILE), track_schema())?;
        Ok(Self {
            cache,
            tree,
            tracks,
            registration: Mutex::new(()),
            max_attempts: config.max_attempts,
        })
    }

    /// Hash-keyed fingerprint index
    pub fn tree(&self) -> &BTreeFile {
        &self.tree
    }

    /// Heap file holding the track registry
    pub fn track_file(&self) -> &HeapFile {
        &self.tracks
    }

    /// Insert a batch in a single transaction, retried on lock timeouts.
    ///
    /// Every page the batch dirties stays pinned until commit, so the batch
    /// must fit in the cache.
    pub fn insert_all(&self, records: &[FingerprintRecord]) -> DbResult<usize> {
        run_in_transaction(&self.cache, self.max_attempts, |txn| {
            for fp in records {
                self.tree.insert_record(txn, &Record::from(*fp))?;
            }
            Ok(records.len())
        })
    }

    /// Every stored fingerprint with this hash
    pub fn candidates(&self, hash: i32) -> DbResult<Vec<FingerprintRecord>> {
        run_in_transaction(&self.cache, self.max_attempts, |txn| {
            self.tree
                .lookup(txn, hash)
                .map(|record| {
                    let record = record?;
                    FingerprintRecord::try_from(&record).map_err(DbError::from)
                })
                .collect()
        })
    }

    /// Id of the track called `name`, registering it under the next free id
    /// if it is new
    pub fn register_track(&self, name: &str) -> DbResult<i32> {
        let _registering = self.registration.lock();
        run_in_transaction(&self.cache, self.max_attempts, |txn| {
            let tracks = self.read_tracks(txn)?;
            if let Some((id, _)) = tracks.iter().find(|(_, known)| known == name) {
                return Ok(*id);
            }

            let id = i32::try_from(tracks.len())
                .map_err(|_| DbError::Unsupported("too many tracks".to_string()))?;
            self.tracks
                .insert_record(txn, &Record::new(vec![Field::Int(id), Field::from(name)]))?;
            info!("Registered track {} as {}", name, id);
            Ok(id)
        })
    }

    /// Name registered under `track_id`
    pub fn track_name(&self, track_id: i32) -> DbResult<Option<String>> {
        Ok(self
            .tracks()?
            .into_iter()
            .find(|(id, _)| *id == track_id)
            .map(|(_, name)| name))
    }

    /// Id registered for `name`
    pub fn track_id(&self, name: &str) -> DbResult<Option<i32>> {
        Ok(self
            .tracks()?
            .into_iter()
            .find(|(_, known)| known == name)
            .map(|(id, _)| id))
    }

    /// Every registered track as (id, name), in id order
    pub fn tracks(&self) -> DbResult<Vec<(i32, String)>> {
        run_in_transaction(&self.cache, self.max_attempts, |txn| self.read_tracks(txn))
    }

    fn read_tracks(&self, txn: TransactionId) -> DbResult<Vec<(i32, String)>> {
        let mut tracks = Vec::new();
        for record in self.tracks.iter(txn) {
            let record = record?;
            match (record.get_int(0), record.get(1).and_then(Field::as_str)) {
                (Some(id), Some(name)) => tracks.push((id, name.to_string())),
                _ => {
                    return Err(RecordError::SchemaMismatch(format!(
                        "expected a track id and name, got {:?}",
                        record.fields()
                    ))
                    .into());
                }
            }
        }
        tracks.sort();
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BTreeConfig;
    use std::thread;
    use tempfile::TempDir;

    fn config() -> StorageConfig {
        StorageConfig {
            cache_capacity: 2048,
            max_attempts: 50,
            btree: BTreeConfig {
                leaf_capacity: Some(16),
                internal_capacity: Some(16),
            },
            ..StorageConfig::default()
        }
    }

    fn setup() -> (TempDir, Arc<PageCache>, FingerprintStore) {
        let temp_dir = TempDir::new().unwrap();
        let config = config();
        let cache = Arc::new(PageCache::from_config(&config));
        let store = FingerprintStore::open(Arc::clone(&cache), temp_dir.path(), &config).unwrap();
        (temp_dir, cache, store)
    }

    #[test]
    fn test_record_conversion() {
        let fp = FingerprintRecord::new(-5, 1200, 42);
        let record = Record::from(fp);
        assert_eq!(record.get_int(0), Some(-5));
        assert_eq!(record.get_int(2), Some(42));
        assert_eq!(FingerprintRecord::try_from(&record).unwrap(), fp);

        let bytes = record.serialize(&fingerprint_schema()).unwrap();
        assert_eq!(bytes.len(), 12);

        let wrong = Record::new(vec![Field::Int(1), Field::from("x"), Field::Int(2)]);
        assert!(matches!(
            FingerprintRecord::try_from(wrong),
            Err(RecordError::SchemaMismatch(_))
        ));
        assert!(FingerprintRecord::try_from(Record::new(vec![Field::Int(1)])).is_err());
    }

    #[test]
    fn test_schema_field_names() {
        let schema = fingerprint_schema();
        assert_eq!(schema.find_field("Hash"), Some(HASH_FIELD));
        assert_eq!(schema.find_field("Time Offset"), Some(1));
        assert_eq!(schema.find_field("Track ID"), Some(2));
        assert_eq!(schema.record_size(), 12);
    }

    #[test]
    fn test_candidates_returns_every_match() {
        let (_temp, cache, store) = setup();

        // 20 tracks sharing hashes 0..30, each hash at several offsets
        let batch: Vec<FingerprintRecord> = (0..20)
            .flat_map(|track| (0..30).map(move |i| FingerprintRecord::new(i, i * 10 + track, track)))
            .collect();
        assert_eq!(store.insert_all(&batch).unwrap(), 600);

        let mut found = store.candidates(7).unwrap();
        found.sort();
        let mut expected: Vec<FingerprintRecord> =
            batch.iter().copied().filter(|fp| fp.hash == 7).collect();
        expected.sort();
        assert_eq!(found, expected);

        assert!(store.candidates(31).unwrap().is_empty());
        assert!(store.candidates(-1).unwrap().is_empty());

        let reader = TransactionId::new();
        let stats = store.tree().stats(reader).unwrap();
        assert_eq!(stats.entry_count, 600);
        cache.commit(reader).unwrap();
        assert_eq!(cache.dirty_page_count(), 0);
    }

    #[test]
    fn test_reopen_keeps_fingerprints() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("library");
        let config = config();
        {
            let cache = Arc::new(PageCache::from_config(&config));
            let store = FingerprintStore::open(Arc::clone(&cache), &path, &config).unwrap();
            store
                .insert_all(&[
                    FingerprintRecord::new(9, 100, 1),
                    FingerprintRecord::new(9, 250, 2),
                    FingerprintRecord::new(3, 40, 1),
                ])
                .unwrap();
            assert_eq!(store.register_track("imagine.wav").unwrap(), 0);
        }

        let cache = Arc::new(PageCache::from_config(&config));
        let store = FingerprintStore::open(cache, &path, &config).unwrap();
        let mut found = store.candidates(9).unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![
                FingerprintRecord::new(9, 100, 1),
                FingerprintRecord::new(9, 250, 2)
            ]
        );
        assert_eq!(store.track_id("imagine.wav").unwrap(), Some(0));
        assert_eq!(store.register_track("canon.wav").unwrap(), 1);
    }

    #[test]
    fn test_track_registry() {
        let (_temp, _cache, store) = setup();
        assert!(store.tracks().unwrap().is_empty());
        assert_eq!(store.track_name(0).unwrap(), None);

        assert_eq!(store.register_track("canon_d_major.wav").unwrap(), 0);
        assert_eq!(store.register_track("imagine.wav").unwrap(), 1);
        // Registering again keeps the first id
        assert_eq!(store.register_track("canon_d_major.wav").unwrap(), 0);

        assert_eq!(store.track_name(1).unwrap().as_deref(), Some("imagine.wav"));
        assert_eq!(store.track_id("canon_d_major.wav").unwrap(), Some(0));
        assert_eq!(store.track_id("missing.wav").unwrap(), None);
        assert_eq!(
            store.tracks().unwrap(),
            vec![
                (0, "canon_d_major.wav".to_string()),
                (1, "imagine.wav".to_string())
            ]
        );

        let too_long = "x".repeat(TRACK_NAME_LEN + 1);
        assert!(matches!(
            store.register_track(&too_long),
            Err(DbError::Record(RecordError::SchemaMismatch(_)))
        ));
        assert_eq!(store.tracks().unwrap().len(), 2);
        assert_eq!(store.track_file().num_pages().unwrap(), 1);
        assert_eq!(store.track_file().schema(), &track_schema());
    }

    #[test]
    fn test_concurrent_registration_assigns_distinct_ids() {
        let (_temp, _cache, store) = setup();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..10)
                        .map(|i| store.register_track(&format!("song-{}-{}.wav", t, i)).unwrap())
                        .collect::<Vec<i32>>()
                })
            })
            .collect();
        let mut ids: Vec<i32> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, (0..40).collect::<Vec<_>>());

        for (id, name) in store.tracks().unwrap() {
            assert_eq!(store.track_id(&name).unwrap(), Some(id));
        }
    }

    #[test]
    fn test_concurrent_ingest_and_lookup() {
        let (_temp, _cache, store) = setup();
        let store = Arc::new(store);

        let writers: Vec<_> = (0..4)
            .map(|track| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for chunk in 0..5 {
                        let batch: Vec<FingerprintRecord> = (0..10)
                            .map(|i| FingerprintRecord::new(chunk * 10 + i, i, track))
                            .collect();
                        store.insert_all(&batch).unwrap();
                        store.candidates(chunk * 10).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        for hash in 0..50 {
            let mut tracks: Vec<i32> = store
                .candidates(hash)
                .unwrap()
                .into_iter()
                .map(|fp| fp.track_id)
                .collect();
            tracks.sort();
            assert_eq!(tracks, vec![0, 1, 2, 3]);
        }
    }
}
