pub mod buffer;
pub mod catalog;
pub mod config;
pub mod error;
pub mod file;
pub mod fingerprint;
pub mod record;
pub mod storage;
pub mod transaction;

pub use buffer::{EvictionPolicy, LockManager, LockMode, Page, PageCache, PageRef};
pub use catalog::{Catalog, CatalogEntry, TableId};
pub use config::{BTreeConfig, StorageConfig};
pub use error::{DbError, DbResult};
pub use file::{DiskFile, FileError, FileId, FileResult, PAGE_SIZE, PageId, PageNo};
pub use fingerprint::{FingerprintRecord, FingerprintStore, fingerprint_schema, track_schema};
pub use record::{
    Field, FieldDef, FieldType, Record, RecordError, RecordId, RecordResult, Schema, SlotId,
};
pub use storage::{
    BTreeFile, HeapFile, RecordIter, StorageFile, StorageKind, TreeStats,
    btree::{BTreeScan, EqualityLookup},
    heap::HeapScan,
};
pub use transaction::{TransactionId, run_in_transaction};
