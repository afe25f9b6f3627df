pub mod btree;
pub mod heap;

#[cfg(test)]
mod tests;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::file::{DiskFile, FileId, PageId, PageNo};
use crate::record::{Record, Schema};
use crate::transaction::TransactionId;

pub use btree::{BTreeFile, TreeStats};
pub use heap::HeapFile;

/// Lazy sequence of records produced by a scan or lookup
pub type RecordIter<'a> = Box<dyn Iterator<Item = DbResult<Record>> + 'a>;

/// On-disk organisation of a storage file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageKind {
    Heap,
    BTree { key_field: usize },
}

/// Operations shared by every persistent record collection.
///
/// Record-level operations go through the page cache under `txn`; the raw
/// page methods bypass it.
pub trait StorageFile: Send + Sync {
    fn disk(&self) -> &DiskFile;

    fn schema(&self) -> &Schema;

    fn kind(&self) -> StorageKind;

    fn id(&self) -> FileId {
        self.disk().id()
    }

    fn path(&self) -> &Path {
        self.disk().path()
    }

    fn read_page(&self, page_no: PageNo) -> DbResult<Vec<u8>> {
        Ok(self.disk().read_page_vec(page_no)?)
    }

    fn write_page(&self, page_no: PageNo, data: &[u8]) -> DbResult<()> {
        Ok(self.disk().write_page(page_no, data)?)
    }

    fn num_pages(&self) -> DbResult<usize> {
        Ok(self.disk().num_pages()?)
    }

    /// Insert a record; returns the pages it dirtied
    fn insert_record(&self, txn: TransactionId, record: &Record) -> DbResult<Vec<PageId>>;

    /// Delete a record; returns the pages it dirtied
    fn delete_record(&self, txn: TransactionId, record: &Record) -> DbResult<Vec<PageId>>;

    fn scan(&self, txn: TransactionId) -> RecordIter<'_>;

    /// All records whose key equals `key`
    fn equality_lookup(&self, txn: TransactionId, key: i32) -> DbResult<RecordIter<'_>> {
        let _ = (txn, key);
        Err(DbError::Unsupported(format!(
            "equality lookup on {} storage",
            match self.kind() {
                StorageKind::Heap => "heap",
                StorageKind::BTree { .. } => "btree",
            }
        )))
    }
}
