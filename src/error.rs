use thiserror::Error;

use crate::buffer::LockMode;
use crate::file::{FileError, FileId, PageId};
use crate::record::RecordError;
use crate::transaction::TransactionId;

/// Errors raised by the page cache, lock manager and storage files
#[derive(Debug, Error)]
pub enum DbError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Transaction {txn} timed out waiting for {mode} lock on page {page}")]
    LockTimeout {
        txn: TransactionId,
        page: PageId,
        mode: LockMode,
    },

    #[error("All {capacity} cached pages are dirty; nothing can be evicted")]
    EvictionImpossible { capacity: usize },

    #[error("Corrupt page {page}: {reason}")]
    CorruptPage { page: PageId, reason: String },

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    DuplicateTable(String),

    #[error("Record not found")]
    RecordNotFound,

    #[error("File {0} is not registered with the page cache")]
    UnknownFile(FileId),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Whether the owning transaction must abort and may be retried under a new id
    pub fn is_transaction_abort(&self) -> bool {
        matches!(
            self,
            DbError::LockTimeout { .. } | DbError::EvictionImpossible { .. }
        )
    }

    pub(crate) fn corrupt(page: PageId, reason: impl Into<String>) -> Self {
        DbError::CorruptPage {
            page,
            reason: reason.into(),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
