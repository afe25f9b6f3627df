use std::sync::Arc;

use parking_lot::RwLock;

use crate::file::{PAGE_SIZE, PageId};
use crate::transaction::TransactionId;

/// Shared handle to a cached page
pub type PageRef = Arc<RwLock<Page>>;

/// One resident page: its bytes plus the transaction that dirtied it, if any
#[derive(Debug)]
pub struct Page {
    id: PageId,
    data: Box<[u8]>,
    dirty: Option<TransactionId>,
}

impl Page {
    pub fn new(id: PageId, data: Box<[u8]>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            id,
            data,
            dirty: None,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable page bytes. Callers mark the page dirty through the cache first.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirty
    }

    pub(crate) fn set_dirty(&mut self, txn: Option<TransactionId>) {
        self.dirty = txn;
    }
}
