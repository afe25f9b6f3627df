use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use log::{debug, warn};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::lock_manager::{LockManager, LockMode};
use super::page::{Page, PageRef};
use crate::config::StorageConfig;
use crate::error::{DbError, DbResult};
use crate::file::{DiskFile, FileId, PageId};
use crate::transaction::TransactionId;

/// Order in which clean pages are considered for eviction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Evict the clean page used longest ago
    #[default]
    LeastRecent,
    /// Evict the clean page used most recently
    MostRecent,
}

/// Clean and not currently borrowed
fn is_evictable(page: &PageRef) -> bool {
    page.try_read().is_some_and(|p| !p.is_dirty())
}

struct CacheState {
    /// Resident pages in recency order; capacity is enforced by `make_room`
    pages: LruCache<PageId, PageRef>,
    /// Pages each live transaction has dirtied
    dirty: AHashMap<TransactionId, AHashSet<PageId>>,
}

/// Bounded cache of pages shared by every storage file.
///
/// Pages are fetched through `get_page`, which takes the page lock before
/// touching the cache. Dirty pages are never evicted: they stay resident until
/// their transaction commits (written back) or aborts (dropped, so the next
/// read sees the old bytes on disk).
///
/// Lock order is cache mutex, then page guard. Code holding a page guard must
/// not call back into the cache.
pub struct PageCache {
    capacity: usize,
    policy: EvictionPolicy,
    lock_manager: LockManager,
    files: RwLock<AHashMap<FileId, Arc<DiskFile>>>,
    state: Mutex<CacheState>,
}

impl PageCache {
    pub fn new(capacity: usize, lock_timeout: Duration, policy: EvictionPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            lock_manager: LockManager::new(lock_timeout),
            files: RwLock::new(AHashMap::new()),
            state: Mutex::new(CacheState {
                pages: LruCache::unbounded(),
                dirty: AHashMap::new(),
            }),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.cache_capacity, config.lock_timeout(), config.eviction)
    }

    /// Maximum number of resident pages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Order in which clean pages are evicted
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Page lock table shared by every transaction using this cache
    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Make a file's pages loadable through this cache
    pub fn register_file(&self, file: Arc<DiskFile>) {
        self.files.write().insert(file.id(), file);
    }

    fn disk_file(&self, id: FileId) -> DbResult<Arc<DiskFile>> {
        self.files
            .read()
            .get(&id)
            .cloned()
            .ok_or(DbError::UnknownFile(id))
    }

    /// Lock `pid` in `mode` for `txn`, then return the cached page, loading it on a miss
    pub fn get_page(&self, txn: TransactionId, pid: PageId, mode: LockMode) -> DbResult<PageRef> {
        self.lock_manager.acquire(txn, pid, mode)?;

        if let Some(page) = self.resident(pid) {
            return Ok(page);
        }

        // Disk reads happen outside the cache mutex. The page lock keeps
        // writers away, so the bytes read match any copy another shared
        // holder loads at the same time.
        let file = self.disk_file(pid.file)?;
        let data = file.read_page_vec(pid.page_no)?;

        let mut state = self.state.lock();
        if let Some(page) = state.pages.get(&pid) {
            return Ok(Arc::clone(page));
        }
        self.make_room(&mut state)?;

        let page = Arc::new(RwLock::new(Page::new(pid, data.into_boxed_slice())));
        state.pages.put(pid, Arc::clone(&page));
        debug!("Loaded page {} ({} resident)", pid, state.pages.len());

        Ok(page)
    }

    /// The cached copy of `pid`, marking it as just used
    fn resident(&self, pid: PageId) -> Option<PageRef> {
        self.state.lock().pages.get(&pid).cloned()
    }

    /// Evict clean pages until one more page fits
    fn make_room(&self, state: &mut CacheState) -> DbResult<()> {
        while state.pages.len() >= self.capacity {
            let victim = match self.policy {
                EvictionPolicy::LeastRecent => state
                    .pages
                    .iter()
                    .rev()
                    .find(|(_, page)| is_evictable(page))
                    .map(|(pid, _)| *pid),
                EvictionPolicy::MostRecent => state
                    .pages
                    .iter()
                    .find(|(_, page)| is_evictable(page))
                    .map(|(pid, _)| *pid),
            };

            match victim {
                Some(pid) => {
                    state.pages.pop(&pid);
                    debug!("Evicted page {}", pid);
                }
                None => {
                    warn!(
                        "Cannot evict: all {} resident pages are dirty or in use",
                        state.pages.len()
                    );
                    return Err(DbError::EvictionImpossible {
                        capacity: self.capacity,
                    });
                }
            }
        }
        Ok(())
    }

    /// Record that `txn` is about to modify `page`.
    ///
    /// Must be called before the page bytes change; from then on the page
    /// cannot be evicted. A page evicted between `get_page` and this call is
    /// re-admitted.
    pub fn mark_dirty(&self, page: &PageRef, txn: TransactionId) -> DbResult<()> {
        let pid = {
            let mut guard = page.write();
            guard.set_dirty(Some(txn));
            guard.id()
        };

        let mut state = self.state.lock();
        let resident = state
            .pages
            .peek(&pid)
            .is_some_and(|cached| Arc::ptr_eq(cached, page));
        if !resident {
            if state.pages.pop(&pid).is_none() {
                if let Err(err) = self.make_room(&mut state) {
                    page.write().set_dirty(None);
                    return Err(err);
                }
            }
            state.pages.put(pid, Arc::clone(page));
            debug!("Re-admitted page {} for {}", pid, txn);
        }
        state.dirty.entry(txn).or_default().insert(pid);
        Ok(())
    }

    /// Write one page back if it is dirty
    pub fn flush_page(&self, pid: PageId) -> DbResult<()> {
        let mut state = self.state.lock();
        self.write_back(&mut state, pid)?;
        Ok(())
    }

    /// Write `pid` to disk if dirty. Returns the file written, if any.
    fn write_back(&self, state: &mut CacheState, pid: PageId) -> DbResult<Option<FileId>> {
        let Some(page) = state.pages.peek(&pid).cloned() else {
            return Ok(None);
        };

        let mut guard = page.write();
        let Some(txn) = guard.dirtied_by() else {
            return Ok(None);
        };

        self.disk_file(pid.file)?.write_page(pid.page_no, guard.data())?;
        guard.set_dirty(None);
        drop(guard);

        if let Some(pages) = state.dirty.get_mut(&txn) {
            pages.remove(&pid);
            if pages.is_empty() {
                state.dirty.remove(&txn);
            }
        }
        Ok(Some(pid.file))
    }

    /// Write back every page dirtied by `txn`
    pub fn flush_pages(&self, txn: TransactionId) -> DbResult<()> {
        self.flush_pages_inner(txn).map(|_| ())
    }

    fn flush_pages_inner(&self, txn: TransactionId) -> DbResult<AHashSet<FileId>> {
        let mut state = self.state.lock();
        let pages: Vec<PageId> = state
            .dirty
            .get(&txn)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();

        let mut written = AHashSet::new();
        for pid in pages {
            if let Some(file) = self.write_back(&mut state, pid)? {
                written.insert(file);
            }
        }
        state.dirty.remove(&txn);
        Ok(written)
    }

    /// Write back every dirty page and sync every registered file
    pub fn flush_all(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        let pages: Vec<PageId> = state.dirty.values().flatten().copied().collect();
        for pid in pages {
            self.write_back(&mut state, pid)?;
        }
        state.dirty.clear();
        drop(state);

        let files: Vec<Arc<DiskFile>> = self.files.read().values().cloned().collect();
        for file in files {
            file.sync()?;
        }
        Ok(())
    }

    /// Drop a page from the cache without writing it
    pub fn discard(&self, pid: PageId) {
        let mut state = self.state.lock();
        state.pages.pop(&pid);
        for pages in state.dirty.values_mut() {
            pages.remove(&pid);
        }
        state.dirty.retain(|_, pages| !pages.is_empty());
    }

    /// Flush everything `txn` dirtied, then release its locks
    pub fn commit(&self, txn: TransactionId) -> DbResult<()> {
        let written = self.flush_pages_inner(txn)?;
        for id in &written {
            self.disk_file(*id)?.sync()?;
        }
        self.lock_manager.release_all(txn);
        debug!("Committed {} ({} files written)", txn, written.len());
        Ok(())
    }

    /// Drop every page `txn` dirtied, then release its locks
    pub fn abort(&self, txn: TransactionId) {
        let mut state = self.state.lock();
        let pages = state.dirty.remove(&txn).unwrap_or_default();
        for pid in &pages {
            state.pages.pop(pid);
        }
        drop(state);

        self.lock_manager.release_all(txn);
        debug!("Aborted {} ({} pages discarded)", txn, pages.len());
    }

    /// Release a single lock before the transaction ends.
    ///
    /// Only valid for pages the transaction has not modified.
    pub fn release_page(&self, txn: TransactionId, pid: PageId) {
        self.lock_manager.release(txn, pid);
    }

    /// Whether `txn` holds a lock of any mode on `pid`
    pub fn holds_lock(&self, txn: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds(txn, pid)
    }

    /// Whether `pid` is resident
    pub fn is_cached(&self, pid: PageId) -> bool {
        self.state.lock().pages.contains(&pid)
    }

    /// Number of resident pages
    pub fn len(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dirty pages across all transactions
    pub fn dirty_page_count(&self) -> usize {
        self.state.lock().dirty.values().map(|pages| pages.len()).sum()
    }

    /// Pages `txn` has marked dirty and not yet flushed
    pub fn dirty_pages(&self, txn: TransactionId) -> Vec<PageId> {
        self.state
            .lock()
            .dirty
            .get(&txn)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }
}
