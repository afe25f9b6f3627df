use std::fmt;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::error::{DbError, DbResult};
use crate::file::PageId;
use crate::transaction::TransactionId;

/// Page lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[derive(Debug, Default)]
struct PageLock {
    shared: AHashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl PageLock {
    fn is_free(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }

    fn mode_of(&self, txn: TransactionId) -> Option<LockMode> {
        if self.exclusive == Some(txn) {
            Some(LockMode::Exclusive)
        } else if self.shared.contains(&txn) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    pages: AHashMap<PageId, PageLock>,
    /// Reverse index: pages each transaction holds a lock on
    held: AHashMap<TransactionId, AHashSet<PageId>>,
}

impl LockTable {
    /// Grant the lock if it is compatible with the current holders
    fn try_grant(&mut self, txn: TransactionId, pid: PageId, mode: LockMode) -> bool {
        let lock = self.pages.entry(pid).or_default();

        let granted = match (lock.exclusive, mode) {
            (Some(holder), _) if holder == txn => true,
            (Some(_), _) => false,
            (None, LockMode::Shared) => {
                lock.shared.insert(txn);
                true
            }
            (None, LockMode::Exclusive) => {
                // Fresh exclusive or upgrade by the only shared holder
                let others = lock.shared.iter().any(|&t| t != txn);
                if !others {
                    lock.shared.remove(&txn);
                    lock.exclusive = Some(txn);
                }
                !others
            }
        };

        if granted {
            self.held.entry(txn).or_default().insert(pid);
        } else if lock.is_free() {
            self.pages.remove(&pid);
        }
        granted
    }

    fn release(&mut self, txn: TransactionId, pid: PageId) {
        if let Some(lock) = self.pages.get_mut(&pid) {
            lock.shared.remove(&txn);
            if lock.exclusive == Some(txn) {
                lock.exclusive = None;
            }
            if lock.is_free() {
                self.pages.remove(&pid);
            }
        }
    }
}

/// Page-granularity shared/exclusive lock table.
///
/// A request that conflicts with another holder waits on a condition variable
/// until the lock is released or the timeout elapses. Timing out is the only
/// deadlock resolution: the caller aborts its transaction and retries under a
/// fresh id, so a cycle costs one timeout instead of hanging forever, at the
/// price of occasionally aborting a transaction that would have succeeded.
pub struct LockManager {
    timeout: Duration,
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire `mode` on `pid` for `txn`, waiting up to the timeout
    pub fn acquire(&self, txn: TransactionId, pid: PageId, mode: LockMode) -> DbResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();

        loop {
            if table.try_grant(txn, pid, mode) {
                return Ok(());
            }
            if self.released.wait_until(&mut table, deadline).timed_out() {
                if table.try_grant(txn, pid, mode) {
                    return Ok(());
                }
                warn!("{} timed out waiting for {} lock on {}", txn, mode, pid);
                return Err(DbError::LockTimeout {
                    txn,
                    page: pid,
                    mode,
                });
            }
        }
    }

    /// Acquire without waiting; returns whether the lock was granted
    pub fn try_acquire(&self, txn: TransactionId, pid: PageId, mode: LockMode) -> bool {
        self.table.lock().try_grant(txn, pid, mode)
    }

    pub fn release(&self, txn: TransactionId, pid: PageId) {
        let mut table = self.table.lock();
        table.release(txn, pid);
        if let Some(pages) = table.held.get_mut(&txn) {
            pages.remove(&pid);
            if pages.is_empty() {
                table.held.remove(&txn);
            }
        }
        drop(table);
        self.released.notify_all();
    }

    /// Release every lock held by `txn`
    pub fn release_all(&self, txn: TransactionId) {
        let mut table = self.table.lock();
        if let Some(pages) = table.held.remove(&txn) {
            for pid in pages {
                table.release(txn, pid);
            }
        }
        drop(table);
        self.released.notify_all();
    }

    pub fn holds(&self, txn: TransactionId, pid: PageId) -> bool {
        self.lock_mode(txn, pid).is_some()
    }

    /// Strongest mode `txn` holds on `pid`
    pub fn lock_mode(&self, txn: TransactionId, pid: PageId) -> Option<LockMode> {
        self.table
            .lock()
            .pages
            .get(&pid)
            .and_then(|lock| lock.mode_of(txn))
    }

    /// Every page currently locked by any transaction
    pub fn locked_pages(&self) -> AHashSet<PageId> {
        self.table.lock().pages.keys().copied().collect()
    }

    pub fn locked_pages_for(&self, txn: TransactionId) -> Vec<PageId> {
        self.table
            .lock()
            .held
            .get(&txn)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Holders of `pid`: the shared set and the exclusive holder
    pub fn holders(&self, pid: PageId) -> (Vec<TransactionId>, Option<TransactionId>) {
        let table = self.table.lock();
        match table.pages.get(&pid) {
            Some(lock) => (lock.shared.iter().copied().collect(), lock.exclusive),
            None => (Vec::new(), None),
        }
    }
}
