use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use log::{info, warn};
use rand::Rng;

use crate::buffer::PageCache;
use crate::error::DbResult;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque token correlating the locks and dirty pages of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Allocate a fresh id, unique for the lifetime of the process
    pub fn new() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Upper bound of the randomised pause between attempts
const MAX_BACKOFF_MS: u64 = 20;

/// Run `body` inside a transaction.
///
/// The transaction commits when `body` succeeds and aborts on any error.
/// Lock timeouts and eviction failures are retried under a fresh id, up to
/// `max_attempts` attempts in total; other errors are returned as-is.
pub fn run_in_transaction<T, F>(cache: &PageCache, max_attempts: usize, mut body: F) -> DbResult<T>
where
    F: FnMut(TransactionId) -> DbResult<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let txn = TransactionId::new();
        let err = match body(txn) {
            Ok(value) => match cache.commit(txn) {
                Ok(()) => return Ok(value),
                Err(err) => err,
            },
            Err(err) => err,
        };

        cache.abort(txn);

        if !err.is_transaction_abort() || attempt >= max_attempts {
            if err.is_transaction_abort() {
                warn!("{} aborted after {} attempts: {}", txn, attempt, err);
            }
            return Err(err);
        }

        let pause = rand::thread_rng().gen_range(1..=MAX_BACKOFF_MS * attempt as u64);
        info!(
            "{} aborted ({}); retrying in {}ms (attempt {}/{})",
            txn,
            err,
            pause,
            attempt + 1,
            max_attempts
        );
        thread::sleep(Duration::from_millis(pause));
        attempt += 1;
    }
}
