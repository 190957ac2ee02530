use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier bracketing a series of page accesses, born at first
/// `get_page` and retired at `transaction_complete`. Allocation is just a
/// monotonically increasing counter — there is no transaction table beyond
/// what the lock manager and buffer pool already track per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        TransactionId::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}
