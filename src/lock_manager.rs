use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::page_id::PageId;
use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Default)]
struct PageLocks {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl PageLocks {
    fn holds(&self, tid: TransactionId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self.shared.contains(&tid) || self.exclusive == Some(tid),
            LockMode::Exclusive => self.exclusive == Some(tid),
        }
    }

    fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }

    /// Can `tid` take `mode` on this page right now, given everyone else
    /// already holding it? Covers the upgrade case: a lone shared holder
    /// asking for exclusive is granted in place.
    fn can_grant(&self, tid: TransactionId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => match self.exclusive {
                None => true,
                Some(holder) => holder == tid,
            },
            LockMode::Exclusive => match self.exclusive {
                Some(holder) => holder == tid,
                None => self.shared.is_empty() || (self.shared.len() == 1 && self.shared.contains(&tid)),
            },
        }
    }

    fn grant(&mut self, tid: TransactionId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                if self.exclusive != Some(tid) {
                    self.shared.insert(tid);
                }
            }
            LockMode::Exclusive => {
                self.shared.remove(&tid);
                self.exclusive = Some(tid);
            }
        }
    }

    fn release(&mut self, tid: TransactionId) {
        self.shared.remove(&tid);
        if self.exclusive == Some(tid) {
            self.exclusive = None;
        }
    }

    fn holders(&self) -> HashSet<TransactionId> {
        let mut out = self.shared.clone();
        if let Some(x) = self.exclusive {
            out.insert(x);
        }
        out
    }
}

struct Inner {
    locks: HashMap<PageId, PageLocks>,
    held_by: HashMap<TransactionId, HashSet<PageId>>,
    /// Transactions currently blocked in `acquire`, and the page they're
    /// blocked on. This is exactly the edge set of the waits-for graph: an
    /// entry `tid -> page` means an edge from `tid` to every current holder
    /// of `page`.
    waiting: HashMap<TransactionId, PageId>,
}

/// Two-phase page-level lock manager. One coarse mutex guards lock state; a
/// condvar wakes waiters whenever any lock is released so a blocked
/// `acquire` can re-check `can_grant` without busy-waiting between retries.
pub struct LockManager {
    inner: Mutex<Inner>,
    cond: Condvar,
    config: Config,
}

impl LockManager {
    pub fn new(config: Config) -> Self {
        LockManager {
            inner: Mutex::new(Inner {
                locks: HashMap::new(),
                held_by: HashMap::new(),
                waiting: HashMap::new(),
            }),
            cond: Condvar::new(),
            config,
        }
    }

    pub fn holds_lock(&self, tid: TransactionId, page: PageId, mode: LockMode) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .locks
            .get(&page)
            .map(|l| l.holds(tid, mode))
            .unwrap_or(false)
    }

    /// Blocking acquire with deadlock detection. Retries on a bounded
    /// condvar wait; after each failed wait it rebuilds the waits-for graph
    /// from the current `waiting` set and checks for a cycle through `tid`
    /// by repeatedly removing zero-in-degree nodes (Kahn's algorithm) —
    /// whatever is left standing is on a cycle. After `lock_retry_limit`
    /// failed attempts with no detected cycle the caller aborts on timeout
    /// anyway, a backstop for starvation this snapshot approach can't see.
    pub fn acquire(&self, tid: TransactionId, page: PageId, mode: LockMode) -> DbResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .locks
            .get(&page)
            .map(|l| l.holds(tid, mode))
            .unwrap_or(false)
        {
            return Ok(());
        }

        let mut attempts = 0u32;
        loop {
            let locks = inner.locks.entry(page).or_insert_with(PageLocks::default);
            if locks.can_grant(tid, mode) {
                locks.grant(tid, mode);
                inner.held_by.entry(tid).or_insert_with(HashSet::new).insert(page);
                inner.waiting.remove(&tid);
                return Ok(());
            }

            inner.waiting.insert(tid, page);
            attempts += 1;

            // Detection runs once, on the first failed attempt, to bound
            // its cost; later attempts just keep retrying until the limit.
            if attempts == 1 {
                if let Some(cycle) = Self::find_cycle(&inner, tid) {
                    inner.waiting.remove(&tid);
                    log::warn!("deadlock detected: {} on cycle {:?}", tid, cycle);
                    return Err(DbError::DeadlockAborted);
                }
            }

            if attempts > self.config.lock_retry_limit {
                inner.waiting.remove(&tid);
                return Err(DbError::TimeoutAborted);
            }

            let span = self.config.lock_retry_max - self.config.lock_retry_min;
            let jitter = if span.is_zero() {
                Duration::from_millis(0)
            } else {
                span.mul_f64(rand::random::<f64>())
            };
            let wait = self.config.lock_retry_min + jitter;
            let (guard, _timeout) = self.cond.wait_timeout(inner, wait).unwrap();
            inner = guard;
        }
    }

    pub fn release(&self, tid: TransactionId, page: PageId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(locks) = inner.locks.get_mut(&page) {
            locks.release(tid);
            if locks.is_empty() {
                inner.locks.remove(&page);
            }
        }
        if let Some(set) = inner.held_by.get_mut(&tid) {
            set.remove(&page);
        }
        drop(inner);
        self.cond.notify_all();
    }

    /// Release every page `tid` holds, e.g. at transaction commit/abort.
    pub fn release_all(&self, tid: TransactionId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pages) = inner.held_by.remove(&tid) {
            for page in pages {
                if let Some(locks) = inner.locks.get_mut(&page) {
                    locks.release(tid);
                    if locks.is_empty() {
                        inner.locks.remove(&page);
                    }
                }
            }
        }
        inner.waiting.remove(&tid);
        drop(inner);
        self.cond.notify_all();
    }

    /// Is `page` currently locked (S or X) by anyone at all? Used by
    /// eviction, which has no single caller tid to exempt: a clean page held
    /// by any transaction is off-limits to steal.
    pub fn is_locked(&self, page: PageId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.locks.get(&page).map(|l| !l.is_empty()).unwrap_or(false)
    }

    pub fn pages_held_by(&self, tid: TransactionId) -> Vec<PageId> {
        let inner = self.inner.lock().unwrap();
        inner
            .held_by
            .get(&tid)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn find_cycle(inner: &Inner, tid: TransactionId) -> Option<Vec<TransactionId>> {
        if inner.waiting.len() < 2 {
            return None;
        }

        let mut graph: HashMap<TransactionId, HashSet<TransactionId>> = HashMap::new();
        let mut nodes: HashSet<TransactionId> = HashSet::new();
        for (waiter, page) in inner.waiting.iter() {
            nodes.insert(*waiter);
            if let Some(locks) = inner.locks.get(page) {
                for holder in locks.holders() {
                    if holder != *waiter {
                        nodes.insert(holder);
                        graph.entry(*waiter).or_insert_with(HashSet::new).insert(holder);
                    }
                }
            }
        }

        let mut in_degree: HashMap<TransactionId, usize> = nodes.iter().map(|n| (*n, 0)).collect();
        for vs in graph.values() {
            for v in vs {
                *in_degree.get_mut(v).unwrap() += 1;
            }
        }

        let mut queue: Vec<TransactionId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut removed: HashSet<TransactionId> = HashSet::new();
        while let Some(n) = queue.pop() {
            removed.insert(n);
            if let Some(vs) = graph.get(&n) {
                for v in vs {
                    let d = in_degree.get_mut(v).unwrap();
                    *d -= 1;
                    if *d == 0 {
                        queue.push(*v);
                    }
                }
            }
        }

        if removed.contains(&tid) {
            return None;
        }
        let remaining: Vec<TransactionId> = nodes.difference(&removed).copied().collect();
        if remaining.is_empty() {
            None
        } else {
            Some(remaining)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_id::HeapPageId;
    use std::sync::Arc;
    use std::thread;

    fn config() -> Config {
        Config {
            page_size: 4096,
            pool_capacity: 50,
            old_list_fraction: 0.2,
            old_block_time: Duration::from_millis(1000),
            lock_retry_min: Duration::from_millis(40),
            lock_retry_max: Duration::from_millis(60),
            lock_retry_limit: 5,
        }
    }

    #[test]
    fn a_lone_shared_holder_can_upgrade_to_exclusive() {
        let lm = LockManager::new(config());
        let page: PageId = HeapPageId::new(1, 0).into();
        let tid = TransactionId::new();

        lm.acquire(tid, page, LockMode::Shared).unwrap();
        lm.acquire(tid, page, LockMode::Exclusive).unwrap();
        assert!(lm.holds_lock(tid, page, LockMode::Exclusive));
    }

    #[test]
    fn a_two_transaction_cycle_is_detected_and_resolves_once_broken() {
        let lm = Arc::new(LockManager::new(config()));
        let page_a: PageId = HeapPageId::new(1, 0).into();
        let page_b: PageId = HeapPageId::new(1, 1).into();
        let tid_a = TransactionId::new();
        let tid_b = TransactionId::new();

        lm.acquire(tid_a, page_a, LockMode::Exclusive).unwrap();
        lm.acquire(tid_b, page_b, LockMode::Exclusive).unwrap();

        let lm2 = lm.clone();
        let waiting_on_a = thread::spawn(move || lm2.acquire(tid_b, page_a, LockMode::Exclusive));
        thread::sleep(Duration::from_millis(20));

        // tid_a closes the cycle; detection should abort this side rather
        // than let both transactions block forever.
        let res = lm.acquire(tid_a, page_b, LockMode::Exclusive);
        assert!(matches!(res, Err(DbError::DeadlockAborted)));

        // a real caller releases everything it held once its transaction
        // aborts; only then can the other side of the cycle proceed.
        lm.release_all(tid_a);
        assert!(waiting_on_a.join().unwrap().is_ok());
    }

    #[test]
    fn release_all_frees_every_page_a_transaction_held() {
        let lm = LockManager::new(config());
        let page_a: PageId = HeapPageId::new(1, 0).into();
        let page_b: PageId = HeapPageId::new(1, 1).into();
        let tid = TransactionId::new();

        lm.acquire(tid, page_a, LockMode::Shared).unwrap();
        lm.acquire(tid, page_b, LockMode::Exclusive).unwrap();
        lm.release_all(tid);

        assert!(!lm.is_locked(page_a));
        assert!(!lm.is_locked(page_b));
    }
}
