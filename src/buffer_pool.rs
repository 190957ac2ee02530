use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::dbfile::CachedPage;
use crate::error::{DbError, DbResult};
use crate::lock_manager::{LockManager, LockMode};
use crate::page_id::PageId;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;

struct Inner {
    /// Head = most recently touched, tail = oldest. Plain `VecDeque` instead
    /// of an intrusive list — pool capacities are small (tens to low
    /// hundreds of pages) so O(n) `retain`/scan is fine for a teaching
    /// engine, matching the source's bounded-loop admission logic.
    young: VecDeque<PageId>,
    old: VecDeque<PageId>,
    pages: HashMap<PageId, Arc<Mutex<CachedPage>>>,
    last_used: HashMap<PageId, Instant>,
}

impl Inner {
    fn remove_from_lists(&mut self, pid: PageId) {
        self.young.retain(|p| *p != pid);
        self.old.retain(|p| *p != pid);
    }
}

/// Fixed-capacity cache of pages with midpoint-insertion LRU: an "old" list
/// absorbs newly loaded pages, which only get promoted to the "young" list
/// once they prove themselves hot by being touched again after sitting a
/// while. This guards young against a single cold sequential scan blowing
/// away the working set — the same reasoning as InnoDB's buffer pool.
pub struct BufferPool {
    inner: Mutex<Inner>,
    pub lock_manager: LockManager,
    config: Config,
}

impl BufferPool {
    pub fn new(config: Config) -> Self {
        BufferPool {
            inner: Mutex::new(Inner {
                young: VecDeque::new(),
                old: VecDeque::new(),
                pages: HashMap::new(),
                last_used: HashMap::new(),
            }),
            lock_manager: LockManager::new(config),
            config,
        }
    }

    pub fn get_page(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
    ) -> DbResult<Arc<Mutex<CachedPage>>> {
        self.lock_manager.acquire(tid, pid, mode)?;

        let mut inner = self.inner.lock().unwrap();
        if let Some(page) = inner.pages.get(&pid).cloned() {
            if inner.young.contains(&pid) {
                inner.remove_from_lists(pid);
                inner.young.push_front(pid);
            } else {
                let now = Instant::now();
                let stale = inner
                    .last_used
                    .get(&pid)
                    .map(|t| now.duration_since(*t) > self.config.old_block_time)
                    .unwrap_or(true);
                inner.remove_from_lists(pid);
                if stale && inner.young.len() < self.config.young_capacity() {
                    inner.young.push_front(pid);
                } else {
                    inner.old.push_front(pid);
                }
            }
            inner.last_used.insert(pid, Instant::now());
            return Ok(page);
        }

        let file = catalog.get_file(pid.table_id())?;
        let page = file.read_page(pid)?;
        let page = Arc::new(Mutex::new(page));
        self.admit(&mut inner, pid, page.clone())?;
        inner.last_used.insert(pid, Instant::now());
        Ok(page)
    }

    fn admit(
        &self,
        inner: &mut Inner,
        pid: PageId,
        page: Arc<Mutex<CachedPage>>,
    ) -> DbResult<()> {
        loop {
            if inner.old.len() < self.config.old_capacity() {
                inner.pages.insert(pid, page);
                inner.old.push_front(pid);
                return Ok(());
            }
            if inner.young.len() < self.config.young_capacity() {
                if let Some(promoted) = inner.old.pop_back() {
                    inner.young.push_front(promoted);
                }
                inner.pages.insert(pid, page);
                inner.old.push_front(pid);
                return Ok(());
            }
            self.evict_one(inner)?;
        }
    }

    /// Scans old then young, oldest-first, for the first clean page not
    /// locked by anyone else, and drops it from the pool. NO-STEAL means a
    /// dirty page is never a candidate — only commit/abort can remove those.
    fn evict_one(&self, inner: &mut Inner) -> DbResult<()> {
        let candidates: Vec<PageId> = inner
            .old
            .iter()
            .rev()
            .chain(inner.young.iter().rev())
            .copied()
            .collect();

        for pid in candidates {
            let Some(cell) = inner.pages.get(&pid).cloned() else {
                continue;
            };
            let dirty = {
                let guard = cell.lock().unwrap();
                guard.is_dirty()
            };
            if dirty.is_some() {
                continue;
            }
            if self.lock_manager.is_locked(pid) {
                continue;
            }
            inner.remove_from_lists(pid);
            inner.pages.remove(&pid);
            inner.last_used.remove(&pid);
            return Ok(());
        }
        Err(DbError::AllPagesDirty)
    }

    pub fn insert_tuple(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        table_id: u64,
        tuple: Tuple,
    ) -> DbResult<()> {
        let file = catalog.get_file(table_id)?;
        let dirtied = file.insert_tuple(catalog, self, tid, tuple)?;
        for page in dirtied {
            self.ensure_cached(page, tid)?;
        }
        Ok(())
    }

    pub fn delete_tuple(&self, catalog: &Catalog, tid: TransactionId, tuple: &Tuple) -> DbResult<()> {
        let table_id = tuple
            .record_id
            .ok_or_else(|| DbError::other("tuple has no record_id"))?
            .page_id
            .table_id();
        let file = catalog.get_file(table_id)?;
        let page = file.delete_tuple(catalog, self, tid, tuple)?;
        self.ensure_cached(page, tid)?;
        Ok(())
    }

    /// Files mutate pages they fetched through `get_page` (so they're
    /// already in the pool) and mark them dirty themselves; this just
    /// re-admits defensively in case a file produced a page bypassing the
    /// normal path (e.g. a freshly allocated B+-tree page).
    fn ensure_cached(&self, page: Arc<Mutex<CachedPage>>, _tid: TransactionId) -> DbResult<()> {
        let pid = page.lock().unwrap().id();
        let mut inner = self.inner.lock().unwrap();
        if !inner.pages.contains_key(&pid) {
            self.admit(&mut inner, pid, page)?;
            inner.last_used.insert(pid, Instant::now());
        }
        Ok(())
    }

    pub fn transaction_complete(&self, catalog: &Catalog, tid: TransactionId, commit: bool) -> DbResult<()> {
        let held = self.lock_manager.pages_held_by(tid);
        let mut inner = self.inner.lock().unwrap();
        for pid in held.iter() {
            if let Some(cell) = inner.pages.get(pid).cloned() {
                let mut guard = cell.lock().unwrap();
                if commit {
                    if guard.is_dirty().is_some() {
                        let file = catalog.get_file(pid.table_id())?;
                        file.write_page(&guard)?;
                        guard.mark_dirty(None);
                    }
                } else if guard.is_dirty() == Some(tid) {
                    drop(guard);
                    inner.remove_from_lists(*pid);
                    inner.pages.remove(pid);
                    inner.last_used.remove(pid);
                }
            }
        }
        drop(inner);
        self.lock_manager.release_all(tid);
        Ok(())
    }

    pub fn flush_all_pages(&self, catalog: &Catalog) -> DbResult<()> {
        let inner = self.inner.lock().unwrap();
        for (pid, cell) in inner.pages.iter() {
            let mut guard = cell.lock().unwrap();
            if guard.is_dirty().is_some() {
                let file = catalog.get_file(pid.table_id())?;
                file.write_page(&guard)?;
                guard.mark_dirty(None);
            }
        }
        Ok(())
    }

    pub fn remove_page(&self, pid: PageId) {
        let mut inner = self.inner.lock().unwrap();
        inner.remove_from_lists(pid);
        inner.pages.remove(&pid);
        inner.last_used.remove(&pid);
    }

    #[cfg(test)]
    pub fn young_len(&self) -> usize {
        self.inner.lock().unwrap().young.len()
    }

    #[cfg(test)]
    pub fn old_len(&self) -> usize {
        self.inner.lock().unwrap().old.len()
    }

    #[cfg(test)]
    pub fn contains(&self, pid: PageId) -> bool {
        self.inner.lock().unwrap().pages.contains_key(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::file::HeapFile;
    use crate::field::Type;
    use crate::page_id::HeapPageId;
    use crate::tuple::TupleDesc;
    use std::time::Duration;

    fn config(pool_capacity: usize, old_fraction: f64) -> Config {
        Config {
            page_size: 128,
            pool_capacity,
            old_list_fraction: old_fraction,
            old_block_time: Duration::from_millis(0),
            lock_retry_min: Duration::from_millis(20),
            lock_retry_max: Duration::from_millis(40),
            lock_retry_limit: 5,
        }
    }

    fn open_table(dir: &tempfile::TempDir, config: Config) -> (Catalog, u64) {
        let path = dir.path().join("t.tbl");
        let desc = TupleDesc::new(vec![(Type::Int, "a")]);
        let file = HeapFile::new(&path, desc, config).unwrap();
        let table_id = file.table_id();
        let catalog = Catalog::new();
        catalog.add_table(std::sync::Arc::new(file), "t");
        (catalog, table_id)
    }

    #[test]
    fn a_touched_old_page_is_promoted_to_young_once_stale() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(10, 0.2); // old_capacity = 2, young_capacity = 8
        let (catalog, table_id) = open_table(&dir, config);
        let pool = BufferPool::new(config);
        let tid = TransactionId::new();

        let pid0: PageId = HeapPageId::new(table_id, 0).into();
        let pid1: PageId = HeapPageId::new(table_id, 1).into();

        pool.get_page(&catalog, tid, pid0, LockMode::Shared).unwrap();
        pool.get_page(&catalog, tid, pid1, LockMode::Shared).unwrap();
        assert_eq!(pool.old_len(), 2);
        assert_eq!(pool.young_len(), 0);

        std::thread::sleep(Duration::from_millis(5));
        pool.get_page(&catalog, tid, pid0, LockMode::Shared).unwrap();

        assert_eq!(pool.young_len(), 1);
        assert_eq!(pool.old_len(), 1);
        assert!(pool.contains(pid0));
    }

    #[test]
    fn no_steal_keeps_a_dirty_page_cached_through_eviction_pressure() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(3, 0.34); // old_capacity = 1, young_capacity = 2
        let (catalog, table_id) = open_table(&dir, config);
        let pool = BufferPool::new(config);

        let pid0: PageId = HeapPageId::new(table_id, 0).into();
        let pid1: PageId = HeapPageId::new(table_id, 1).into();
        let pid2: PageId = HeapPageId::new(table_id, 2).into();
        let pid3: PageId = HeapPageId::new(table_id, 3).into();

        let tid0 = TransactionId::new();
        let cell = pool.get_page(&catalog, tid0, pid0, LockMode::Exclusive).unwrap();
        cell.lock().unwrap().mark_dirty(Some(tid0));
        pool.lock_manager.release(tid0, pid0);

        for pid in [pid1, pid2, pid3] {
            let tid = TransactionId::new();
            pool.get_page(&catalog, tid, pid, LockMode::Shared).unwrap();
            pool.transaction_complete(&catalog, tid, true).unwrap();
        }

        assert!(pool.contains(pid0), "NO-STEAL: a dirty page must never be evicted");
    }
}
