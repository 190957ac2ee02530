use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::dbfile::{CachedPage, DbFile};
use crate::error::DbResult;
use crate::lock_manager::LockMode;
use crate::page_id::PageId;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;

/// The engine context: owns a `Catalog` and a `BufferPool` (which in turn
/// owns the `LockManager`) as siblings, neither holding a back-reference to
/// the other. There is no global singleton reachable from anywhere via a
/// thread-local/static — every caller threads `&Engine` explicitly instead.
pub struct Engine {
    catalog: Catalog,
    pool: BufferPool,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Engine {
            catalog: Catalog::new(),
            pool: BufferPool::new(config),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn add_table(&self, file: Arc<dyn DbFile>, name: impl Into<String>) {
        self.catalog.add_table(file, name);
    }

    pub fn begin_transaction(&self) -> TransactionId {
        TransactionId::new()
    }

    pub fn get_page(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> DbResult<Arc<Mutex<CachedPage>>> {
        self.pool.get_page(&self.catalog, tid, pid, mode)
    }

    pub fn insert_tuple(&self, tid: TransactionId, table_id: u64, tuple: Tuple) -> DbResult<()> {
        self.pool.insert_tuple(&self.catalog, tid, table_id, tuple)
    }

    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> DbResult<()> {
        self.pool.delete_tuple(&self.catalog, tid, tuple)
    }

    pub fn scan<'a>(&'a self, tid: TransactionId, table_id: u64) -> DbResult<Box<dyn Iterator<Item = DbResult<Tuple>> + 'a>> {
        let file = self.catalog.get_file(table_id)?;
        file.iter(&self.catalog, &self.pool, tid)
    }

    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> DbResult<()> {
        self.pool.transaction_complete(&self.catalog, tid, commit)
    }

    pub fn flush_all_pages(&self) -> DbResult<()> {
        self.pool.flush_all_pages(&self.catalog)
    }

    pub fn remove_page(&self, pid: PageId) {
        self.pool.remove_page(pid)
    }
}
