use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::buffer_pool::BufferPool;
use crate::config::Config;
use crate::dbfile::{CachedPage, DbFile};
use crate::error::{DbError, DbResult};
use crate::heap::page::HeapPage;
use crate::lock_manager::LockMode;
use crate::page_id::{table_id_of, HeapPageId, PageId};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

/// A sequence of fixed-size pages backing one table. The one-past-end page
/// id always reads back as a fresh, all-zero page (`read_page` bumps
/// `num_pages` as a side effect) — that synthetic page is how new pages get
/// materialized, rather than a separate "allocate" call.
pub struct HeapFile {
    path: PathBuf,
    table_id: u64,
    desc: TupleDesc,
    config: Config,
    handle: RwLock<File>,
    num_pages: AtomicUsize,
}

impl HeapFile {
    pub fn new(path: impl AsRef<Path>, desc: TupleDesc, config: Config) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let len = handle.metadata()?.len() as usize;
        let num_pages = (len + config.page_size - 1) / config.page_size;
        let table_id = table_id_of(&path);
        Ok(HeapFile {
            path,
            table_id,
            desc,
            config,
            handle: RwLock::new(handle),
            num_pages: AtomicUsize::new(num_pages),
        })
    }

    fn as_heap_id(&self, pid: PageId) -> DbResult<HeapPageId> {
        match pid {
            PageId::Heap(h) if h.table_id == self.table_id => Ok(h),
            _ => Err(DbError::WrongPage),
        }
    }
}

impl DbFile for HeapFile {
    fn table_id(&self) -> u64 {
        self.table_id
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn read_page(&self, pid: PageId) -> DbResult<CachedPage> {
        let hid = self.as_heap_id(pid)?;
        let num_pages = self.num_pages.load(Ordering::SeqCst);
        if hid.page_no >= num_pages {
            self.num_pages.store(hid.page_no + 1, Ordering::SeqCst);
            let bytes = HeapPage::empty_page_bytes(self.config.page_size);
            let page = HeapPage::new(hid, self.desc.clone(), &bytes, &self.config)?;
            return Ok(CachedPage::Heap(page));
        }

        let mut handle = self.handle.write().unwrap();
        handle.seek(SeekFrom::Start((hid.page_no * self.config.page_size) as u64))?;
        let mut buf = vec![0u8; self.config.page_size];
        handle.read_exact(&mut buf)?;
        let page = HeapPage::new(hid, self.desc.clone(), &buf, &self.config)?;
        Ok(CachedPage::Heap(page))
    }

    fn write_page(&self, page: &CachedPage) -> DbResult<()> {
        let CachedPage::Heap(page) = page else {
            return Err(DbError::WrongPage);
        };
        let hid = self.as_heap_id(page.id().into())?;
        let mut handle = self.handle.write().unwrap();
        handle.seek(SeekFrom::Start((hid.page_no * self.config.page_size) as u64))?;
        handle.write_all(&page.serialize())?;
        Ok(())
    }

    fn num_pages(&self) -> usize {
        self.num_pages.load(Ordering::SeqCst)
    }

    fn insert_tuple(
        &self,
        catalog: &crate::catalog::Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> DbResult<Vec<Arc<Mutex<CachedPage>>>> {
        let num_pages = self.num_pages.load(Ordering::SeqCst);
        for page_no in 0..=num_pages {
            let pid: PageId = HeapPageId::new(self.table_id, page_no).into();
            let shared = pool.get_page(catalog, tid, pid, LockMode::Shared)?;
            let has_room = {
                let CachedPage::Heap(hp) = &*shared.lock().unwrap() else {
                    return Err(DbError::WrongPage);
                };
                hp.num_unused_slots() > 0
            };
            if !has_room {
                continue;
            }
            let cell = pool.get_page(catalog, tid, pid, LockMode::Exclusive)?;
            let mut guard = cell.lock().unwrap();
            let CachedPage::Heap(hp) = &mut *guard else {
                return Err(DbError::WrongPage);
            };
            match hp.insert_tuple(tuple) {
                Ok(()) => {
                    hp.mark_dirty(Some(tid));
                    drop(guard);
                    return Ok(vec![cell]);
                }
                Err(DbError::PageFull) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(DbError::other("heap file insert_tuple: no page accepted the tuple"))
    }

    fn delete_tuple(
        &self,
        catalog: &crate::catalog::Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> DbResult<Arc<Mutex<CachedPage>>> {
        let rid = tuple.record_id.ok_or_else(|| DbError::other("tuple has no record_id"))?;
        let cell = pool.get_page(catalog, tid, rid.page_id, LockMode::Exclusive)?;
        {
            let mut guard = cell.lock().unwrap();
            let CachedPage::Heap(hp) = &mut *guard else {
                return Err(DbError::WrongPage);
            };
            hp.delete_tuple(tuple)?;
            hp.mark_dirty(Some(tid));
        }
        Ok(cell)
    }

    fn iter<'a>(
        self: Arc<Self>,
        catalog: &'a crate::catalog::Catalog,
        pool: &'a BufferPool,
        tid: TransactionId,
    ) -> DbResult<Box<dyn Iterator<Item = DbResult<Tuple>> + 'a>>
    where
        Self: 'a,
    {
        Ok(Box::new(HeapFileIter {
            file: self,
            catalog,
            pool,
            tid,
            page_no: 0,
            buf: Vec::new(),
            idx: 0,
        }))
    }
}

/// Re-acquires its current page through the pool on every step rather than
/// holding a reference across calls, so eviction during a long scan stays
/// safe: nothing here survives a suspension point except `page_no`/`idx`.
/// Owns its file via `Arc` rather than borrowing it, so callers that only
/// have a catalog's `Arc<dyn DbFile>` in hand can still produce an
/// iterator with no lifetime tied to that local variable.
struct HeapFileIter<'a> {
    file: Arc<HeapFile>,
    catalog: &'a crate::catalog::Catalog,
    pool: &'a BufferPool,
    tid: TransactionId,
    page_no: usize,
    buf: Vec<Tuple>,
    idx: usize,
}

impl<'a> Iterator for HeapFileIter<'a> {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.idx < self.buf.len() {
                let t = self.buf[self.idx].clone();
                self.idx += 1;
                return Some(Ok(t));
            }
            if self.page_no >= self.file.num_pages.load(Ordering::SeqCst) {
                return None;
            }
            let pid: PageId = HeapPageId::new(self.file.table_id, self.page_no).into();
            let cell = match self
                .pool
                .get_page(self.catalog, self.tid, pid, LockMode::Shared)
            {
                Ok(c) => c,
                Err(e) => return Some(Err(e)),
            };
            let guard = cell.lock().unwrap();
            let CachedPage::Heap(hp) = &*guard else {
                return Some(Err(DbError::WrongPage));
            };
            self.buf = hp.iter().cloned().collect();
            self.idx = 0;
            self.page_no += 1;
        }
    }
}
