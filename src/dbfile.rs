use std::sync::{Arc, Mutex};

use crate::error::DbResult;
use crate::page_id::PageId;
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

/// A cached page, in whatever category it actually belongs to. Kept as one
/// enum (rather than a trait object per page) so the buffer pool's cache map
/// is `HashMap<PageId, Arc<Mutex<CachedPage>>>` regardless of whether the
/// page is a heap page or one of the four B+-tree page kinds.
pub enum CachedPage {
    Heap(crate::heap::page::HeapPage),
    BTreeRootPointer(crate::btree::page::RootPointerPage),
    BTreeInternal(crate::btree::page::InternalPage),
    BTreeLeaf(crate::btree::page::LeafPage),
    BTreeHeader(crate::btree::page::HeaderPage),
}

impl CachedPage {
    pub fn id(&self) -> PageId {
        match self {
            CachedPage::Heap(p) => p.id().into(),
            CachedPage::BTreeRootPointer(p) => p.id().into(),
            CachedPage::BTreeInternal(p) => p.id().into(),
            CachedPage::BTreeLeaf(p) => p.id().into(),
            CachedPage::BTreeHeader(p) => p.id().into(),
        }
    }

    pub fn is_dirty(&self) -> Option<TransactionId> {
        match self {
            CachedPage::Heap(p) => p.dirtier(),
            CachedPage::BTreeRootPointer(p) => p.dirtier(),
            CachedPage::BTreeInternal(p) => p.dirtier(),
            CachedPage::BTreeLeaf(p) => p.dirtier(),
            CachedPage::BTreeHeader(p) => p.dirtier(),
        }
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        match self {
            CachedPage::Heap(p) => p.mark_dirty(tid),
            CachedPage::BTreeRootPointer(p) => p.mark_dirty(tid),
            CachedPage::BTreeInternal(p) => p.mark_dirty(tid),
            CachedPage::BTreeLeaf(p) => p.mark_dirty(tid),
            CachedPage::BTreeHeader(p) => p.mark_dirty(tid),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            CachedPage::Heap(p) => p.serialize(),
            CachedPage::BTreeRootPointer(p) => p.serialize(),
            CachedPage::BTreeInternal(p) => p.serialize(),
            CachedPage::BTreeLeaf(p) => p.serialize(),
            CachedPage::BTreeHeader(p) => p.serialize(),
        }
    }
}

/// Any on-disk table file the buffer pool and catalog can operate on
/// uniformly: a heap file or a B+-tree file. Every mutating or scanning
/// method takes the pool explicitly instead of reaching for global state,
/// per the engine-context design (no singleton Database).
pub trait DbFile: Send + Sync {
    fn table_id(&self) -> u64;

    fn tuple_desc(&self) -> &TupleDesc;

    /// Read one page directly from disk (used by the buffer pool on a
    /// cache miss; never bypasses the pool for a page already cached).
    fn read_page(&self, page_id: PageId) -> DbResult<CachedPage>;

    fn write_page(&self, page: &CachedPage) -> DbResult<()>;

    fn num_pages(&self) -> usize;

    fn insert_tuple(
        &self,
        catalog: &crate::catalog::Catalog,
        pool: &crate::buffer_pool::BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> DbResult<Vec<Arc<Mutex<CachedPage>>>>;

    fn delete_tuple(
        &self,
        catalog: &crate::catalog::Catalog,
        pool: &crate::buffer_pool::BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> DbResult<Arc<Mutex<CachedPage>>>;

    /// Takes `Arc<Self>` rather than `&self` so the returned iterator can
    /// own its file handle instead of borrowing it — the caller typically
    /// only has the catalog's `Arc<dyn DbFile>` to hand, not a
    /// long-lived `&File` to borrow from.
    fn iter<'a>(
        self: Arc<Self>,
        catalog: &'a crate::catalog::Catalog,
        pool: &'a crate::buffer_pool::BufferPool,
        tid: TransactionId,
    ) -> DbResult<Box<dyn Iterator<Item = DbResult<Tuple>> + 'a>>
    where
        Self: 'a;
}
