use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// A stable hash of a file's absolute path, used as the table identifier
/// throughout the engine. Two `DbFile`s opened against the same path
/// collide on purpose — that's what lets the catalog and buffer pool key
/// everything off a single `u64` instead of carrying path strings around.
pub fn table_id_of(path: &Path) -> u64 {
    let abs = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = DefaultHasher::new();
    abs.hash(&mut hasher);
    hasher.finish()
}

/// Identity of one page in a heap file: `(table_id, page_no)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapPageId {
    pub table_id: u64,
    pub page_no: usize,
}

impl HeapPageId {
    pub fn new(table_id: u64, page_no: usize) -> Self {
        HeapPageId { table_id, page_no }
    }
}

impl fmt::Display for HeapPageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "heap({:x}, {})", self.table_id, self.page_no)
    }
}

/// B+-tree pages come in four flavors, distinguished so that a single
/// `(table_id, page_no)` pair can be reused across categories without
/// colliding (a root-pointer page and the first leaf both sit near page 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageCategory {
    RootPtr,
    Internal,
    Leaf,
    Header,
}

impl fmt::Display for PageCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            PageCategory::RootPtr => "root_ptr",
            PageCategory::Internal => "internal",
            PageCategory::Leaf => "leaf",
            PageCategory::Header => "header",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BTreePageId {
    pub table_id: u64,
    pub page_no: usize,
    pub category: PageCategory,
}

impl BTreePageId {
    pub fn new(table_id: u64, page_no: usize, category: PageCategory) -> Self {
        BTreePageId {
            table_id,
            page_no,
            category,
        }
    }

    pub fn root_ptr(table_id: u64) -> Self {
        BTreePageId::new(table_id, 0, PageCategory::RootPtr)
    }
}

impl fmt::Display for BTreePageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "btree({:x}, {}, {})", self.table_id, self.page_no, self.category)
    }
}

/// Unifying identity so the buffer pool and lock manager can cache/guard
/// heap pages and B+-tree pages in the same maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageId {
    Heap(HeapPageId),
    BTree(BTreePageId),
}

impl PageId {
    pub fn table_id(&self) -> u64 {
        match self {
            PageId::Heap(p) => p.table_id,
            PageId::BTree(p) => p.table_id,
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PageId::Heap(p) => write!(f, "{}", p),
            PageId::BTree(p) => write!(f, "{}", p),
        }
    }
}

impl From<HeapPageId> for PageId {
    fn from(p: HeapPageId) -> Self {
        PageId::Heap(p)
    }
}

impl From<BTreePageId> for PageId {
    fn from(p: BTreePageId) -> Self {
        PageId::BTree(p)
    }
}
