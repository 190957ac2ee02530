use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::dbfile::{CachedPage, DbFile};
use crate::error::{DbError, DbResult};
use crate::field::Field;
use crate::lock_manager::LockMode;
use crate::page_id::{table_id_of, BTreePageId, PageCategory, PageId};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

use super::page::{Entry, HeaderPage, InternalPage, LeafPage, RootPointerPage, ROOT_PTR_PAGE_SIZE};

/// Two interleaved page regions share one file past the root-pointer page:
/// even logical slots hold "data" pages (LEAF or INTERNAL, sharing one
/// page-number space so a freed leaf slot can be reused by an internal page
/// and vice versa), odd logical slots hold HEADER pages. Interleaving keeps
/// both regions growing in the same file without a fixed reserved split.
pub struct BTreeFile {
    path: PathBuf,
    table_id: u64,
    desc: TupleDesc,
    key_field: usize,
    config: Config,
    handle: std::sync::RwLock<File>,
    next_data_page_no: AtomicUsize,
    header_chain_len: AtomicUsize,
}

impl BTreeFile {
    pub fn new(path: impl AsRef<Path>, desc: TupleDesc, key_field: usize, config: Config) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let handle = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        let table_id = table_id_of(&path);
        Ok(BTreeFile {
            path,
            table_id,
            desc,
            key_field,
            config,
            handle: std::sync::RwLock::new(handle),
            next_data_page_no: AtomicUsize::new(0),
            header_chain_len: AtomicUsize::new(0),
        })
    }

    fn data_offset(&self, page_no: usize) -> u64 {
        ROOT_PTR_PAGE_SIZE as u64 + (page_no as u64 * 2) * self.config.page_size as u64
    }

    fn header_offset(&self, chain_index: usize) -> u64 {
        ROOT_PTR_PAGE_SIZE as u64 + (chain_index as u64 * 2 + 1) * self.config.page_size as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> DbResult<Vec<u8>> {
        let mut handle = self.handle.write().unwrap();
        let file_len = handle.metadata()?.len();
        if offset >= file_len {
            return Ok(vec![0u8; len]);
        }
        handle.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let available = (file_len - offset).min(len as u64) as usize;
        handle.read_exact(&mut buf[..available])?;
        Ok(buf)
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> DbResult<()> {
        let mut handle = self.handle.write().unwrap();
        handle.seek(SeekFrom::Start(offset))?;
        handle.write_all(bytes)?;
        Ok(())
    }

    fn root_ptr_id(&self) -> BTreePageId {
        BTreePageId::root_ptr(self.table_id)
    }

    fn key_type(&self) -> crate::field::Type {
        self.desc.field_type(self.key_field)
    }

    fn get_root_ptr(&self, catalog: &Catalog, pool: &BufferPool, tid: TransactionId, mode: LockMode) -> DbResult<Arc<Mutex<CachedPage>>> {
        pool.get_page(catalog, tid, self.root_ptr_id().into(), mode)
    }

    /// Finds and locks the leaf that would contain `key` (or the leftmost
    /// leaf if `key` is `None`). Internal nodes are only ever touched
    /// SHARED; only the destination leaf is locked in `mode`.
    fn find_leaf(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        mut pid: BTreePageId,
        key: Option<&Field>,
        mode: LockMode,
    ) -> DbResult<Arc<Mutex<CachedPage>>> {
        loop {
            match pid.category {
                PageCategory::Leaf => {
                    return pool.get_page(catalog, tid, pid.into(), mode);
                }
                PageCategory::Internal => {
                    let cell = pool.get_page(catalog, tid, pid.into(), LockMode::Shared)?;
                    let next = {
                        let guard = cell.lock().unwrap();
                        let CachedPage::BTreeInternal(ip) = &*guard else {
                            return Err(DbError::WrongPage);
                        };
                        ip.child_for(key)
                    };
                    pid = next;
                }
                _ => return Err(DbError::WrongPage),
            }
        }
    }

    fn root_page_id(&self, catalog: &Catalog, pool: &BufferPool, tid: TransactionId) -> DbResult<BTreePageId> {
        let root_cell = self.get_root_ptr(catalog, pool, tid, LockMode::Shared)?;
        let guard = root_cell.lock().unwrap();
        let CachedPage::BTreeRootPointer(rp) = &*guard else {
            return Err(DbError::WrongPage);
        };
        match rp.root() {
            Some(pid) => Ok(pid),
            None => Err(DbError::NotFound("empty tree".into())),
        }
    }

    /// Allocates a fresh LEAF or INTERNAL page number, preferring a slot
    /// freed by an earlier merge over growing the file.
    fn allocate_data_page(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        category: PageCategory,
    ) -> DbResult<BTreePageId> {
        let root_cell = self.get_root_ptr(catalog, pool, tid, LockMode::Exclusive)?;
        let mut chain_index = 0usize;
        let mut header_pid = {
            let guard = root_cell.lock().unwrap();
            let CachedPage::BTreeRootPointer(rp) = &*guard else {
                return Err(DbError::WrongPage);
            };
            rp.first_header()
        };

        loop {
            match header_pid {
                Some(hpid) => {
                    let cell = pool.get_page(catalog, tid, hpid.into(), LockMode::Exclusive)?;
                    let mut guard = cell.lock().unwrap();
                    let CachedPage::BTreeHeader(hp) = &mut *guard else {
                        return Err(DbError::WrongPage);
                    };
                    if let Some(slot) = hp.first_free_slot() {
                        hp.mark_slot(slot, true);
                        hp.mark_dirty(Some(tid));
                        let page_no = chain_index * HeaderPage::slots_per_header(self.config.page_size) + slot;
                        self.bump_next_data_page(page_no);
                        return Ok(BTreePageId::new(self.table_id, page_no, category));
                    }
                    header_pid = hp.next();
                    chain_index += 1;
                }
                None => {
                    let new_chain_index = self.header_chain_len.fetch_add(1, Ordering::SeqCst);
                    let new_header_id = BTreePageId::new(self.table_id, new_chain_index, PageCategory::Header);
                    let mut new_header = HeaderPage::empty(new_header_id, self.config.page_size);
                    new_header.mark_slot(0, true);
                    new_header.mark_dirty(Some(tid));
                    self.write_page(&CachedPage::BTreeHeader(new_header))?;
                    pool.remove_page(new_header_id.into());
                    let _ = pool.get_page(catalog, tid, new_header_id.into(), LockMode::Exclusive)?;

                    if chain_index == 0 {
                        let mut guard = root_cell.lock().unwrap();
                        let CachedPage::BTreeRootPointer(rp) = &mut *guard else {
                            return Err(DbError::WrongPage);
                        };
                        rp.set_first_header(Some(new_header_id));
                        rp.mark_dirty(Some(tid));
                    } else {
                        let prev_id = BTreePageId::new(self.table_id, chain_index - 1, PageCategory::Header);
                        let cell = pool.get_page(catalog, tid, prev_id.into(), LockMode::Exclusive)?;
                        let mut guard = cell.lock().unwrap();
                        let CachedPage::BTreeHeader(hp) = &mut *guard else {
                            return Err(DbError::WrongPage);
                        };
                        hp.set_next(Some(new_header_id));
                        hp.mark_dirty(Some(tid));
                    }

                    let page_no = new_chain_index * HeaderPage::slots_per_header(self.config.page_size);
                    self.bump_next_data_page(page_no);
                    return Ok(BTreePageId::new(self.table_id, page_no, category));
                }
            }
        }
    }

    /// Rewrites `child`'s parent pointer to `new_parent`, regardless of
    /// whether `child` is a leaf or an internal page. Every split, steal and
    /// merge that moves an entry across pages ends with a call here rather
    /// than inlining the leaf/internal match at each call site (spec.md §9
    /// "B+-tree parent pointers" calls for exactly this: one routine, called
    /// after every entry migration).
    fn update_parent_pointers(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        child: BTreePageId,
        new_parent: Option<BTreePageId>,
    ) -> DbResult<()> {
        let cell = pool.get_page(catalog, tid, child.into(), LockMode::Exclusive)?;
        let mut guard = cell.lock().unwrap();
        match &mut *guard {
            CachedPage::BTreeLeaf(lp) => {
                lp.set_parent(new_parent);
                lp.mark_dirty(Some(tid));
            }
            CachedPage::BTreeInternal(ip) => {
                ip.set_parent(new_parent);
                ip.mark_dirty(Some(tid));
            }
            _ => return Err(DbError::WrongPage),
        }
        Ok(())
    }

    fn bump_next_data_page(&self, page_no: usize) {
        let mut cur = self.next_data_page_no.load(Ordering::SeqCst);
        while page_no + 1 > cur {
            match self.next_data_page_no.compare_exchange(
                cur,
                page_no + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    fn free_data_page(&self, catalog: &Catalog, pool: &BufferPool, tid: TransactionId, pid: BTreePageId) -> DbResult<()> {
        let slots_per_header = HeaderPage::slots_per_header(self.config.page_size);
        let chain_index = pid.page_no / slots_per_header;
        let slot = pid.page_no % slots_per_header;
        let header_id = BTreePageId::new(self.table_id, chain_index, PageCategory::Header);
        let cell = pool.get_page(catalog, tid, header_id.into(), LockMode::Exclusive)?;
        let mut guard = cell.lock().unwrap();
        let CachedPage::BTreeHeader(hp) = &mut *guard else {
            return Err(DbError::WrongPage);
        };
        hp.mark_slot(slot, false);
        hp.mark_dirty(Some(tid));
        pool.remove_page(pid.into());
        Ok(())
    }

    /// Finds (allocating if needed) a parent internal page with room for
    /// one more entry, splitting it first if it's already full, and
    /// handling the special case of splitting the root itself.
    fn get_parent_with_empty_slots(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        child: BTreePageId,
        key: &Field,
    ) -> DbResult<BTreePageId> {
        let child_parent = {
            let cell = pool.get_page(catalog, tid, child.into(), LockMode::Shared)?;
            let guard = cell.lock().unwrap();
            match &*guard {
                CachedPage::BTreeLeaf(lp) => lp.parent(),
                CachedPage::BTreeInternal(ip) => ip.parent(),
                _ => return Err(DbError::WrongPage),
            }
        };

        match child_parent {
            Some(pid) if pid.category == PageCategory::Internal => {
                let full = {
                    let cell = pool.get_page(catalog, tid, pid.into(), LockMode::Exclusive)?;
                    let guard = cell.lock().unwrap();
                    let CachedPage::BTreeInternal(ip) = &*guard else {
                        return Err(DbError::WrongPage);
                    };
                    ip.is_full()
                };
                if full {
                    self.split_internal(catalog, pool, tid, pid, key)
                } else {
                    Ok(pid)
                }
            }
            _ => {
                // Splitting the root: allocate a new INTERNAL page, point
                // the root pointer at it, and reparent the old root.
                let new_root_id = self.allocate_data_page(catalog, pool, tid, PageCategory::Internal)?;
                let new_root_cell = pool.get_page(catalog, tid, new_root_id.into(), LockMode::Exclusive)?;
                {
                    let mut guard = new_root_cell.lock().unwrap();
                    let CachedPage::BTreeInternal(ip) = &mut *guard else {
                        return Err(DbError::WrongPage);
                    };
                    ip.set_sole_child(child);
                    ip.mark_dirty(Some(tid));
                }
                self.update_parent_pointers(catalog, pool, tid, child, Some(new_root_id))?;
                let root_cell = self.get_root_ptr(catalog, pool, tid, LockMode::Exclusive)?;
                let mut guard = root_cell.lock().unwrap();
                let CachedPage::BTreeRootPointer(rp) = &mut *guard else {
                    return Err(DbError::WrongPage);
                };
                rp.set_root(Some(new_root_id));
                rp.mark_dirty(Some(tid));
                Ok(new_root_id)
            }
        }
    }

    /// Splits a full leaf in two, pushing the upper half's tuples right,
    /// splicing the new page into the sibling chain, and inserting a
    /// separator into the parent. Returns whichever half `key` belongs in.
    fn split_leaf(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        leaf_id: BTreePageId,
        key: &Field,
    ) -> DbResult<BTreePageId> {
        let new_leaf_id = self.allocate_data_page(catalog, pool, tid, PageCategory::Leaf)?;
        let leaf_cell = pool.get_page(catalog, tid, leaf_id.into(), LockMode::Exclusive)?;
        let new_cell = pool.get_page(catalog, tid, new_leaf_id.into(), LockMode::Exclusive)?;

        let (split_key, old_right_sib) = {
            let mut leaf_guard = leaf_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(leaf) = &mut *leaf_guard else {
                return Err(DbError::WrongPage);
            };
            let mut new_guard = new_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(new_leaf) = &mut *new_guard else {
                return Err(DbError::WrongPage);
            };

            let move_count = leaf.num_tuples() / 2;
            let moving: Vec<Tuple> = leaf
                .iter()
                .rev()
                .take(move_count)
                .cloned()
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            for t in moving.iter() {
                let mut rid_slot = None;
                for i in 0..leaf.slots_count() {
                    if let Some(existing) = leaf.get(i) {
                        if existing.record_id == t.record_id {
                            rid_slot = Some(i);
                            break;
                        }
                    }
                }
                if let Some(slot) = rid_slot {
                    leaf.delete_slot(slot)?;
                }
                new_leaf.insert_tuple(t.clone())?;
            }

            let old_right_sib = leaf.right_sibling();
            new_leaf.set_left_sibling(Some(leaf_id));
            new_leaf.set_right_sibling(old_right_sib);
            leaf.set_right_sibling(Some(new_leaf_id));

            leaf.mark_dirty(Some(tid));
            new_leaf.mark_dirty(Some(tid));

            let split_key = new_leaf.first_key().expect("new leaf must be non-empty after split").clone();
            (split_key, old_right_sib)
        };

        if let Some(right_sib) = old_right_sib {
            let cell = pool.get_page(catalog, tid, right_sib.into(), LockMode::Exclusive)?;
            let mut guard = cell.lock().unwrap();
            let CachedPage::BTreeLeaf(rl) = &mut *guard else {
                return Err(DbError::WrongPage);
            };
            rl.set_left_sibling(Some(new_leaf_id));
            rl.mark_dirty(Some(tid));
        }

        let parent_id = self.get_parent_with_empty_slots(catalog, pool, tid, leaf_id, &split_key)?;
        {
            let cell = pool.get_page(catalog, tid, parent_id.into(), LockMode::Exclusive)?;
            let mut guard = cell.lock().unwrap();
            let CachedPage::BTreeInternal(ip) = &mut *guard else {
                return Err(DbError::WrongPage);
            };
            ip.insert_entry(split_key.clone(), leaf_id, new_leaf_id)?;
            ip.mark_dirty(Some(tid));
        }
        self.update_parent_pointers(catalog, pool, tid, leaf_id, Some(parent_id))?;
        self.update_parent_pointers(catalog, pool, tid, new_leaf_id, Some(parent_id))?;

        if *key < split_key {
            Ok(leaf_id)
        } else {
            Ok(new_leaf_id)
        }
    }

    /// Splits a full internal node: the middle entry's key is pushed up
    /// into the parent rather than duplicated into both halves, and the
    /// right half's children are reparented.
    fn split_internal(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        node_id: BTreePageId,
        key: &Field,
    ) -> DbResult<BTreePageId> {
        let new_node_id = self.allocate_data_page(catalog, pool, tid, PageCategory::Internal)?;
        let node_cell = pool.get_page(catalog, tid, node_id.into(), LockMode::Exclusive)?;
        let new_cell = pool.get_page(catalog, tid, new_node_id.into(), LockMode::Exclusive)?;

        let (pushed_key, moved_children) = {
            let mut node_guard = node_cell.lock().unwrap();
            let CachedPage::BTreeInternal(node) = &mut *node_guard else {
                return Err(DbError::WrongPage);
            };
            let mut new_guard = new_cell.lock().unwrap();
            let CachedPage::BTreeInternal(new_node) = &mut *new_guard else {
                return Err(DbError::WrongPage);
            };

            let entries: Vec<Entry> = node.entries().collect();
            let mid = entries.len() / 2;
            let pushed_key = entries[mid].key.clone();

            new_node.set_sole_child(entries[mid].right_child);
            for e in entries[mid + 1..].iter() {
                new_node.insert_entry(e.key.clone(), e.left_child, e.right_child)?;
            }
            new_node.set_children_category(node.children_category());

            for e in entries[mid..].iter().rev() {
                node.delete_entry(e.left_child, e.right_child).ok();
            }

            node.mark_dirty(Some(tid));
            new_node.mark_dirty(Some(tid));

            let moved_children: Vec<BTreePageId> = std::iter::once(entries[mid].right_child)
                .chain(entries[mid + 1..].iter().map(|e| e.right_child))
                .collect();
            (pushed_key, moved_children)
        };

        for child in moved_children {
            self.update_parent_pointers(catalog, pool, tid, child, Some(new_node_id))?;
        }

        let parent_id = self.get_parent_with_empty_slots(catalog, pool, tid, node_id, &pushed_key)?;
        {
            let cell = pool.get_page(catalog, tid, parent_id.into(), LockMode::Exclusive)?;
            let mut guard = cell.lock().unwrap();
            let CachedPage::BTreeInternal(ip) = &mut *guard else {
                return Err(DbError::WrongPage);
            };
            ip.insert_entry(pushed_key.clone(), node_id, new_node_id)?;
            ip.mark_dirty(Some(tid));
        }
        for id in [node_id, new_node_id] {
            self.update_parent_pointers(catalog, pool, tid, id, Some(parent_id))?;
        }

        if *key < pushed_key {
            Ok(node_id)
        } else {
            Ok(new_node_id)
        }
    }

    fn insert_into_tree(&self, catalog: &Catalog, pool: &BufferPool, tid: TransactionId, tuple: Tuple) -> DbResult<Vec<Arc<Mutex<CachedPage>>>> {
        let key = tuple.get_field(self.key_field).clone();
        let root_cell = self.get_root_ptr(catalog, pool, tid, LockMode::Exclusive)?;
        let root = {
            let guard = root_cell.lock().unwrap();
            let CachedPage::BTreeRootPointer(rp) = &*guard else {
                return Err(DbError::WrongPage);
            };
            rp.root()
        };

        let root_id = match root {
            Some(r) => r,
            None => {
                let new_leaf_id = self.allocate_data_page(catalog, pool, tid, PageCategory::Leaf)?;
                let mut guard = root_cell.lock().unwrap();
                let CachedPage::BTreeRootPointer(rp) = &mut *guard else {
                    return Err(DbError::WrongPage);
                };
                rp.set_root(Some(new_leaf_id));
                rp.mark_dirty(Some(tid));
                new_leaf_id
            }
        };

        let leaf_cell = self.find_leaf(catalog, pool, tid, root_id, Some(&key), LockMode::Exclusive)?;
        let leaf_id = {
            let guard = leaf_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &*guard else {
                return Err(DbError::WrongPage);
            };
            lp.id()
        };

        let full = {
            let guard = leaf_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &*guard else {
                return Err(DbError::WrongPage);
            };
            lp.num_tuples() >= lp.slots_count()
        };

        let target_id = if full {
            self.split_leaf(catalog, pool, tid, leaf_id, &key)?
        } else {
            leaf_id
        };

        let target_cell = pool.get_page(catalog, tid, target_id.into(), LockMode::Exclusive)?;
        {
            let mut guard = target_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &mut *guard else {
                return Err(DbError::WrongPage);
            };
            lp.insert_tuple(tuple)?;
            lp.mark_dirty(Some(tid));
        }
        Ok(vec![target_cell])
    }

    fn handle_min_occupancy(&self, catalog: &Catalog, pool: &BufferPool, tid: TransactionId, leaf_id: BTreePageId) -> DbResult<()> {
        let (parent, should_merge) = {
            let cell = pool.get_page(catalog, tid, leaf_id.into(), LockMode::Exclusive)?;
            let guard = cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &*guard else {
                return Err(DbError::WrongPage);
            };
            (lp.parent(), lp.should_merge())
        };
        if !should_merge {
            return Ok(());
        }
        let Some(parent_id) = parent else {
            return Ok(());
        };
        if parent_id.category != PageCategory::Internal {
            return Ok(());
        }

        let (left_sib, right_sib) = {
            let cell = pool.get_page(catalog, tid, leaf_id.into(), LockMode::Exclusive)?;
            let guard = cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &*guard else {
                return Err(DbError::WrongPage);
            };
            (lp.left_sibling(), lp.right_sibling())
        };

        let same_parent = |pool: &BufferPool, catalog: &Catalog, sib: BTreePageId| -> DbResult<bool> {
            let cell = pool.get_page(catalog, tid, sib.into(), LockMode::Shared)?;
            let guard = cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &*guard else {
                return Err(DbError::WrongPage);
            };
            Ok(lp.parent() == Some(parent_id))
        };

        if let Some(left) = left_sib {
            if same_parent(pool, catalog, left)? {
                return self.balance_leaves(catalog, pool, tid, left, leaf_id, parent_id);
            }
        }
        if let Some(right) = right_sib {
            if same_parent(pool, catalog, right)? {
                return self.balance_leaves(catalog, pool, tid, leaf_id, right, parent_id);
            }
        }
        Ok(())
    }

    /// Either steals from `right` into `left` (if `right` has spare
    /// tuples) or merges `right` into `left`. `left`/`right` are siblings
    /// under `parent_id`, with `left` immediately preceding `right`.
    fn balance_leaves(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        left_id: BTreePageId,
        right_id: BTreePageId,
        parent_id: BTreePageId,
    ) -> DbResult<()> {
        let left_cell = pool.get_page(catalog, tid, left_id.into(), LockMode::Exclusive)?;
        let right_cell = pool.get_page(catalog, tid, right_id.into(), LockMode::Exclusive)?;

        let max_slots = {
            let guard = left_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &*guard else {
                return Err(DbError::WrongPage);
            };
            lp.slots_count()
        };
        let half = (max_slots + 1) / 2;

        let (left_count, right_count) = {
            let lg = left_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &*lg else { return Err(DbError::WrongPage) };
            let rg = right_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(rp) = &*rg else { return Err(DbError::WrongPage) };
            (lp.num_tuples(), rp.num_tuples())
        };

        if left_count + right_count >= 2 * half {
            // Steal: move enough tuples across to bring both sides to at
            // least half-full.
            let (donor_is_right, amount) = if right_count > left_count {
                (true, (right_count - left_count + 1) / 2)
            } else {
                (false, (left_count - right_count + 1) / 2)
            };

            let mut lg = left_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &mut *lg else { return Err(DbError::WrongPage) };
            let mut rg = right_cell.lock().unwrap();
            let CachedPage::BTreeLeaf(rp) = &mut *rg else { return Err(DbError::WrongPage) };

            if donor_is_right {
                let moving: Vec<Tuple> = rp.iter().take(amount).cloned().collect();
                for t in moving {
                    let slot = (0..rp.slots_count()).find(|i| rp.get(*i).map(|x| x.record_id == t.record_id).unwrap_or(false));
                    if let Some(slot) = slot {
                        rp.delete_slot(slot)?;
                    }
                    lp.insert_tuple(t)?;
                }
            } else {
                let moving: Vec<Tuple> = lp.iter().rev().take(amount).cloned().collect();
                for t in moving {
                    let slot = (0..lp.slots_count()).find(|i| lp.get(*i).map(|x| x.record_id == t.record_id).unwrap_or(false));
                    if let Some(slot) = slot {
                        lp.delete_slot(slot)?;
                    }
                    rp.insert_tuple(t)?;
                }
            }
            lp.mark_dirty(Some(tid));
            rp.mark_dirty(Some(tid));

            let new_sep = rp.first_key().expect("right leaf non-empty after steal").clone();
            drop(lg);
            drop(rg);

            let pcell = pool.get_page(catalog, tid, parent_id.into(), LockMode::Exclusive)?;
            let mut pg = pcell.lock().unwrap();
            let CachedPage::BTreeInternal(ip) = &mut *pg else { return Err(DbError::WrongPage) };
            ip.set_separator(left_id, right_id, new_sep)?;
            ip.mark_dirty(Some(tid));
            Ok(())
        } else {
            // Merge: pull every tuple from right into left, unlink right
            // from the sibling chain, free it, and delete its parent entry.
            let moving: Vec<Tuple> = {
                let rg = right_cell.lock().unwrap();
                let CachedPage::BTreeLeaf(rp) = &*rg else { return Err(DbError::WrongPage) };
                rp.iter().cloned().collect()
            };
            let new_right_sib = {
                let rg = right_cell.lock().unwrap();
                let CachedPage::BTreeLeaf(rp) = &*rg else { return Err(DbError::WrongPage) };
                rp.right_sibling()
            };
            {
                let mut lg = left_cell.lock().unwrap();
                let CachedPage::BTreeLeaf(lp) = &mut *lg else { return Err(DbError::WrongPage) };
                for t in moving {
                    lp.insert_tuple(t)?;
                }
                lp.set_right_sibling(new_right_sib);
                lp.mark_dirty(Some(tid));
            }
            if let Some(far_right) = new_right_sib {
                let cell = pool.get_page(catalog, tid, far_right.into(), LockMode::Exclusive)?;
                let mut guard = cell.lock().unwrap();
                let CachedPage::BTreeLeaf(frp) = &mut *guard else { return Err(DbError::WrongPage) };
                frp.set_left_sibling(Some(left_id));
                frp.mark_dirty(Some(tid));
            }

            self.free_data_page(catalog, pool, tid, right_id)?;
            self.delete_parent_entry(catalog, pool, tid, parent_id, left_id, right_id)?;
            Ok(())
        }
    }

    /// Removes the separator between `left` and `right` from `parent`,
    /// recursing into the parent's own underflow handling, and promoting
    /// the surviving child to root if the parent (the root) becomes empty.
    fn delete_parent_entry(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        parent_id: BTreePageId,
        left: BTreePageId,
        right: BTreePageId,
    ) -> DbResult<()> {
        let (remaining_children, should_merge) = {
            let cell = pool.get_page(catalog, tid, parent_id.into(), LockMode::Exclusive)?;
            let mut guard = cell.lock().unwrap();
            let CachedPage::BTreeInternal(ip) = &mut *guard else {
                return Err(DbError::WrongPage);
            };
            ip.delete_entry(left, right)?;
            ip.mark_dirty(Some(tid));
            (ip.num_children(), ip.should_merge())
        };

        if remaining_children <= 1 {
            let sole_child = {
                let cell = pool.get_page(catalog, tid, parent_id.into(), LockMode::Shared)?;
                let guard = cell.lock().unwrap();
                let CachedPage::BTreeInternal(ip) = &*guard else {
                    return Err(DbError::WrongPage);
                };
                ip.first_child()
            };
            let root_cell = self.get_root_ptr(catalog, pool, tid, LockMode::Exclusive)?;
            let is_root = {
                let guard = root_cell.lock().unwrap();
                let CachedPage::BTreeRootPointer(rp) = &*guard else {
                    return Err(DbError::WrongPage);
                };
                rp.root() == Some(parent_id)
            };
            if is_root {
                if let Some(child) = sole_child {
                    let mut guard = root_cell.lock().unwrap();
                    let CachedPage::BTreeRootPointer(rp) = &mut *guard else {
                        return Err(DbError::WrongPage);
                    };
                    rp.set_root(Some(child));
                    rp.mark_dirty(Some(tid));
                    drop(guard);
                    self.update_parent_pointers(catalog, pool, tid, child, None)?;
                    self.free_data_page(catalog, pool, tid, parent_id)?;
                }
                return Ok(());
            }
        }

        if should_merge {
            self.handle_internal_min_occupancy(catalog, pool, tid, parent_id)?;
        }
        Ok(())
    }

    fn handle_internal_min_occupancy(&self, catalog: &Catalog, pool: &BufferPool, tid: TransactionId, node_id: BTreePageId) -> DbResult<()> {
        let parent = {
            let cell = pool.get_page(catalog, tid, node_id.into(), LockMode::Shared)?;
            let guard = cell.lock().unwrap();
            let CachedPage::BTreeInternal(ip) = &*guard else {
                return Err(DbError::WrongPage);
            };
            ip.parent()
        };
        let Some(parent_id) = parent else { return Ok(()) };
        if parent_id.category != PageCategory::Internal {
            return Ok(());
        }

        let entries = {
            let cell = pool.get_page(catalog, tid, parent_id.into(), LockMode::Shared)?;
            let guard = cell.lock().unwrap();
            let CachedPage::BTreeInternal(pip) = &*guard else {
                return Err(DbError::WrongPage);
            };
            pip.entries().collect::<Vec<_>>()
        };

        let left_sib = entries.iter().find(|e| e.right_child == node_id).map(|e| e.left_child);
        let right_sib = entries.iter().find(|e| e.left_child == node_id).map(|e| e.right_child);

        if let Some(left) = left_sib {
            return self.balance_internals(catalog, pool, tid, left, node_id, parent_id);
        }
        if let Some(right) = right_sib {
            return self.balance_internals(catalog, pool, tid, node_id, right, parent_id);
        }
        Ok(())
    }

    fn balance_internals(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        left_id: BTreePageId,
        right_id: BTreePageId,
        parent_id: BTreePageId,
    ) -> DbResult<()> {
        let max_entries = {
            let cell = pool.get_page(catalog, tid, left_id.into(), LockMode::Shared)?;
            let guard = cell.lock().unwrap();
            let CachedPage::BTreeInternal(ip) = &*guard else { return Err(DbError::WrongPage) };
            ip.max_entries()
        };
        let half = (max_entries + 1) / 2;

        let separator = {
            let cell = pool.get_page(catalog, tid, parent_id.into(), LockMode::Shared)?;
            let guard = cell.lock().unwrap();
            let CachedPage::BTreeInternal(pip) = &*guard else { return Err(DbError::WrongPage) };
            pip.entries().find(|e| e.left_child == left_id && e.right_child == right_id)
                .map(|e| e.key)
                .ok_or_else(|| DbError::other("missing separator entry"))?
        };

        let (left_n, right_n) = {
            let lc = pool.get_page(catalog, tid, left_id.into(), LockMode::Shared)?;
            let lg = lc.lock().unwrap();
            let CachedPage::BTreeInternal(lp) = &*lg else { return Err(DbError::WrongPage) };
            let rc = pool.get_page(catalog, tid, right_id.into(), LockMode::Shared)?;
            let rg = rc.lock().unwrap();
            let CachedPage::BTreeInternal(rp) = &*rg else { return Err(DbError::WrongPage) };
            (lp.num_entries(), rp.num_entries())
        };

        if left_n + right_n + 1 >= 2 * half {
            // Steal through the parent: move the separator down into the
            // shrinking side, and the sibling's edge entry up into the
            // parent.
            let left_cell = pool.get_page(catalog, tid, left_id.into(), LockMode::Exclusive)?;
            let right_cell = pool.get_page(catalog, tid, right_id.into(), LockMode::Exclusive)?;
            let parent_cell = pool.get_page(catalog, tid, parent_id.into(), LockMode::Exclusive)?;

            if right_n > left_n {
                let (moved_key, moved_left_child) = {
                    let rg = right_cell.lock().unwrap();
                    let CachedPage::BTreeInternal(rp) = &*rg else { return Err(DbError::WrongPage) };
                    let first = rp.entries().next().expect("right internal non-empty");
                    (first.key.clone(), first.left_child)
                };
                {
                    let mut rg = right_cell.lock().unwrap();
                    let CachedPage::BTreeInternal(rp) = &mut *rg else { return Err(DbError::WrongPage) };
                    let right_first_of_first = rp.entries().next().unwrap().right_child;
                    rp.delete_entry(moved_left_child, right_first_of_first).ok();
                    rp.mark_dirty(Some(tid));
                }
                {
                    let mut lg = left_cell.lock().unwrap();
                    let CachedPage::BTreeInternal(lp) = &mut *lg else { return Err(DbError::WrongPage) };
                    let last_child = lp.entries().last().map(|e| e.right_child).unwrap_or(lp.first_child().unwrap());
                    lp.insert_entry(separator.clone(), last_child, moved_left_child)?;
                    lp.mark_dirty(Some(tid));
                }
                self.update_parent_pointers(catalog, pool, tid, moved_left_child, Some(left_id))?;
                let mut pg = parent_cell.lock().unwrap();
                let CachedPage::BTreeInternal(pip) = &mut *pg else { return Err(DbError::WrongPage) };
                pip.set_separator(left_id, right_id, moved_key)?;
                pip.mark_dirty(Some(tid));
            } else {
                let (moved_key, moved_right_child) = {
                    let lg = left_cell.lock().unwrap();
                    let CachedPage::BTreeInternal(lp) = &*lg else { return Err(DbError::WrongPage) };
                    let last = lp.entries().last().expect("left internal non-empty");
                    (last.key.clone(), last.right_child)
                };
                {
                    let mut lg = left_cell.lock().unwrap();
                    let CachedPage::BTreeInternal(lp) = &mut *lg else { return Err(DbError::WrongPage) };
                    let last_left = lp.entries().last().unwrap().left_child;
                    lp.delete_entry(last_left, moved_right_child).ok();
                    lp.mark_dirty(Some(tid));
                }
                {
                    let mut rg = right_cell.lock().unwrap();
                    let CachedPage::BTreeInternal(rp) = &mut *rg else { return Err(DbError::WrongPage) };
                    let first_child = rp.first_child().unwrap();
                    rp.insert_entry(separator.clone(), moved_right_child, first_child)?;
                    rp.mark_dirty(Some(tid));
                }
                self.update_parent_pointers(catalog, pool, tid, moved_right_child, Some(right_id))?;
                let mut pg = parent_cell.lock().unwrap();
                let CachedPage::BTreeInternal(pip) = &mut *pg else { return Err(DbError::WrongPage) };
                pip.set_separator(left_id, right_id, moved_key)?;
                pip.mark_dirty(Some(tid));
            }
            Ok(())
        } else {
            // Merge: pull the parent's separator down between the two
            // halves, then append right's entries into left.
            let right_entries = {
                let rc = pool.get_page(catalog, tid, right_id.into(), LockMode::Shared)?;
                let rg = rc.lock().unwrap();
                let CachedPage::BTreeInternal(rp) = &*rg else { return Err(DbError::WrongPage) };
                (rp.first_child().unwrap(), rp.entries().collect::<Vec<_>>())
            };
            let moved_children = {
                let left_cell = pool.get_page(catalog, tid, left_id.into(), LockMode::Exclusive)?;
                let mut lg = left_cell.lock().unwrap();
                let CachedPage::BTreeInternal(lp) = &mut *lg else { return Err(DbError::WrongPage) };
                let left_last = lp.entries().last().map(|e| e.right_child).unwrap_or(lp.first_child().unwrap());
                lp.insert_entry(separator.clone(), left_last, right_entries.0)?;
                let mut moved = vec![right_entries.0];
                for e in right_entries.1.iter() {
                    lp.insert_entry(e.key.clone(), e.left_child, e.right_child)?;
                    moved.push(e.right_child);
                }
                lp.mark_dirty(Some(tid));
                moved
            };
            for child in moved_children {
                self.update_parent_pointers(catalog, pool, tid, child, Some(left_id))?;
            }
            self.free_data_page(catalog, pool, tid, right_id)?;
            self.delete_parent_entry(catalog, pool, tid, parent_id, left_id, right_id)?;
            Ok(())
        }
    }
}

impl DbFile for BTreeFile {
    fn table_id(&self) -> u64 {
        self.table_id
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn read_page(&self, pid: PageId) -> DbResult<CachedPage> {
        let PageId::BTree(pid) = pid else {
            return Err(DbError::WrongPage);
        };
        if pid.table_id != self.table_id {
            return Err(DbError::WrongPage);
        }
        match pid.category {
            PageCategory::RootPtr => {
                let bytes = self.read_at(0, ROOT_PTR_PAGE_SIZE)?;
                Ok(CachedPage::BTreeRootPointer(RootPointerPage::new(pid, &bytes)?))
            }
            PageCategory::Leaf => {
                let bytes = self.read_at(self.data_offset(pid.page_no), self.config.page_size)?;
                Ok(CachedPage::BTreeLeaf(LeafPage::new(pid, self.desc.clone(), self.key_field, &bytes, self.config.page_size)?))
            }
            PageCategory::Internal => {
                let bytes = self.read_at(self.data_offset(pid.page_no), self.config.page_size)?;
                Ok(CachedPage::BTreeInternal(InternalPage::new(pid, self.key_type(), self.key_field, &bytes, self.config.page_size)?))
            }
            PageCategory::Header => {
                let bytes = self.read_at(self.header_offset(pid.page_no), self.config.page_size)?;
                Ok(CachedPage::BTreeHeader(HeaderPage::new(pid, &bytes, self.config.page_size)?))
            }
        }
    }

    fn write_page(&self, page: &CachedPage) -> DbResult<()> {
        match page {
            CachedPage::BTreeRootPointer(rp) => self.write_at(0, &rp.serialize()),
            CachedPage::BTreeLeaf(lp) => self.write_at(self.data_offset(lp.id().page_no), &lp.serialize()),
            CachedPage::BTreeInternal(ip) => self.write_at(self.data_offset(ip.id().page_no), &ip.serialize()),
            CachedPage::BTreeHeader(hp) => self.write_at(self.header_offset(hp.id().page_no), &hp.serialize()),
            CachedPage::Heap(_) => Err(DbError::WrongPage),
        }
    }

    fn num_pages(&self) -> usize {
        self.next_data_page_no.load(Ordering::SeqCst) + self.header_chain_len.load(Ordering::SeqCst)
    }

    fn insert_tuple(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> DbResult<Vec<Arc<Mutex<CachedPage>>>> {
        self.insert_into_tree(catalog, pool, tid, tuple)
    }

    fn delete_tuple(
        &self,
        catalog: &Catalog,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> DbResult<Arc<Mutex<CachedPage>>> {
        let rid = tuple.record_id.ok_or_else(|| DbError::other("tuple has no record_id"))?;
        let cell = pool.get_page(catalog, tid, rid.page_id, LockMode::Exclusive)?;
        {
            let mut guard = cell.lock().unwrap();
            let CachedPage::BTreeLeaf(lp) = &mut *guard else {
                return Err(DbError::WrongPage);
            };
            lp.delete_slot(rid.slot_index)?;
            lp.mark_dirty(Some(tid));
        }
        let PageId::BTree(leaf_id) = rid.page_id else {
            return Err(DbError::WrongPage);
        };
        self.handle_min_occupancy(catalog, pool, tid, leaf_id)?;
        Ok(cell)
    }

    fn iter<'a>(
        self: Arc<Self>,
        catalog: &'a Catalog,
        pool: &'a BufferPool,
        tid: TransactionId,
    ) -> DbResult<Box<dyn Iterator<Item = DbResult<Tuple>> + 'a>>
    where
        Self: 'a,
    {
        let root = self.root_page_id(catalog, pool, tid);
        let first_leaf = match root {
            Ok(root_id) => Some(self.find_leaf(catalog, pool, tid, root_id, None, LockMode::Shared)?),
            Err(_) => None,
        };
        Ok(Box::new(BTreeFileIter {
            file: self,
            catalog,
            pool,
            tid,
            current: first_leaf,
            buf: Vec::new(),
            idx: 0,
        }))
    }
}

impl BTreeFile {
    /// Indexed scan on `key_field op value`: for `=`/`>`/`>=`, seeks
    /// directly to the leaf that could hold `value` instead of walking the
    /// whole leaf chain from the left; for `<`/`<=`, the search key range
    /// starts at the left edge of the tree but still stops as soon as the
    /// op fails once (keys are sorted ascending along the chain, so a
    /// single failure means every later key fails too).
    pub fn scan_predicate<'a>(
        self: Arc<Self>,
        catalog: &'a Catalog,
        pool: &'a BufferPool,
        tid: TransactionId,
        op: crate::predicate::Op,
        value: Field,
    ) -> DbResult<Box<dyn Iterator<Item = DbResult<Tuple>> + 'a>> {
        use crate::predicate::Op;

        let seek_key = match op {
            Op::Equals | Op::GreaterThan | Op::GreaterThanOrEq => Some(value.clone()),
            Op::LessThan | Op::LessThanOrEq | Op::NotEquals => None,
        };

        let root = self.root_page_id(catalog, pool, tid);
        let start_leaf = match root {
            Ok(root_id) => Some(self.find_leaf(catalog, pool, tid, root_id, seek_key.as_ref(), LockMode::Shared)?),
            Err(_) => None,
        };

        Ok(Box::new(BTreePredicateIter {
            file: self,
            catalog,
            pool,
            tid,
            op,
            value,
            current: start_leaf,
            buf: Vec::new(),
            idx: 0,
            done: false,
        }))
    }
}

struct BTreePredicateIter<'a> {
    file: Arc<BTreeFile>,
    catalog: &'a Catalog,
    pool: &'a BufferPool,
    tid: TransactionId,
    op: crate::predicate::Op,
    value: Field,
    current: Option<Arc<Mutex<CachedPage>>>,
    buf: Vec<Tuple>,
    idx: usize,
    done: bool,
}

impl<'a> Iterator for BTreePredicateIter<'a> {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            while self.idx < self.buf.len() {
                let t = self.buf[self.idx].clone();
                self.idx += 1;
                let key = t.get_field(self.file.key_field);
                if self.op.exhausted_by(key, &self.value) {
                    self.done = true;
                    return None;
                }
                if self.op.matches(key, &self.value) {
                    return Some(Ok(t));
                }
            }
            let cell = self.current.take()?;
            let next_leaf = {
                let guard = cell.lock().unwrap();
                let CachedPage::BTreeLeaf(lp) = &*guard else {
                    return Some(Err(DbError::WrongPage));
                };
                self.buf = lp.iter().cloned().collect();
                lp.right_sibling()
            };
            self.idx = 0;
            self.current = match next_leaf {
                Some(pid) => match self.pool.get_page(self.catalog, self.tid, pid.into(), LockMode::Shared) {
                    Ok(c) => Some(c),
                    Err(e) => return Some(Err(e)),
                },
                None => None,
            };
        }
    }
}

struct BTreeFileIter<'a> {
    file: Arc<BTreeFile>,
    catalog: &'a Catalog,
    pool: &'a BufferPool,
    tid: TransactionId,
    current: Option<Arc<Mutex<CachedPage>>>,
    buf: Vec<Tuple>,
    idx: usize,
}

impl<'a> Iterator for BTreeFileIter<'a> {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.idx < self.buf.len() {
                let t = self.buf[self.idx].clone();
                self.idx += 1;
                return Some(Ok(t));
            }
            let cell = self.current.take()?;
            let next_leaf = {
                let guard = cell.lock().unwrap();
                let CachedPage::BTreeLeaf(lp) = &*guard else {
                    return Some(Err(DbError::WrongPage));
                };
                self.buf = lp.iter().cloned().collect();
                lp.right_sibling()
            };
            self.idx = 0;
            self.current = match next_leaf {
                Some(pid) => match self.pool.get_page(self.catalog, self.tid, pid.into(), LockMode::Shared) {
                    Ok(c) => Some(c),
                    Err(e) => return Some(Err(e)),
                },
                None => None,
            };
            let _ = &self.file;
        }
    }
}
