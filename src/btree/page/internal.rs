use bit_vec::BitVec;

use crate::error::{DbError, DbResult};
use crate::field::{Field, Type};
use crate::page_id::{BTreePageId, PageCategory};
use crate::transaction::TransactionId;

use super::{bitmap_from_bytes, bitmap_to_bytes, decode_page_no, encode_page_no};

/// `(key, left_child, right_child)` — a logical view over two adjacent
/// children and the key that separates them. Not how entries are stored
/// (see `InternalPage`'s field doc) but the shape callers in `btree::file`
/// reason about.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: Field,
    pub left_child: BTreePageId,
    pub right_child: BTreePageId,
}

/// One internal node: `children.len()` child pointers and
/// `children.len() - 1` separating keys, kept packed (no gaps) and in
/// ascending key order. `keys[i]` separates `children[i]` and
/// `children[i+1]`. All children share one category, all LEAF or all
/// INTERNAL, tracked once per page rather than per child.
pub struct InternalPage {
    id: BTreePageId,
    key_type: Type,
    key_field: usize,
    page_size: usize,
    max_children: usize,
    children: Vec<usize>,
    keys: Vec<Field>,
    children_category: PageCategory,
    parent: Option<(usize, PageCategory)>,
    dirtier: Option<TransactionId>,
}

impl InternalPage {
    /// `M * (33 + key_bits) <= budget_bits`: each child slot costs one
    /// header bit plus a 4-byte page number; we additionally reserve a key
    /// slot per child slot (wasting the unused key at index 0) to keep the
    /// layout arithmetic simple.
    pub fn max_children(page_size: usize, key_type: Type) -> usize {
        let extra_bytes = 4 + 1 + 1; // parent page_no(4) + parent category(1) + children_category(1)
        let budget_bits = (page_size - extra_bytes) * 8;
        let per_slot_bits = 32 + 1 + key_type.len() * 8;
        budget_bits / per_slot_bits
    }

    fn header_size(max_children: usize) -> usize {
        (max_children + 7) / 8
    }

    pub fn new(
        id: BTreePageId,
        key_type: Type,
        key_field: usize,
        bytes: &[u8],
        page_size: usize,
    ) -> DbResult<Self> {
        let max_children = Self::max_children(page_size, key_type);
        let hsize = Self::header_size(max_children);
        let key_width = key_type.len();
        let needed = hsize + max_children * 4 + max_children * key_width + 6;
        if bytes.len() < needed {
            return Err(DbError::other("internal page bytes too short"));
        }

        let header = bitmap_from_bytes(&bytes[..hsize], max_children);
        let num_children = (0..max_children).take_while(|i| header.get(*i).unwrap_or(false)).count();

        let mut offset = hsize;
        let mut all_keys = Vec::with_capacity(max_children);
        for _ in 0..max_children {
            all_keys.push(Field::parse(&bytes[offset..offset + key_width], key_type)?);
            offset += key_width;
        }
        let keys = if num_children > 0 {
            all_keys[1..num_children].to_vec()
        } else {
            Vec::new()
        };

        let mut children = Vec::with_capacity(num_children);
        for i in 0..num_children {
            let b = &bytes[offset + i * 4..offset + i * 4 + 4];
            children.push(u32::from_be_bytes(b.try_into().unwrap()) as usize);
        }
        offset += max_children * 4;

        let children_category = if bytes[offset] == 1 {
            PageCategory::Internal
        } else {
            PageCategory::Leaf
        };
        offset += 1;

        let parent_no = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
        let parent_cat = bytes[offset + 4];
        let parent = decode_page_no(parent_no).map(|n| {
            let cat = match parent_cat {
                1 => PageCategory::Internal,
                _ => PageCategory::RootPtr,
            };
            (n, cat)
        });

        Ok(InternalPage {
            id,
            key_type,
            key_field,
            page_size,
            max_children,
            children,
            keys,
            children_category,
            parent,
            dirtier: None,
        })
    }

    pub fn empty_page_bytes(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn id(&self) -> BTreePageId {
        self.id
    }

    pub fn key_field(&self) -> usize {
        self.key_field
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn num_entries(&self) -> usize {
        self.keys.len()
    }

    pub fn max_entries(&self) -> usize {
        self.max_children - 1
    }

    pub fn is_full(&self) -> bool {
        self.children.len() >= self.max_children
    }

    pub fn empty_slots_count(&self) -> usize {
        self.max_entries() - self.num_entries()
    }

    pub fn should_merge(&self) -> bool {
        let max_empty = self.max_entries() - (self.max_entries() + 1) / 2;
        self.empty_slots_count() > max_empty
    }

    pub fn children_category(&self) -> PageCategory {
        self.children_category
    }

    pub fn set_children_category(&mut self, cat: PageCategory) {
        self.children_category = cat;
    }

    pub fn parent(&self) -> Option<BTreePageId> {
        self.parent.map(|(no, cat)| BTreePageId::new(self.id.table_id, no, cat))
    }

    pub fn set_parent(&mut self, parent: Option<BTreePageId>) {
        self.parent = parent.map(|p| (p.page_no, p.category));
    }

    fn child_id(&self, no: usize) -> BTreePageId {
        BTreePageId::new(self.id.table_id, no, self.children_category)
    }

    pub fn first_child(&self) -> Option<BTreePageId> {
        self.children.first().map(|no| self.child_id(*no))
    }

    pub fn child_at(&self, i: usize) -> Option<BTreePageId> {
        self.children.get(i).map(|no| self.child_id(*no))
    }

    pub fn set_sole_child(&mut self, child: BTreePageId) {
        self.children = vec![child.page_no];
        self.keys.clear();
        self.children_category = child.category;
    }

    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        (0..self.keys.len()).map(move |i| Entry {
            key: self.keys[i].clone(),
            left_child: self.child_id(self.children[i]),
            right_child: self.child_id(self.children[i + 1]),
        })
    }

    /// Inserts a new separator key and right child immediately after
    /// `left`, which must already be one of this page's children (the
    /// normal post-split case: `left` is the page that just split, `right`
    /// is its freshly allocated sibling).
    pub fn insert_entry(&mut self, key: Field, left: BTreePageId, right: BTreePageId) -> DbResult<()> {
        if self.is_full() {
            return Err(DbError::PageFull);
        }
        let pos = self
            .children
            .iter()
            .position(|c| *c == left.page_no)
            .ok_or_else(|| DbError::other("insert_entry: left child not found"))?;
        self.children.insert(pos + 1, right.page_no);
        self.keys.insert(pos, key);
        Ok(())
    }

    /// Removes the entry separating `left` and `right` (used when merging
    /// two children back into one, or deleting the separator after a
    /// child is freed).
    pub fn delete_entry(&mut self, left: BTreePageId, right: BTreePageId) -> DbResult<()> {
        let pos = self
            .children
            .iter()
            .position(|c| *c == left.page_no)
            .ok_or_else(|| DbError::other("delete_entry: left child not found"))?;
        if self.children.get(pos + 1) != Some(&right.page_no) {
            return Err(DbError::other("delete_entry: right child mismatch"));
        }
        self.children.remove(pos + 1);
        self.keys.remove(pos);
        Ok(())
    }

    /// Replaces the key separating `left` and `right` without touching
    /// child pointers, used after a steal to re-derive the parent's
    /// separator from the new boundary.
    pub fn set_separator(&mut self, left: BTreePageId, right: BTreePageId, key: Field) -> DbResult<()> {
        let pos = self
            .children
            .iter()
            .position(|c| *c == left.page_no)
            .ok_or_else(|| DbError::other("set_separator: left child not found"))?;
        if self.children.get(pos + 1) != Some(&right.page_no) {
            return Err(DbError::other("set_separator: right child mismatch"));
        }
        self.keys[pos] = key;
        Ok(())
    }

    /// Finds the child to descend into for `key`, or the leftmost child
    /// when `key` is `None` (full scans always start at the left edge).
    pub fn child_for(&self, key: Option<&Field>) -> BTreePageId {
        let Some(key) = key else {
            return self.first_child().expect("internal page has no children");
        };
        for (i, k) in self.keys.iter().enumerate() {
            if k >= key {
                return self.child_id(self.children[i]);
            }
        }
        self.child_id(*self.children.last().expect("internal page has no children"))
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtier = tid;
    }

    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn serialize(&self) -> Vec<u8> {
        let hsize = Self::header_size(self.max_children);
        let mut header = BitVec::from_elem(self.max_children, false);
        for i in 0..self.children.len() {
            header.set(i, true);
        }
        let mut out = bitmap_to_bytes(&header, hsize);

        let key_width = self.key_type.len();
        let mut all_keys = vec![Field::zero(self.key_type); self.max_children];
        for (i, k) in self.keys.iter().enumerate() {
            all_keys[i + 1] = k.clone();
        }
        for k in all_keys.iter() {
            k.serialize(&mut out, self.key_type);
        }

        for i in 0..self.max_children {
            let no = self.children.get(i).copied().unwrap_or(0);
            out.extend_from_slice(&(no as u32).to_be_bytes());
        }

        out.push(if self.children_category == PageCategory::Internal { 1 } else { 0 });

        let (parent_no, parent_cat) = match self.parent {
            Some((no, PageCategory::Internal)) => (encode_page_no(Some(no)), 1u8),
            Some((no, _)) => (encode_page_no(Some(no)), 0u8),
            None => (encode_page_no(None), 0u8),
        };
        out.extend_from_slice(&parent_no.to_be_bytes());
        out.push(parent_cat);

        out.resize(self.page_size, 0);
        out
    }
}
