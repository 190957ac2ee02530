use bit_vec::BitVec;

use crate::error::{DbError, DbResult};
use crate::page_id::{BTreePageId, PageCategory};
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple, TupleDesc};

use super::{bitmap_from_bytes, bitmap_to_bytes, decode_page_no, encode_page_no};

/// Fixed bytes spent on parent/sibling pointers outside the slot array:
/// parent page_no (4) + parent category (1) + left sibling page_no (4) +
/// right sibling page_no (4).
const EXTRA_BYTES: usize = 13;

pub struct LeafPage {
    id: BTreePageId,
    desc: TupleDesc,
    key_field: usize,
    page_size: usize,
    slot_count: usize,
    header: BitVec<u32>,
    tuples: Vec<Option<Tuple>>,
    parent: Option<(usize, PageCategory)>,
    left_sibling: Option<usize>,
    right_sibling: Option<usize>,
    dirtier: Option<TransactionId>,
}

impl LeafPage {
    pub fn slot_count(page_size: usize, tuple_width: usize) -> usize {
        let bits_per_tuple = tuple_width * 8 + 1;
        ((page_size - EXTRA_BYTES) * 8) / bits_per_tuple
    }

    fn header_size(slot_count: usize) -> usize {
        (slot_count + 7) / 8
    }

    pub fn new(
        id: BTreePageId,
        desc: TupleDesc,
        key_field: usize,
        bytes: &[u8],
        page_size: usize,
    ) -> DbResult<Self> {
        let tuple_width = desc.size();
        let slot_count = Self::slot_count(page_size, tuple_width);
        let hsize = Self::header_size(slot_count);
        if bytes.len() < hsize + slot_count * tuple_width + EXTRA_BYTES {
            return Err(DbError::other("leaf page bytes too short"));
        }

        let header = bitmap_from_bytes(&bytes[..hsize], slot_count);
        let mut tuples = Vec::with_capacity(slot_count);
        let mut offset = hsize;
        for i in 0..slot_count {
            let slot_bytes = &bytes[offset..offset + tuple_width];
            if header.get(i).unwrap_or(false) {
                let mut t = Tuple::parse(desc.clone(), slot_bytes)?;
                t.record_id = Some(RecordId::new(id.into(), i));
                tuples.push(Some(t));
            } else {
                tuples.push(None);
            }
            offset += tuple_width;
        }

        let parent_no = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
        let parent_cat = bytes[offset + 4];
        let left_no = u32::from_be_bytes(bytes[offset + 5..offset + 9].try_into().unwrap());
        let right_no = u32::from_be_bytes(bytes[offset + 9..offset + 13].try_into().unwrap());

        let parent = decode_page_no(parent_no).map(|n| {
            let cat = match parent_cat {
                1 => PageCategory::Internal,
                _ => PageCategory::RootPtr,
            };
            (n, cat)
        });

        Ok(LeafPage {
            id,
            desc,
            key_field,
            page_size,
            slot_count,
            header,
            tuples,
            parent,
            left_sibling: decode_page_no(left_no),
            right_sibling: decode_page_no(right_no),
            dirtier: None,
        })
    }

    pub fn empty_page_bytes(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn id(&self) -> BTreePageId {
        self.id
    }

    pub fn slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn num_tuples(&self) -> usize {
        self.slot_count - self.empty_slots_count()
    }

    pub fn empty_slots_count(&self) -> usize {
        (0..self.slot_count).filter(|i| !self.header.get(*i).unwrap_or(false)).count()
    }

    /// Half-full invariant threshold: at least `ceil(max/2)` tuples.
    pub fn should_merge(&self) -> bool {
        let max_empty = self.slot_count - (self.slot_count + 1) / 2;
        self.empty_slots_count() > max_empty
    }

    pub fn parent(&self) -> Option<BTreePageId> {
        self.parent.map(|(no, cat)| BTreePageId::new(self.id.table_id, no, cat))
    }

    pub fn set_parent(&mut self, parent: Option<BTreePageId>) {
        self.parent = parent.map(|p| (p.page_no, p.category));
    }

    pub fn left_sibling(&self) -> Option<BTreePageId> {
        self.left_sibling
            .map(|no| BTreePageId::new(self.id.table_id, no, PageCategory::Leaf))
    }

    pub fn set_left_sibling(&mut self, sib: Option<BTreePageId>) {
        self.left_sibling = sib.map(|p| p.page_no);
    }

    pub fn right_sibling(&self) -> Option<BTreePageId> {
        self.right_sibling
            .map(|no| BTreePageId::new(self.id.table_id, no, PageCategory::Leaf))
    }

    pub fn set_right_sibling(&mut self, sib: Option<BTreePageId>) {
        self.right_sibling = sib.map(|p| p.page_no);
    }

    pub fn key_field(&self) -> usize {
        self.key_field
    }

    /// Inserts keeping the slot array in ascending key order: finds the
    /// first empty slot and the last used slot whose key is <= the new key,
    /// then shifts the shorter of the two spans to open a gap at the right
    /// spot, rather than a plain insert+sort pass.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> DbResult<()> {
        let first_empty = (0..self.slot_count).find(|i| !self.header.get(*i).unwrap_or(false));
        let Some(first_empty) = first_empty else {
            return Err(DbError::PageFull);
        };

        let key = tuple.get_field(self.key_field).clone();
        let mut last_less: i64 = -1;
        for i in 0..self.slot_count {
            if self.header.get(i).unwrap_or(false) {
                let t = self.tuples[i].as_ref().unwrap();
                if *t.get_field(self.key_field) < key {
                    last_less = i as i64;
                } else {
                    break;
                }
            }
        }

        let good_slot = if (first_empty as i64) < last_less {
            for i in first_empty as i64..last_less {
                self.move_tuple((i + 1) as usize, i as usize);
            }
            last_less as usize
        } else {
            for i in (last_less + 1..first_empty as i64).rev() {
                self.move_tuple(i as usize, (i + 1) as usize);
            }
            (last_less + 1) as usize
        };

        tuple.record_id = Some(RecordId::new(self.id.into(), good_slot));
        self.tuples[good_slot] = Some(tuple);
        self.header.set(good_slot, true);
        Ok(())
    }

    fn move_tuple(&mut self, from: usize, to: usize) {
        if !self.header.get(from).unwrap_or(false) {
            return;
        }
        let mut t = self.tuples[from].take().unwrap();
        t.record_id = Some(RecordId::new(self.id.into(), to));
        self.tuples[to] = Some(t);
        self.header.set(to, true);
        self.header.set(from, false);
    }

    pub fn delete_slot(&mut self, slot: usize) -> DbResult<()> {
        if !self.header.get(slot).unwrap_or(false) {
            return Err(DbError::SlotEmpty);
        }
        self.header.set(slot, false);
        self.tuples[slot] = None;
        Ok(())
    }

    pub fn get(&self, slot: usize) -> Option<&Tuple> {
        self.tuples[slot].as_ref()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Tuple> {
        self.tuples.iter().filter_map(|s| s.as_ref())
    }

    pub fn first_key(&self) -> Option<&crate::field::Field> {
        self.iter().next().map(|t| t.get_field(self.key_field))
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtier = tid;
    }

    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.page_size);
        let hsize = Self::header_size(self.slot_count);
        out.extend_from_slice(&bitmap_to_bytes(&self.header, hsize));
        let tuple_width = self.desc.size();
        for slot in self.tuples.iter() {
            match slot {
                Some(t) => out.extend_from_slice(&t.serialize()),
                None => out.resize(out.len() + tuple_width, 0),
            }
        }
        let (parent_no, parent_cat) = match self.parent {
            Some((no, PageCategory::Internal)) => (encode_page_no(Some(no)), 1u8),
            Some((no, _)) => (encode_page_no(Some(no)), 0u8),
            None => (encode_page_no(None), 0u8),
        };
        out.extend_from_slice(&parent_no.to_be_bytes());
        out.push(parent_cat);
        out.extend_from_slice(&encode_page_no(self.left_sibling).to_be_bytes());
        out.extend_from_slice(&encode_page_no(self.right_sibling).to_be_bytes());
        out.resize(self.page_size, 0);
        out
    }
}
