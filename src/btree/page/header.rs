use bit_vec::BitVec;

use crate::error::{DbError, DbResult};
use crate::page_id::{BTreePageId, PageCategory};
use crate::transaction::TransactionId;

use super::{bitmap_from_bytes, bitmap_to_bytes, decode_page_no, encode_page_no};

/// One link in the free-page chain: a bitmap of which B+-tree page numbers
/// are currently allocated (the numbers this header page is responsible
/// for), plus a pointer to the next header page. A full page's worth of
/// bits covers `(page_size - 4) * 8` page slots before a new header page is
/// needed.
pub struct HeaderPage {
    id: BTreePageId,
    page_size: usize,
    bitmap: BitVec<u32>,
    next: Option<usize>,
    dirtier: Option<TransactionId>,
}

impl HeaderPage {
    pub fn slots_per_header(page_size: usize) -> usize {
        (page_size - 4) * 8
    }

    pub fn new(id: BTreePageId, bytes: &[u8], page_size: usize) -> DbResult<Self> {
        let bitmap_bytes = page_size - 4;
        if bytes.len() < page_size {
            return Err(DbError::other("header page bytes too short"));
        }
        let bitmap = bitmap_from_bytes(&bytes[..bitmap_bytes], bitmap_bytes * 8);
        let next_no = u32::from_be_bytes(bytes[bitmap_bytes..bitmap_bytes + 4].try_into().unwrap());
        Ok(HeaderPage {
            id,
            page_size,
            bitmap,
            next: decode_page_no(next_no),
            dirtier: None,
        })
    }

    pub fn empty(id: BTreePageId, page_size: usize) -> Self {
        let bitmap_bytes = page_size - 4;
        HeaderPage {
            id,
            page_size,
            bitmap: BitVec::from_elem(bitmap_bytes * 8, false),
            next: None,
            dirtier: None,
        }
    }

    pub fn empty_page_bytes(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn id(&self) -> BTreePageId {
        self.id
    }

    pub fn num_slots(&self) -> usize {
        self.bitmap.len()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        self.bitmap.get(slot).unwrap_or(false)
    }

    pub fn mark_slot(&mut self, slot: usize, used: bool) {
        self.bitmap.set(slot, used);
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        (0..self.bitmap.len()).find(|i| !self.bitmap.get(*i).unwrap_or(false))
    }

    pub fn next(&self) -> Option<BTreePageId> {
        self.next
            .map(|no| BTreePageId::new(self.id.table_id, no, PageCategory::Header))
    }

    pub fn set_next(&mut self, next: Option<BTreePageId>) {
        self.next = next.map(|p| p.page_no);
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtier = tid;
    }

    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = bitmap_to_bytes(&self.bitmap, self.page_size - 4);
        out.extend_from_slice(&encode_page_no(self.next).to_be_bytes());
        out
    }
}
