use bit_vec::BitVec;

use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::page_id::HeapPageId;
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple, TupleDesc};

/// Number of fixed-width slots a page of `page_size` bytes holds for tuples
/// of `tuple_width` bytes, per `N = floor(P*8 / (T*8 + 1))`.
pub fn slots_per_page(page_size: usize, tuple_width: usize) -> usize {
    (page_size * 8) / (tuple_width * 8 + 1)
}

pub fn header_size(num_slots: usize) -> usize {
    (num_slots + 7) / 8
}

/// spec.md §6 pins the on-disk bit order explicitly: bit `i & 7` of byte
/// `i >> 3`, LSB-first within a byte. `bit-vec`'s own `from_bytes`/`to_bytes`
/// pack MSB-first, which would silently produce a non-portable file, so the
/// header bitmap is packed/unpacked by hand instead of trusting those two
/// methods.
fn header_from_bytes(bytes: &[u8], num_slots: usize) -> BitVec<u32> {
    let mut bits = BitVec::from_elem(num_slots, false);
    for i in 0..num_slots {
        let byte = bytes[i / 8];
        let used = (byte >> (i % 8)) & 1 == 1;
        bits.set(i, used);
    }
    bits
}

fn header_to_bytes(bits: &BitVec<u32>, hsize: usize) -> Vec<u8> {
    let mut out = vec![0u8; hsize];
    for (i, used) in bits.iter().enumerate() {
        if used {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// One slotted heap page: a bitmap header followed by `N` fixed-width tuple
/// slots, followed by zero padding out to the page size. Bit `i` of byte
/// `i/8` (LSB-first) marks slot `i` used — this ordering is load-bearing for
/// on-disk portability, not an implementation detail.
pub struct HeapPage {
    id: HeapPageId,
    desc: TupleDesc,
    page_size: usize,
    num_slots: usize,
    header: BitVec<u32>,
    slots: Vec<Option<Tuple>>,
    dirtier: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    pub fn new(id: HeapPageId, desc: TupleDesc, bytes: &[u8], config: &Config) -> DbResult<Self> {
        let tuple_width = desc.size();
        let num_slots = slots_per_page(config.page_size, tuple_width);
        let hsize = header_size(num_slots);
        if bytes.len() < hsize + num_slots * tuple_width {
            return Err(DbError::other("heap page bytes too short"));
        }

        let header = header_from_bytes(&bytes[..hsize], num_slots);
        let mut slots = Vec::with_capacity(num_slots);
        let mut offset = hsize;
        for i in 0..num_slots {
            let slot_bytes = &bytes[offset..offset + tuple_width];
            if header.get(i).unwrap_or(false) {
                let mut t = Tuple::parse(desc.clone(), slot_bytes)?;
                t.record_id = Some(RecordId::new(id.into(), i));
                slots.push(Some(t));
            } else {
                slots.push(None);
            }
            offset += tuple_width;
        }

        Ok(HeapPage {
            id,
            desc,
            page_size: config.page_size,
            num_slots,
            header,
            slots,
            dirtier: None,
            before_image: bytes.to_vec(),
        })
    }

    pub fn empty_page_bytes(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn id(&self) -> HeapPageId {
        self.id
    }

    pub fn num_unused_slots(&self) -> usize {
        (0..self.num_slots).filter(|i| !self.header.get(*i).unwrap_or(false)).count()
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> DbResult<()> {
        if tuple.desc() != &self.desc {
            return Err(DbError::SchemaMismatch);
        }
        let slot = (0..self.num_slots)
            .find(|i| !self.header.get(*i).unwrap_or(false))
            .ok_or(DbError::PageFull)?;
        self.header.set(slot, true);
        tuple.record_id = Some(RecordId::new(self.id.into(), slot));
        self.slots[slot] = Some(tuple);
        Ok(())
    }

    pub fn delete_tuple(&mut self, tuple: &Tuple) -> DbResult<()> {
        let rid = tuple.record_id.ok_or(DbError::WrongPage)?;
        let crate::page_id::PageId::Heap(hid) = rid.page_id else {
            return Err(DbError::WrongPage);
        };
        if hid != self.id {
            return Err(DbError::WrongPage);
        }
        if !self.header.get(rid.slot_index).unwrap_or(false) {
            return Err(DbError::SlotEmpty);
        }
        self.header.set(rid.slot_index, false);
        self.slots[rid.slot_index] = None;
        Ok(())
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtier = tid;
    }

    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.page_size);
        let hsize = header_size(self.num_slots);
        out.extend_from_slice(&header_to_bytes(&self.header, hsize));
        let tuple_width = self.desc.size();
        for slot in self.slots.iter() {
            match slot {
                Some(t) => out.extend_from_slice(&t.serialize()),
                None => out.resize(out.len() + tuple_width, 0),
            }
        }
        out.resize(self.page_size, 0);
        out
    }
}
