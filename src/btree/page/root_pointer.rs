use crate::error::{DbError, DbResult};
use crate::page_id::{BTreePageId, PageCategory};
use crate::transaction::TransactionId;

use super::{decode_page_no, encode_page_no, ROOT_PTR_PAGE_SIZE};

/// The single fixed page at offset 0 of a B+-tree file: current root id (or
/// null for an empty tree), the root's category (needed because the root
/// starts as a LEAF and only becomes INTERNAL once it first splits), and the
/// head of the header-page free list (or null if none allocated yet).
pub struct RootPointerPage {
    id: BTreePageId,
    root: Option<(usize, PageCategory)>,
    first_header: Option<usize>,
    dirtier: Option<TransactionId>,
}

impl RootPointerPage {
    pub fn new(id: BTreePageId, bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() < ROOT_PTR_PAGE_SIZE {
            return Err(DbError::other("root pointer page bytes too short"));
        }
        let root_no = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let root_cat = bytes[4];
        let header_no = u32::from_be_bytes(bytes[5..9].try_into().unwrap());

        let root = decode_page_no(root_no).map(|n| {
            let cat = if root_cat == 1 {
                PageCategory::Internal
            } else {
                PageCategory::Leaf
            };
            (n, cat)
        });

        Ok(RootPointerPage {
            id,
            root,
            first_header: decode_page_no(header_no),
            dirtier: None,
        })
    }

    pub fn empty(id: BTreePageId) -> Self {
        RootPointerPage {
            id,
            root: None,
            first_header: None,
            dirtier: None,
        }
    }

    pub fn empty_page_bytes() -> Vec<u8> {
        vec![0u8; ROOT_PTR_PAGE_SIZE]
    }

    pub fn id(&self) -> BTreePageId {
        self.id
    }

    pub fn root(&self) -> Option<BTreePageId> {
        self.root.map(|(no, cat)| BTreePageId::new(self.id.table_id, no, cat))
    }

    pub fn set_root(&mut self, root: Option<BTreePageId>) {
        self.root = root.map(|p| (p.page_no, p.category));
    }

    pub fn first_header(&self) -> Option<BTreePageId> {
        self.first_header
            .map(|no| BTreePageId::new(self.id.table_id, no, PageCategory::Header))
    }

    pub fn set_first_header(&mut self, header: Option<BTreePageId>) {
        self.first_header = header.map(|p| p.page_no);
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtier = tid;
    }

    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ROOT_PTR_PAGE_SIZE);
        let (root_no, root_cat) = match self.root {
            Some((no, PageCategory::Internal)) => (encode_page_no(Some(no)), 1u8),
            Some((no, _)) => (encode_page_no(Some(no)), 0u8),
            None => (encode_page_no(None), 0u8),
        };
        out.extend_from_slice(&root_no.to_be_bytes());
        out.push(root_cat);
        out.extend_from_slice(&encode_page_no(self.first_header).to_be_bytes());
        out
    }
}
