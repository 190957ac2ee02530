mod header;
mod internal;
mod leaf;
mod root_pointer;

use bit_vec::BitVec;

pub use header::HeaderPage;
pub use internal::{Entry, InternalPage};
pub use leaf::LeafPage;
pub use root_pointer::RootPointerPage;

/// Packs/unpacks a bitmap LSB-first within each byte (bit `i & 7` of byte
/// `i >> 3`), matching the heap page's on-disk convention (`bit-vec`'s own
/// `from_bytes`/`to_bytes` pack MSB-first) so every page kind in the file
/// agrees on one bit order per spec.md §6.
pub(crate) fn bitmap_from_bytes(bytes: &[u8], num_bits: usize) -> BitVec<u32> {
    let mut bits = BitVec::from_elem(num_bits, false);
    for i in 0..num_bits {
        let byte = bytes[i / 8];
        bits.set(i, (byte >> (i % 8)) & 1 == 1);
    }
    bits
}

pub(crate) fn bitmap_to_bytes(bits: &BitVec<u32>, num_bytes: usize) -> Vec<u8> {
    let mut out = vec![0u8; num_bytes];
    for (i, used) in bits.iter().enumerate() {
        if used {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// Root-pointer pages are much smaller than regular pages: they only ever
/// hold three fixed-width fields, so paying a full page's worth of disk for
/// them would be wasteful and would also mean every table burns an entire
/// page just to bootstrap an empty tree.
pub const ROOT_PTR_PAGE_SIZE: usize = 9;

/// Pointer fields are stored as `page_no + 1`, with `0` meaning "null", so
/// that an all-zero page (a freshly materialized one, never written) reads
/// back as every pointer being null rather than pointing at page 0.
pub(crate) fn encode_page_no(page_no: Option<usize>) -> u32 {
    match page_no {
        Some(n) => n as u32 + 1,
        None => 0,
    }
}

pub(crate) fn decode_page_no(bytes: u32) -> Option<usize> {
    if bytes == 0 {
        None
    } else {
        Some((bytes - 1) as usize)
    }
}
