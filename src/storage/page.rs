//! # Page Frame Layout
//!
//! This module defines the on-disk index page format. Every 16KB page begins
//! with a 32-byte fil header and a 36-byte page header, followed by the two
//! sentinel records, the record heap and, growing down from the page end,
//! the sparse record directory.
//!
//! ## Page Layout
//!
//! ```text
//! Offset   Size   Field
//! ------   ----   --------------------------------------------------
//! 0        32     Fil header (checksum, page_no, prev, next, lsn,
//!                 page_type, space_id)
//! 32       36     Page header (directory size, heap top, heap count,
//!                 record count, insert hints, level, index id)
//! 68       ..     Infimum and supremum sentinel records
//! ..       ..     Record heap, growing upward
//! ..       ..     Free space
//! ..       2*N    Directory slots, growing downward
//! 16376    8      Checksum trailer
//! ```
//!
//! ## Fil Header
//!
//! The sibling links `prev`/`next` live at offsets 8 and 12 and form a
//! doubly-linked list per tree level; `FIL_NULL` terminates both ends. They
//! are adjacent so one 8-byte memset resets both on a fresh page.
//!
//! ## Page Header
//!
//! ```text
//! Offset  Size  Field         Description
//! ------  ----  ------------  ----------------------------------------
//! 32      2     n_dir_slots   Directory slots in use
//! 34      2     heap_top      First free heap byte
//! 36      2     n_heap        Heap records incl. sentinels; bit 15 set
//!                             for the compact header shape
//! 38      2     free          Head of the deleted-record list
//! 40      2     garbage       Bytes in deleted records
//! 42      2     last_insert   Origin of the last inserted record
//! 44      2     direction     Insert direction hint
//! 46      2     n_direction   Consecutive inserts in one direction
//! 48      2     n_recs        User records on the page
//! 50      8     max_trx_id    Highest transaction id to touch the page
//! 58      2     level         Tree level (0 = leaf)
//! 60      8     index_id      Owning index
//! ```
//!
//! ## Sentinels
//!
//! The infimum sorts below every key and anchors the singly-linked record
//! list; the supremum sorts above every key and terminates it. Both live at
//! format-specific fixed offsets and always own a directory slot.
//!
//! ## Directory
//!
//! Each 2-byte slot points at a record that *owns* the records linked before
//! it, between `PAGE_DIR_SLOT_MIN_N_OWNED` and `PAGE_DIR_SLOT_MAX_N_OWNED`
//! of them, enabling O(log n) intra-page search. The supremum terminates the
//! final group.
//!
//! ## Zero-Copy Access
//!
//! Both headers are `zerocopy` structs over little-endian wrapper types and
//! are read in place from page frames, the same pattern every on-disk
//! struct in this crate follows.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{
    FIL_HEADER_SIZE, FIL_NULL, PAGE_DIR, PAGE_DIR_SLOT_MAX_N_OWNED, PAGE_DIR_SLOT_MIN_N_OWNED,
    PAGE_DIR_SLOT_SIZE, PAGE_HEAP_NO_USER_LOW, PAGE_HEAP_START_COMPACT, PAGE_HEAP_START_REDUNDANT,
    PAGE_SIZE,
};
use crate::records::{codec, RowFormat};

// Byte offsets of the logged fil-header fields.
pub const FIL_PAGE_NO: usize = 4;
pub const FIL_PAGE_TYPE: usize = 24;
pub const FIL_SPACE_ID: usize = 26;

// Byte offsets of the logged page-header fields, relative to the page start.
pub const PAGE_N_DIR_SLOTS: usize = 32;
pub const PAGE_HEAP_TOP: usize = 34;
pub const PAGE_N_HEAP: usize = 36;
pub const PAGE_FREE: usize = 38;
pub const PAGE_GARBAGE: usize = 40;
pub const PAGE_LAST_INSERT: usize = 42;
pub const PAGE_DIRECTION: usize = 44;
pub const PAGE_N_DIRECTION: usize = 46;
pub const PAGE_N_RECS: usize = 48;
pub const PAGE_MAX_TRX_ID: usize = 50;
pub const PAGE_LEVEL: usize = 58;
pub const PAGE_INDEX_ID: usize = 60;

/// Bit 15 of `n_heap` marks the compact header shape.
pub const PAGE_N_HEAP_COMPACT: u16 = 0x8000;

pub const DIRECTION_NONE: u16 = 0;
pub const DIRECTION_LEFT: u16 = 1;
pub const DIRECTION_RIGHT: u16 = 2;

pub const PAGE_TYPE_ALLOCATED: u16 = 0;
pub const PAGE_TYPE_INDEX: u16 = 2;
pub const PAGE_TYPE_BLOB: u16 = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FilHeader {
    checksum: U32,
    page_no: U32,
    prev: U32,
    next: U32,
    lsn: U64,
    page_type: U16,
    space_id: U32,
    _reserved: [u8; 2],
}

impl FilHeader {
    le_accessors! {
        checksum: u32,
        page_no: u32,
        prev: u32,
        next: u32,
        lsn: u64,
        page_type: u16,
        space_id: u32,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PageHeader {
    n_dir_slots: U16,
    heap_top: U16,
    n_heap: U16,
    free: U16,
    garbage: U16,
    last_insert: U16,
    direction: U16,
    n_direction: U16,
    n_recs: U16,
    max_trx_id: U64,
    level: U16,
    index_id: U64,
}

impl PageHeader {
    le_accessors! {
        n_dir_slots: u16,
        heap_top: u16,
        n_heap: u16,
        free: u16,
        garbage: u16,
        last_insert: u16,
        direction: u16,
        n_direction: u16,
        n_recs: u16,
        max_trx_id: u64,
        level: u16,
        index_id: u64,
    }

    /// Heap record count without the format bit.
    pub fn heap_count(&self) -> u16 {
        self.n_heap() & !PAGE_N_HEAP_COMPACT
    }

    pub fn is_compact(&self) -> bool {
        self.n_heap() & PAGE_N_HEAP_COMPACT != 0
    }
}

const _: () = assert!(size_of::<FilHeader>() == FIL_HEADER_SIZE);
const _: () = assert!(size_of::<PageHeader>() == 36);
const _: () = assert!(
    std::mem::offset_of!(FilHeader, page_no) == FIL_PAGE_NO
        && std::mem::offset_of!(FilHeader, page_type) == FIL_PAGE_TYPE
        && std::mem::offset_of!(FilHeader, space_id) == FIL_SPACE_ID,
    "fil header field offsets out of step with the struct"
);
const _: () = assert!(
    FIL_HEADER_SIZE + std::mem::offset_of!(PageHeader, heap_top) == PAGE_HEAP_TOP
        && FIL_HEADER_SIZE + std::mem::offset_of!(PageHeader, n_recs) == PAGE_N_RECS
        && FIL_HEADER_SIZE + std::mem::offset_of!(PageHeader, level) == PAGE_LEVEL
        && FIL_HEADER_SIZE + std::mem::offset_of!(PageHeader, index_id) == PAGE_INDEX_ID,
    "page header field offsets out of step with the struct"
);

pub fn fil_header(page: &[u8]) -> &FilHeader {
    FilHeader::ref_from_bytes(&page[..FIL_HEADER_SIZE]).unwrap()
}

pub fn fil_header_mut(page: &mut [u8]) -> &mut FilHeader {
    FilHeader::mut_from_bytes(&mut page[..FIL_HEADER_SIZE]).unwrap()
}

pub fn page_header(page: &[u8]) -> &PageHeader {
    PageHeader::ref_from_bytes(&page[FIL_HEADER_SIZE..FIL_HEADER_SIZE + 36]).unwrap()
}

pub fn page_header_mut(page: &mut [u8]) -> &mut PageHeader {
    PageHeader::mut_from_bytes(&mut page[FIL_HEADER_SIZE..FIL_HEADER_SIZE + 36]).unwrap()
}

/// First free heap byte on an empty page of the given format.
pub fn heap_start(format: RowFormat) -> u16 {
    if format.is_compact() {
        PAGE_HEAP_START_COMPACT
    } else {
        PAGE_HEAP_START_REDUNDANT
    }
}

/// Free bytes on an empty page: heap plus directory headroom.
pub fn free_space_of_empty(format: RowFormat) -> usize {
    crate::config::empty_capacity(format.is_compact())
}

/// Directory bytes reserved for `n_recs` records: one slot per
/// `PAGE_DIR_SLOT_MIN_N_OWNED` records, rounded up.
pub fn dir_reserved(n_recs: usize) -> usize {
    (PAGE_DIR_SLOT_SIZE * n_recs + PAGE_DIR_SLOT_MIN_N_OWNED - 1) / PAGE_DIR_SLOT_MIN_N_OWNED
}

/// Byte offset of the nth directory slot; slot 0 sits highest and always
/// points at the infimum.
pub fn dir_slot_offset(nth: usize) -> usize {
    PAGE_SIZE - PAGE_DIR - PAGE_DIR_SLOT_SIZE * (nth + 1)
}

pub fn dir_slot(page: &[u8], nth: usize) -> u16 {
    let at = dir_slot_offset(nth);
    u16::from_le_bytes([page[at], page[at + 1]])
}

pub fn page_prev(page: &[u8]) -> u32 {
    fil_header(page).prev()
}

pub fn page_next(page: &[u8]) -> u32 {
    fil_header(page).next()
}

pub fn page_level(page: &[u8]) -> u16 {
    page_header(page).level()
}

pub fn page_n_recs(page: &[u8]) -> u16 {
    page_header(page).n_recs()
}

/// Origin of the first user record, or `None` on an empty page.
pub fn first_user_rec(page: &[u8], format: RowFormat) -> Option<u16> {
    let first = codec::rec_next(page, format, codec::infimum_offset(format));
    (first != codec::supremum_offset(format)).then_some(first)
}

/// Initializes an empty index page in place: headers, sentinels and the two
/// initial directory slots. Sibling links start at `FIL_NULL`; level and
/// index id are written by the caller.
pub fn page_create(page: &mut [u8], format: RowFormat, page_no: u32, space_id: u32) {
    page.fill(0);

    let fil = fil_header_mut(page);
    fil.set_page_no(page_no);
    fil.set_prev(FIL_NULL);
    fil.set_next(FIL_NULL);
    fil.set_page_type(PAGE_TYPE_INDEX);
    fil.set_space_id(space_id);

    let compact_bit = if format.is_compact() {
        PAGE_N_HEAP_COMPACT
    } else {
        0
    };
    let hdr = page_header_mut(page);
    hdr.set_n_dir_slots(2);
    hdr.set_heap_top(heap_start(format));
    hdr.set_n_heap(PAGE_HEAP_NO_USER_LOW | compact_bit);
    hdr.set_direction(DIRECTION_NONE);

    let infimum = codec::infimum_offset(format);
    let supremum = codec::supremum_offset(format);

    page[infimum as usize..infimum as usize + 8].copy_from_slice(b"infimum\0");
    page[supremum as usize..supremum as usize + 8].copy_from_slice(b"supremum");

    if !format.is_compact() {
        // Redundant sentinels carry one field-end offset for the 8-byte body.
        for origin in [infimum, supremum] {
            let at = origin as usize - 8;
            page[at..at + 2].copy_from_slice(&8u16.to_le_bytes());
        }
    }

    codec::rec_set_heap_no(page, infimum, 0);
    codec::rec_set_heap_no(page, supremum, 1);
    codec::rec_set_n_owned(page, format, infimum, 1);
    codec::rec_set_n_owned(page, format, supremum, 1);
    codec::rec_set_next(page, format, infimum, supremum);
    // The supremum's next stays zero; the list ends there.

    let slot0 = dir_slot_offset(0);
    page[slot0..slot0 + 2].copy_from_slice(&infimum.to_le_bytes());
    let slot1 = dir_slot_offset(1);
    page[slot1..slot1 + 2].copy_from_slice(&supremum.to_le_bytes());
}

/// Structural check of a finished page: record chain in key order, counts
/// consistent, directory ownership within bounds and aligned with the chain.
pub fn validate_page(page: &[u8], format: RowFormat) -> Result<()> {
    ensure!(page.len() == PAGE_SIZE, "invalid page size {}", page.len());

    let hdr = page_header(page);
    ensure!(
        hdr.is_compact() == format.is_compact(),
        "page format bit does not match index format"
    );

    let infimum = codec::infimum_offset(format);
    let supremum = codec::supremum_offset(format);
    let heap_top = hdr.heap_top();
    ensure!(
        heap_top >= heap_start(format),
        "heap top {} before heap start",
        heap_top
    );
    let dir_start = dir_slot_offset(hdr.n_dir_slots() as usize - 1);
    ensure!(
        (heap_top as usize) <= dir_start,
        "heap top {} overlaps directory at {}",
        heap_top,
        dir_start
    );

    // Walk the chain: strictly ascending keys, n_recs user records, and every
    // ownership group within bounds, ending in the supremum's group.
    let mut n_recs = 0usize;
    let mut group = 0usize;
    let mut slots_seen = 1usize; // infimum's slot
    let mut prev_key: Option<&[u8]> = None;
    let mut origin = codec::rec_next(page, format, infimum);

    ensure!(
        codec::rec_n_owned(page, format, infimum) == 1,
        "infimum must own itself alone"
    );

    loop {
        if origin == supremum {
            let owned = codec::rec_n_owned(page, format, origin);
            ensure!(
                owned == group + 1,
                "supremum owns {} but the final group has {}",
                owned,
                group + 1
            );
            slots_seen += 1;
            break;
        }

        ensure!(
            origin >= heap_start(format) && origin < heap_top,
            "record origin {} outside the heap",
            origin
        );

        let layout = codec::layout_at(page, format, origin);
        let key = codec::rec_key(page, origin, &layout);
        if let Some(prev) = prev_key {
            ensure!(
                codec::compare_keys(prev, key) == std::cmp::Ordering::Less,
                "records out of order at offset {}",
                origin
            );
        }
        prev_key = Some(key);

        ensure!(
            codec::rec_heap_no(page, origin) == PAGE_HEAP_NO_USER_LOW + n_recs as u16,
            "heap number out of sequence at offset {}",
            origin
        );

        n_recs += 1;
        group += 1;

        let owned = codec::rec_n_owned(page, format, origin);
        if owned > 0 {
            ensure!(
                (PAGE_DIR_SLOT_MIN_N_OWNED..=PAGE_DIR_SLOT_MAX_N_OWNED).contains(&owned),
                "slot ownership {} out of bounds at offset {}",
                owned,
                origin
            );
            ensure!(owned == group, "ownership {} does not close a group of {}", owned, group);
            group = 0;
            slots_seen += 1;
        }

        if n_recs > PAGE_SIZE {
            bail!("record chain does not terminate");
        }
        origin = codec::rec_next(page, format, origin);
    }

    ensure!(
        n_recs == hdr.n_recs() as usize,
        "chain has {} records but the header claims {}",
        n_recs,
        hdr.n_recs()
    );
    ensure!(
        hdr.heap_count() == PAGE_HEAP_NO_USER_LOW + n_recs as u16,
        "heap count {} does not match {} records",
        hdr.heap_count(),
        n_recs
    );
    ensure!(
        slots_seen == hdr.n_dir_slots() as usize,
        "chain yields {} directory slots but the header claims {}",
        slots_seen,
        hdr.n_dir_slots()
    );

    // Directory slots must point at the owning records, in chain order.
    let mut nth = 0usize;
    let mut slot_rec = infimum;
    loop {
        ensure!(
            dir_slot(page, nth) == slot_rec,
            "slot {} does not point at its owning record",
            nth
        );
        if slot_rec == supremum {
            break;
        }
        nth += 1;
        slot_rec = codec::rec_next(page, format, slot_rec);
        while slot_rec != supremum && codec::rec_n_owned(page, format, slot_rec) == 0 {
            slot_rec = codec::rec_next(page, format, slot_rec);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_structs_cover_the_documented_offsets() {
        assert_eq!(size_of::<FilHeader>(), FIL_HEADER_SIZE);
        assert_eq!(size_of::<PageHeader>(), 36);
        assert_eq!(std::mem::offset_of!(FilHeader, prev), crate::config::FIL_PAGE_PREV);
        assert_eq!(std::mem::offset_of!(FilHeader, next), crate::config::FIL_PAGE_NEXT);
    }

    #[test]
    fn empty_page_has_linked_sentinels() {
        for format in [RowFormat::Redundant, RowFormat::Dynamic] {
            let mut page = vec![0u8; PAGE_SIZE];
            page_create(&mut page, format, 7, 1);

            let infimum = codec::infimum_offset(format);
            let supremum = codec::supremum_offset(format);
            assert_eq!(codec::rec_next(&page, format, infimum), supremum);
            assert_eq!(first_user_rec(&page, format), None);
            assert_eq!(page_prev(&page), FIL_NULL);
            assert_eq!(page_next(&page), FIL_NULL);
            assert_eq!(page_header(&page).heap_count(), 2);
            assert_eq!(dir_slot(&page, 0), infimum);
            assert_eq!(dir_slot(&page, 1), supremum);
            assert_eq!(page_header(&page).is_compact(), format.is_compact());
        }
    }

    #[test]
    fn dir_reserved_grows_every_min_owned_records() {
        assert_eq!(dir_reserved(0), 0);
        assert_eq!(dir_reserved(1), 1);
        assert_eq!(dir_reserved(4), 2);
        assert_eq!(dir_reserved(5), 3);
        assert_eq!(dir_reserved(8), 4);
    }

    #[test]
    fn validate_accepts_a_fresh_page_with_zero_records() {
        // A created page has no user records; validate only the sentinel
        // structure by walking the chain.
        let mut page = vec![0u8; PAGE_SIZE];
        page_create(&mut page, RowFormat::Dynamic, 3, 1);
        validate_page(&page, RowFormat::Dynamic).unwrap();
    }
}
