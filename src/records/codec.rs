//! # Record Codec
//!
//! Materializes [`Tuple`]s into physical records and reads records back off
//! page frames. All functions are format-dispatched through [`RowFormat`]
//! once per call; none of them allocate except [`convert_tuple_in`], which
//! bumps into the caller's arena.
//!
//! Offsets handed around here are record *origins*: the first body byte. The
//! extra header sits immediately before the origin, so a full record spans
//! `origin - extra .. origin + body`.

use bumpalo::Bump;
use eyre::{ensure, Result};

use crate::config::{
    EXTERN_REF_SIZE, PAGE_INFIMUM_COMPACT, PAGE_INFIMUM_REDUNDANT, PAGE_SUPREMUM_COMPACT,
    PAGE_SUPREMUM_REDUNDANT, REC_BODY_PREFIX, REC_EXTRA_COMPACT, REC_EXTRA_REDUNDANT,
    REC_EXTRA_REDUNDANT_BASE, REC_FLAG_EXTERN,
};

use super::{RowFormat, Tuple};

/// Extra header size of the redundant sentinels (one field-end offset).
pub const REDUNDANT_SENTINEL_EXTRA: usize = REC_EXTRA_REDUNDANT_BASE + 2;

/// Parsed shape of a user record on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecLayout {
    pub extra: usize,
    pub key_len: usize,
    pub payload_len: usize,
    pub ext: bool,
}

impl RecLayout {
    pub fn body(&self) -> usize {
        REC_BODY_PREFIX + self.key_len + self.payload_len
    }

    pub fn rec_size(&self) -> usize {
        self.extra + self.body()
    }

    /// First byte past the record body; also where the next heap record's
    /// extra header begins.
    pub fn end(&self, origin: u16) -> u16 {
        origin + self.body() as u16
    }
}

/// Extra header size of a user record in the given format.
pub fn extra_size(format: RowFormat) -> usize {
    if format.is_compact() {
        REC_EXTRA_COMPACT
    } else {
        REC_EXTRA_REDUNDANT
    }
}

pub fn infimum_offset(format: RowFormat) -> u16 {
    if format.is_compact() {
        PAGE_INFIMUM_COMPACT
    } else {
        PAGE_INFIMUM_REDUNDANT
    }
}

pub fn supremum_offset(format: RowFormat) -> u16 {
    if format.is_compact() {
        PAGE_SUPREMUM_COMPACT
    } else {
        PAGE_SUPREMUM_REDUNDANT
    }
}

pub fn is_sentinel(format: RowFormat, origin: u16) -> bool {
    origin == infimum_offset(format) || origin == supremum_offset(format)
}

/// Size of the record a tuple converts into, in the given format.
pub fn converted_size(format: RowFormat, tuple: &Tuple) -> usize {
    extra_size(format) + REC_BODY_PREFIX + tuple.key().len() + tuple.payload().len()
}

/// Materializes a tuple into the arena. The record's heap number, ownership
/// count and next pointer are left zeroed; the page builder stamps them at
/// insert. Returns the full record bytes (extra header first) and its layout.
pub fn convert_tuple_in<'a>(
    heap: &'a Bump,
    format: RowFormat,
    tuple: &Tuple,
) -> (&'a mut [u8], RecLayout) {
    let layout = RecLayout {
        extra: extra_size(format),
        key_len: tuple.key().len(),
        payload_len: tuple.payload().len(),
        ext: tuple.is_ext(),
    };

    let rec = heap.alloc_slice_fill_copy(layout.rec_size(), 0u8);
    let origin = layout.extra;

    if format.is_compact() {
        // High nibble of the info/owned byte carries the info bits.
        rec[origin - 5] = tuple.info_bits() & 0xF0;
    } else {
        let key_end = (REC_BODY_PREFIX + layout.key_len) as u16;
        let payload_end = key_end + layout.payload_len as u16;
        rec[origin - 10..origin - 8].copy_from_slice(&key_end.to_le_bytes());
        rec[origin - 8..origin - 6].copy_from_slice(&payload_end.to_le_bytes());
        rec[origin - 6] = tuple.info_bits();
    }

    rec[origin..origin + 2].copy_from_slice(&(layout.key_len as u16).to_le_bytes());
    rec[origin + 2..origin + 6].copy_from_slice(&(layout.payload_len as u32).to_le_bytes());
    rec[origin + 6] = if layout.ext { REC_FLAG_EXTERN } else { 0 };

    let key_at = origin + REC_BODY_PREFIX;
    rec[key_at..key_at + layout.key_len].copy_from_slice(tuple.key());
    let payload_at = key_at + layout.key_len;
    rec[payload_at..payload_at + layout.payload_len].copy_from_slice(tuple.payload());

    (rec, layout)
}

/// Parses the self-describing body of a user record.
pub fn layout_at(page: &[u8], format: RowFormat, origin: u16) -> RecLayout {
    debug_assert!(!is_sentinel(format, origin));
    let o = origin as usize;
    let key_len = u16::from_le_bytes([page[o], page[o + 1]]) as usize;
    let payload_len = u32::from_le_bytes([page[o + 2], page[o + 3], page[o + 4], page[o + 5]]) as usize;
    RecLayout {
        extra: extra_size(format),
        key_len,
        payload_len,
        ext: page[o + 6] & REC_FLAG_EXTERN != 0,
    }
}

pub fn rec_key<'a>(page: &'a [u8], origin: u16, layout: &RecLayout) -> &'a [u8] {
    let at = origin as usize + REC_BODY_PREFIX;
    &page[at..at + layout.key_len]
}

pub fn rec_payload<'a>(page: &'a [u8], origin: u16, layout: &RecLayout) -> &'a [u8] {
    let at = origin as usize + REC_BODY_PREFIX + layout.key_len;
    &page[at..at + layout.payload_len]
}

/// Page offset of a record's external-field reference (the payload tail).
pub fn extern_ref_offset(origin: u16, layout: &RecLayout) -> usize {
    debug_assert!(layout.ext && layout.payload_len >= EXTERN_REF_SIZE);
    origin as usize + REC_BODY_PREFIX + layout.key_len + layout.payload_len - EXTERN_REF_SIZE
}

// ----------------------------------------------------------------------------
// Extra-header accessors
// ----------------------------------------------------------------------------

/// Encodes a next pointer: absolute offset in the redundant format, signed
/// delta from the origin in the compact formats.
pub fn encode_next(format: RowFormat, origin: u16, target: u16) -> u16 {
    if format.is_compact() {
        (target as i32 - origin as i32) as i16 as u16
    } else {
        target
    }
}

/// Follows a record's next pointer.
pub fn rec_next(page: &[u8], format: RowFormat, origin: u16) -> u16 {
    let at = origin as usize - 2;
    let stored = u16::from_le_bytes([page[at], page[at + 1]]);
    if format.is_compact() {
        (origin as i32 + stored as i16 as i32) as u16
    } else {
        stored
    }
}

pub fn rec_set_next(page: &mut [u8], format: RowFormat, origin: u16, target: u16) {
    let stored = encode_next(format, origin, target);
    let at = origin as usize - 2;
    page[at..at + 2].copy_from_slice(&stored.to_le_bytes());
}

pub fn rec_n_owned(page: &[u8], format: RowFormat, origin: u16) -> usize {
    let o = origin as usize;
    if format.is_compact() {
        (page[o - 5] & 0x0F) as usize
    } else {
        page[o - 5] as usize
    }
}

pub fn rec_set_n_owned(page: &mut [u8], format: RowFormat, origin: u16, n_owned: usize) {
    debug_assert!(n_owned <= 0x0F);
    let o = origin as usize;
    if format.is_compact() {
        page[o - 5] = (page[o - 5] & 0xF0) | n_owned as u8;
    } else {
        page[o - 5] = n_owned as u8;
    }
}

pub fn rec_heap_no(page: &[u8], origin: u16) -> u16 {
    let o = origin as usize;
    u16::from_le_bytes([page[o - 4], page[o - 3]])
}

pub fn rec_set_heap_no(page: &mut [u8], origin: u16, heap_no: u16) {
    let o = origin as usize;
    page[o - 4..o - 2].copy_from_slice(&heap_no.to_le_bytes());
}

pub fn rec_info_bits(page: &[u8], format: RowFormat, origin: u16) -> u8 {
    let o = origin as usize;
    if format.is_compact() {
        page[o - 5] & 0xF0
    } else {
        page[o - 6]
    }
}

// ----------------------------------------------------------------------------
// Size budgets
// ----------------------------------------------------------------------------

/// Largest record the page-local budget accepts before the payload must move
/// to blob pages. Two records must always fit, so the budget is half the
/// empty capacity (or half the compressed target).
pub fn max_local_size(format: RowFormat, zip_target: Option<usize>) -> usize {
    let budget = match zip_target {
        Some(target) => target,
        None => crate::config::empty_capacity(format.is_compact()),
    };
    budget / 2 - extra_size(format) - REC_BODY_PREFIX
}

/// Whether a record of this size needs external storage for its payload.
pub fn needs_ext(format: RowFormat, rec_size: usize, zip_target: Option<usize>) -> bool {
    rec_size > max_local_size(format, zip_target)
}

/// Whether a tuple cannot be stored on a compressed page at all: even with
/// the payload fully external, the remaining record exceeds the budget.
pub fn zip_too_big(format: RowFormat, tuple: &Tuple, zip_target: usize) -> bool {
    debug_assert!(format.is_compressed());
    let min_rec =
        extra_size(format) + REC_BODY_PREFIX + tuple.key().len() + EXTERN_REF_SIZE;
    min_rec > max_local_size(format, Some(zip_target))
}

/// Key comparison: keys are order-preserving byte strings.
pub fn compare_keys(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.cmp(b)
}

/// Reads the external reference out of a record: (first blob page, offset,
/// total length).
pub fn read_extern_ref(page: &[u8], origin: u16, layout: &RecLayout) -> Result<(u32, u32, u64)> {
    ensure!(layout.ext, "record has no external reference");
    let at = extern_ref_offset(origin, layout);
    let page_no = u32::from_le_bytes(page[at..at + 4].try_into()?);
    let offset = u32::from_le_bytes(page[at + 4..at + 8].try_into()?);
    let total = u64::from_le_bytes(page[at + 8..at + 16].try_into()?);
    Ok((page_no, offset, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    fn scratch_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn converted_record_parses_back() {
        let heap = Bump::new();
        let tuple = Tuple::new(b"key-1".to_vec(), b"payload-value".to_vec());
        let (rec, layout) = convert_tuple_in(&heap, RowFormat::Dynamic, &tuple);

        assert_eq!(layout.rec_size(), rec.len());

        // Plant the record on a page the way the builder would.
        let mut page = scratch_page();
        let origin = 2000u16;
        let start = origin as usize - layout.extra;
        page[start..start + rec.len()].copy_from_slice(rec);

        let parsed = layout_at(&page, RowFormat::Dynamic, origin);
        assert_eq!(parsed, layout);
        assert_eq!(rec_key(&page, origin, &parsed), b"key-1");
        assert_eq!(rec_payload(&page, origin, &parsed), b"payload-value");
    }

    #[test]
    fn redundant_records_carry_field_ends() {
        let heap = Bump::new();
        let tuple = Tuple::new(b"ab".to_vec(), b"xyz".to_vec());
        let (rec, layout) = convert_tuple_in(&heap, RowFormat::Redundant, &tuple);

        let origin = layout.extra;
        let key_end = u16::from_le_bytes([rec[origin - 10], rec[origin - 9]]);
        let payload_end = u16::from_le_bytes([rec[origin - 8], rec[origin - 7]]);
        assert_eq!(key_end as usize, REC_BODY_PREFIX + 2);
        assert_eq!(payload_end as usize, REC_BODY_PREFIX + 2 + 3);
    }

    #[test]
    fn next_pointer_encodings_differ_by_format() {
        let mut page = scratch_page();

        // Redundant: absolute offset.
        rec_set_next(&mut page, RowFormat::Redundant, 500, 1200);
        assert_eq!(u16::from_le_bytes([page[498], page[499]]), 1200);
        assert_eq!(rec_next(&page, RowFormat::Redundant, 500), 1200);

        // Dynamic: signed delta, works in both directions.
        rec_set_next(&mut page, RowFormat::Dynamic, 1200, 500);
        let stored = u16::from_le_bytes([page[1198], page[1199]]);
        assert_eq!(stored as i16, -700);
        assert_eq!(rec_next(&page, RowFormat::Dynamic, 1200), 500);
    }

    #[test]
    fn n_owned_shares_the_info_byte_only_when_compact() {
        let mut page = scratch_page();
        let origin = 300u16;

        page[origin as usize - 5] = 0xF0;
        rec_set_n_owned(&mut page, RowFormat::Dynamic, origin, 7);
        assert_eq!(rec_n_owned(&page, RowFormat::Dynamic, origin), 7);
        assert_eq!(rec_info_bits(&page, RowFormat::Dynamic, origin), 0xF0);

        rec_set_n_owned(&mut page, RowFormat::Redundant, origin, 7);
        assert_eq!(rec_n_owned(&page, RowFormat::Redundant, origin), 7);
    }

    #[test]
    fn max_local_size_forces_two_records_per_page() {
        let max = max_local_size(RowFormat::Dynamic, None);
        // Two max-size records plus directory overhead must fit an empty page.
        assert!(2 * (max + extra_size(RowFormat::Dynamic) + REC_BODY_PREFIX)
            <= crate::config::empty_capacity(true));
        assert!(needs_ext(RowFormat::Dynamic, max + 1, None));
        assert!(!needs_ext(RowFormat::Dynamic, max, None));
    }
}
