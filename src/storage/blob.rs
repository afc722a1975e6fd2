//! # External Field Storage
//!
//! Payloads too large for in-page storage move to dedicated blob pages. The
//! bulk loader writes them in bulk-insert mode: each blob page gets its own
//! mini-transaction, committed immediately, so the blob sub-records reach
//! the redo stream before the owning record's page commits.
//!
//! ## Blob Page Layout
//!
//! ```text
//! Offset  Size   Field
//! ------  ----   ------------------------------------
//! 0       32     Fil header (page_type = BLOB)
//! 32      4      part_len: payload bytes on this page
//! 36      4      next_page: chain link (FIL_NULL ends)
//! 40      ..     payload part
//! 16376   8      checksum trailer
//! ```
//!
//! ## Reference Patch
//!
//! After the chain is written, the 20-byte external reference at the owning
//! record's payload tail is patched with the first chain page, the data
//! offset and the total length. On uncompressed pages the patch is logged
//! through the owner's mtr; on compressed pages it is an in-memory write
//! captured later by the page image.

use std::sync::Arc;

use eyre::{ensure, Result};
use tracing::debug;

use crate::config::{BLOB_DATA, BLOB_HDR_SIZE, BLOB_PART_CAPACITY, FIL_HEADER_SIZE, FIL_NULL};
use crate::records::codec::{self, RecLayout};
use crate::records::BigRec;

use super::page::{FIL_PAGE_NO, FIL_PAGE_TYPE, FIL_SPACE_ID, PAGE_TYPE_BLOB};
use super::pool::BufferPool;
use super::redo::{BlockHandle, LogSys, Mtr};
use super::space::Space;

const _: () = assert!(BLOB_DATA == FIL_HEADER_SIZE + BLOB_HDR_SIZE);

/// Writes one external field to a chain of blob pages and patches the
/// owner's reference. `logged` is false when the owning page is compressed:
/// the reference patch then stays in memory for the page image to capture.
#[allow(clippy::too_many_arguments)]
pub fn store_big_fields(
    space: &Space,
    log: &Arc<LogSys>,
    index_id: u64,
    owner_mtr: &mut Mtr,
    owner: BlockHandle,
    owner_origin: u16,
    layout: &RecLayout,
    big: &BigRec,
    logged: bool,
) -> Result<()> {
    ensure!(layout.ext, "record carries no external reference to patch");

    let tail = big.tail();
    let chunks: Vec<&[u8]> = tail.chunks(BLOB_PART_CAPACITY).collect();

    // Allocate the whole chain first so every page knows its successor.
    let mut alloc_mtr = Mtr::start(log.clone());
    alloc_mtr.set_modified(index_id);
    let mut blocks = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        match space.alloc_page(None, &mut alloc_mtr) {
            Ok(block) => blocks.push(block),
            Err(err) => {
                alloc_mtr.commit();
                return Err(err);
            }
        }
    }
    alloc_mtr.commit();

    for (i, chunk) in chunks.iter().enumerate() {
        let next = blocks
            .get(i + 1)
            .map(|b| b.page_no())
            .unwrap_or(FIL_NULL);
        let block = &blocks[i];
        let page_no = block.page_no();

        let mut mtr = Mtr::start(log.clone());
        mtr.set_modified(index_id);
        let h = mtr.latch(block.clone());
        mtr.write_u32(h, FIL_PAGE_NO, page_no);
        mtr.write_u16(h, FIL_PAGE_TYPE, PAGE_TYPE_BLOB);
        mtr.write_u32(h, FIL_SPACE_ID, space.id());
        mtr.write_u32(h, FIL_HEADER_SIZE, chunk.len() as u32);
        mtr.write_u32(h, FIL_HEADER_SIZE + 4, next);
        mtr.frame_mut(h)[BLOB_DATA..BLOB_DATA + chunk.len()].copy_from_slice(chunk);
        mtr.log_written(h, BLOB_DATA, chunk.len());
        mtr.commit();
    }

    let first_page = blocks[0].page_no();
    let at = codec::extern_ref_offset(owner_origin, layout);
    if logged {
        owner_mtr.write_u32(owner, at, first_page);
        owner_mtr.write_u32(owner, at + 4, BLOB_DATA as u32);
        owner_mtr.write_u64(owner, at + 8, tail.len() as u64);
    } else {
        let frame = owner_mtr.frame_mut(owner);
        frame[at..at + 4].copy_from_slice(&first_page.to_le_bytes());
        frame[at + 4..at + 8].copy_from_slice(&(BLOB_DATA as u32).to_le_bytes());
        frame[at + 8..at + 16].copy_from_slice(&(tail.len() as u64).to_le_bytes());
    }

    debug!(
        pages = blocks.len(),
        bytes = tail.len(),
        first_page,
        "stored external field"
    );

    Ok(())
}

/// Follows a blob chain and reassembles the external payload tail.
pub fn read_extern(pool: &BufferPool, first_page: u32, total_len: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(total_len as usize);
    let mut page_no = first_page;

    while page_no != FIL_NULL {
        let (part, next) = pool.with_page(page_no, |frame| {
            let part_len = u32::from_le_bytes(
                frame[FIL_HEADER_SIZE..FIL_HEADER_SIZE + 4].try_into().unwrap(),
            ) as usize;
            let next = u32::from_le_bytes(
                frame[FIL_HEADER_SIZE + 4..FIL_HEADER_SIZE + 8].try_into().unwrap(),
            );
            (frame[BLOB_DATA..BLOB_DATA + part_len].to_vec(), next)
        })?;
        out.extend_from_slice(&part);
        page_no = next;
        ensure!(
            out.len() <= total_len as usize,
            "blob chain longer than the stored total length"
        );
    }

    ensure!(
        out.len() == total_len as usize,
        "blob chain ended after {} of {} bytes",
        out.len(),
        total_len
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_SPACE_CAPACITY, PAGE_SIZE};
    use crate::records::{RowFormat, Tuple};
    use bumpalo::Bump;

    #[test]
    fn chain_round_trips_a_multi_page_payload() {
        let pool = BufferPool::new();
        let space = Space::new(1, pool.clone(), DEFAULT_SPACE_CAPACITY);
        let log = LogSys::new();

        // An owner record with an external payload reference.
        let mut tuple = Tuple::new(b"k1".to_vec(), vec![0xCD; 100 * 1024]);
        let big = tuple.convert_big(RowFormat::Dynamic).unwrap();
        let heap = Bump::new();
        let (rec, layout) = codec::convert_tuple_in(&heap, RowFormat::Dynamic, &tuple);

        let mut owner_mtr = Mtr::start(log.clone());
        let owner_block = space.alloc_page(None, &mut owner_mtr).unwrap();
        let owner = owner_mtr.latch(owner_block);
        let origin = 2000u16;
        let start = origin as usize - layout.extra;
        owner_mtr.frame_mut(owner)[start..start + rec.len()].copy_from_slice(rec);

        store_big_fields(
            &space, &log, 7, &mut owner_mtr, owner, origin, &layout, &big, true,
        )
        .unwrap();

        // The reference must now resolve through the pool.
        let (first, offset, total) = {
            let frame = owner_mtr.frame(owner);
            codec::read_extern_ref(frame, origin, &layout).unwrap()
        };
        owner_mtr.commit();

        assert_eq!(offset as usize, BLOB_DATA);
        assert_eq!(total, big.total_len());
        let expected_pages = (100 * 1024 + BLOB_PART_CAPACITY - 1) / BLOB_PART_CAPACITY;
        assert!(expected_pages > 1);

        let tail = read_extern(&pool, first, total).unwrap();
        assert_eq!(tail, big.tail());
    }

    #[test]
    fn blob_pages_are_typed_and_chained() {
        let pool = BufferPool::new();
        let space = Space::new(1, pool.clone(), DEFAULT_SPACE_CAPACITY);
        let log = LogSys::new();

        let mut tuple = Tuple::new(b"k".to_vec(), vec![0xEE; BLOB_PART_CAPACITY + 10]);
        let big = tuple.convert_big(RowFormat::Dynamic).unwrap();
        let heap = Bump::new();
        let (rec, layout) = codec::convert_tuple_in(&heap, RowFormat::Dynamic, &tuple);

        let mut owner_mtr = Mtr::start(log.clone());
        let owner_block = space.alloc_page(None, &mut owner_mtr).unwrap();
        let owner = owner_mtr.latch(owner_block);
        let origin = 500u16;
        let start = origin as usize - layout.extra;
        owner_mtr.frame_mut(owner)[start..start + rec.len()].copy_from_slice(rec);

        store_big_fields(
            &space, &log, 7, &mut owner_mtr, owner, origin, &layout, &big, true,
        )
        .unwrap();
        let (first, _, _) = {
            let frame = owner_mtr.frame(owner);
            codec::read_extern_ref(frame, origin, &layout).unwrap()
        };
        owner_mtr.commit();

        pool.with_page(first, |frame| {
            assert_eq!(
                u16::from_le_bytes([frame[FIL_PAGE_TYPE], frame[FIL_PAGE_TYPE + 1]]),
                PAGE_TYPE_BLOB
            );
            let next = u32::from_le_bytes(
                frame[FIL_HEADER_SIZE + 4..FIL_HEADER_SIZE + 8].try_into().unwrap(),
            );
            assert_ne!(next, FIL_NULL);
            let part = u32::from_le_bytes(
                frame[FIL_HEADER_SIZE..FIL_HEADER_SIZE + 4].try_into().unwrap(),
            ) as usize;
            assert_eq!(part, BLOB_PART_CAPACITY.min(PAGE_SIZE));
        })
        .unwrap();
    }
}
