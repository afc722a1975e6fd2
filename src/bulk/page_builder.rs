//! # Page Builder
//!
//! A [`PageBuilder`] owns one page frame under construction at a given tree
//! level. Records arrive pre-sorted and are appended to the heap in order;
//! the slot directory is materialized once, at [`PageBuilder::finish`], by a
//! single scan of the record chain. On the happy path a finished page never
//! splits.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninit ──init──> InitOpen ──finish──> Finished ──commit(true)──> Committed
//!                   │    ▲                                  └──abort──> Aborted
//!          release  │    │  latch
//!                   ▼    │
//!                 Released
//! ```
//!
//! Only `InitOpen` accepts inserts; only `Finished` accepts a successful
//! commit. `release`/`latch` bracket the checkpoint wait: the mini-
//! transaction commits (dropping the frame latch) while the block stays
//! pinned, and re-latching revalidates through the saved modify clock.
//!
//! ## Space Accounting
//!
//! `free_space` counts heap and directory headroom together. Each insert
//! subtracts the record plus the marginal directory reservation; the
//! fill-factor tail (`reserved_space`) or the compression pad
//! (`padding_space`) closes the page early once at least two records are
//! in, bounding tree height from below.
//!
//! ## Redo Discipline
//!
//! Uncompressed formats log the linked-list stitch and the record body copy
//! per insert, and the directory/header writes at finish. Compressed pages
//! mutate the frame silently; their entire redo is the one image emitted by
//! [`PageBuilder::compress`].

use std::sync::Arc;

use bumpalo::Bump;
use eyre::{ensure, eyre, Result};
use tracing::warn;

use crate::config::{
    BuildConfig, FILL_FACTOR_MAX, FIL_NULL, FIL_PAGE_NEXT, FIL_PAGE_PREV, INDEX_SPACE_RESERVE,
    PAGE_DIR_SLOT_MAX_N_OWNED, PAGE_DIR_SLOT_SIZE, PAGE_HEAP_NO_USER_LOW, PAGE_SIZE, REC_NEXT,
};
use crate::error::BuildError;
use crate::index::IndexDef;
use crate::records::codec::{self, RecLayout};
use crate::records::{BigRec, RowFormat, Tuple};
use crate::storage::blob;
use crate::storage::page::{
    self, DIRECTION_RIGHT, PAGE_DIRECTION, PAGE_HEAP_TOP, PAGE_INDEX_ID, PAGE_LAST_INSERT,
    PAGE_LEVEL, PAGE_MAX_TRX_ID, PAGE_N_DIR_SLOTS, PAGE_N_HEAP, PAGE_N_HEAP_COMPACT, PAGE_N_RECS,
};
use crate::storage::pool::Block;
use crate::storage::redo::{BlockHandle, Mtr};
use crate::storage::zip;
use crate::trx::TrxId;

/// Cursor state of the page under construction.
#[derive(Debug, Clone, Copy)]
struct PagePos {
    /// Origin of the last inserted record, or the infimum.
    cur_rec: u16,
    /// First free heap byte.
    heap_top: u16,
    /// User records inserted so far.
    rec_no: u16,
    /// Heap plus directory headroom remaining.
    free_space: usize,
}

/// Builds one page of a bulk-loaded B-tree.
pub struct PageBuilder {
    index: Arc<IndexDef>,
    config: BuildConfig,
    trx_id: TrxId,
    level: u16,
    page_no: u32,
    fmt: RowFormat,
    block: Option<Arc<Block>>,
    mtr: Option<Mtr>,
    handle: BlockHandle,
    heap: Bump,
    pos: PagePos,
    /// Fill-factor tail kept free on uncompressed pages.
    reserved_space: usize,
    /// Compression-optimism margin kept free on compressed pages.
    padding_space: usize,
    saved_modify_clock: u64,
}

impl PageBuilder {
    /// Binds a builder to an index level. `page_no` is `FIL_NULL` to
    /// allocate a fresh page at `init`, or an existing page to take over.
    pub fn new(
        index: Arc<IndexDef>,
        trx_id: TrxId,
        page_no: u32,
        level: u16,
        config: BuildConfig,
    ) -> PageBuilder {
        let fmt = index.format();
        PageBuilder {
            index,
            config,
            trx_id,
            level,
            page_no,
            fmt,
            block: None,
            mtr: None,
            handle: BlockHandle::default(),
            heap: Bump::new(),
            pos: PagePos {
                cur_rec: codec::infimum_offset(fmt),
                heap_top: page::heap_start(fmt),
                rec_no: 0,
                free_space: 0,
            },
            reserved_space: 0,
            padding_space: 0,
            saved_modify_clock: 0,
        }
    }

    fn mtr(&self) -> &Mtr {
        self.mtr.as_ref().expect("page builder has no open mini-transaction")
    }

    fn mtr_mut(&mut self) -> &mut Mtr {
        self.mtr.as_mut().expect("page builder has no open mini-transaction")
    }

    fn block(&self) -> &Arc<Block> {
        self.block.as_ref().expect("page builder is not initialized")
    }

    pub fn frame(&self) -> &[u8; PAGE_SIZE] {
        self.mtr().frame(self.handle)
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn level(&self) -> u16 {
        self.level
    }

    pub fn rec_no(&self) -> u16 {
        self.pos.rec_no
    }

    pub fn is_compressed(&self) -> bool {
        self.fmt.is_compressed()
    }

    /// Starts the mini-transaction and brings the frame into buildable
    /// shape: allocates a fresh page (through a separate allocation mtr,
    /// committed first) or latches the given one and stamps its level. All
    /// mtrs are committed before returning an error.
    pub fn init(&mut self) -> Result<()> {
        debug_assert!(self.mtr.is_none() && self.block.is_none());

        let index = self.index.clone();
        let space = index.space().clone();
        let mut mtr = Mtr::start(index.log().clone());
        mtr.set_modified(index.id());

        let block = if self.page_no == FIL_NULL {
            // Allocation redo goes through its own mtr: pages are not
            // committed in allocation order, and the allocation must be
            // logged regardless of what happens to this page's content mtr.
            let mut alloc_mtr = Mtr::start(index.log().clone());
            alloc_mtr.set_modified(index.id());

            if !space.reserve_free_extents(1) {
                alloc_mtr.commit();
                mtr.commit();
                return Err(eyre!(BuildError::OutOfFileSpace));
            }
            let block = match space.alloc_page(index.zip_target(), &mut alloc_mtr) {
                Ok(block) => block,
                Err(err) => {
                    space.release_free_extents(1);
                    alloc_mtr.commit();
                    mtr.commit();
                    return Err(err);
                }
            };
            space.release_free_extents(1);
            alloc_mtr.commit();

            let h = mtr.latch(block.clone());
            let page_no = block.page_no();
            page::page_create(mtr.frame_mut(h), self.fmt, page_no, space.id());
            if self.fmt.is_compressed() {
                // In-memory only; the compressed image logs this page.
                let frame = mtr.frame_mut(h);
                let hdr = page::page_header_mut(frame);
                hdr.set_level(self.level);
                hdr.set_index_id(index.id());
            } else {
                mtr.log_page_create(h, self.fmt.is_compact());
                mtr.memset(h, FIL_PAGE_PREV, 8, 0xFF);
                mtr.write_u16_opt(h, PAGE_LEVEL, self.level);
                mtr.write_u64(h, PAGE_INDEX_ID, index.id());
            }
            self.handle = h;
            self.page_no = page_no;
            block
        } else {
            let block = match space.pool().get(self.page_no) {
                Ok(block) => block,
                Err(err) => {
                    mtr.commit();
                    return Err(err);
                }
            };
            let h = mtr.latch(block.clone());
            debug_assert_eq!(mtr.page_no(h), self.page_no);
            debug_assert_eq!(
                page::page_header(mtr.frame(h)).heap_count(),
                PAGE_HEAP_NO_USER_LOW
            );
            if self.fmt.is_compressed() {
                page::page_header_mut(mtr.frame_mut(h)).set_level(self.level);
            } else {
                mtr.write_u16_opt(h, PAGE_LEVEL, self.level);
            }
            self.handle = h;
            block
        };

        if self.level == 0 && !index.is_clustered() {
            if self.fmt.is_compressed() {
                page::page_header_mut(mtr.frame_mut(self.handle)).set_max_trx_id(self.trx_id);
            } else {
                mtr.write_u64(self.handle, PAGE_MAX_TRX_ID, self.trx_id);
            }
        }

        // This frame is inconsistent until finish; the cleaner must not
        // examine it.
        block.set_skip_flush_check(true);

        let hdr = page::page_header(mtr.frame(self.handle));
        self.pos = PagePos {
            cur_rec: codec::infimum_offset(self.fmt),
            heap_top: hdr.heap_top(),
            rec_no: hdr.n_recs(),
            free_space: page::free_space_of_empty(self.fmt),
        };

        self.reserved_space =
            if self.config.fill_factor == FILL_FACTOR_MAX && index.is_clustered() {
                INDEX_SPACE_RESERVE
            } else {
                PAGE_SIZE * (100 - self.config.fill_factor as usize) / 100
            };
        self.padding_space = PAGE_SIZE - index.zip_pad().optimal_page_size();

        self.block = Some(block);
        self.mtr = Some(mtr);
        Ok(())
    }

    /// Converts a tuple in the page arena and appends it. The caller must
    /// have checked `is_space_available` and key order.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let Self {
            ref heap,
            ref mut mtr,
            ref mut pos,
            fmt,
            handle,
            ..
        } = *self;
        let (rec, layout) = codec::convert_tuple_in(heap, fmt, tuple);
        let mtr = mtr.as_mut().expect("page builder has no open mini-transaction");
        insert_rec(mtr, handle, fmt, pos, rec, &layout)
    }

    /// Appends a physical record copied from another page.
    pub(crate) fn insert(&mut self, rec: &[u8], layout: &RecLayout) -> Result<()> {
        let Self {
            ref mut mtr,
            ref mut pos,
            fmt,
            handle,
            ..
        } = *self;
        let mtr = mtr.as_mut().expect("page builder has no open mini-transaction");
        insert_rec(mtr, handle, fmt, pos, rec, layout)
    }

    /// Whether a record of `rec_size` still fits. The fill-factor tail and
    /// the compression pad only apply from the third record on: every page
    /// keeps at least two records so the tree cannot grow tall and thin.
    pub fn is_space_available(&self, rec_size: usize) -> bool {
        let slot_size = page::dir_reserved(self.pos.rec_no as usize + 1)
            - page::dir_reserved(self.pos.rec_no as usize);
        let required = rec_size + slot_size;

        if required > self.pos.free_space {
            debug_assert!(self.pos.rec_no > 0, "a record must fit an empty page");
            return false;
        }

        if self.pos.rec_no >= 2 {
            let tail = if self.fmt.is_compressed() {
                self.padding_space
            } else {
                self.reserved_space
            };
            if self.pos.free_space - required < tail {
                return false;
            }
        }

        true
    }

    /// Whether this record's payload must move to blob pages.
    pub fn needs_ext(&self, rec_size: usize) -> bool {
        codec::needs_ext(self.fmt, rec_size, self.index.zip_target())
    }

    /// Materializes the slot directory by one scan of the record chain and
    /// writes the page-header fields. Kept byte-compatible with what the
    /// ordinary insert path produces: a final partial group that fits the
    /// previous slot is merged back into it.
    pub fn finish(&mut self) -> Result<()> {
        debug_assert!(self.pos.rec_no > 0, "finishing an empty page");

        let Self {
            ref mut mtr,
            ref pos,
            fmt,
            handle,
            ..
        } = *self;
        let mtr = mtr.as_mut().expect("page builder has no open mini-transaction");
        finish_page(mtr, handle, fmt, pos)?;

        self.block().set_skip_flush_check(false);
        Ok(())
    }

    /// Compresses the finished frame into the shadow and emits it as the
    /// page's atomic redo record. False means the records did not fit the
    /// target size and the caller must split.
    pub fn compress(&mut self) -> Result<bool> {
        debug_assert!(self.fmt.is_compressed());
        let target = self
            .block()
            .zip_target()
            .ok_or_else(|| eyre!("compressed index page without a zip shadow"))?;

        let image = zip::compress_frame(self.frame(), self.config.compression_level, target)?;
        self.index.zip_pad().update(image.is_some());

        match image {
            Some(data) => {
                if let Some(shadow) = self.block().zip_shadow() {
                    shadow.lock().data = data.clone();
                }
                let handle = self.handle;
                self.mtr_mut().log_zip_image(handle, data);
                Ok(true)
            }
            None => {
                warn!(
                    page = self.page_no,
                    level = self.level,
                    "page did not compress, splitting"
                );
                Ok(false)
            }
        }
    }

    /// Builds the node pointer for this page: first user key plus page
    /// number, to be inserted one level up.
    pub fn node_ptr(&self) -> Result<Tuple> {
        let frame = self.frame();
        let first = page::first_user_rec(frame, self.fmt)
            .ok_or_else(|| eyre!("an empty page has no node pointer"))?;
        let layout = codec::layout_at(frame, self.fmt, first);
        let key = codec::rec_key(frame, first, &layout).to_vec();
        Ok(Tuple::node_pointer(key, self.page_no))
    }

    /// Finds the record where a failed compression splits the page: the
    /// chain is scanned until the accumulated record plus directory bytes
    /// reach half the used space. At least one record stays on the left.
    pub fn split_rec(&self) -> u16 {
        debug_assert!(self.fmt.is_compressed());
        debug_assert!(self.pos.rec_no >= 2);

        let frame = self.frame();
        let total_used = page::free_space_of_empty(self.fmt) - self.pos.free_space;

        let mut sum = 0usize;
        let mut n = 0usize;
        let mut origin = codec::rec_next(frame, self.fmt, codec::infimum_offset(self.fmt));
        loop {
            let layout = codec::layout_at(frame, self.fmt, origin);
            sum += layout.rec_size();
            n += 1;
            if sum + page::dir_reserved(n) >= total_used / 2 {
                break;
            }
            origin = codec::rec_next(frame, self.fmt, origin);
        }

        if n == 1 {
            origin = codec::rec_next(frame, self.fmt, origin);
            debug_assert!(!codec::is_sentinel(self.fmt, origin));
        }
        origin
    }

    /// Appends every record from `split_rec` through the source page's last
    /// record, in order. The builder must be freshly initialized.
    pub fn copy_in(&mut self, src: &[u8; PAGE_SIZE], split_rec: u16) -> Result<()> {
        debug_assert_eq!(self.pos.rec_no, 0);
        let supremum = codec::supremum_offset(self.fmt);

        let mut origin = split_rec;
        while origin != supremum {
            let layout = codec::layout_at(src, self.fmt, origin);
            let start = origin as usize - layout.extra;
            let end = origin as usize + layout.body();
            self.insert(&src[start..end], &layout)?;
            origin = codec::rec_next(src, self.fmt, origin);
        }

        debug_assert!(self.pos.rec_no > 0);
        Ok(())
    }

    /// Drops every record from `split_rec` onward: the predecessor links
    /// straight to the supremum and the cursor accounting rolls back. Slot
    /// directory adjustment waits for the next `finish`.
    pub fn copy_out(&mut self, split_rec: u16) -> Result<()> {
        let Self {
            ref mut mtr,
            ref mut pos,
            fmt,
            handle,
            ..
        } = *self;
        let mtr = mtr.as_mut().expect("page builder has no open mini-transaction");

        let infimum = codec::infimum_offset(fmt);
        let supremum = codec::supremum_offset(fmt);

        let frame = mtr.frame(handle);
        let mut n = 0u16;
        let mut prev = infimum;
        let mut origin = codec::rec_next(frame, fmt, prev);
        while origin != split_rec {
            debug_assert!(origin != supremum, "split record is not on the page");
            prev = origin;
            n += 1;
            origin = codec::rec_next(frame, fmt, origin);
        }
        ensure!(n > 0, "cannot move every record off the page");

        let mut last = split_rec;
        loop {
            let next = codec::rec_next(frame, fmt, last);
            if next == supremum {
                break;
            }
            last = next;
        }
        let last_end = codec::layout_at(frame, fmt, last).end(last);
        let prev_end = codec::layout_at(frame, fmt, prev).end(prev);

        // Only compressed pages split; the stitch stays in memory.
        codec::rec_set_next(mtr.frame_mut(handle), fmt, prev, supremum);

        let old_rec_no = pos.rec_no;
        pos.cur_rec = prev;
        pos.heap_top = prev_end;
        pos.free_space += (last_end - prev_end) as usize + page::dir_reserved(old_rec_no as usize)
            - page::dir_reserved(n as usize);
        pos.rec_no = n;
        Ok(())
    }

    pub fn set_next(&mut self, next_page_no: u32) {
        let handle = self.handle;
        if self.fmt.is_compressed() {
            // Captured by the next compress().
            let frame = self.mtr_mut().frame_mut(handle);
            page::fil_header_mut(frame).set_next(next_page_no);
        } else {
            self.mtr_mut().write_u32(handle, FIL_PAGE_NEXT, next_page_no);
        }
    }

    pub fn set_prev(&mut self, prev_page_no: u32) {
        let handle = self.handle;
        if self.fmt.is_compressed() {
            let frame = self.mtr_mut().frame_mut(handle);
            page::fil_header_mut(frame).set_prev(prev_page_no);
        } else {
            self.mtr_mut().write_u32(handle, FIL_PAGE_PREV, prev_page_no);
        }
    }

    /// Writes the external payload of the record at the cursor to blob
    /// pages. The blob sub-records are logged first, in their own mtrs; the
    /// owning record's reference patch rides this page's mtr.
    pub fn store_ext(&mut self, big: &BigRec) -> Result<()> {
        debug_assert!(self.index.is_clustered() && self.level == 0);

        let layout = codec::layout_at(self.frame(), self.fmt, self.pos.cur_rec);
        let logged = !self.fmt.is_compressed();
        let index = self.index.clone();

        let Self {
            ref mut mtr,
            ref pos,
            handle,
            ..
        } = *self;
        let mtr = mtr.as_mut().expect("page builder has no open mini-transaction");
        blob::store_big_fields(
            index.space(),
            index.log(),
            index.id(),
            mtr,
            handle,
            pos.cur_rec,
            &layout,
            big,
            logged,
        )?;

        // Re-check the record position after the blob write; the blob path
        // leaves this block bound as-is.
        debug_assert_eq!(self.mtr().page_no(self.handle), self.page_no);
        debug_assert!(self.pos.cur_rec < self.pos.heap_top);
        Ok(())
    }

    /// Commits the mtr while keeping the block pinned, so the frame can be
    /// re-latched after a checkpoint wait. Required before `log_free_check`:
    /// waiting on the redo log with latches held would deadlock the flusher.
    pub fn release(&mut self) {
        let block = self.block().clone();
        block.fix_inc();
        if let Some(mtr) = self.mtr.take() {
            mtr.commit();
        }
        // Sampled with the latch dropped: whoever touches the block from
        // here on invalidates the optimistic re-latch.
        self.saved_modify_clock = block.modify_clock();
    }

    /// Re-opens the mtr and re-latches the block: optimistically through
    /// the saved modify clock, else through a page-table lookup.
    pub fn latch(&mut self) -> Result<()> {
        let index = self.index.clone();
        let mut mtr = Mtr::start(index.log().clone());
        mtr.set_modified(index.id());

        let pinned = self.block().clone();
        let pool = index.space().pool();
        let block = if pool.optimistic_get(&pinned, self.saved_modify_clock) {
            pinned.clone()
        } else {
            match pool.get(self.page_no) {
                Ok(block) => block,
                Err(err) => {
                    mtr.commit();
                    pinned.fix_dec();
                    return Err(err);
                }
            }
        };

        self.handle = mtr.latch(block.clone());
        pinned.fix_dec();

        self.block = Some(block);
        self.mtr = Some(mtr);

        debug_assert!(self.pos.cur_rec < self.pos.heap_top);
        Ok(())
    }

    /// Commits the page mtr. On success the page must validate, and a
    /// secondary-index leaf gets its change-buffer mark. `commit(false)`
    /// releases the mtr without the finalization side effects; the page is
    /// reclaimed by the surrounding DDL rollback.
    pub fn commit(&mut self, success: bool) {
        if success {
            #[cfg(debug_assertions)]
            page::validate_page(self.frame(), self.fmt).expect("finished page failed validation");

            if !self.index.is_clustered() && self.level == 0 {
                self.index.space().ibuf_bitmap().set_bulk_loaded(
                    self.page_no,
                    self.config.fill_factor == FILL_FACTOR_MAX,
                );
            }
        }

        if let Some(mtr) = self.mtr.take() {
            mtr.commit();
        }
    }

    pub fn abort(&mut self) {
        self.commit(false);
    }

    /// Marks the block modified without writing. A page that went through a
    /// release/latch cycle since its last write would otherwise commit an
    /// mtr that never observed it dirty.
    pub fn mark_mtr_modified(&mut self) {
        let handle = self.handle;
        self.mtr_mut().set_block_modified(handle);
    }
}

/// Appends one record: copy to the heap, stitch the chain, stamp the heap
/// number, log what the format requires, advance the cursor.
fn insert_rec(
    mtr: &mut Mtr,
    h: BlockHandle,
    fmt: RowFormat,
    pos: &mut PagePos,
    rec: &[u8],
    layout: &RecLayout,
) -> Result<()> {
    let rec_size = layout.rec_size();
    debug_assert_eq!(rec.len(), rec_size);

    let heap_at = pos.heap_top as usize;
    let origin = (heap_at + layout.extra) as u16;

    {
        let frame = mtr.frame_mut(h);
        frame[heap_at..heap_at + rec_size].copy_from_slice(rec);

        #[cfg(debug_assertions)]
        if !codec::is_sentinel(fmt, pos.cur_rec) {
            let prev_layout = codec::layout_at(frame, fmt, pos.cur_rec);
            let prev_key = codec::rec_key(frame, pos.cur_rec, &prev_layout);
            let new_key = codec::rec_key(frame, origin, layout);
            debug_assert!(
                codec::compare_keys(prev_key, new_key) == std::cmp::Ordering::Less,
                "records must arrive in strictly ascending key order"
            );
        }

        // The new record inherits the cursor's successor (the supremum on
        // the append path) before the cursor is re-pointed.
        let next_target = codec::rec_next(frame, fmt, pos.cur_rec);
        codec::rec_set_next(frame, fmt, origin, next_target);
        codec::rec_set_heap_no(frame, origin, PAGE_HEAP_NO_USER_LOW + pos.rec_no);
        codec::rec_set_n_owned(frame, fmt, origin, 0);
    }

    let stored_next = codec::encode_next(fmt, pos.cur_rec, origin);
    if fmt.is_compressed() {
        let at = pos.cur_rec as usize - REC_NEXT;
        mtr.frame_mut(h)[at..at + 2].copy_from_slice(&stored_next.to_le_bytes());
    } else {
        mtr.write_u16(h, pos.cur_rec as usize - REC_NEXT, stored_next);
    }

    if !fmt.is_compressed() {
        // One record covers the body copy and the new record's own header.
        mtr.log_written(h, heap_at, rec_size);
    }

    let slot_delta =
        page::dir_reserved(pos.rec_no as usize + 1) - page::dir_reserved(pos.rec_no as usize);
    debug_assert!(pos.free_space >= rec_size + slot_delta);
    debug_assert!(heap_at + rec_size < PAGE_SIZE - crate::config::PAGE_DIR);

    pos.free_space -= rec_size + slot_delta;
    pos.heap_top += rec_size as u16;
    pos.rec_no += 1;
    pos.cur_rec = origin;
    Ok(())
}

fn set_n_owned(mtr: &mut Mtr, h: BlockHandle, fmt: RowFormat, origin: u16, n_owned: usize) {
    if fmt.is_compressed() {
        codec::rec_set_n_owned(mtr.frame_mut(h), fmt, origin, n_owned);
    } else {
        let at = origin as usize - 5;
        let value = if fmt.is_compact() {
            (mtr.frame(h)[at] & 0xF0) | n_owned as u8
        } else {
            n_owned as u8
        };
        mtr.write_u8(h, at, value);
    }
}

/// One scan from infimum to supremum: emit a slot every (MAX+1)/2 records,
/// then settle the final group and the header fields.
fn finish_page(mtr: &mut Mtr, h: BlockHandle, fmt: RowFormat, pos: &PagePos) -> Result<()> {
    let compressed = fmt.is_compressed();
    let infimum = codec::infimum_offset(fmt);
    let supremum = codec::supremum_offset(fmt);
    let group_size = (PAGE_DIR_SLOT_MAX_N_OWNED + 1) / 2;

    let slot0 = page::dir_slot_offset(0);
    let mut slot = slot0;
    let mut count = 0usize;
    let mut n_recs = 0usize;

    let mut origin = codec::rec_next(mtr.frame(h), fmt, infimum);
    while origin != supremum {
        debug_assert!(origin >= page::heap_start(fmt) && (origin as usize) < slot);
        count += 1;
        n_recs += 1;

        if count == group_size {
            slot -= PAGE_DIR_SLOT_SIZE;
            if compressed {
                mtr.frame_mut(h)[slot..slot + 2].copy_from_slice(&origin.to_le_bytes());
            } else {
                mtr.write_u16_opt(h, slot, origin);
            }
            set_n_owned(mtr, h, fmt, origin, count);
            count = 0;
        }

        origin = codec::rec_next(mtr.frame(h), fmt, origin);
    }
    debug_assert_eq!(n_recs, pos.rec_no as usize);

    if slot != slot0 && count + 1 + group_size <= PAGE_DIR_SLOT_MAX_N_OWNED {
        // Merge the final partial group into the last emitted slot, so the
        // directory is identical to one built by ordinary inserts.
        count += group_size;
        let frame = mtr.frame(h);
        let owner = u16::from_le_bytes([frame[slot], frame[slot + 1]]);
        set_n_owned(mtr, h, fmt, owner, 0);
    } else {
        slot -= PAGE_DIR_SLOT_SIZE;
    }

    if compressed {
        mtr.frame_mut(h)[slot..slot + 2].copy_from_slice(&supremum.to_le_bytes());
    } else {
        mtr.write_u16_opt(h, slot, supremum);
    }
    set_n_owned(mtr, h, fmt, supremum, count + 1);

    let n_dir_slots = 1 + (slot0 - slot) / PAGE_DIR_SLOT_SIZE;
    let n_heap = (PAGE_HEAP_NO_USER_LOW + pos.rec_no)
        | if fmt.is_compact() { PAGE_N_HEAP_COMPACT } else { 0 };

    if compressed {
        // Header redo comes from the compressed image.
        let frame = mtr.frame_mut(h);
        let hdr = page::page_header_mut(frame);
        hdr.set_n_dir_slots(n_dir_slots as u16);
        hdr.set_heap_top(pos.heap_top);
        hdr.set_n_heap(n_heap);
        hdr.set_n_recs(pos.rec_no);
        hdr.set_last_insert(pos.cur_rec);
        hdr.set_direction(DIRECTION_RIGHT);
    } else {
        mtr.write_u16_opt(h, PAGE_N_DIR_SLOTS, n_dir_slots as u16);
        mtr.write_u16(h, PAGE_HEAP_TOP, pos.heap_top);
        mtr.write_u16(h, PAGE_N_HEAP, n_heap);
        mtr.write_u16(h, PAGE_N_RECS, pos.rec_no);
        mtr.write_u16(h, PAGE_LAST_INSERT, pos.cur_rec);
        mtr.write_u16(h, PAGE_DIRECTION, DIRECTION_RIGHT);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SPACE_CAPACITY;
    use crate::storage::pool::BufferPool;
    use crate::storage::redo::LogSys;
    use crate::storage::space::Space;

    fn builder_for(format: RowFormat) -> PageBuilder {
        let pool = BufferPool::new();
        let space = Space::new(1, pool, DEFAULT_SPACE_CAPACITY);
        let log = LogSys::new();
        let zip_target = format.is_compressed().then_some(8192);
        let index =
            IndexDef::create("t_pk", space, log, format, true, zip_target).unwrap();
        PageBuilder::new(index, 42, FIL_NULL, 0, BuildConfig::default())
    }

    fn tuple(i: u32, payload_len: usize) -> Tuple {
        Tuple::new(i.to_be_bytes().to_vec(), vec![0xA5; payload_len])
    }

    #[test]
    fn ten_records_build_three_slots() {
        let mut pb = builder_for(RowFormat::Dynamic);
        pb.init().unwrap();

        for i in 0..10 {
            let t = tuple(i, 10);
            assert!(pb.is_space_available(codec::converted_size(RowFormat::Dynamic, &t)));
            pb.insert_tuple(&t).unwrap();
        }
        pb.finish().unwrap();

        let frame = pb.frame();
        let hdr = page::page_header(frame);
        assert_eq!(hdr.n_recs(), 10);
        assert_eq!(hdr.heap_count(), 12);
        // infimum slot, one group of 4, supremum owning the merged tail of 7.
        assert_eq!(hdr.n_dir_slots(), 3);
        let supremum = codec::supremum_offset(RowFormat::Dynamic);
        assert_eq!(codec::rec_n_owned(frame, RowFormat::Dynamic, supremum), 7);
        page::validate_page(frame, RowFormat::Dynamic).unwrap();

        pb.commit(true);
    }

    #[test]
    fn single_record_page_finishes_like_the_insert_path() {
        let mut pb = builder_for(RowFormat::Redundant);
        pb.init().unwrap();
        pb.insert_tuple(&tuple(1, 8)).unwrap();
        pb.finish().unwrap();

        let frame = pb.frame();
        assert_eq!(page::page_header(frame).n_dir_slots(), 2);
        let supremum = codec::supremum_offset(RowFormat::Redundant);
        assert_eq!(codec::rec_n_owned(frame, RowFormat::Redundant, supremum), 2);
        page::validate_page(frame, RowFormat::Redundant).unwrap();
        pb.commit(true);
    }

    #[test]
    fn fill_factor_tail_closes_the_page_after_two_records() {
        let pool = BufferPool::new();
        let space = Space::new(1, pool, DEFAULT_SPACE_CAPACITY);
        let log = LogSys::new();
        let index =
            IndexDef::create("half", space, log, RowFormat::Dynamic, true, None).unwrap();
        let config = BuildConfig {
            fill_factor: 50,
            ..Default::default()
        };
        let mut pb = PageBuilder::new(index, 1, FIL_NULL, 0, config);
        pb.init().unwrap();

        let t = tuple(0, 200);
        let rec_size = codec::converted_size(RowFormat::Dynamic, &t);
        let mut inserted = 0usize;
        let mut i = 0u32;
        while pb.is_space_available(rec_size) {
            pb.insert_tuple(&tuple(i, 200)).unwrap();
            inserted += 1;
            i += 1;
        }

        // Roughly half the page, never less than two records.
        let used: usize = inserted * (rec_size + 1);
        assert!(inserted >= 2);
        assert!(used <= PAGE_SIZE * 55 / 100);
        assert!(used >= PAGE_SIZE * 40 / 100);

        pb.finish().unwrap();
        pb.commit(true);
    }

    #[test]
    fn release_and_latch_preserve_the_bytes() {
        let mut pb = builder_for(RowFormat::Dynamic);
        pb.init().unwrap();
        for i in 0..5 {
            pb.insert_tuple(&tuple(i, 16)).unwrap();
        }

        let before = *pb.frame();
        pb.release();
        pb.latch().unwrap();
        assert_eq!(&before[..], &pb.frame()[..]);

        // Inserting after the cycle behaves as if it never happened.
        pb.insert_tuple(&tuple(5, 16)).unwrap();
        pb.finish().unwrap();
        assert_eq!(page::page_n_recs(pb.frame()), 6);
        pb.commit(true);
    }

    #[test]
    fn copy_out_rewinds_the_cursor_accounting() {
        let mut pb = builder_for(RowFormat::Compressed);
        pb.init().unwrap();
        for i in 0..8 {
            pb.insert_tuple(&tuple(i, 64)).unwrap();
        }

        let split = pb.split_rec();
        let frame_before = *pb.frame();
        let split_layout = codec::layout_at(&frame_before, RowFormat::Compressed, split);
        assert!(!split_layout.ext);

        let free_before = pb.pos.free_space;
        pb.copy_out(split).unwrap();

        assert!(pb.pos.rec_no >= 1 && pb.pos.rec_no < 8);
        assert!(pb.pos.free_space > free_before);
        // The remaining chain ends at the supremum.
        let frame = pb.frame();
        let mut origin =
            codec::rec_next(frame, RowFormat::Compressed, codec::infimum_offset(RowFormat::Compressed));
        let mut seen = 0;
        while origin != codec::supremum_offset(RowFormat::Compressed) {
            seen += 1;
            origin = codec::rec_next(frame, RowFormat::Compressed, origin);
        }
        assert_eq!(seen, pb.pos.rec_no);
        pb.commit(false);
    }
}
