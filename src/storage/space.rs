//! # Tablespace
//!
//! A tablespace is a bounded sequence of 16KB pages served out of the buffer
//! pool. The allocator hands out pages extent-wise: callers reserve free
//! extents up front, then take single pages; freed pages return to a free
//! list and are reused before the space grows.
//!
//! ## Allocation Discipline
//!
//! ```text
//! 1. reserve_free_extents(n)   -- fails when the space cannot hold n more
//! 2. alloc_page(..)            -- pops the free list or grows the space
//! 3. release_free_extents(n)   -- returns the reservation
//! ```
//!
//! Allocation is redo-logged in the caller's allocation mtr, which commits
//! before the page content mtr. Allocation order therefore never has to
//! match page commit order in the redo stream.
//!
//! Page 0 is the space header and is never handed out.
//!
//! ## Change-Buffer Bitmap
//!
//! Secondary-index leaf pages written by the bulk loader are marked in the
//! change-buffer bitmap as accepting no buffered changes, once per page at
//! commit. The bitmap records the free-space hint alongside, derived from
//! the build's fill factor.
//!
//! ## Thread Safety
//!
//! `Space` is `Send + Sync`; counters are atomic and the free list sits
//! behind a mutex. The loader is the only writer during a build, the
//! structure merely does not depend on that.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::EXTENT_PAGES;
use crate::error::BuildError;

use super::pool::{Block, BufferPool};
use super::redo::Mtr;

/// Per-page change-buffer state written once per committed secondary leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IbufMark {
    /// No deferred changes may be buffered for this page.
    pub buffered_disabled: bool,
    /// Free-space hint: true when the page was packed full (fill factor 100).
    pub no_free_space: bool,
}

/// The change-buffer bitmap, one mark per bulk-loaded leaf page.
#[derive(Debug, Default)]
pub struct ChangeBufferBitmap {
    marks: Mutex<HashMap<u32, IbufMark>>,
}

impl ChangeBufferBitmap {
    /// Disables deferred inserts for a freshly built leaf page.
    pub fn set_bulk_loaded(&self, page_no: u32, packed_full: bool) {
        self.marks.lock().insert(
            page_no,
            IbufMark {
                buffered_disabled: true,
                no_free_space: packed_full,
            },
        );
    }

    pub fn get(&self, page_no: u32) -> Option<IbufMark> {
        self.marks.lock().get(&page_no).copied()
    }

    pub fn len(&self) -> usize {
        self.marks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.lock().is_empty()
    }
}

/// A bounded page space backed by buffer-pool frames.
pub struct Space {
    id: u32,
    pool: Arc<BufferPool>,
    capacity: u32,
    next_page: AtomicU32,
    reserved_extents: AtomicU32,
    free_list: Mutex<Vec<u32>>,
    ibuf: ChangeBufferBitmap,
}

impl Space {
    pub fn new(id: u32, pool: Arc<BufferPool>, capacity: u32) -> Arc<Space> {
        Arc::new(Space {
            id,
            pool,
            capacity,
            next_page: AtomicU32::new(1),
            reserved_extents: AtomicU32::new(0),
            free_list: Mutex::new(Vec::new()),
            ibuf: ChangeBufferBitmap::default(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn ibuf_bitmap(&self) -> &ChangeBufferBitmap {
        &self.ibuf
    }

    /// Pages handed out and not freed.
    pub fn pages_in_use(&self) -> u32 {
        let grown = self.next_page.load(Ordering::Acquire) - 1;
        grown - self.free_list.lock().len() as u32
    }

    /// Reserves headroom for `n` extents. Returns false when the space
    /// cannot hold them, in which case nothing is reserved.
    pub fn reserve_free_extents(&self, n: u32) -> bool {
        let mut reserved = self.reserved_extents.load(Ordering::Acquire);
        loop {
            let needed = (reserved + n) * EXTENT_PAGES + self.pages_in_use();
            if needed > self.capacity {
                return false;
            }
            match self.reserved_extents.compare_exchange_weak(
                reserved,
                reserved + n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => reserved = actual,
            }
        }
    }

    pub fn release_free_extents(&self, n: u32) {
        let prev = self.reserved_extents.fetch_sub(n, Ordering::AcqRel);
        debug_assert!(prev >= n, "releasing more extents than reserved");
    }

    /// Takes one page, reusing freed pages first. The allocation is logged
    /// in `mtr`; the caller latches and initializes the frame in its own
    /// content mtr afterwards.
    pub fn alloc_page(&self, zip_target: Option<usize>, mtr: &mut Mtr) -> Result<Arc<Block>> {
        let page_no = match self.free_list.lock().pop() {
            Some(reused) => reused,
            None => {
                let page_no = self.next_page.fetch_add(1, Ordering::AcqRel);
                if page_no > self.capacity {
                    self.next_page.fetch_sub(1, Ordering::AcqRel);
                    bail!(BuildError::OutOfFileSpace);
                }
                page_no
            }
        };

        let block = self.pool.attach_new(page_no, zip_target)?;
        mtr.log_page_alloc(page_no);
        Ok(block)
    }

    /// Returns a page to the space and drops its frame from the pool.
    pub fn free_page(&self, page_no: u32, mtr: &mut Mtr) {
        self.pool.evict(page_no);
        self.free_list.lock().push(page_no);
        mtr.log_page_free(page_no);
    }
}
