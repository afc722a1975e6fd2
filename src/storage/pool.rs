//! # Buffer Pool
//!
//! Page frames live in buffer-pool blocks. A block pairs the 16KB frame with
//! the bookkeeping the bulk loader depends on: a pin count, a modify clock,
//! and the flush-check bypass flag.
//!
//! ## Pin/Latch Protocol
//!
//! A mini-transaction X-latches a block by taking the frame lock for its
//! whole lifetime; committing the mtr releases it. Between mtrs a block can
//! be kept alive cheaply by bumping its pin count (`fix_inc`), which keeps
//! the cleaner from stealing the frame without holding any latch.
//!
//! ## Modify Clock
//!
//! Every mtr commit that touched a block bumps its modify clock. A caller
//! that released its latch can re-latch optimistically: if the clock still
//! matches the value saved at release, the block is unchanged and the latch
//! is re-granted without a page-table lookup. On a mismatch the caller falls
//! back to [`BufferPool::get`].
//!
//! ## Flush-Check Bypass
//!
//! Pages under bulk construction are internally inconsistent until their
//! directory is finalized. The `skip_flush_check` flag tells the page
//! cleaner not to examine such frames; the page builder sets it at init and
//! clears it at finish.
//!
//! ## Compressed Shadows
//!
//! Blocks of compressed indexes carry a shadow buffer holding the latest
//! compressed image of the frame, produced at page finalize.
//!
//! ## Thread Safety
//!
//! `BufferPool` is `Send + Sync`; the page table hides behind a `RwLock` and
//! all per-block state is atomic. Frame content is protected by the
//! per-block frame lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::config::PAGE_SIZE;

pub type FrameBuf = Box<[u8; PAGE_SIZE]>;

/// Shadow buffer holding the compressed image of a frame.
#[derive(Debug, Default)]
pub struct ZipShadow {
    pub data: Vec<u8>,
}

/// A pinned page frame plus its control state.
pub struct Block {
    page_no: u32,
    frame: Arc<RwLock<FrameBuf>>,
    buf_fix: AtomicU32,
    modify_clock: AtomicU64,
    skip_flush_check: AtomicBool,
    dirty: AtomicBool,
    zip: Option<(usize, Mutex<ZipShadow>)>,
}

impl Block {
    fn new(page_no: u32, zip_target: Option<usize>) -> Self {
        Self {
            page_no,
            frame: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
            buf_fix: AtomicU32::new(0),
            modify_clock: AtomicU64::new(0),
            skip_flush_check: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            zip: zip_target.map(|target| (target, Mutex::new(ZipShadow::default()))),
        }
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub(crate) fn frame_lock(&self) -> &Arc<RwLock<FrameBuf>> {
        &self.frame
    }

    /// Runs a closure over the frame under a shared latch.
    pub fn with_frame<R>(&self, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> R {
        let guard = self.frame.read();
        f(&guard)
    }

    pub fn fix_inc(&self) {
        self.buf_fix.fetch_add(1, Ordering::AcqRel);
    }

    pub fn fix_dec(&self) {
        let prev = self.buf_fix.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "fix_dec on an unpinned block");
    }

    pub fn fix_count(&self) -> u32 {
        self.buf_fix.load(Ordering::Acquire)
    }

    pub fn modify_clock(&self) -> u64 {
        self.modify_clock.load(Ordering::Acquire)
    }

    pub(crate) fn bump_modify_clock(&self) {
        self.modify_clock.fetch_add(1, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn set_skip_flush_check(&self, on: bool) {
        self.skip_flush_check.store(on, Ordering::Release);
    }

    pub fn skip_flush_check(&self) -> bool {
        self.skip_flush_check.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Compressed-page target size, if this block carries a shadow.
    pub fn zip_target(&self) -> Option<usize> {
        self.zip.as_ref().map(|(target, _)| *target)
    }

    pub fn zip_shadow(&self) -> Option<&Mutex<ZipShadow>> {
        self.zip.as_ref().map(|(_, shadow)| shadow)
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("page_no", &self.page_no)
            .field("fix", &self.fix_count())
            .field("modify_clock", &self.modify_clock())
            .finish()
    }
}

/// The shared pool of page frames, keyed by page number.
pub struct BufferPool {
    pages: RwLock<HashMap<u32, Arc<Block>>>,
    cleaner_pokes: AtomicU64,
}

impl BufferPool {
    pub fn new() -> Arc<BufferPool> {
        Arc::new(BufferPool {
            pages: RwLock::new(HashMap::new()),
            cleaner_pokes: AtomicU64::new(0),
        })
    }

    /// Registers a freshly allocated page.
    pub fn attach_new(&self, page_no: u32, zip_target: Option<usize>) -> Result<Arc<Block>> {
        let mut pages = self.pages.write();
        ensure!(
            !pages.contains_key(&page_no),
            "page {} already lives in the pool",
            page_no
        );
        let block = Arc::new(Block::new(page_no, zip_target));
        pages.insert(page_no, block.clone());
        Ok(block)
    }

    /// Page-table lookup, the slow re-latch path.
    pub fn get(&self, page_no: u32) -> Result<Arc<Block>> {
        self.pages
            .read()
            .get(&page_no)
            .cloned()
            .ok_or_else(|| eyre!("page {} not in the buffer pool", page_no))
    }

    /// Optimistic re-latch check: the saved modify clock still matching
    /// means no one touched the block since release, so the existing block
    /// pointer stays valid. The bulk loader is the only writer of its pages,
    /// so checking before re-latching is race-free here.
    pub fn optimistic_get(&self, block: &Arc<Block>, modify_clock: u64) -> bool {
        block.modify_clock() == modify_clock
    }

    pub fn evict(&self, page_no: u32) {
        self.pages.write().remove(&page_no);
    }

    pub fn contains(&self, page_no: u32) -> bool {
        self.pages.read().contains_key(&page_no)
    }

    /// Wakes the page cleaner to start flushing dirty frames. The cleaner is
    /// external; the pool just counts the pokes.
    pub fn poke_cleaner(&self) {
        self.cleaner_pokes.fetch_add(1, Ordering::AcqRel);
    }

    pub fn cleaner_pokes(&self) -> u64 {
        self.cleaner_pokes.load(Ordering::Acquire)
    }

    /// Runs a closure over a page's frame under a shared latch.
    pub fn with_page<R>(&self, page_no: u32, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> Result<R> {
        let block = self.get(page_no)?;
        Ok(block.with_frame(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_get_and_evict() {
        let pool = BufferPool::new();
        let block = pool.attach_new(5, None).unwrap();
        assert_eq!(block.page_no(), 5);
        assert!(pool.attach_new(5, None).is_err());

        let again = pool.get(5).unwrap();
        assert!(Arc::ptr_eq(&block, &again));

        pool.evict(5);
        assert!(pool.get(5).is_err());
    }

    #[test]
    fn optimistic_get_fails_after_modification() {
        let pool = BufferPool::new();
        let block = pool.attach_new(1, None).unwrap();

        let clock = block.modify_clock();
        assert!(pool.optimistic_get(&block, clock));

        block.bump_modify_clock();
        assert!(!pool.optimistic_get(&block, clock));
        assert!(pool.optimistic_get(&block, block.modify_clock()));
    }

    #[test]
    fn fix_count_tracks_pins() {
        let pool = BufferPool::new();
        let block = pool.attach_new(2, None).unwrap();
        block.fix_inc();
        block.fix_inc();
        assert_eq!(block.fix_count(), 2);
        block.fix_dec();
        assert_eq!(block.fix_count(), 1);
        block.fix_dec();
    }

    #[test]
    fn zip_shadow_only_on_compressed_blocks() {
        let pool = BufferPool::new();
        let plain = pool.attach_new(1, None).unwrap();
        assert!(plain.zip_shadow().is_none());

        let zipped = pool.attach_new(2, Some(8192)).unwrap();
        assert_eq!(zipped.zip_target(), Some(8192));
        assert!(zipped.zip_shadow().is_some());
    }
}
