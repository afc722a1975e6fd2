//! # Mini-Transactions and the Redo Log
//!
//! A mini-transaction (mtr) is the smallest atomic unit of redo: a set of
//! typed page writes that commit together. The bulk loader keeps one mtr
//! open per page under construction; every durable mutation of a frame goes
//! through the mtr so the redo stream and the frame never diverge.
//!
//! ## Write Modes
//!
//! Three modes cover everything the loader needs:
//!
//! - **Logged writes** (`write_u8..write_u64`, `memset`, `log_written`):
//!   applied to the frame and appended to the mtr's batch.
//! - **Optional writes** (`write_u16_opt`, `write_u32_opt`): compared
//!   against the pre-image and dropped when the byte range already matches.
//!   Used for directory slots and header fields that are often unchanged.
//! - **Unlogged writes** (through `frame_mut`): mutate the frame only.
//!   Compressed pages use these for record and header mutations; their redo
//!   is the single compressed image emitted at page finalize.
//!
//! ## Commit
//!
//! `commit` frames the batch, checksums it with CRC-64 and appends it to the
//! shared [`LogSys`] buffer in one step, then bumps the modify clock of
//! every touched block and releases all latches. Batches are therefore
//! totally ordered by their append position, and a batch referencing a child
//! page always precedes the parent's batch that points at it.
//!
//! ## Backpressure
//!
//! The redo subsystem signals checkpoint pressure through a flag the loader
//! polls between leaf pages. Waiting for checkpoint room may block, so the
//! caller must hold no latches; the loader releases every open page first
//! and re-latches afterwards.
//!
//! ## Frame Format
//!
//! ```text
//! RedoBatch
//! +----------+---------------------+-------------+
//! | index_id | writes[]            | crc64       |
//! +----------+---------------------+-------------+
//! ```
//!
//! The checksum covers the serialized writes with CRC-64/ECMA.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crc::{Crc, CRC_64_ECMA_182};
use eyre::Result;
use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{Mutex, RawRwLock};
use smallvec::SmallVec;

use crate::config::PAGE_SIZE;

use super::pool::{Block, FrameBuf};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// One typed redo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoWrite {
    /// Raw bytes written at a page offset.
    Bytes {
        page_no: u32,
        offset: u16,
        bytes: SmallVec<[u8; 8]>,
    },
    /// A byte-fill at a page offset.
    Memset {
        page_no: u32,
        offset: u16,
        len: u16,
        value: u8,
    },
    /// An index page was initialized empty.
    PageCreate { page_no: u32, compact: bool },
    /// A page was taken from the tablespace allocator.
    PageAlloc { page_no: u32 },
    /// A page was returned to the tablespace allocator.
    PageFree { page_no: u32 },
    /// Full compressed image of a finalized page.
    ZipImage { page_no: u32, data: Vec<u8> },
}

impl RedoWrite {
    fn fold_into(&self, digest: &mut crc::Digest<'_, u64>) {
        match self {
            RedoWrite::Bytes {
                page_no,
                offset,
                bytes,
            } => {
                digest.update(&[0x01]);
                digest.update(&page_no.to_le_bytes());
                digest.update(&offset.to_le_bytes());
                digest.update(bytes);
            }
            RedoWrite::Memset {
                page_no,
                offset,
                len,
                value,
            } => {
                digest.update(&[0x02]);
                digest.update(&page_no.to_le_bytes());
                digest.update(&offset.to_le_bytes());
                digest.update(&len.to_le_bytes());
                digest.update(&[*value]);
            }
            RedoWrite::PageCreate { page_no, compact } => {
                digest.update(&[0x03]);
                digest.update(&page_no.to_le_bytes());
                digest.update(&[*compact as u8]);
            }
            RedoWrite::PageAlloc { page_no } => {
                digest.update(&[0x04]);
                digest.update(&page_no.to_le_bytes());
            }
            RedoWrite::PageFree { page_no } => {
                digest.update(&[0x05]);
                digest.update(&page_no.to_le_bytes());
            }
            RedoWrite::ZipImage { page_no, data } => {
                digest.update(&[0x06]);
                digest.update(&page_no.to_le_bytes());
                digest.update(data);
            }
        }
    }
}

/// One committed mini-transaction in the redo buffer.
#[derive(Debug, Clone)]
pub struct RedoBatch {
    pub index_id: u64,
    pub writes: Vec<RedoWrite>,
    pub checksum: u64,
}

/// The shared redo subsystem: an append-only batch buffer plus the
/// checkpoint backpressure flag.
pub struct LogSys {
    batches: Mutex<Vec<RedoBatch>>,
    check_flush_or_checkpoint: AtomicBool,
}

impl LogSys {
    pub fn new() -> Arc<LogSys> {
        Arc::new(LogSys {
            batches: Mutex::new(Vec::new()),
            check_flush_or_checkpoint: AtomicBool::new(false),
        })
    }

    fn append(&self, batch: RedoBatch) {
        self.batches.lock().push(batch);
    }

    /// Whether the redo log wants a checkpoint before more latches pile up.
    pub fn checkpoint_needed(&self) -> bool {
        self.check_flush_or_checkpoint.load(Ordering::Acquire)
    }

    /// Raises the backpressure flag; normally the redo flusher's job.
    pub fn request_checkpoint(&self) {
        self.check_flush_or_checkpoint.store(true, Ordering::Release);
    }

    /// Blocks until the log has room again. Callers must hold no page
    /// latches. Here the wait is represented by clearing the flag; the
    /// flusher that would block us lives outside this crate.
    pub fn wait_for_checkpoint_room(&self) {
        self.check_flush_or_checkpoint.store(false, Ordering::Release);
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn snapshot(&self) -> Vec<RedoBatch> {
        self.batches.lock().clone()
    }
}

/// Handle to a block latched inside an mtr.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle(usize);

struct Latched {
    block: Arc<Block>,
    guard: ArcRwLockWriteGuard<RawRwLock, FrameBuf>,
    modified: bool,
}

/// An open mini-transaction: exclusive latches on the blocks it mutates and
/// the batch of typed writes to emit at commit.
pub struct Mtr {
    log: Arc<LogSys>,
    index_id: u64,
    latched: Vec<Latched>,
    writes: Vec<RedoWrite>,
}

impl Mtr {
    pub fn start(log: Arc<LogSys>) -> Mtr {
        Mtr {
            log,
            index_id: 0,
            latched: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Registers the index whose pages this mtr modifies.
    pub fn set_modified(&mut self, index_id: u64) {
        self.index_id = index_id;
    }

    /// X-latches a block for the lifetime of this mtr.
    pub fn latch(&mut self, block: Arc<Block>) -> BlockHandle {
        let guard = block.frame_lock().write_arc();
        self.latched.push(Latched {
            block,
            guard,
            modified: false,
        });
        BlockHandle(self.latched.len() - 1)
    }

    pub fn page_no(&self, h: BlockHandle) -> u32 {
        self.latched[h.0].block.page_no()
    }

    pub fn block(&self, h: BlockHandle) -> &Arc<Block> {
        &self.latched[h.0].block
    }

    pub fn frame(&self, h: BlockHandle) -> &[u8; PAGE_SIZE] {
        &self.latched[h.0].guard
    }

    /// Raw mutable frame access for unlogged writes. Marks the block
    /// modified so its modify clock advances at commit.
    pub fn frame_mut(&mut self, h: BlockHandle) -> &mut [u8; PAGE_SIZE] {
        let latched = &mut self.latched[h.0];
        latched.modified = true;
        &mut latched.guard
    }

    /// Marks a block modified without writing. Needed when a page goes
    /// through a release/latch cycle after its last write but its mtr must
    /// still observe it dirty.
    pub fn set_block_modified(&mut self, h: BlockHandle) {
        self.latched[h.0].modified = true;
    }

    fn apply(&mut self, h: BlockHandle, offset: usize, bytes: &[u8]) {
        let latched = &mut self.latched[h.0];
        latched.modified = true;
        latched.guard[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.writes.push(RedoWrite::Bytes {
            page_no: latched.block.page_no(),
            offset: offset as u16,
            bytes: SmallVec::from_slice(bytes),
        });
    }

    pub fn write_u8(&mut self, h: BlockHandle, offset: usize, value: u8) {
        self.apply(h, offset, &[value]);
    }

    pub fn write_u16(&mut self, h: BlockHandle, offset: usize, value: u16) {
        self.apply(h, offset, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, h: BlockHandle, offset: usize, value: u32) {
        self.apply(h, offset, &value.to_le_bytes());
    }

    pub fn write_u64(&mut self, h: BlockHandle, offset: usize, value: u64) {
        self.apply(h, offset, &value.to_le_bytes());
    }

    /// Optional write: dropped entirely when the pre-image already matches.
    pub fn write_u16_opt(&mut self, h: BlockHandle, offset: usize, value: u16) {
        if self.latched[h.0].guard[offset..offset + 2] != value.to_le_bytes() {
            self.apply(h, offset, &value.to_le_bytes());
        }
    }

    pub fn write_u32_opt(&mut self, h: BlockHandle, offset: usize, value: u32) {
        if self.latched[h.0].guard[offset..offset + 4] != value.to_le_bytes() {
            self.apply(h, offset, &value.to_le_bytes());
        }
    }

    /// Fills a byte range and logs it as one memset record.
    pub fn memset(&mut self, h: BlockHandle, offset: usize, len: usize, value: u8) {
        let latched = &mut self.latched[h.0];
        latched.modified = true;
        latched.guard[offset..offset + len].fill(value);
        self.writes.push(RedoWrite::Memset {
            page_no: latched.block.page_no(),
            offset: offset as u16,
            len: len as u16,
            value,
        });
    }

    /// Logs bytes the caller already placed in the frame through
    /// [`Mtr::frame_mut`], e.g. a record body copied to the heap.
    pub fn log_written(&mut self, h: BlockHandle, offset: usize, len: usize) {
        let latched = &mut self.latched[h.0];
        debug_assert!(latched.modified, "log_written without a frame write");
        let bytes = &latched.guard[offset..offset + len];
        self.writes.push(RedoWrite::Bytes {
            page_no: latched.block.page_no(),
            offset: offset as u16,
            bytes: SmallVec::from_slice(bytes),
        });
    }

    /// Logs the initialization of an empty index page.
    pub fn log_page_create(&mut self, h: BlockHandle, compact: bool) {
        let latched = &mut self.latched[h.0];
        latched.modified = true;
        self.writes.push(RedoWrite::PageCreate {
            page_no: latched.block.page_no(),
            compact,
        });
    }

    /// Logs a page allocation. Allocation runs in its own mtr, so no latch
    /// is involved.
    pub fn log_page_alloc(&mut self, page_no: u32) {
        self.writes.push(RedoWrite::PageAlloc { page_no });
    }

    pub fn log_page_free(&mut self, page_no: u32) {
        self.writes.push(RedoWrite::PageFree { page_no });
    }

    /// Emits the atomic compressed image of a finalized page.
    pub fn log_zip_image(&mut self, h: BlockHandle, data: Vec<u8>) {
        let latched = &mut self.latched[h.0];
        latched.modified = true;
        self.writes.push(RedoWrite::ZipImage {
            page_no: latched.block.page_no(),
            data,
        });
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Commits the mtr: appends the checksummed batch atomically, advances
    /// the modify clock of every touched block and releases all latches.
    pub fn commit(self) {
        if !self.writes.is_empty() {
            let mut digest = CRC64.digest();
            for write in &self.writes {
                write.fold_into(&mut digest);
            }
            self.log.append(RedoBatch {
                index_id: self.index_id,
                writes: self.writes,
                checksum: digest.finalize(),
            });
        }

        for latched in &self.latched {
            if latched.modified {
                latched.block.bump_modify_clock();
            }
        }
        // Guards drop here, releasing the latches.
    }
}

/// Convenience check used by tests and by recovery tooling downstream.
pub fn verify_batch(batch: &RedoBatch) -> Result<()> {
    let mut digest = CRC64.digest();
    for write in &batch.writes {
        write.fold_into(&mut digest);
    }
    eyre::ensure!(
        digest.finalize() == batch.checksum,
        "redo batch checksum mismatch"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pool::BufferPool;

    #[test]
    fn logged_writes_mutate_the_frame_and_the_batch() {
        let log = LogSys::new();
        let pool = BufferPool::new();
        let block = pool.attach_new(9, None).unwrap();

        let mut mtr = Mtr::start(log.clone());
        mtr.set_modified(77);
        let h = mtr.latch(block.clone());
        mtr.write_u16(h, 100, 0xBEEF);
        mtr.memset(h, 200, 8, 0xFF);
        mtr.commit();

        assert_eq!(log.batch_count(), 1);
        let batch = &log.snapshot()[0];
        assert_eq!(batch.index_id, 77);
        assert_eq!(batch.writes.len(), 2);
        verify_batch(batch).unwrap();

        block.with_frame(|frame| {
            assert_eq!(u16::from_le_bytes([frame[100], frame[101]]), 0xBEEF);
            assert_eq!(&frame[200..208], &[0xFF; 8]);
        });
        assert_eq!(block.modify_clock(), 1);
    }

    #[test]
    fn opt_writes_are_suppressed_when_unchanged() {
        let log = LogSys::new();
        let pool = BufferPool::new();
        let block = pool.attach_new(3, None).unwrap();

        let mut mtr = Mtr::start(log.clone());
        let h = mtr.latch(block.clone());
        mtr.write_u16(h, 40, 7);
        assert_eq!(mtr.write_count(), 1);

        // Same value again: no new record.
        mtr.write_u16_opt(h, 40, 7);
        assert_eq!(mtr.write_count(), 1);

        // Different value: logged.
        mtr.write_u16_opt(h, 40, 8);
        assert_eq!(mtr.write_count(), 2);
        mtr.commit();
    }

    #[test]
    fn empty_mtr_commits_no_batch_and_keeps_the_clock() {
        let log = LogSys::new();
        let pool = BufferPool::new();
        let block = pool.attach_new(4, None).unwrap();

        let mtr_block = block.clone();
        let mut mtr = Mtr::start(log.clone());
        let _h = mtr.latch(mtr_block);
        mtr.commit();

        assert_eq!(log.batch_count(), 0);
        assert_eq!(block.modify_clock(), 0);
    }

    #[test]
    fn unlogged_frame_writes_still_advance_the_clock() {
        let log = LogSys::new();
        let pool = BufferPool::new();
        let block = pool.attach_new(6, Some(8192)).unwrap();

        let mut mtr = Mtr::start(log.clone());
        let h = mtr.latch(block.clone());
        mtr.frame_mut(h)[500] = 0xAB;
        mtr.commit();

        assert_eq!(log.batch_count(), 0);
        assert_eq!(block.modify_clock(), 1);
    }

    #[test]
    fn checkpoint_flag_round_trip() {
        let log = LogSys::new();
        assert!(!log.checkpoint_needed());
        log.request_checkpoint();
        assert!(log.checkpoint_needed());
        log.wait_for_checkpoint_room();
        assert!(!log.checkpoint_needed());
    }
}
