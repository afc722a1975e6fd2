//! # Storage Module
//!
//! The engine scaffolding the bulk loader builds against: page frames and
//! their on-disk layout, the buffer pool that pins and latches them, the
//! mini-transaction redo layer, the tablespace allocator, compressed page
//! shadows, and external blob storage.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │        Bulk loader (bulk::*)           │
//! ├──────────────┬────────────────────────┤
//! │  page: frame │  redo: mtr + log       │
//! │  layout      │  (typed writes, CRC)   │
//! ├──────────────┼────────────────────────┤
//! │  pool: blocks, pins, modify clocks    │
//! ├───────────────────────────────────────┤
//! │  space: extents, alloc/free, bitmap   │
//! ├──────────────┬────────────────────────┤
//! │  zip: page   │  blob: external        │
//! │  shadows     │  field chains          │
//! └──────────────┴────────────────────────┘
//! ```
//!
//! Everything a page builder does flows through an open mini-transaction:
//! the mtr holds the exclusive frame latch, applies typed writes and emits
//! them as one checksummed redo batch at commit. The pool supplies stable
//! block identities across release/re-latch cycles via per-block modify
//! clocks.
//!
//! ## Module Organization
//!
//! - [`page`]: page frame layout, headers, sentinels, directory math
//! - [`pool`]: buffer pool blocks, pin counts, flush-check bypass
//! - [`redo`]: mini-transactions, the redo batch buffer, backpressure
//! - [`space`]: tablespace allocation and the change-buffer bitmap
//! - [`zip`]: compressed shadow frames and adaptive padding
//! - [`blob`]: external (off-page) field storage

pub mod blob;
pub mod page;
pub mod pool;
pub mod redo;
pub mod space;
pub mod zip;

pub use page::{page_create, validate_page, FilHeader, PageHeader};
pub use pool::{Block, BufferPool, FrameBuf, ZipShadow};
pub use redo::{BlockHandle, LogSys, Mtr, RedoBatch, RedoWrite};
pub use space::{ChangeBufferBitmap, IbufMark, Space};
pub use zip::{compress_frame, decompress_frame, ZipPad};
