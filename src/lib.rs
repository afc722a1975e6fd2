//! # MasonDB - B-tree Bulk Loader
//!
//! MasonDB builds balanced B-trees bottom-up from sorted tuple streams for
//! a transactional, page-oriented storage engine: the mechanism behind
//! index creation, `ALTER TABLE ... ADD INDEX` and initial loads from
//! sorted intermediate files. Every page is written in full before the
//! loader moves on; on the happy path nothing ever splits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   TreeBuilder (one per build)        │
//! ├─────────────────────────────────────┤
//! │   PageBuilder (one per open level)   │
//! ├─────────────────┬───────────────────┤
//! │  Record Codec   │  Index Metadata   │
//! ├─────────────────┴───────────────────┤
//! │  Storage: pages, buffer pool,        │
//! │  mini-transactions/redo, tablespace, │
//! │  compressed shadows, blob chains     │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Row Formats
//!
//! Three on-disk record encodings are supported per index: `REDUNDANT`
//! (legacy, self-describing field offsets, absolute next pointers),
//! `DYNAMIC` (compact headers, delta next pointers) and `COMPRESSED`
//! (dynamic in memory plus a compressed page image as the redo unit).
//!
//! ## Crash Safety
//!
//! Every page mutation flows through a mini-transaction that emits one
//! checksummed redo batch at commit. Child pages always commit before the
//! parent record that references them, so a recovered parent never points
//! into the void. Partial builds are invisible: the pre-assigned root page
//! is only overwritten by the final root swap of a successful build.
//!
//! ## Quick Start
//!
//! ```ignore
//! use masondb::bulk::TreeBuilder;
//! use masondb::config::BuildConfig;
//!
//! let mut builder = TreeBuilder::new(index.clone(), trx, BuildConfig::default())?;
//! let mut result = Ok(());
//! for mut tuple in sorted_tuples {
//!     result = builder.insert(&mut tuple);
//!     if result.is_err() {
//!         break;
//!     }
//! }
//! builder.finalize(result)?;
//! ```
//!
//! ## Module Overview
//!
//! - [`bulk`]: the page and tree builders plus post-build validation
//! - [`records`]: tuples, the three row formats, the record codec
//! - [`storage`]: pages, buffer pool, mini-transactions, tablespace, blobs
//! - [`index`]: index metadata and the root-page identity
//! - [`config`]: page geometry constants and per-build settings
//! - [`trx`]: transaction handles and cooperative interruption

#[macro_use]
mod macros;

pub mod bulk;
pub mod config;
pub mod error;
pub mod index;
pub mod records;
pub mod storage;
pub mod trx;

pub use bulk::{scan, validate_index, TreeBuilder, TreeStats};
pub use config::BuildConfig;
pub use error::BuildError;
pub use index::IndexDef;
pub use records::{RowFormat, Tuple};
pub use trx::Trx;
