//! # Bulk Loading
//!
//! Bottom-up construction of a B-tree from a sorted tuple stream. Two
//! layered pieces do the work:
//!
//! - [`PageBuilder`] owns one page frame at one tree level: it appends
//!   records in key order, manages free-space and fill-factor accounting,
//!   materializes the slot directory at finish, compresses when the format
//!   asks for it, links siblings, and can halve itself when compression
//!   fails.
//! - [`TreeBuilder`] keeps one open `PageBuilder` per level, routes tuples
//!   to the leaf, emits node pointers upward on page commits, grows levels
//!   on demand, stores oversize payloads externally, and promotes the final
//!   top-level page into the index root.
//!
//! ```text
//! sorted tuples ──> TreeBuilder::insert ──> leaf PageBuilder
//!                        │ page full
//!                        ▼
//!            commit + link sibling + node pointer up (recursive)
//! ```
//!
//! Every page is written in full exactly once on the happy path; no splits
//! happen after the fact except the compression-failure split.
//!
//! [`validate`] holds the structural checks and the in-order scan used to
//! read a finished tree back.
//!
//! ## Usage
//!
//! ```ignore
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

mod page_builder;
mod tree_builder;
pub mod validate;

pub use page_builder::PageBuilder;
pub use tree_builder::TreeBuilder;
pub use validate::{scan, validate_index, TreeStats};
