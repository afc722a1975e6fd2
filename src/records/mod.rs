//! # Record Layer
//!
//! This module owns everything about individual index records: the logical
//! tuple model fed to the loader, the three physical row formats, and the
//! codec that materializes tuples into page heaps.
//!
//! ## Row Formats
//!
//! MasonDB supports three on-disk record encodings:
//!
//! - **Redundant**: the legacy shape. Each record carries its own field-end
//!   offsets, and the next pointer is an absolute 2-byte page offset.
//! - **Dynamic**: compact 5-byte header; the next pointer is a signed 2-byte
//!   delta from the record origin.
//! - **Compressed**: identical in-memory shape to dynamic, but the page is
//!   additionally encoded into a compressed shadow frame at finalize.
//!
//! ## Record Shape
//!
//! ```text
//! Compact extra header (5 bytes, before the origin):
//! +-----------------+------------------+------------------+
//! | info/owned (1B) | heap_no (2B LE)  | next delta (2B)  |
//! +-----------------+------------------+------------------+
//!
//! Redundant extra header (6 bytes + one u16 field end per field):
//! +------------+------------+-----------+------------------+------------------+
//! | field ends | info (1B)  | owned (1B)| heap_no (2B LE)  | next abs (2B)    |
//! +------------+------------+-----------+------------------+------------------+
//!
//! Body (both shapes, at the origin):
//! +--------------+------------------+-----------+--------+----------+
//! | key_len (2B) | payload_len (4B) | flags (1B)| key    | payload  |
//! +--------------+------------------+-----------+--------+----------+
//! ```
//!
//! The high nibble of the compact info/owned byte holds the info bits (the
//! minimum-record flag among them), the low nibble the directory ownership
//! count. Redundant records spend a full byte on each.
//!
//! ## Keys
//!
//! Keys are opaque byte strings in order-preserving encoding; comparison is
//! plain lexicographic byte order.
//!
//! ## External Storage
//!
//! A payload too large for in-page storage is split: the tail moves to blob
//! pages and the record keeps a 20-byte reference (plus a 768-byte local
//! prefix in the redundant format). The `EXTERN` body flag marks such
//! records.

pub mod codec;
mod tuple;

pub use codec::{RecLayout, REDUNDANT_SENTINEL_EXTRA};
pub use tuple::{BigRec, Tuple};

/// On-disk row format, fixed per index at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    Redundant,
    Dynamic,
    Compressed,
}

impl RowFormat {
    /// Whether records use the compact header shape.
    pub fn is_compact(&self) -> bool {
        !matches!(self, RowFormat::Redundant)
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, RowFormat::Compressed)
    }
}
