//! # MasonDB Configuration Constants
//!
//! This module centralizes the page-geometry and loader constants. Constants
//! that depend on each other are co-located and the derivations are enforced
//! with compile-time assertions, so a change to one cannot silently break
//! another.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (16384 bytes)
//!       │
//!       ├─> FIL_HEADER_SIZE (32) + PAGE_HEADER_SIZE (36) = PAGE_DATA (68)
//!       │     The sentinel records start at PAGE_DATA; the record heap
//!       │     begins right after them.
//!       │
//!       ├─> PAGE_DIR (8 byte tail reserve, holds the checksum trailer)
//!       │     Directory slots grow downward from PAGE_SIZE - PAGE_DIR.
//!       │
//!       └─> page offsets are u16 everywhere; PAGE_SIZE must stay <= 65536
//!
//! PAGE_DIR_SLOT_MAX_N_OWNED (8)
//!       │
//!       └─> PAGE_DIR_SLOT_MIN_N_OWNED (4) must be (MAX+1)/2: the directory
//!           build emits a slot every (MAX+1)/2 records, and the
//!           reserved-space estimate divides by MIN.
//!
//! FILL_FACTOR_MIN (10) .. FILL_FACTOR_MAX (100)
//!       └─> BuildConfig::fill_factor is validated against this range; 100
//!           on a clustered index falls back to INDEX_SPACE_RESERVE.
//! ```
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use masondb::config::{PAGE_SIZE, FIL_NULL};
//! ```

// ============================================================================
// PAGE GEOMETRY
// These define the fundamental page frame layout used throughout the engine
// ============================================================================

/// Size of each page frame in bytes (16KB).
/// This is the fundamental unit of allocation, latching and redo.
pub const PAGE_SIZE: usize = 16384;

/// Null page number. Terminates sibling chains and marks unallocated pages.
pub const FIL_NULL: u32 = 0xFFFF_FFFF;

/// Size of the fil header at the start of every page: checksum, page number,
/// prev/next sibling links, lsn, page type, space id.
pub const FIL_HEADER_SIZE: usize = 32;

/// Byte offset of the previous-sibling link inside the fil header.
pub const FIL_PAGE_PREV: usize = 8;

/// Byte offset of the next-sibling link inside the fil header.
/// Kept adjacent to `FIL_PAGE_PREV` so one 8-byte 0xFF memset resets both.
pub const FIL_PAGE_NEXT: usize = 12;

/// Size of the index-page header that follows the fil header.
pub const PAGE_HEADER_SIZE: usize = 36;

/// Offset where page payload (the sentinel records) begins.
pub const PAGE_DATA: usize = FIL_HEADER_SIZE + PAGE_HEADER_SIZE;

/// Reserved bytes at the very end of the page (checksum trailer). The
/// directory slots grow downward from `PAGE_SIZE - PAGE_DIR`.
pub const PAGE_DIR: usize = 8;

/// Size of one directory slot: a 2-byte record offset.
pub const PAGE_DIR_SLOT_SIZE: usize = 2;

const _: () = assert!(PAGE_DATA == 68, "PAGE_DATA derivation mismatch");
const _: () = assert!(FIL_PAGE_NEXT == FIL_PAGE_PREV + 4, "sibling links must be adjacent");
const _: () = assert!(PAGE_SIZE <= 1 << 16, "page offsets are u16");

// ============================================================================
// DIRECTORY OWNERSHIP BOUNDS
// ============================================================================

/// Maximum number of records a directory slot may own.
pub const PAGE_DIR_SLOT_MAX_N_OWNED: usize = 8;

/// Minimum records per slot used by the reserved-space estimate. The
/// directory build emits one slot per (MAX+1)/2 records, so MIN is the
/// steady-state group size.
pub const PAGE_DIR_SLOT_MIN_N_OWNED: usize = (PAGE_DIR_SLOT_MAX_N_OWNED + 1) / 2;

const _: () = assert!(
    PAGE_DIR_SLOT_MIN_N_OWNED * 2 == PAGE_DIR_SLOT_MAX_N_OWNED,
    "directory slot bounds out of step"
);

/// First heap number available to user records; 0 and 1 are the sentinels.
pub const PAGE_HEAP_NO_USER_LOW: u16 = 2;

// ============================================================================
// RECORD HEADERS
// ============================================================================

/// Extra header bytes before a compact (dynamic/compressed) record origin:
/// info/owned byte, heap number, next pointer.
pub const REC_EXTRA_COMPACT: usize = 5;

/// Extra header bytes before a redundant record origin, excluding the
/// per-field end offsets: info byte, owned byte, heap number, next pointer.
pub const REC_EXTRA_REDUNDANT_BASE: usize = 6;

/// Every user record carries two logical fields: key and payload.
pub const REC_USER_FIELDS: usize = 2;

/// Extra header bytes of a redundant user record (base + two field ends).
pub const REC_EXTRA_REDUNDANT: usize = REC_EXTRA_REDUNDANT_BASE + 2 * REC_USER_FIELDS;

/// The next pointer lives in the two bytes immediately before the record
/// origin in both header shapes.
pub const REC_NEXT: usize = 2;

/// Self-describing record body prefix: key_len u16, payload_len u32, flags u8.
pub const REC_BODY_PREFIX: usize = 7;

/// Info bit marking the minimum record of a non-leaf level.
pub const REC_INFO_MIN_REC: u8 = 0x10;

/// Record body flag: the payload tail is stored externally.
pub const REC_FLAG_EXTERN: u8 = 0x01;

/// Size of an external-field reference stored at the payload tail:
/// page_no u32, offset u32, total length u64, 4 reserved.
pub const EXTERN_REF_SIZE: usize = 20;

/// Local payload prefix kept in-record for redundant-format external fields.
/// Dynamic and compressed records store only the reference.
pub const EXTERN_LOCAL_PREFIX: usize = 768;

// ============================================================================
// SENTINEL RECORDS
// Fixed positions of the infimum/supremum records per header shape
// ============================================================================

/// Origin of the compact-format infimum record (5-byte extra header after
/// `PAGE_DATA`, body `"infimum\0"`).
pub const PAGE_INFIMUM_COMPACT: u16 = (PAGE_DATA + REC_EXTRA_COMPACT) as u16;

/// Origin of the compact-format supremum record.
pub const PAGE_SUPREMUM_COMPACT: u16 = PAGE_INFIMUM_COMPACT + 8 + REC_EXTRA_COMPACT as u16;

/// First free heap byte on an empty compact page.
pub const PAGE_HEAP_START_COMPACT: u16 = PAGE_SUPREMUM_COMPACT + 8;

/// Origin of the redundant-format infimum record (6-byte header plus one
/// field-end offset).
pub const PAGE_INFIMUM_REDUNDANT: u16 = (PAGE_DATA + REC_EXTRA_REDUNDANT_BASE + 2) as u16;

/// Origin of the redundant-format supremum record.
pub const PAGE_SUPREMUM_REDUNDANT: u16 =
    PAGE_INFIMUM_REDUNDANT + 8 + (REC_EXTRA_REDUNDANT_BASE + 2) as u16;

/// First free heap byte on an empty redundant page.
pub const PAGE_HEAP_START_REDUNDANT: u16 = PAGE_SUPREMUM_REDUNDANT + 8;

const _: () = assert!(PAGE_INFIMUM_COMPACT == 73 && PAGE_SUPREMUM_COMPACT == 86);
const _: () = assert!(PAGE_INFIMUM_REDUNDANT == 76 && PAGE_SUPREMUM_REDUNDANT == 92);

/// Free bytes on an empty compact page: everything between the sentinels and
/// the two initial directory slots.
pub const EMPTY_CAPACITY_COMPACT: usize =
    PAGE_SIZE - PAGE_HEAP_START_COMPACT as usize - PAGE_DIR - 2 * PAGE_DIR_SLOT_SIZE;

/// Free bytes on an empty redundant page.
pub const EMPTY_CAPACITY_REDUNDANT: usize =
    PAGE_SIZE - PAGE_HEAP_START_REDUNDANT as usize - PAGE_DIR - 2 * PAGE_DIR_SLOT_SIZE;

// ============================================================================
// FILL FACTOR AND COMPRESSION PADDING
// ============================================================================

/// Lowest accepted fill factor (percent of an empty page to use).
pub const FILL_FACTOR_MIN: u8 = 10;

/// Highest accepted fill factor. 100 keeps back-compat behavior: clustered
/// indexes reserve `INDEX_SPACE_RESERVE` instead of a percentage tail.
pub const FILL_FACTOR_MAX: u8 = 100;

/// Fixed reserve applied to clustered indexes at fill factor 100.
pub const INDEX_SPACE_RESERVE: usize = PAGE_SIZE / 16;

/// Step by which the adaptive compression pad widens after a failure and
/// narrows after a success streak.
pub const ZIP_PAD_INCR: usize = PAGE_SIZE / 32;

/// The adaptive pad never exceeds half the page.
pub const ZIP_PAD_MAX: usize = PAGE_SIZE / 2;

/// Consecutive successful compressions required before the pad narrows.
pub const ZIP_PAD_SUCCESS_ROUND: u32 = 32;

// ============================================================================
// TABLESPACE
// ============================================================================

/// Pages per allocation extent.
pub const EXTENT_PAGES: u32 = 64;

/// Default tablespace capacity in pages (256 MiB of 16 KiB pages).
pub const DEFAULT_SPACE_CAPACITY: u32 = 16384;

// ============================================================================
// BLOB PAGES
// ============================================================================

/// Blob page header after the fil header: part length u32, next page u32.
pub const BLOB_HDR_SIZE: usize = 8;

/// Offset where blob payload begins.
pub const BLOB_DATA: usize = FIL_HEADER_SIZE + BLOB_HDR_SIZE;

/// Blob payload capacity per page (checksum trailer excluded).
pub const BLOB_PART_CAPACITY: usize = PAGE_SIZE - BLOB_DATA - PAGE_DIR;
