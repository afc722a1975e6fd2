//! # Post-Build Validation and Scans
//!
//! Structural checks over a finished tree and the in-order leaf scan tests
//! and callers use to read a bulk-loaded index back. The page-level checks
//! live in `storage::page`; this module verifies the cross-page invariants:
//!
//! 1. Sibling links form a doubly-linked list per level, `FIL_NULL` at both
//!    ends.
//! 2. Keys ascend strictly within and across the pages of a level.
//! 3. Every non-leaf record's child is a page one level down, and its key
//!    equals the child's first user key; only the leftmost record of each
//!    non-leaf level carries the minimum-record flag instead.
//! 4. The page at the index's root id has the tree's highest level, and
//!    every level has exactly one rightmost page reachable from it.

use eyre::{ensure, eyre, Result};

use crate::config::{EXTERN_REF_SIZE, FIL_NULL, REC_INFO_MIN_REC};
use crate::index::IndexDef;
use crate::records::codec;
use crate::storage::{blob, page};

/// Shape of a validated tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
    pub root_level: u16,
    /// Pages per level, leaf first.
    pub pages_per_level: Vec<usize>,
    /// User records per level, leaf first.
    pub recs_per_level: Vec<usize>,
}

impl TreeStats {
    pub fn leaf_pages(&self) -> usize {
        self.pages_per_level[0]
    }

    pub fn leaf_recs(&self) -> usize {
        self.recs_per_level[0]
    }
}

/// One record read off a page: key, stored payload, info bits.
struct RecView {
    key: Vec<u8>,
    payload: Vec<u8>,
    info_bits: u8,
    ext: bool,
}

fn page_records(index: &IndexDef, page_no: u32) -> Result<Vec<RecView>> {
    let fmt = index.format();
    index.space().pool().with_page(page_no, |frame| {
        let mut out = Vec::with_capacity(page::page_n_recs(frame) as usize);
        let mut origin = match page::first_user_rec(frame, fmt) {
            Some(first) => first,
            None => return out,
        };
        let supremum = codec::supremum_offset(fmt);
        while origin != supremum {
            let layout = codec::layout_at(frame, fmt, origin);
            out.push(RecView {
                key: codec::rec_key(frame, origin, &layout).to_vec(),
                payload: codec::rec_payload(frame, origin, &layout).to_vec(),
                info_bits: codec::rec_info_bits(frame, fmt, origin),
                ext: layout.ext,
            });
            origin = codec::rec_next(frame, fmt, origin);
        }
        out
    })
}

/// Follows the next links from the leftmost page of a level, checking the
/// back links as it goes.
fn level_page_list(index: &IndexDef, leftmost: u32, level: u16) -> Result<Vec<u32>> {
    let pool = index.space().pool();
    let fmt = index.format();
    let mut pages = Vec::new();
    let mut page_no = leftmost;
    let mut prev = FIL_NULL;

    while page_no != FIL_NULL {
        let (page_prev, page_next) = pool.with_page(page_no, |frame| -> Result<(u32, u32)> {
            page::validate_page(frame, fmt)?;
            ensure_level(frame, level)?;
            Ok((page::page_prev(frame), page::page_next(frame)))
        })??;
        ensure!(
            page_prev == prev,
            "page {} back-link {} does not match its left sibling {}",
            page_no,
            page_prev,
            prev
        );
        pages.push(page_no);
        prev = page_no;
        page_no = page_next;
    }

    Ok(pages)
}

fn ensure_level(frame: &[u8], level: u16) -> Result<()> {
    ensure!(
        page::page_level(frame) == level,
        "page claims level {} on a level-{} chain",
        page::page_level(frame),
        level
    );
    Ok(())
}

/// Walks every level of the tree and checks the cross-page invariants.
pub fn validate_index(index: &IndexDef) -> Result<TreeStats> {
    let pool = index.space().pool();
    let _fmt = index.format();
    let root_page = index.root_page();

    let (root_level, root_index_id) = pool.with_page(root_page, |frame| {
        (page::page_level(frame), page::page_header(frame).index_id())
    })?;
    ensure!(
        root_index_id == index.id(),
        "root page belongs to index {} not {}",
        root_index_id,
        index.id()
    );

    // Leftmost page of each level, walking down the first child pointers.
    let mut leftmost = vec![0u32; root_level as usize + 1];
    let mut page_no = root_page;
    for level in (0..=root_level).rev() {
        leftmost[level as usize] = page_no;
        if level > 0 {
            let recs = page_records(index, page_no)?;
            let first = recs
                .first()
                .ok_or_else(|| eyre!("empty non-leaf page {}", page_no))?;
            let child: [u8; 4] = first.payload[..4].try_into()?;
            page_no = u32::from_le_bytes(child);
        }
    }

    let mut pages_per_level = Vec::with_capacity(root_level as usize + 1);
    let mut recs_per_level = Vec::with_capacity(root_level as usize + 1);
    let mut child_pages: Option<Vec<u32>> = None;

    for level in 0..=root_level {
        let pages = level_page_list(index, leftmost[level as usize], level)?;
        ensure!(
            level != root_level || pages.len() == 1,
            "level {} is the root level but holds {} pages",
            level,
            pages.len()
        );

        let mut level_recs = 0usize;
        let mut prev_key: Option<Vec<u8>> = None;
        let mut children = Vec::new();

        for (page_idx, &page_no) in pages.iter().enumerate() {
            let recs = page_records(index, page_no)?;
            ensure!(!recs.is_empty(), "committed page {} is empty", page_no);

            for (rec_idx, rec) in recs.iter().enumerate() {
                if let Some(prev) = &prev_key {
                    ensure!(
                        codec::compare_keys(prev, &rec.key) == std::cmp::Ordering::Less,
                        "keys out of order entering page {}",
                        page_no
                    );
                }
                prev_key = Some(rec.key.clone());

                if level > 0 {
                    let child: [u8; 4] = rec.payload[..4].try_into()?;
                    children.push(u32::from_le_bytes(child));

                    let is_level_first = page_idx == 0 && rec_idx == 0;
                    ensure!(
                        (rec.info_bits & REC_INFO_MIN_REC != 0) == is_level_first,
                        "minimum-record flag misplaced on page {}",
                        page_no
                    );
                }
            }
            level_recs += recs.len();
        }

        if level > 0 {
            let below = child_pages
                .as_ref()
                .ok_or_else(|| eyre!("level {} validated before its children", level))?;
            ensure!(
                &children == below,
                "level {} node pointers do not enumerate the level below",
                level
            );

            // Each pointer's key must equal its child's first key; the
            // leftmost pointer carries the flag instead of a meaningful key.
            let mut idx = 0usize;
            for &page_no in &pages {
                for rec in page_records(index, page_no)? {
                    if idx > 0 {
                        let child_first = page_records(index, children[idx])?
                            .into_iter()
                            .next()
                            .ok_or_else(|| eyre!("empty child page {}", children[idx]))?;
                        ensure!(
                            rec.key == child_first.key,
                            "node pointer {} does not carry its child's first key",
                            idx
                        );
                    }
                    idx += 1;
                }
            }
        }

        child_pages = Some(pages.clone());
        pages_per_level.push(pages.len());
        recs_per_level.push(level_recs);
    }

    Ok(TreeStats {
        root_level,
        pages_per_level,
        recs_per_level,
    })
}

/// In-order scan of the leaf level, resolving external payloads through
/// their blob chains.
pub fn scan(index: &IndexDef) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let pool = index.space().pool();

    // Descend to the leftmost leaf.
    let mut page_no = index.root_page();
    let mut level = pool.with_page(page_no, |frame| page::page_level(frame))?;
    while level > 0 {
        let recs = page_records(index, page_no)?;
        let first = recs
            .first()
            .ok_or_else(|| eyre!("empty non-leaf page {}", page_no))?;
        let child: [u8; 4] = first.payload[..4].try_into()?;
        page_no = u32::from_le_bytes(child);
        level -= 1;
    }

    let mut out = Vec::new();
    while page_no != FIL_NULL {
        for rec in page_records(index, page_no)? {
            let payload = if rec.ext {
                let inline = rec.payload.len() - EXTERN_REF_SIZE;
                let at = inline;
                let first_blob =
                    u32::from_le_bytes(rec.payload[at..at + 4].try_into()?);
                let total =
                    u64::from_le_bytes(rec.payload[at + 8..at + 16].try_into()?);
                let mut full = rec.payload[..inline].to_vec();
                full.extend_from_slice(&blob::read_extern(pool, first_blob, total)?);
                full
            } else {
                rec.payload
            };
            out.push((rec.key, payload));
        }
        page_no = pool.with_page(page_no, |frame| page::page_next(frame))?;
    }

    Ok(out)
}
