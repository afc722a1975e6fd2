//! # Tree Builder
//!
//! A [`TreeBuilder`] drives one bulk load: it routes each sorted tuple to
//! the open leaf page, rolls pages over when full, propagates node pointers
//! upward, and finishes by swapping the last top-level page into the
//! index's pre-assigned root slot.
//!
//! ## Shape of the Build
//!
//! ```text
//! level 2            [open]                      <- grows on demand
//! level 1   [done]─>[done]─────>[open]
//! level 0   [done]─>[done]─>[done]─>[open]       <- tuples arrive here
//! ```
//!
//! Exactly one page per level is open at any time, always the rightmost.
//! Committing a page at level L links it to its new sibling, then inserts
//! its node pointer at level L+1 before the page's own mini-transaction
//! commits; a parent that references a child in the redo stream therefore
//! implies the child already committed.
//!
//! ## Cancellation and Backpressure
//!
//! Between leaf siblings the builder checks for transaction interruption,
//! pokes the page cleaner, and polls the redo log's checkpoint flag. A
//! pending checkpoint makes it release every open page (keeping them
//! pinned), wait for log room, and re-latch optimistically.
//!
//! ## Root Identity
//!
//! The root page id is fixed at index creation; readers resolve the tree
//! through it. The build discovers the true top-level content only at the
//! end, so `finalize` copies the last top-level page into the root page and
//! frees the original, under the index tree latch.

use std::mem;
use std::sync::Arc;

use eyre::{bail, eyre, Result};
use tracing::debug;

use crate::config::{BuildConfig, FIL_NULL};
use crate::error::BuildError;
use crate::index::IndexDef;
use crate::records::{codec, BigRec, Tuple};
use crate::storage::page;
use crate::storage::redo::Mtr;
use crate::trx::Trx;

use super::page_builder::PageBuilder;

/// The page a committing page links to, if any.
enum NextPage<'a> {
    /// Rightmost page of a finished level; no successor.
    None,
    /// The open sibling in the level vector.
    Level(usize),
    /// A sibling not (yet) in the level vector, during a split.
    Detached(&'a mut PageBuilder),
}

/// Builds a B-tree bottom-up from a sorted tuple stream.
pub struct TreeBuilder {
    index: Arc<IndexDef>,
    trx: Arc<Trx>,
    config: BuildConfig,
    /// Open rightmost page per level; position 0 is the leaf.
    levels: Vec<PageBuilder>,
    root_level: u16,
}

impl TreeBuilder {
    pub fn new(index: Arc<IndexDef>, trx: Arc<Trx>, config: BuildConfig) -> Result<TreeBuilder> {
        config.validate()?;
        Ok(TreeBuilder {
            index,
            trx,
            config,
            levels: Vec::new(),
            root_level: 0,
        })
    }

    pub fn index(&self) -> &Arc<IndexDef> {
        &self.index
    }

    /// Inserts the next tuple. Tuples must arrive in strictly ascending key
    /// order. The tuple is returned unchanged even when its payload takes a
    /// detour through external storage.
    pub fn insert(&mut self, tuple: &mut Tuple) -> Result<()> {
        self.insert_at(tuple, 0)
    }

    fn insert_at(&mut self, tuple: &mut Tuple, level: usize) -> Result<()> {
        let mut is_left_most = false;

        if level + 1 > self.levels.len() {
            let mut pb = PageBuilder::new(
                self.index.clone(),
                self.trx.id(),
                FIL_NULL,
                level as u16,
                self.config,
            );
            pb.init()?;
            self.levels.push(pb);
            debug_assert_eq!(level + 1, self.levels.len());
            self.root_level = level as u16;
            is_left_most = true;
        }

        debug_assert!(self.levels.len() > level);

        if is_left_most && level > 0 && self.levels[level].rec_no() == 0 {
            // No lower bound exists for keys in the leftmost node of a
            // level; its first pointer is the predefined minimum record.
            tuple.set_min_rec();
        }

        let fmt = self.index.format();
        let mut rec_size = codec::converted_size(fmt, tuple);
        let mut big_rec: Option<BigRec> = None;

        if self.levels[level].needs_ext(rec_size) {
            match tuple.convert_big(fmt) {
                Some(big) => {
                    big_rec = Some(big);
                    rec_size = codec::converted_size(fmt, tuple);
                }
                None => bail!(BuildError::TooBigRecord),
            }
        }

        let result = self.insert_converted(tuple, level, rec_size, big_rec.as_ref());

        if let Some(big) = big_rec {
            tuple.convert_back_big(big);
        }
        result
    }

    fn insert_converted(
        &mut self,
        tuple: &Tuple,
        level: usize,
        rec_size: usize,
        big_rec: Option<&BigRec>,
    ) -> Result<()> {
        let fmt = self.index.format();

        if let Some(target) = self.index.zip_target() {
            if codec::zip_too_big(fmt, tuple, target) {
                bail!(BuildError::TooBigRecord);
            }
        }

        if !self.levels[level].is_space_available(rec_size) {
            let mut sibling = PageBuilder::new(
                self.index.clone(),
                self.trx.id(),
                FIL_NULL,
                level as u16,
                self.config,
            );
            sibling.init()?;

            let mut full = mem::replace(&mut self.levels[level], sibling);
            if let Err(err) = self.page_commit(&mut full, NextPage::Level(level), true) {
                // Put the full page back for finalize to abort; the fresh
                // sibling is abandoned here.
                let mut sibling = mem::replace(&mut self.levels[level], full);
                sibling.abort();
                return Err(err);
            }

            if level == 0 {
                if self.trx.is_interrupted() {
                    bail!(BuildError::Interrupted);
                }

                // Give the cleaner a chance at the finished pages, and
                // yield our latches if the redo log wants a checkpoint.
                self.index.space().pool().poke_cleaner();
                self.log_free_check()?;
            }
        }

        self.levels[level].insert_tuple(tuple)?;

        if let Some(big) = big_rec {
            debug_assert!(self.index.is_clustered());
            debug_assert_eq!(level, 0);

            // Blob pages are fresh allocations; no reason to sit on the
            // non-leaf latches while they are written.
            self.release_levels(1);
            let stored = self.levels[0].store_ext(big);
            self.latch_levels(1)?;
            stored?;
        }

        Ok(())
    }

    /// Finishes a page: directory, sibling links, compression, node pointer
    /// into the parent, then the page's mtr commit, in that order.
    fn page_commit(
        &mut self,
        page: &mut PageBuilder,
        mut next: NextPage<'_>,
        insert_father: bool,
    ) -> Result<()> {
        page.finish()?;

        match &mut next {
            NextPage::Level(l) => {
                debug_assert_eq!(page.level(), self.levels[*l].level());
                let next_no = self.levels[*l].page_no();
                let page_no = page.page_no();
                page.set_next(next_no);
                self.levels[*l].set_prev(page_no);
            }
            NextPage::Detached(sibling) => {
                debug_assert_eq!(page.level(), sibling.level());
                page.set_next(sibling.page_no());
                sibling.set_prev(page.page_no());
            }
            NextPage::None => {
                debug_assert_eq!(page::page_next(page.frame()), FIL_NULL);
                // A release/latch cycle since the last write would leave the
                // mtr observing an unchanged page.
                page.mark_mtr_modified();
            }
        }

        // Bulk load is the exclusive writer; the index tree latch stays idle.
        debug_assert!(self.index.latch_is_free());

        if page.is_compressed() && !page.compress()? {
            return self.page_split(page, next);
        }

        if insert_father {
            let mut node_ptr = page.node_ptr()?;
            self.insert_at(&mut node_ptr, page.level() as usize + 1)?;
        }

        page.commit(true);
        debug!(
            page = page.page_no(),
            level = page.level(),
            n_recs = page.rec_no(),
            "page committed"
        );
        Ok(())
    }

    /// Splits a compressed page whose records did not fit the target size:
    /// the upper half moves to a fresh page, then both commit in order.
    fn page_split(&mut self, page: &mut PageBuilder, next: NextPage<'_>) -> Result<()> {
        debug_assert!(page.is_compressed());

        if page.rec_no() <= 1 {
            bail!(BuildError::TooBigRecord);
        }

        let mut new_page = PageBuilder::new(
            self.index.clone(),
            self.trx.id(),
            FIL_NULL,
            page.level(),
            self.config,
        );
        new_page.init()?;

        let split_rec = page.split_rec();
        new_page.copy_in(page.frame(), split_rec)?;
        page.copy_out(split_rec)?;

        if let Err(err) = self.page_commit(page, NextPage::Detached(&mut new_page), true) {
            new_page.abort();
            return Err(err);
        }
        if let Err(err) = self.page_commit(&mut new_page, next, true) {
            new_page.abort();
            return Err(err);
        }
        Ok(())
    }

    fn release_levels(&mut self, from: usize) {
        for pb in self.levels.iter_mut().skip(from) {
            pb.release();
        }
    }

    fn latch_levels(&mut self, from: usize) -> Result<()> {
        for pb in self.levels.iter_mut().skip(from) {
            pb.latch()?;
        }
        Ok(())
    }

    /// Yields every page latch across a checkpoint wait when the redo log
    /// asks for one. Waiting with latches held would stall the flusher
    /// against our own pages.
    fn log_free_check(&mut self) -> Result<()> {
        if self.index.log().checkpoint_needed() {
            debug!("yielding page latches for a redo checkpoint");
            self.release_levels(0);
            self.index.log().wait_for_checkpoint_room();
            self.latch_levels(0)?;
        }
        Ok(())
    }

    /// Ends the build. On success every open page commits bottom-up and the
    /// last top-level page is copied into the index's root slot; on error
    /// (the caller's or one hit here) every open page aborts and the root
    /// stays in its pre-build state.
    pub fn finalize(mut self, build_result: Result<()>) -> Result<()> {
        let mut err = build_result;

        if self.levels.is_empty() {
            // Nothing was inserted; the root page is already a consistent
            // empty tree.
            return err;
        }

        debug_assert_eq!(self.root_level as usize + 1, self.levels.len());

        let mut last_page_no = FIL_NULL;
        let mut level = 0usize;
        // Node-pointer inserts during these commits may still grow the tree;
        // the bound is re-read on purpose.
        while level < self.levels.len() {
            let placeholder = PageBuilder::new(
                self.index.clone(),
                self.trx.id(),
                FIL_NULL,
                level as u16,
                self.config,
            );
            let mut pb = mem::replace(&mut self.levels[level], placeholder);

            last_page_no = pb.page_no();

            if err.is_ok() {
                err = self.page_commit(
                    &mut pb,
                    NextPage::None,
                    level != self.root_level as usize,
                );
            }
            if err.is_err() {
                pb.abort();
            }

            level += 1;
        }

        err?;

        // Root swap: the tree surfaces at the well-known root page id.
        let index = self.index.clone();
        let mut mtr = Mtr::start(index.log().clone());
        mtr.set_modified(index.id());
        let tree_guard = index.latch_x();

        debug_assert!(last_page_no != FIL_NULL);
        let last_block = match index.space().pool().get(last_page_no) {
            Ok(block) => block,
            Err(fetch_err) => {
                mtr.commit();
                drop(tree_guard);
                return Err(fetch_err);
            }
        };
        let h = mtr.latch(last_block);

        let mut root = PageBuilder::new(
            index.clone(),
            self.trx.id(),
            index.root_page(),
            self.root_level,
            self.config,
        );
        if let Err(init_err) = root.init() {
            mtr.commit();
            drop(tree_guard);
            return Err(init_err);
        }

        let copied = {
            let src = mtr.frame(h);
            match page::first_user_rec(src, index.format()) {
                Some(first) => root.copy_in(src, first),
                None => Err(eyre!("committed top-level page has no records")),
            }
        };
        if let Err(copy_err) = copied {
            root.abort();
            mtr.commit();
            drop(tree_guard);
            return Err(copy_err);
        }

        index.space().free_page(last_page_no, &mut mtr);
        mtr.commit();
        drop(tree_guard);

        self.page_commit(&mut root, NextPage::None, false)?;

        debug!(
            root = index.root_page(),
            root_level = self.root_level,
            "bulk load finished, root swapped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SPACE_CAPACITY;
    use crate::records::RowFormat;
    use crate::storage::pool::BufferPool;
    use crate::storage::redo::LogSys;
    use crate::storage::space::Space;

    fn test_index(format: RowFormat) -> Arc<IndexDef> {
        let pool = BufferPool::new();
        let space = Space::new(1, pool, DEFAULT_SPACE_CAPACITY);
        let log = LogSys::new();
        IndexDef::create("t_pk", space, log, format, true, None).unwrap()
    }

    #[test]
    fn empty_build_leaves_the_root_untouched() {
        let index = test_index(RowFormat::Dynamic);
        let trx = Trx::begin();
        let builder = TreeBuilder::new(index.clone(), trx, BuildConfig::default()).unwrap();

        let clock_before = index
            .space()
            .pool()
            .get(index.root_page())
            .unwrap()
            .modify_clock();

        builder.finalize(Ok(())).unwrap();

        let root = index.space().pool().get(index.root_page()).unwrap();
        assert_eq!(root.modify_clock(), clock_before);
        root.with_frame(|frame| assert_eq!(page::page_n_recs(frame), 0));
    }

    #[test]
    fn empty_build_propagates_the_caller_error() {
        let index = test_index(RowFormat::Dynamic);
        let trx = Trx::begin();
        let builder = TreeBuilder::new(index, trx, BuildConfig::default()).unwrap();

        let err = builder
            .finalize(Err(eyre!(BuildError::Interrupted)))
            .unwrap_err();
        assert_eq!(BuildError::of(&err), Some(BuildError::Interrupted));
    }

    #[test]
    #[cfg(debug_assertions)]
    fn out_of_order_keys_are_rejected_in_debug_builds() {
        let index = test_index(RowFormat::Dynamic);
        let trx = Trx::begin();
        let mut builder = TreeBuilder::new(index, trx, BuildConfig::default()).unwrap();

        let mut a = Tuple::new(b"b".to_vec(), vec![1]);
        builder.insert(&mut a).unwrap();

        let mut b = Tuple::new(b"a".to_vec(), vec![2]);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            builder.insert(&mut b)
        }));
        assert!(result.is_err(), "descending key must trip the order check");
    }
}
