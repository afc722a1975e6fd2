//! # Index Metadata
//!
//! An [`IndexDef`] is the persistent identity of one B-tree: its id, its
//! well-known root page number, the row format, and the per-index state the
//! bulk loader consults (the adaptive compression pad and the index tree
//! latch).
//!
//! The root page id is an index-identity constant: it is allocated once at
//! index creation and every later reader resolves the tree through it. The
//! bulk loader therefore never builds into the root directly; it finishes by
//! copying the final top-level page into this pre-assigned slot.
//!
//! The index tree latch is deliberately idle during a bulk load. The loader
//! is the exclusive writer, so per-page latches suffice; the tree latch is
//! taken exclusively only for the brief root swap at the end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::config::PAGE_SIZE;
use crate::error::BuildError;
use crate::records::RowFormat;
use crate::storage::page::{self, PAGE_INDEX_ID};
use crate::storage::redo::{LogSys, Mtr};
use crate::storage::space::Space;
use crate::storage::zip::ZipPad;

static NEXT_INDEX_ID: AtomicU64 = AtomicU64::new(1);

/// Metadata of one B-tree index.
pub struct IndexDef {
    id: u64,
    name: String,
    space: Arc<Space>,
    log: Arc<LogSys>,
    root_page: u32,
    format: RowFormat,
    clustered: bool,
    zip_target: Option<usize>,
    zip_pad: ZipPad,
    latch: RwLock<()>,
}

impl IndexDef {
    /// Creates the index: assigns an id, allocates the root page and
    /// initializes it as an empty leaf. The root stays empty until a build
    /// finishes or ordinary inserts arrive.
    pub fn create(
        name: &str,
        space: Arc<Space>,
        log: Arc<LogSys>,
        format: RowFormat,
        clustered: bool,
        zip_target: Option<usize>,
    ) -> Result<Arc<IndexDef>> {
        ensure!(
            format.is_compressed() == zip_target.is_some(),
            "compressed target size must be given exactly for ROW_FORMAT=COMPRESSED"
        );
        if let Some(target) = zip_target {
            ensure!(
                target > 0 && target <= PAGE_SIZE,
                "compressed target size {} outside the page",
                target
            );
        }

        let id = NEXT_INDEX_ID.fetch_add(1, Ordering::SeqCst);

        let mut alloc_mtr = Mtr::start(log.clone());
        alloc_mtr.set_modified(id);
        if !space.reserve_free_extents(1) {
            alloc_mtr.commit();
            bail!(BuildError::OutOfFileSpace);
        }
        let root = match space.alloc_page(zip_target, &mut alloc_mtr) {
            Ok(block) => block,
            Err(err) => {
                space.release_free_extents(1);
                alloc_mtr.commit();
                return Err(err);
            }
        };
        space.release_free_extents(1);
        alloc_mtr.commit();

        let mut mtr = Mtr::start(log.clone());
        mtr.set_modified(id);
        let h = mtr.latch(root.clone());
        page::page_create(mtr.frame_mut(h), format, root.page_no(), space.id());
        mtr.log_page_create(h, format.is_compact());
        mtr.write_u64(h, PAGE_INDEX_ID, id);
        mtr.commit();

        Ok(Arc::new(IndexDef {
            id,
            name: name.to_owned(),
            root_page: root.page_no(),
            space,
            log,
            format,
            clustered,
            zip_target,
            zip_pad: ZipPad::new(),
            latch: RwLock::new(()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> &Arc<Space> {
        &self.space
    }

    pub fn log(&self) -> &Arc<LogSys> {
        &self.log
    }

    pub fn root_page(&self) -> u32 {
        self.root_page
    }

    pub fn format(&self) -> RowFormat {
        self.format
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    pub fn zip_target(&self) -> Option<usize> {
        self.zip_target
    }

    pub fn zip_pad(&self) -> &ZipPad {
        &self.zip_pad
    }

    /// Takes the index tree latch exclusively; only the root swap needs it.
    pub fn latch_x(&self) -> RwLockWriteGuard<'_, ()> {
        self.latch.write()
    }

    /// Whether no one holds the tree latch. Debug-assertion helper.
    pub fn latch_is_free(&self) -> bool {
        self.latch.try_write().is_some()
    }
}

impl std::fmt::Debug for IndexDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("root_page", &self.root_page)
            .field("format", &self.format)
            .field("clustered", &self.clustered)
            .finish()
    }
}
