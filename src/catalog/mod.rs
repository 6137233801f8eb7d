//! # Catalog
//!
//! The catalog owns the record store holding one `CatalogEntry` record per
//! row id and is the single source of truth for parent links, trie positions
//! and per-layer payload page pointers.
//!
//! It is also the object the paged stores call back into: it implements
//! `ItemsHierarchy` for the payload layers and `TreeCoordListener` for the
//! path trie. Callbacks report every failure as a fatal consistency error,
//! since the calling store has already changed its pages and cannot undo
//! that.
//!
//! ## Inherited Page Defaults
//!
//! ```text
//! row:          1 ──> 2 ──> 3        (parent links)
//! layer 0 page: 7     0     0
//!
//! find_page_of(0, 3) == Some(7)      3 and 2 inherit from 1
//! ```
//!
//! `write_newly_allocated_page_id` sets the page of a row and of every
//! ancestor that is still unset, stopping at the first ancestor that already
//! has a page of its own.
//!
//! ## Layer Count
//!
//! The number of payload layers fixes the record size, so it is stored in
//! the catalog file header (`tag`) and checked on open.

mod entry;

use eyre::{ensure, Result};
use tracing::{debug, trace, warn};

use crate::config::MAX_LAYER_COUNT;
use crate::error::{escalate, fatal};
use crate::hierarchy::{ItemsHierarchy, TreeCoordListener};
use crate::records::{RecordStats, RecordStore};
use crate::storage::PagedFile;
use crate::trie::TriePos;
use crate::{PageId, RowId};

pub use entry::{entry_record_size, CatalogEntry, EntryHeader};

#[derive(Debug)]
pub struct Catalog {
    records: RecordStore,
    layer_count: usize,
}

impl Catalog {
    pub fn create(file: PagedFile, layer_count: usize) -> Result<Self> {
        Self::check_layer_count(layer_count)?;
        let mut records = RecordStore::create(file, entry_record_size(layer_count))?;
        records.set_tag(layer_count as u32)?;
        Ok(Self {
            records,
            layer_count,
        })
    }

    pub fn open(file: PagedFile) -> Result<Self> {
        let layer_count = file.header()?.tag() as usize;
        Self::check_layer_count(layer_count)?;
        let records = RecordStore::open(file, entry_record_size(layer_count))?;
        Ok(Self {
            records,
            layer_count,
        })
    }

    fn check_layer_count(layer_count: usize) -> Result<()> {
        ensure!(
            (1..=MAX_LAYER_COUNT).contains(&layer_count),
            "layer count {} outside 1..={}",
            layer_count,
            MAX_LAYER_COUNT
        );
        Ok(())
    }

    pub fn layer_count(&self) -> usize {
        self.layer_count
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut RecordStore {
        &mut self.records
    }

    pub fn max_row_id(&self) -> Result<RowId> {
        self.records.max_row_id()
    }

    /// Allocates a fresh entry under `parent` at trie position `pos`, with
    /// every layer page unset.
    pub fn allocate(&mut self, parent: RowId, pos: TriePos) -> Result<CatalogEntry> {
        let (row_id, slot) = self.records.allocate()?;
        let mut entry = CatalogEntry::resolved(row_id, slot);
        entry.init(&mut self.records, parent, pos)?;
        debug!(row_id, parent, ?pos, "created catalog entry");
        Ok(entry)
    }

    /// Resolved handle for `row_id`, `None` if the row has no entry.
    pub fn entry(&self, row_id: RowId) -> Option<CatalogEntry> {
        if row_id == 0 {
            return None;
        }
        self.records
            .resolve(row_id)
            .map(|slot| CatalogEntry::resolved(row_id, slot))
    }

    /// Live (not tombstoned) entry for `row_id`.
    pub fn live_entry(&self, row_id: RowId) -> Result<Option<CatalogEntry>> {
        let Some(mut entry) = self.entry(row_id) else {
            return Ok(None);
        };
        if entry.is_deleted(&self.records)? {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn free(&mut self, row_id: RowId) -> Result<()> {
        self.records.free(row_id)
    }

    pub fn compact(&mut self) -> Result<u32> {
        self.records.compact()
    }

    pub fn stats(&self) -> RecordStats {
        self.records.stats()
    }

    pub fn sync(&self) -> Result<()> {
        self.records.sync()
    }

    fn page_chain(&self, layer: usize, row_id: RowId) -> Result<Option<PageId>> {
        let mut current = row_id;
        loop {
            let Some(mut entry) = self.entry(current) else {
                return Ok(None);
            };
            let page = entry.layer_page(&self.records, layer)?;
            if page != 0 {
                return Ok(Some(page));
            }
            let parent = entry.parent_row_id(&self.records)?;
            if parent == 0 {
                return Ok(None);
            }
            if parent >= current {
                return Err(fatal(format!(
                    "row {} has parent {} that is not an older entry",
                    current, parent
                )));
            }
            current = parent;
        }
    }

    fn set_new_page(&mut self, layer: usize, row_id: RowId, page: PageId) -> Result<()> {
        let Some(mut entry) = self.entry(row_id) else {
            return Err(fatal(format!(
                "new layer {} page {} reported for row {} without catalog entry",
                layer, page, row_id
            )));
        };
        let existing = entry.layer_page(&self.records, layer)?;
        if existing != 0 {
            return Err(fatal(format!(
                "row {} already has layer {} page {}, new page {} reported",
                row_id, layer, existing, page
            )));
        }
        entry.set_layer_page(&mut self.records, layer, page)?;

        let mut current = entry;
        let mut inherited = 0;
        while let Some(mut parent) = current.parent(&self.records)? {
            if parent.row_id() >= current.row_id() {
                return Err(fatal(format!(
                    "row {} has parent {} that is not an older entry",
                    current.row_id(),
                    parent.row_id()
                )));
            }
            if self.records.resolve(parent.row_id()).is_none() {
                break;
            }
            if parent.layer_page(&self.records, layer)? != 0 {
                break;
            }
            parent.set_layer_page(&mut self.records, layer, page)?;
            inherited += 1;
            current = parent;
        }

        debug!(row_id, layer, page, ancestors = inherited, "recorded new payload page");
        Ok(())
    }

    fn set_page(&mut self, layer: usize, row_id: RowId, page: PageId) -> Result<()> {
        let Some(mut entry) = self.entry(row_id) else {
            return Err(fatal(format!(
                "layer {} page {} reported for row {} without catalog entry",
                layer, page, row_id
            )));
        };
        entry.set_layer_page(&mut self.records, layer, page)?;
        trace!(row_id, layer, page, "payload page moved");
        Ok(())
    }
}

impl ItemsHierarchy for Catalog {
    fn parent_of(&self, row_id: RowId) -> Result<Option<RowId>> {
        let result = match self.entry(row_id) {
            Some(mut entry) => entry.parent_row_id(&self.records).map(Some),
            None => Ok(None),
        };
        escalate("parent_of", row_id, result)
    }

    fn find_page_of(&self, layer: usize, row_id: RowId) -> Result<Option<PageId>> {
        escalate("find_page_of", row_id, self.page_chain(layer, row_id))
    }

    fn write_newly_allocated_page_id(
        &mut self,
        layer: usize,
        row_id: RowId,
        page: PageId,
    ) -> Result<()> {
        let result = self.set_new_page(layer, row_id, page);
        escalate("write_newly_allocated_page_id", row_id, result)
    }

    fn update_page_id(&mut self, layer: usize, row_id: RowId, page: PageId) -> Result<()> {
        let result = self.set_page(layer, row_id, page);
        escalate("update_page_id", row_id, result)
    }
}

impl TreeCoordListener for Catalog {
    fn tree_coord_changed(&mut self, row_id: RowId, pos: TriePos) -> Result<()> {
        if row_id == 0 {
            return Ok(());
        }
        let Some(mut entry) = self.entry(row_id) else {
            warn!(row_id, ?pos, "tree coordinates changed for row without catalog entry");
            return Ok(());
        };
        let result = entry.set_tree_pos(&mut self.records, pos);
        trace!(row_id, ?pos, "tree coordinates changed");
        escalate("tree_coord_changed", row_id, result)
    }
}
