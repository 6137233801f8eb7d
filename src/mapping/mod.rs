//! # Mapping
//!
//! `Mapping` ties the three stores together: the catalog (one entry per row
//! id), the path trie (path components to positions) and one payload store
//! per layer. It is the only public way to create, look up, delete and
//! annotate paths.
//!
//! ## Lookup and Creation
//!
//! ```text
//! find_or_create(["com", "foo", "Bar"])
//!
//!   root ─lookup("com")─> pos ─row 0?─> allocate entry 1 (parent 0)
//!          children(pos)
//!        ─lookup("foo")─> pos ─row 0?─> allocate entry 2 (parent 1)
//!          children(pos)
//!        ─lookup("Bar")─> pos ─bound──> 3
//! ```
//!
//! A component bound to a tombstoned entry counts as unbound when creating,
//! so the path gets a fresh row id while the old id stays tombstoned.
//!
//! ## Deletion
//!
//! `delete()` unbinds the trie position, removes the payload from every
//! layer and only then sets the tombstone. If it fails halfway the entry is
//! still live and the delete can simply be repeated.
//!
//! ## Locking
//!
//! All state lives in `MappingState` behind one `parking_lot::Mutex`. Every
//! public operation holds the lock for its whole duration. Store callbacks
//! (`find_page_of`, `write_newly_allocated_page_id`, `update_page_id`,
//! `tree_coord_changed`) run inside such an operation as plain calls into
//! the catalog, which the locked operation passes to the store; they never
//! touch the mutex.
//!
//! ## Usage
//!
//! ```ignore
//! let mapping = Mapping::builder().path("./index").layers(2).open()?;
//!
//! let row = mapping.find_or_create(&["com", "foo", "Bar"])?.unwrap();
//! mapping.write_info(row, 0, &[42])?;
//! assert_eq!(mapping.resolve(row)?.unwrap(), ["com", "foo", "Bar"]);
//! ```

mod builder;
mod stats;

use eyre::{ensure, Result};
use hashbrown::HashSet;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::catalog::Catalog;
use crate::error::fatal;
use crate::hierarchy::{ItemsHierarchy, TreeCoordListener};
use crate::info::{merge_sorted, InfoPos, InfoStore};
use crate::trie::{PathTrie, TriePos};
use crate::{PageId, RowId};

pub use builder::MappingBuilder;
pub use stats::{Distribution, LayerStats, MappingStats};

/// The stores of one mapping, guarded together by the mapping lock.
#[derive(Debug)]
pub(crate) struct MappingState {
    pub(crate) catalog: Catalog,
    pub(crate) trie: PathTrie,
    pub(crate) layers: Vec<InfoStore>,
}

/// Persistent mapping from hierarchical paths to row ids with layered
/// payloads.
#[derive(Debug)]
pub struct Mapping {
    state: Mutex<MappingState>,
    layer_count: usize,
}

impl Mapping {
    pub fn builder() -> MappingBuilder {
        MappingBuilder::new()
    }

    pub(crate) fn from_state(state: MappingState) -> Self {
        let layer_count = state.layers.len();
        Self {
            state: Mutex::new(state),
            layer_count,
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layer_count
    }

    pub fn max_row_id(&self) -> Result<RowId> {
        self.state.lock().catalog.max_row_id()
    }

    /// Row id of `path`, or `None` if any component is missing, deleted or
    /// unbound.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Result<Option<RowId>> {
        self.state.lock().lookup(path, false)
    }

    /// Row id of `path`, creating missing components and their entries.
    pub fn find_or_create<S: AsRef<str>>(&self, path: &[S]) -> Result<Option<RowId>> {
        self.state.lock().lookup(path, true)
    }

    /// Tombstones `row_id`. Unknown and already deleted ids are ignored.
    pub fn delete(&self, row_id: RowId) -> Result<()> {
        self.state.lock().delete(row_id)
    }

    /// Path of `row_id`, or `None` if the row is unknown or deleted.
    pub fn resolve(&self, row_id: RowId) -> Result<Option<Vec<String>>> {
        self.state.lock().resolve(row_id)
    }

    /// Parent row id (0 at the top level), or `None` if the row is unknown.
    pub fn parent_of(&self, row_id: RowId) -> Result<Option<RowId>> {
        let state = self.state.lock();
        let Some(mut entry) = state.catalog.entry(row_id) else {
            return Ok(None);
        };
        Ok(Some(entry.parent_row_id(state.catalog.records())?))
    }

    pub fn add_to_info(&self, row_id: RowId, layer: usize, item: i32) -> Result<()> {
        self.add_items_to_info(row_id, layer, &[item])
    }

    /// Adds `items` to the payload of `row_id`, skipping values it already
    /// holds.
    pub fn add_items_to_info(&self, row_id: RowId, layer: usize, items: &[i32]) -> Result<()> {
        self.state.lock().store_info(row_id, layer, items, InfoWrite::Add)
    }

    /// Replaces the payload of `row_id` in `layer`.
    pub fn write_info(&self, row_id: RowId, layer: usize, payload: &[i32]) -> Result<()> {
        self.state.lock().store_info(row_id, layer, payload, InfoWrite::Replace)
    }

    /// Payload page recorded for `row_id` itself, or `None` if it has none.
    /// The page may hold other rows' payloads and not this row's.
    pub fn locate_info(&self, row_id: RowId, layer: usize) -> Result<Option<InfoPos>> {
        self.state.lock().locate_info(row_id, layer)
    }

    /// Payload of `row_id` itself, without inheritance.
    pub fn load_info(&self, row_id: RowId, layer: usize) -> Result<Option<Vec<i32>>> {
        let pos = self.state.lock().locate_info(row_id, layer)?;
        Ok(pos.and_then(|pos| pos.read(row_id).map(<[i32]>::to_vec)))
    }

    /// Payload page of `row_id` in `layer`, inherited from the nearest
    /// ancestor that has one.
    pub fn find_page_of(&self, layer: usize, row_id: RowId) -> Result<Option<PageId>> {
        let state = self.state.lock();
        state.check_layer(layer)?;
        state.catalog.find_page_of(layer, row_id)
    }

    pub fn write_newly_allocated_page_id(
        &self,
        layer: usize,
        row_id: RowId,
        page: PageId,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_layer(layer)?;
        state
            .catalog
            .write_newly_allocated_page_id(layer, row_id, page)
    }

    pub fn update_page_id(&self, layer: usize, row_id: RowId, page: PageId) -> Result<()> {
        let mut state = self.state.lock();
        state.check_layer(layer)?;
        state.catalog.update_page_id(layer, row_id, page)
    }

    pub fn tree_coord_changed(&self, row_id: RowId, pos: TriePos) -> Result<()> {
        self.state.lock().catalog.tree_coord_changed(row_id, pos)
    }

    pub fn stats(&self) -> Result<MappingStats> {
        self.state.lock().stats()
    }

    /// Every live bound path with its row id, sorted by path.
    pub fn paths(&self) -> Result<Vec<(Vec<String>, RowId)>> {
        self.state.lock().trie.paths()
    }

    /// Packs catalog records into fewer pages. Returns the number moved.
    pub fn compact_catalog(&self) -> Result<u32> {
        self.state.lock().catalog.compact()
    }

    pub fn sync(&self) -> Result<()> {
        let state = self.state.lock();
        state.catalog.sync()?;
        state.trie.sync()?;
        for layer in &state.layers {
            layer.sync()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfoWrite {
    Add,
    Replace,
}

impl MappingState {
    fn check_layer(&self, layer: usize) -> Result<()> {
        ensure!(
            layer < self.layers.len(),
            "layer {} out of range for {} layers",
            layer,
            self.layers.len()
        );
        Ok(())
    }

    fn lookup<S: AsRef<str>>(&mut self, path: &[S], add: bool) -> Result<Option<RowId>> {
        if path.is_empty() {
            return Ok(None);
        }

        let mut rec = self.trie.root();
        let mut parent: RowId = 0;

        for (depth, component) in path.iter().enumerate() {
            let name = component.as_ref();
            let Some(pos) = self.trie.lookup(rec, name, add, &mut self.catalog)? else {
                if add {
                    warn!(name, depth, "path component could not be created");
                }
                return Ok(None);
            };

            let mut row_id = self.trie.row_id(pos)?;
            if row_id != 0 && self.catalog.live_entry(row_id)?.is_none() {
                if !add {
                    return Ok(None);
                }
                trace!(row_id, name, "rebinding component of tombstoned entry");
                row_id = 0;
            }

            if row_id == 0 {
                if !add {
                    return Ok(None);
                }
                row_id = self.bind_new_entry(parent, pos)?;
            }

            if depth + 1 < path.len() {
                let Some(child) = self.trie.children(pos, add)? else {
                    return Ok(None);
                };
                rec = child;
            }
            parent = row_id;
        }

        Ok(Some(parent))
    }

    fn bind_new_entry(&mut self, parent: RowId, pos: TriePos) -> Result<RowId> {
        let row_id = self.catalog.allocate(parent, pos)?.row_id();
        if let Err(err) = self.trie.set_row_id(pos, row_id) {
            warn!(row_id, ?pos, "binding new entry failed, releasing its record");
            if let Err(free_err) = self.catalog.free(row_id) {
                warn!(row_id, error = %free_err, "could not release unbound record");
            }
            return Err(err);
        }
        Ok(row_id)
    }

    fn delete(&mut self, row_id: RowId) -> Result<()> {
        let Some(mut entry) = self.catalog.live_entry(row_id)? else {
            trace!(row_id, "delete of unknown or deleted row ignored");
            return Ok(());
        };

        let records = self.catalog.records();
        let pos = entry.tree_pos(records)?;
        let pages = (0..self.layers.len())
            .map(|layer| entry.layer_page(records, layer))
            .collect::<Result<Vec<_>>>()?;

        if self.trie.row_id(pos)? == row_id {
            self.trie.delete(pos)?;
        } else {
            warn!(row_id, ?pos, "trie position no longer bound to deleted row");
        }

        for (layer, &page) in pages.iter().enumerate() {
            let store = &mut self.layers[layer];
            let holds_row = store
                .read_pos(page)?
                .is_some_and(|info| info.has_item(row_id));
            if holds_row {
                store.delete(page, row_id)?;
            }
        }

        entry.mark_deleted(self.catalog.records_mut())?;
        debug!(row_id, "deleted catalog entry");
        Ok(())
    }

    fn resolve(&self, row_id: RowId) -> Result<Option<Vec<String>>> {
        let Some(mut entry) = self.catalog.live_entry(row_id)? else {
            return Ok(None);
        };

        let records = self.catalog.records();
        let mut names = Vec::new();
        loop {
            names.push(self.trie.read_name(entry.tree_pos(records)?)?);
            let Some(parent) = entry.parent(records)? else {
                break;
            };
            ensure!(
                parent.row_id() < entry.row_id(),
                "row {} has parent {} that is not an older entry",
                entry.row_id(),
                parent.row_id()
            );
            let Some(next) = self.catalog.entry(parent.row_id()) else {
                warn!(row_id, parent = parent.row_id(), "parent chain broken");
                return Ok(None);
            };
            entry = next;
        }

        names.reverse();
        Ok(Some(names))
    }

    fn store_info(
        &mut self,
        row_id: RowId,
        layer: usize,
        items: &[i32],
        mode: InfoWrite,
    ) -> Result<()> {
        self.check_layer(layer)?;
        let Some(mut entry) = self.catalog.live_entry(row_id)? else {
            warn!(row_id, layer, "payload write for unknown or deleted row ignored");
            return Ok(());
        };

        let page = entry.layer_page(self.catalog.records(), layer)?;
        let store = &mut self.layers[layer];
        let holds_row = store
            .read_pos(page)?
            .is_some_and(|info| info.has_item(row_id));

        let placed = match (holds_row, mode) {
            (false, InfoWrite::Add) => {
                store.write_new(&mut self.catalog, row_id, &merge_sorted(&[], items))?
            }
            (false, InfoWrite::Replace) => store.write_new(&mut self.catalog, row_id, items)?,
            (true, InfoWrite::Add) => store.add_items(&mut self.catalog, page, row_id, items)?,
            (true, InfoWrite::Replace) => store.update(&mut self.catalog, page, row_id, items)?,
        };

        if entry.layer_page(self.catalog.records(), layer)? != placed {
            entry.set_layer_page(self.catalog.records_mut(), layer, placed)?;
        }

        let stored = store
            .read_pos(placed)?
            .is_some_and(|info| info.has_item(row_id));
        if !stored {
            return Err(fatal(format!(
                "layer {} page {} lacks payload of row {} after write",
                layer, placed, row_id
            )));
        }

        trace!(row_id, layer, page = placed, ?mode, "stored payload");
        Ok(())
    }

    fn locate_info(&self, row_id: RowId, layer: usize) -> Result<Option<InfoPos>> {
        self.check_layer(layer)?;
        let Some(mut entry) = self.catalog.live_entry(row_id)? else {
            return Ok(None);
        };
        let page = entry.layer_page(self.catalog.records(), layer)?;
        self.layers[layer].read_pos(page)
    }

    fn stats(&self) -> Result<MappingStats> {
        let records = self.catalog.records();
        let max_row_id = self.catalog.max_row_id()?;
        let mut stats = MappingStats::new(max_row_id, self.layers.len());
        let mut pages: Vec<HashSet<PageId>> = vec![HashSet::new(); self.layers.len()];

        for row_id in 1..=max_row_id {
            let Some(mut entry) = self.catalog.entry(row_id) else {
                stats.released_entries += 1;
                continue;
            };
            if entry.is_deleted(records)? {
                stats.tombstoned_entries += 1;
            } else {
                stats.live_entries += 1;
            }
            for (layer, seen) in pages.iter_mut().enumerate() {
                let page = entry.layer_page(records, layer)?;
                if page != 0 {
                    seen.insert(page);
                }
            }
        }

        for (layer, seen) in pages.iter().enumerate() {
            for &page in seen {
                let usage = self.layers[layer].usage(page)?;
                stats.layers[layer].add_page(&usage);
            }
        }
        stats.finish(self.trie.stats()?, self.catalog.stats());
        Ok(stats)
    }
}
