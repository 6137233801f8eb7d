//! # Layered Payload Store
//!
//! One `InfoStore` per layer keeps a variable-length, sorted `i32` payload for
//! each row id. Payloads of many row ids share a page; the catalog entry of a
//! row records which page holds its payload.
//!
//! ## Placement
//!
//! New payloads are placed next to their relatives. `write_new` asks the
//! hierarchy for the page of the row or of its nearest ancestor that has one
//! (`find_page_of`) and writes the payload there:
//!
//! ```text
//! find_page_of(layer, row)
//!   ├─ None     -> allocate page, write, write_newly_allocated_page_id()
//!   └─ Some(p)  -> write on p, split p if it overflows,
//!                  update_page_id() if the payload ended up elsewhere
//! ```
//!
//! ## Page Splits
//!
//! When a page overflows, a subtree of ids is moved to a fresh page. The
//! subtree is chosen over the parent links of the ids on the page, including
//! "virtual" ancestors that have no payload on the page themselves:
//!
//! ```text
//!        X (virtual)         moving X's subtree moves a and b, and X's
//!       / \                  pointer follows them if X inherited this page
//!      a   b     c
//! ```
//!
//! The subtree whose removal leaves the page closest to half full wins. Every
//! moved id, and every virtual ancestor that resolved to the old page, is
//! reported through `update_page_id`.
//!
//! ## Limits
//!
//! A payload longer than `max_payload_len()` is truncated to it, so a single
//! entry always fits on an empty page.

mod page;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::hierarchy::ItemsHierarchy;
use crate::storage::{validate_page, PageType, PagedFile, StoreKind};
use crate::{PageId, RowId};

pub use page::{max_payload_len, merge_sorted, InfoEntry, InfoPage};
use page::{ENTRY_META_SIZE, ITEM_SIZE};

/// Snapshot of one payload page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoPos {
    page_id: PageId,
    page: InfoPage,
}

impl InfoPos {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn has_item(&self, row_id: RowId) -> bool {
        self.page.contains(row_id)
    }

    pub fn read(&self, row_id: RowId) -> Option<&[i32]> {
        self.page.get(row_id)
    }

    pub fn row_ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.page.entries().iter().map(|entry| entry.row_id)
    }
}

/// Utilization of a single payload page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageUsage {
    pub entries: usize,
    pub payload_lengths: Vec<usize>,
    pub fill_factor: f64,
}

#[derive(Debug)]
pub struct InfoStore {
    file: PagedFile,
    layer: usize,
}

impl InfoStore {
    pub fn create(mut file: PagedFile, layer: usize) -> Result<Self> {
        ensure!(
            file.kind() == StoreKind::Info,
            "payload store requires a payload file, got {:?}",
            file.kind()
        );
        file.header_mut()?.set_tag(layer as u32);
        Ok(Self { file, layer })
    }

    pub fn open(file: PagedFile, layer: usize) -> Result<Self> {
        let stored = file.header()?.tag() as usize;
        ensure!(
            stored == layer,
            "payload file holds layer {} but was opened as layer {}",
            stored,
            layer
        );
        Ok(Self { file, layer })
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    pub fn page_size(&self) -> usize {
        self.file.page_size()
    }

    pub fn max_payload_len(&self) -> usize {
        max_payload_len(self.page_size())
    }

    fn read_page(&self, page_id: PageId) -> Result<InfoPage> {
        let data = self.file.page(page_id)?;
        validate_page(data, PageType::InfoItems)?;
        InfoPage::decode(data).wrap_err_with(|| {
            format!("corrupt payload page {} in layer {}", page_id, self.layer)
        })
    }

    fn write_page(&mut self, page_id: PageId, page: &InfoPage) -> Result<()> {
        page.encode(self.file.page_mut(page_id)?)
    }

    fn clamp(&self, row_id: RowId, mut items: Vec<i32>) -> Vec<i32> {
        let max = self.max_payload_len();
        if items.len() > max {
            warn!(
                layer = self.layer,
                row_id,
                len = items.len(),
                max,
                "payload truncated to maximum length"
            );
            items.truncate(max);
        }
        items
    }

    /// Reads the payload page `page_id`; `None` for the unset page 0.
    pub fn read_pos(&self, page_id: PageId) -> Result<Option<InfoPos>> {
        if page_id == 0 {
            return Ok(None);
        }
        Ok(Some(InfoPos {
            page_id,
            page: self.read_page(page_id)?,
        }))
    }

    /// Writes the first payload of `row_id`. Returns the page now holding it.
    pub fn write_new(
        &mut self,
        hierarchy: &mut dyn ItemsHierarchy,
        row_id: RowId,
        payload: &[i32],
    ) -> Result<PageId> {
        let mut items = payload.to_vec();
        items.sort_unstable();
        let items = self.clamp(row_id, items);

        let target = hierarchy.find_page_of(self.layer, row_id)?;
        let (start, mut page) = match target {
            Some(page_id) => (page_id, self.read_page(page_id)?),
            None => (
                self.file.allocate(PageType::InfoItems)?,
                InfoPage::default(),
            ),
        };

        page.replace(row_id, items);
        let placed = self.make_page_fit(hierarchy, row_id, start, page)?;

        match target {
            None => {
                trace!(layer = self.layer, row_id, page = placed, "payload on new page");
                hierarchy.write_newly_allocated_page_id(self.layer, row_id, placed)?;
            }
            Some(inherited) if inherited != placed => {
                trace!(layer = self.layer, row_id, from = inherited, page = placed, "payload did not fit");
                hierarchy.update_page_id(self.layer, row_id, placed)?;
            }
            Some(_) => {
                trace!(layer = self.layer, row_id, page = placed, "payload fits on existing page");
            }
        }
        Ok(placed)
    }

    /// Adds `items` to the payload of `row_id` on `page_id`, skipping values
    /// already present. Returns the page now holding the payload.
    pub fn add_items(
        &mut self,
        hierarchy: &mut dyn ItemsHierarchy,
        page_id: PageId,
        row_id: RowId,
        items: &[i32],
    ) -> Result<PageId> {
        let mut page = self.read_page(page_id)?;
        let existing = page.get(row_id).unwrap_or(&[]);
        let merged = merge_sorted(existing, items);
        if merged.len() == existing.len() && page.contains(row_id) {
            return Ok(page_id);
        }

        let merged = self.clamp(row_id, merged);
        page.replace(row_id, merged);
        self.make_page_fit(hierarchy, row_id, page_id, page)
    }

    /// Replaces the payload of `row_id` on `page_id`. Returns the page now
    /// holding the payload.
    pub fn update(
        &mut self,
        hierarchy: &mut dyn ItemsHierarchy,
        page_id: PageId,
        row_id: RowId,
        payload: &[i32],
    ) -> Result<PageId> {
        let mut items = payload.to_vec();
        items.sort_unstable();
        let items = self.clamp(row_id, items);

        let mut page = self.read_page(page_id)?;
        page.replace(row_id, items);
        self.make_page_fit(hierarchy, row_id, page_id, page)
    }

    /// Removes the payload of `row_id` from `page_id`. The page is kept even
    /// if it becomes empty, since other ids may still inherit it.
    pub fn delete(&mut self, page_id: PageId, row_id: RowId) -> Result<()> {
        let mut page = self.read_page(page_id)?;
        if page.remove(row_id).is_none() {
            warn!(
                layer = self.layer,
                row_id,
                page = page_id,
                "payload to delete not found on page"
            );
            return Ok(());
        }
        self.write_page(page_id, &page)
    }

    /// Splits `page` until it fits, then writes it. Returns the page that
    /// ends up holding `row_id`.
    fn make_page_fit(
        &mut self,
        hierarchy: &mut dyn ItemsHierarchy,
        row_id: RowId,
        page_id: PageId,
        page: InfoPage,
    ) -> Result<PageId> {
        let page_size = self.page_size();
        let mut current_id = page_id;
        let mut current = page;

        while !current.fits(page_size) {
            let Some(ids) = self.choose_items_to_move(hierarchy, &current)? else {
                bail!(
                    "payload page {} of layer {} overflows with {} entries and cannot be split",
                    current_id,
                    self.layer,
                    current.len()
                );
            };

            let new_id = self.file.allocate(PageType::InfoItems)?;
            let mut moved = InfoPage::default();
            for id in &ids {
                if let Some(entry) = current.remove(*id) {
                    moved.insert_entry(entry);
                }
            }

            debug!(
                layer = self.layer,
                from = current_id,
                to = new_id,
                ids = ids.len(),
                entries = moved.len(),
                "split payload page"
            );

            for &id in &ids {
                let follows = moved.contains(id)
                    || hierarchy.find_page_of(self.layer, id)? == Some(current_id);
                if follows {
                    hierarchy.update_page_id(self.layer, id, new_id)?;
                }
            }

            if moved.contains(row_id) {
                let left = std::mem::replace(&mut current, moved);
                self.make_page_fit(hierarchy, row_id, current_id, left)?;
                current_id = new_id;
            } else {
                self.make_page_fit(hierarchy, row_id, new_id, moved)?;
            }
        }

        self.write_page(current_id, &current)?;
        Ok(current_id)
    }

    /// Picks the ids to move off an overflowing page: the subtree (over
    /// parent links, virtual ancestors included) whose removal brings the
    /// page closest to half full. `None` if no proper subtree exists.
    fn choose_items_to_move(
        &self,
        hierarchy: &dyn ItemsHierarchy,
        page: &InfoPage,
    ) -> Result<Option<Vec<RowId>>> {
        let count = page.len();
        let mut nodes: Vec<RowId> = page.entries().iter().map(|e| e.row_id).collect();
        let mut size: Vec<usize> = page
            .entries()
            .iter()
            .map(|e| ENTRY_META_SIZE + ITEM_SIZE * e.items.len())
            .collect();
        let mut real: Vec<usize> = vec![1; count];
        let mut parents: Vec<Option<usize>> = vec![None; count];
        let mut index: HashMap<RowId, usize> =
            nodes.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        for i in 0..count {
            let mut child = i;
            while parents[child].is_none() {
                let child_id = nodes[child];
                let Some(parent) = hierarchy.parent_of(child_id)? else {
                    break;
                };
                if parent == 0 {
                    break;
                }
                ensure!(
                    parent < child_id,
                    "parent {} of row {} is not an older entry",
                    parent,
                    child_id
                );
                let idx = *index.entry(parent).or_insert_with(|| {
                    nodes.push(parent);
                    size.push(0);
                    real.push(0);
                    parents.push(None);
                    nodes.len() - 1
                });
                parents[child] = Some(idx);
                child = idx;
            }
        }

        // Parents are always older (smaller) ids, so descending id order
        // visits every child before its parent.
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_unstable_by_key(|&k| std::cmp::Reverse(nodes[k]));
        let mut deep_size = size.clone();
        let mut deep_real = real.clone();
        for &k in &order {
            if let Some(p) = parents[k] {
                deep_size[p] += deep_size[k];
                deep_real[p] += deep_real[k];
            }
        }

        let total = page.encoded_size() as i64;
        let ideal = (self.page_size() / 2) as i64;
        let best = order
            .iter()
            .rev()
            .copied()
            .filter(|&k| deep_real[k] > 0 && deep_real[k] < count)
            .min_by_key(|&k| (ideal - (total - deep_size[k] as i64)).abs());

        let Some(best) = best else {
            return Ok(None);
        };

        let mut chosen: Vec<RowId> = (0..nodes.len())
            .filter(|&k| {
                let mut cur = Some(k);
                while let Some(c) = cur {
                    if c == best {
                        return true;
                    }
                    cur = parents[c];
                }
                false
            })
            .map(|k| nodes[k])
            .collect();
        chosen.sort_unstable();
        Ok(Some(chosen))
    }

    pub fn usage(&self, page_id: PageId) -> Result<PageUsage> {
        let page = self.read_page(page_id)?;
        Ok(PageUsage {
            entries: page.len(),
            payload_lengths: page.entries().iter().map(|e| e.items.len()).collect(),
            fill_factor: page.encoded_size() as f64 / self.page_size() as f64,
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}
