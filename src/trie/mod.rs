//! # Path Trie
//!
//! The path trie maps sequences of path components to positions. Each position
//! is one item of a trie record and may carry a bound row id; its child record
//! holds the components one level down.
//!
//! ## Positions
//!
//! ```text
//! TrieRec { page, record }         a list of sibling components
//! TriePos { page, record, item }   one component inside that list
//! ```
//!
//! Positions are physical: they change whenever items shift inside a record
//! or a subtree moves to another page. Every such change of a bound item is
//! reported through `TreeCoordListener::tree_coord_changed`, which is how the
//! catalog keeps each entry's stored position current.
//!
//! ## Insertion and Page Overflow
//!
//! ```text
//! lookup(rec, name, create=true)
//!   ├─ live item found       -> position
//!   └─ missing or deleted
//!        ├─ fits on page     -> insert after any deleted namesakes,
//!        │                      report shifted items
//!        ├─ overflow         -> move largest in-page subtree to a new page,
//!        │                      report every moved item, retry
//!        └─ only record 0    -> continue record 0 on a new page, insert there
//! ```
//!
//! Record 0 of a page is never moved, because it may be the child of an item
//! on another page. When nothing else is left to move, record 0 grows a chain
//! of continuation pages, so a sibling list is not bounded by the page size.
//! Only a single component too long for an empty page fails to be created.
//!
//! ## Deletion
//!
//! `delete()` only flags an item. It keeps its name, its row id and its
//! children, so entries below a deleted entry still rebuild their path and
//! its moves are still reported to the listener. Lookups skip deleted items;
//! a creating lookup adds a fresh item beside the deleted one. Space held by
//! deleted items is never reclaimed.

mod page;

use std::fmt;

use eyre::{bail, ensure, Result};
use tracing::{debug, trace, warn};

use crate::config::PAGE_HEADER_SIZE;
use crate::hierarchy::TreeCoordListener;
use crate::storage::{validate_page, PageType, PagedFile, StoreKind};
use crate::{PageId, RowId};

pub use page::{ChildRef, TrieItem, TriePage, RECORD_META_SIZE};
use page::{search, SearchResult};

/// A record of sibling components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrieRec {
    pub page: PageId,
    pub record: u16,
}

/// One component inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriePos {
    pub page: PageId,
    pub record: u16,
    pub item: u16,
}

impl TriePos {
    pub fn rec(&self) -> TrieRec {
        TrieRec {
            page: self.page,
            record: self.record,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrieStats {
    pub pages: u32,
    pub records: u32,
    pub items: u32,
    pub bound_items: u32,
    pub deleted_items: u32,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    pub relocated_subtrees: u64,
}

impl TrieStats {
    pub fn fill_factor(&self) -> f64 {
        if self.capacity_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.capacity_bytes as f64
        }
    }
}

impl fmt::Display for TrieStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} items ({} bound, {} deleted) in {} records on {} pages, fill {:.1}%, {} subtrees relocated",
            self.items,
            self.bound_items,
            self.deleted_items,
            self.records,
            self.pages,
            self.fill_factor() * 100.0,
            self.relocated_subtrees
        )
    }
}

/// Result of moving a subtree off a full page.
struct Relocation {
    from: PageId,
    to: PageId,
    records: Vec<(u16, u16)>,
}

impl Relocation {
    fn follow(&self, rec: TrieRec) -> TrieRec {
        if rec.page != self.from {
            return rec;
        }
        self.records
            .iter()
            .find(|(old, _)| *old == rec.record)
            .map_or(rec, |&(_, new)| TrieRec {
                page: self.to,
                record: new,
            })
    }
}

#[derive(Debug)]
pub struct PathTrie {
    file: PagedFile,
    root: PageId,
    relocated_subtrees: u64,
}

impl PathTrie {
    pub fn create(mut file: PagedFile) -> Result<Self> {
        ensure!(
            file.kind() == StoreKind::Trie,
            "path trie requires a trie file, got {:?}",
            file.kind()
        );
        let root = file.allocate(PageType::TrieNode)?;
        TriePage::with_root_record().encode(file.page_mut(root)?)?;
        file.header_mut()?.set_root_page(root);

        Ok(Self {
            file,
            root,
            relocated_subtrees: 0,
        })
    }

    pub fn open(file: PagedFile) -> Result<Self> {
        let root = file.header()?.root_page();
        ensure!(root != 0, "trie file has no root page");
        validate_page(file.page(root)?, PageType::TrieNode)?;

        Ok(Self {
            file,
            root,
            relocated_subtrees: 0,
        })
    }

    pub fn root(&self) -> TrieRec {
        TrieRec {
            page: self.root,
            record: 0,
        }
    }

    fn read_page(&self, page: PageId) -> Result<TriePage> {
        let data = self.file.page(page)?;
        validate_page(data, PageType::TrieNode)?;
        TriePage::decode(data)
    }

    fn write_page(&mut self, page_no: PageId, page: &TriePage) -> Result<()> {
        page.encode(self.file.page_mut(page_no)?)
    }

    fn page_capacity(&self) -> usize {
        self.file.page_size()
    }

    /// Finds `name` among the children in `rec`, creating it if `create` is set.
    pub fn lookup(
        &mut self,
        rec: TrieRec,
        name: &str,
        create: bool,
        listener: &mut dyn TreeCoordListener,
    ) -> Result<Option<TriePos>> {
        ensure!(
            name.len() <= u16::MAX as usize,
            "path component of {} bytes is too long",
            name.len()
        );

        let mut rec = rec;
        loop {
            let page = self.read_page(rec.page)?;
            if let SearchResult::Found(i) = search(page.record(rec.record)?, name) {
                let pos = TriePos {
                    page: rec.page,
                    record: rec.record,
                    item: i as u16,
                };
                trace!(component = name, ?pos, "trie lookup hit");
                return Ok(Some(pos));
            }
            if rec.record != 0 || page.next == 0 {
                break;
            }
            rec = TrieRec {
                page: page.next,
                record: 0,
            };
        }

        if !create {
            return Ok(None);
        }
        self.insert(rec, name, listener)
    }

    /// Adds a fresh item named `name` to `rec`, the last record of its chain.
    fn insert(
        &mut self,
        rec: TrieRec,
        name: &str,
        listener: &mut dyn TreeCoordListener,
    ) -> Result<Option<TriePos>> {
        let item = TrieItem::new(name);
        if item.encoded_size() + RECORD_META_SIZE + PAGE_HEADER_SIZE > self.page_capacity() {
            warn!(
                component = name,
                len = name.len(),
                "path component cannot fit on any trie page"
            );
            return Ok(None);
        }

        let mut rec = rec;
        loop {
            let mut page = self.read_page(rec.page)?;

            if page.encoded_size() + item.encoded_size() <= self.page_capacity() {
                let record = page.record_mut(rec.record)?;
                let i = match search(record.as_slice(), name) {
                    SearchResult::NotFound(i) => i,
                    SearchResult::Found(i) => {
                        bail!("trie record already holds live item '{}' at {}", name, i)
                    }
                };
                record.insert(i, item);
                let shifted: Vec<(u16, RowId)> = record[i + 1..]
                    .iter()
                    .enumerate()
                    .filter(|(_, it)| it.row_id != 0)
                    .map(|(k, it)| ((i + 1 + k) as u16, it.row_id))
                    .collect();
                self.write_page(rec.page, &page)?;

                for (k, row_id) in shifted {
                    listener.tree_coord_changed(
                        row_id,
                        TriePos {
                            page: rec.page,
                            record: rec.record,
                            item: k,
                        },
                    )?;
                }

                let pos = TriePos {
                    page: rec.page,
                    record: rec.record,
                    item: i as u16,
                };
                trace!(component = name, ?pos, "inserted trie item");
                return Ok(Some(pos));
            }

            match self.split(rec.page, page, listener)? {
                Some(relocation) => rec = relocation.follow(rec),
                None if rec.record == 0 => rec = self.extend_chain(rec.page)?,
                None => {
                    warn!(
                        component = name,
                        page = rec.page,
                        "trie page full and no subtree can move; creation failed"
                    );
                    return Ok(None);
                }
            }
        }
    }

    /// Continues record 0 of `page_no` on a fresh page.
    fn extend_chain(&mut self, page_no: PageId) -> Result<TrieRec> {
        let mut page = self.read_page(page_no)?;
        ensure!(
            page.next == 0,
            "trie page {} already continues on page {}",
            page_no,
            page.next
        );

        let next = self.file.allocate(PageType::TrieNode)?;
        self.write_page(next, &TriePage::with_root_record())?;
        page.next = next;
        self.write_page(page_no, &page)?;

        debug!(from = page_no, to = next, "record 0 continues on new trie page");
        Ok(TrieRec {
            page: next,
            record: 0,
        })
    }

    /// Moves the largest movable in-page subtree of `page_no` to a new page.
    fn split(
        &mut self,
        page_no: PageId,
        mut page: TriePage,
        listener: &mut dyn TreeCoordListener,
    ) -> Result<Option<Relocation>> {
        let candidate = (1..page.records.len() as u16)
            .filter(|&r| page.records[r as usize].is_some())
            .filter(|&r| page.parent_item(r).is_some())
            .map(|r| {
                let size: usize = page.subtree(r).iter().map(|&s| page.record_size(s)).sum();
                (r, size)
            })
            .max_by_key(|&(_, size)| size);

        let Some((root_record, size)) = candidate else {
            return Ok(None);
        };
        let Some((parent_record, parent_item)) = page.parent_item(root_record) else {
            return Ok(None);
        };

        let new_page_no = self.file.allocate(PageType::TrieNode)?;
        let order = page.subtree(root_record);
        let records: Vec<(u16, u16)> = order
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new as u16))
            .collect();

        let mut moved = TriePage::default();
        for &old in &order {
            let mut items = page.records[old as usize].take().unwrap_or_default();
            for item in &mut items {
                if let ChildRef::Record(child) = item.child {
                    let new = records
                        .iter()
                        .find(|(o, _)| *o == child)
                        .map(|&(_, n)| n)
                        .ok_or_else(|| eyre::eyre!("trie record {} escaped its subtree", child))?;
                    item.child = ChildRef::Record(new);
                }
            }
            moved.records.push(Some(items));
        }
        page.item_mut(parent_record, parent_item)?.child = ChildRef::Page(new_page_no);

        self.write_page(new_page_no, &moved)?;
        self.write_page(page_no, &page)?;
        self.relocated_subtrees += 1;

        debug!(
            from = page_no,
            to = new_page_no,
            records = order.len(),
            bytes = size,
            "moved trie subtree to new page"
        );

        for (record, items) in moved.records.iter().enumerate() {
            let Some(items) = items else { continue };
            for (item, it) in items.iter().enumerate() {
                if it.row_id != 0 {
                    listener.tree_coord_changed(
                        it.row_id,
                        TriePos {
                            page: new_page_no,
                            record: record as u16,
                            item: item as u16,
                        },
                    )?;
                }
            }
        }

        Ok(Some(Relocation {
            from: page_no,
            to: new_page_no,
            records,
        }))
    }

    /// Child record of the item at `pos`, created if missing and `create` is set.
    pub fn children(&mut self, pos: TriePos, create: bool) -> Result<Option<TrieRec>> {
        let mut page = self.read_page(pos.page)?;
        let item = page.item(pos.record, pos.item)?;
        if item.deleted {
            return Ok(None);
        }

        match item.child {
            ChildRef::Record(record) => Ok(Some(TrieRec {
                page: pos.page,
                record,
            })),
            ChildRef::Page(child_page) => Ok(Some(TrieRec {
                page: child_page,
                record: 0,
            })),
            ChildRef::None if !create => Ok(None),
            ChildRef::None => {
                if page.encoded_size() + page.add_record_cost() <= self.page_capacity() {
                    let record = page.add_record();
                    page.item_mut(pos.record, pos.item)?.child = ChildRef::Record(record);
                    self.write_page(pos.page, &page)?;
                    return Ok(Some(TrieRec {
                        page: pos.page,
                        record,
                    }));
                }

                let child_page = self.file.allocate(PageType::TrieNode)?;
                self.write_page(child_page, &TriePage::with_root_record())?;
                page.item_mut(pos.record, pos.item)?.child = ChildRef::Page(child_page);
                self.write_page(pos.page, &page)?;
                debug!(?pos, page = child_page, "children placed on new trie page");
                Ok(Some(TrieRec {
                    page: child_page,
                    record: 0,
                }))
            }
        }
    }

    pub fn row_id(&self, pos: TriePos) -> Result<RowId> {
        Ok(self.read_page(pos.page)?.item(pos.record, pos.item)?.row_id)
    }

    pub fn set_row_id(&mut self, pos: TriePos, row_id: RowId) -> Result<()> {
        let mut page = self.read_page(pos.page)?;
        page.item_mut(pos.record, pos.item)?.row_id = row_id;
        self.write_page(pos.page, &page)
    }

    pub fn read_name(&self, pos: TriePos) -> Result<String> {
        Ok(self
            .read_page(pos.page)?
            .item(pos.record, pos.item)?
            .name
            .clone())
    }

    pub fn is_deleted(&self, pos: TriePos) -> Result<bool> {
        Ok(self.read_page(pos.page)?.item(pos.record, pos.item)?.deleted)
    }

    /// Flags the item at `pos` deleted; its name stays readable.
    pub fn delete(&mut self, pos: TriePos) -> Result<()> {
        let mut page = self.read_page(pos.page)?;
        page.item_mut(pos.record, pos.item)?.deleted = true;
        self.write_page(pos.page, &page)?;
        debug!(?pos, "deleted trie item");
        Ok(())
    }

    /// Every live, bound path reachable from the root, with its row id.
    pub fn paths(&self) -> Result<Vec<(Vec<String>, RowId)>> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root(), Vec::<String>::new())];

        while let Some((rec, prefix)) = stack.pop() {
            let page = self.read_page(rec.page)?;
            if rec.record == 0 && page.next != 0 {
                stack.push((
                    TrieRec {
                        page: page.next,
                        record: 0,
                    },
                    prefix.clone(),
                ));
            }
            for item in page.record(rec.record)?.iter().rev() {
                if item.deleted {
                    continue;
                }
                let mut path = prefix.clone();
                path.push(item.name.clone());
                match item.child {
                    ChildRef::Record(record) => stack.push((
                        TrieRec {
                            page: rec.page,
                            record,
                        },
                        path.clone(),
                    )),
                    ChildRef::Page(child_page) => stack.push((
                        TrieRec {
                            page: child_page,
                            record: 0,
                        },
                        path.clone(),
                    )),
                    ChildRef::None => {}
                }
                if item.row_id != 0 {
                    out.push((path, item.row_id));
                }
            }
        }

        out.sort();
        Ok(out)
    }

    pub fn stats(&self) -> Result<TrieStats> {
        let mut stats = TrieStats {
            relocated_subtrees: self.relocated_subtrees,
            ..TrieStats::default()
        };

        for page_no in self.file.pages_of_type(PageType::TrieNode)? {
            let page = self.read_page(page_no)?;
            stats.pages += 1;
            stats.used_bytes += page.encoded_size() as u64;
            stats.capacity_bytes += self.page_capacity() as u64;
            for items in page.records.iter().flatten() {
                stats.records += 1;
                for item in items {
                    stats.items += 1;
                    if item.row_id != 0 {
                        stats.bound_items += 1;
                    }
                    if item.deleted {
                        stats.deleted_items += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}
