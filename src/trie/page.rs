//! # Trie Page Encoding
//!
//! A trie page holds a list of records; a record is a name-sorted list of
//! items. Each item is one path component with an optional bound row id and an
//! optional child record that holds the next level of components.
//!
//! ## Page Layout
//!
//! ```text
//! +-------------+----------+----------+-----+
//! | PageHeader  | record 0 | record 1 | ... |
//! | (16 bytes)  |          |          |     |
//! +-------------+----------+----------+-----+
//!
//! record:  item_count u16 | item 0 | item 1 | ...     (0xFFFF = vacant)
//! item:    name_len u16 | name bytes | row_id u32 | flags u8 | child u32
//! ```
//!
//! The page header `entry_count` is the number of records (vacant ones
//! included) and `used_bytes` the encoded size of the page. `next_page`
//! links to the page where record 0 continues once it no longer fits here:
//!
//! ```text
//! page 4 record 0 [a..m] ──next──> page 9 record 0 [b..z] ──next──> 0
//! ```
//!
//! Each page of such a chain is sorted on its own; a name is live on at most
//! one page of the chain.
//!
//! ## Item Flags
//!
//! ```text
//! bit 0-1  child kind: 0 = none, 1 = in-page record, 2 = record 0 of a page
//! bit 7    deleted
//! ```
//!
//! ## Editing
//!
//! Pages are decoded into `TriePage`, edited in memory and encoded back. All
//! size checks happen against `encoded_size()` before encoding, so `encode`
//! failing on an overfull page is a logic error, not a normal outcome.

use eyre::{bail, ensure, Result, WrapErr};
use smallvec::SmallVec;

use crate::config::PAGE_HEADER_SIZE;
use crate::storage::{PageHeader, PageType};
use crate::{PageId, RowId};

pub const VACANT_RECORD: u16 = 0xFFFF;
pub const RECORD_META_SIZE: usize = 2;
pub const ITEM_META_SIZE: usize = 2 + 4 + 1 + 4;

const CHILD_KIND_MASK: u8 = 0x03;
const CHILD_NONE: u8 = 0;
const CHILD_RECORD: u8 = 1;
const CHILD_PAGE: u8 = 2;
const FLAG_DELETED: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    None,
    Record(u16),
    Page(PageId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieItem {
    pub name: String,
    pub row_id: RowId,
    pub child: ChildRef,
    pub deleted: bool,
}

impl TrieItem {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            row_id: 0,
            child: ChildRef::None,
            deleted: false,
        }
    }

    pub fn encoded_size(&self) -> usize {
        ITEM_META_SIZE + self.name.len()
    }

    fn flags(&self) -> u8 {
        let kind = match self.child {
            ChildRef::None => CHILD_NONE,
            ChildRef::Record(_) => CHILD_RECORD,
            ChildRef::Page(_) => CHILD_PAGE,
        };
        if self.deleted {
            kind | FLAG_DELETED
        } else {
            kind
        }
    }

    fn child_word(&self) -> u32 {
        match self.child {
            ChildRef::None => 0,
            ChildRef::Record(r) => r as u32,
            ChildRef::Page(p) => p,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SearchResult {
    /// Index of the live item with the name.
    Found(usize),
    /// Insertion point, after every deleted item with the name.
    NotFound(usize),
}

/// Finds the live item named `name`. Deleted namesakes sort before the live
/// one, so a new item goes after all of them.
pub fn search(items: &[TrieItem], name: &str) -> SearchResult {
    let start = items.partition_point(|item| item.name.as_str() < name);
    let end = start
        + items[start..]
            .iter()
            .take_while(|item| item.name == name)
            .count();
    match items[start..end].iter().position(|item| !item.deleted) {
        Some(k) => SearchResult::Found(start + k),
        None => SearchResult::NotFound(end),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriePage {
    pub records: Vec<Option<Vec<TrieItem>>>,
    /// Page continuing record 0, 0 if none.
    pub next: PageId,
}

impl TriePage {
    /// A page holding a single empty record 0.
    pub fn with_root_record() -> Self {
        Self {
            records: vec![Some(Vec::new())],
            next: 0,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PageHeader::from_bytes(data)?;
        let record_count = header.entry_count() as usize;
        let mut reader = Reader::new(data, PAGE_HEADER_SIZE);

        let mut records = Vec::with_capacity(record_count);
        for record in 0..record_count {
            let count = reader.u16()?;
            if count == VACANT_RECORD {
                records.push(None);
                continue;
            }

            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name_len = reader.u16()? as usize;
                let name = std::str::from_utf8(reader.bytes(name_len)?)
                    .wrap_err_with(|| format!("trie record {} holds a non-UTF-8 name", record))?
                    .to_owned();
                let row_id = reader.u32()?;
                let flags = reader.u8()?;
                let child_word = reader.u32()?;
                let child = match flags & CHILD_KIND_MASK {
                    CHILD_NONE => ChildRef::None,
                    CHILD_RECORD => {
                        ensure!(
                            (child_word as usize) < record_count,
                            "trie item '{}' points at record {} of {}",
                            name,
                            child_word,
                            record_count
                        );
                        ChildRef::Record(child_word as u16)
                    }
                    CHILD_PAGE => ChildRef::Page(child_word),
                    other => bail!("trie item '{}' has unknown child kind {}", name, other),
                };
                items.push(TrieItem {
                    name,
                    row_id,
                    child,
                    deleted: flags & FLAG_DELETED != 0,
                });
            }
            records.push(Some(items));
        }

        ensure!(
            reader.pos == header.used_bytes() as usize,
            "trie page decoded {} bytes but header records {}",
            reader.pos,
            header.used_bytes()
        );

        Ok(Self {
            records,
            next: header.next_page(),
        })
    }

    fn live_record_count(&self) -> usize {
        self.records
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1)
    }

    pub fn encoded_size(&self) -> usize {
        PAGE_HEADER_SIZE
            + self.records[..self.live_record_count()]
                .iter()
                .map(|record| {
                    RECORD_META_SIZE
                        + record
                            .as_ref()
                            .map_or(0, |items| items.iter().map(TrieItem::encoded_size).sum())
                })
                .sum::<usize>()
    }

    /// Encodes the page, dropping trailing vacant records.
    pub fn encode(&self, data: &mut [u8]) -> Result<()> {
        let size = self.encoded_size();
        ensure!(
            size <= data.len(),
            "trie page needs {} bytes but page holds {}",
            size,
            data.len()
        );

        let record_count = self.live_record_count();
        let mut header = PageHeader::new(PageType::TrieNode);
        header.set_entry_count(record_count as u16);
        header.set_used_bytes(size as u32);
        header.set_next_page(self.next);

        data.fill(0);
        header.write_to(data)?;

        let mut pos = PAGE_HEADER_SIZE;
        let mut put = |bytes: &[u8]| {
            data[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        };
        for record in &self.records[..record_count] {
            let Some(items) = record else {
                put(&VACANT_RECORD.to_le_bytes());
                continue;
            };
            put(&(items.len() as u16).to_le_bytes());
            for item in items {
                put(&(item.name.len() as u16).to_le_bytes());
                put(item.name.as_bytes());
                put(&item.row_id.to_le_bytes());
                put(&[item.flags()]);
                put(&item.child_word().to_le_bytes());
            }
        }
        Ok(())
    }

    pub fn record(&self, record: u16) -> Result<&Vec<TrieItem>> {
        match self.records.get(record as usize) {
            Some(Some(items)) => Ok(items),
            Some(None) => bail!("trie record {} is vacant", record),
            None => bail!("trie record {} does not exist", record),
        }
    }

    pub fn record_mut(&mut self, record: u16) -> Result<&mut Vec<TrieItem>> {
        match self.records.get_mut(record as usize) {
            Some(Some(items)) => Ok(items),
            Some(None) => bail!("trie record {} is vacant", record),
            None => bail!("trie record {} does not exist", record),
        }
    }

    pub fn item(&self, record: u16, item: u16) -> Result<&TrieItem> {
        self.record(record)?
            .get(item as usize)
            .ok_or_else(|| eyre::eyre!("trie record {} has no item {}", record, item))
    }

    pub fn item_mut(&mut self, record: u16, item: u16) -> Result<&mut TrieItem> {
        self.record_mut(record)?
            .get_mut(item as usize)
            .ok_or_else(|| eyre::eyre!("trie record {} has no item {}", record, item))
    }

    /// Adds an empty record, reusing a vacant one when possible.
    pub fn add_record(&mut self) -> u16 {
        match self.records.iter().position(Option::is_none) {
            Some(vacant) => {
                self.records[vacant] = Some(Vec::new());
                vacant as u16
            }
            None => {
                self.records.push(Some(Vec::new()));
                (self.records.len() - 1) as u16
            }
        }
    }

    /// Extra bytes `add_record` would need.
    pub fn add_record_cost(&self) -> usize {
        if self.records[..self.live_record_count()]
            .iter()
            .any(Option::is_none)
        {
            0
        } else {
            RECORD_META_SIZE
        }
    }

    pub fn record_size(&self, record: u16) -> usize {
        RECORD_META_SIZE
            + self
                .records
                .get(record as usize)
                .and_then(Option::as_ref)
                .map_or(0, |items| items.iter().map(TrieItem::encoded_size).sum())
    }

    /// In-page records reachable from `record`, `record` first.
    pub fn subtree(&self, record: u16) -> Vec<u16> {
        let mut order = Vec::new();
        let mut stack: SmallVec<[u16; 16]> = SmallVec::new();
        stack.push(record);
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Some(Some(items)) = self.records.get(current as usize) {
                for item in items.iter().rev() {
                    if let ChildRef::Record(child) = item.child {
                        stack.push(child);
                    }
                }
            }
        }
        order
    }

    /// Finds the item whose child is in-page record `record`.
    pub fn parent_item(&self, record: u16) -> Option<(u16, u16)> {
        self.records.iter().enumerate().find_map(|(r, items)| {
            items.as_ref()?.iter().enumerate().find_map(|(i, item)| {
                (item.child == ChildRef::Record(record)).then_some((r as u16, i as u16))
            })
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(
            self.pos + len <= self.data.len(),
            "trie page truncated at offset {} (need {} bytes)",
            self.pos,
            len
        );
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
