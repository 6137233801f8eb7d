//! # Payload Page Encoding
//!
//! A payload page packs the integer payloads of several row ids of one layer.
//!
//! ```text
//! +-------------+---------+---------+-----+
//! | PageHeader  | entry 0 | entry 1 | ... |
//! +-------------+---------+---------+-----+
//!
//! entry:  row_id u32 | len u16 | item i32 * len
//! ```
//!
//! Entries are sorted by row id; the items of each entry are sorted
//! ascending. The page header `entry_count` is the number of entries and
//! `used_bytes` the encoded size.
//!
//! Like trie pages, payload pages are decoded, edited in memory and encoded
//! back. An `InfoPage` may temporarily exceed the page size while a split is
//! being planned; only pages that fit are ever encoded.

use eyre::{ensure, Result};

use crate::config::{PAGE_HEADER_SIZE, PAYLOAD_LENGTH_SLACK};
use crate::storage::{PageHeader, PageType};
use crate::RowId;

pub const ENTRY_META_SIZE: usize = 4 + 2;
pub const ITEM_SIZE: usize = 4;

/// Longest payload a single entry may hold on a page of `page_size` bytes.
pub fn max_payload_len(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE - ENTRY_META_SIZE) / ITEM_SIZE - PAYLOAD_LENGTH_SLACK
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoEntry {
    pub row_id: RowId,
    pub items: Vec<i32>,
}

impl InfoEntry {
    pub fn encoded_size(&self) -> usize {
        ENTRY_META_SIZE + ITEM_SIZE * self.items.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoPage {
    entries: Vec<InfoEntry>,
}

impl InfoPage {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PageHeader::from_bytes(data)?;
        let count = header.entry_count() as usize;
        let mut pos = PAGE_HEADER_SIZE;
        let mut entries: Vec<InfoEntry> = Vec::with_capacity(count);

        for _ in 0..count {
            ensure!(
                pos + ENTRY_META_SIZE <= data.len(),
                "payload page truncated at offset {}",
                pos
            );
            let row_id = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            let len = u16::from_le_bytes([data[pos + 4], data[pos + 5]]) as usize;
            pos += ENTRY_META_SIZE;

            ensure!(
                pos + len * ITEM_SIZE <= data.len(),
                "payload of row {} overruns page ({} items at offset {})",
                row_id,
                len,
                pos
            );
            if let Some(last) = entries.last() {
                ensure!(
                    last.row_id < row_id,
                    "payload page entries out of order: {} before {}",
                    last.row_id,
                    row_id
                );
            }

            let items = data[pos..pos + len * ITEM_SIZE]
                .chunks_exact(ITEM_SIZE)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            pos += len * ITEM_SIZE;
            entries.push(InfoEntry { row_id, items });
        }

        ensure!(
            pos == header.used_bytes() as usize,
            "payload page decoded {} bytes but header records {}",
            pos,
            header.used_bytes()
        );

        Ok(Self { entries })
    }

    pub fn encode(&self, data: &mut [u8]) -> Result<()> {
        let size = self.encoded_size();
        ensure!(
            size <= data.len(),
            "payload page needs {} bytes but page holds {}",
            size,
            data.len()
        );

        let mut header = PageHeader::new(PageType::InfoItems);
        header.set_entry_count(self.entries.len() as u16);
        header.set_used_bytes(size as u32);

        data.fill(0);
        header.write_to(data)?;

        let mut pos = PAGE_HEADER_SIZE;
        for entry in &self.entries {
            data[pos..pos + 4].copy_from_slice(&entry.row_id.to_le_bytes());
            data[pos + 4..pos + 6].copy_from_slice(&(entry.items.len() as u16).to_le_bytes());
            pos += ENTRY_META_SIZE;
            for item in &entry.items {
                data[pos..pos + ITEM_SIZE].copy_from_slice(&item.to_le_bytes());
                pos += ITEM_SIZE;
            }
        }
        Ok(())
    }

    pub fn encoded_size(&self) -> usize {
        PAGE_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(InfoEntry::encoded_size)
                .sum::<usize>()
    }

    pub fn fits(&self, page_size: usize) -> bool {
        self.encoded_size() <= page_size
    }

    pub fn entries(&self) -> &[InfoEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, row_id: RowId) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by_key(&row_id, |entry| entry.row_id)
    }

    pub fn contains(&self, row_id: RowId) -> bool {
        self.find(row_id).is_ok()
    }

    pub fn get(&self, row_id: RowId) -> Option<&[i32]> {
        self.find(row_id)
            .ok()
            .map(|i| self.entries[i].items.as_slice())
    }

    /// Sets the payload of `row_id`, inserting the entry if needed.
    pub fn replace(&mut self, row_id: RowId, items: Vec<i32>) {
        match self.find(row_id) {
            Ok(i) => self.entries[i].items = items,
            Err(i) => self.entries.insert(i, InfoEntry { row_id, items }),
        }
    }

    pub fn insert_entry(&mut self, entry: InfoEntry) {
        match self.find(entry.row_id) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    pub fn remove(&mut self, row_id: RowId) -> Option<InfoEntry> {
        self.find(row_id).ok().map(|i| self.entries.remove(i))
    }
}

/// Merges sorted `extra` into sorted `existing`, skipping values already present.
pub fn merge_sorted(existing: &[i32], extra: &[i32]) -> Vec<i32> {
    let mut extra = extra.to_vec();
    extra.sort_unstable();
    extra.dedup();

    let mut merged = Vec::with_capacity(existing.len() + extra.len());
    let (mut i, mut j) = (0, 0);
    while i < existing.len() && j < extra.len() {
        if existing[i] < extra[j] {
            merged.push(existing[i]);
            i += 1;
        } else if extra[j] < existing[i] {
            merged.push(extra[j]);
            j += 1;
        } else {
            merged.push(existing[i]);
            i += 1;
            j += 1;
        }
    }
    merged.extend_from_slice(&existing[i..]);
    merged.extend_from_slice(&extra[j..]);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(entries: &[(RowId, &[i32])]) -> InfoPage {
        let mut page = InfoPage::default();
        for (row_id, items) in entries {
            page.replace(*row_id, items.to_vec());
        }
        page
    }

    #[test]
    fn encode_then_decode_preserves_entries() {
        let page = page_with(&[(9, &[1, 2, 3]), (2, &[-7]), (5, &[])]);
        let mut data = vec![0u8; 256];

        page.encode(&mut data).unwrap();

        let decoded = InfoPage::decode(&data).unwrap();
        assert_eq!(decoded, page);
        assert_eq!(
            decoded.entries().iter().map(|e| e.row_id).collect::<Vec<_>>(),
            vec![2, 5, 9]
        );
    }

    #[test]
    fn decode_rejects_unsorted_entries() {
        let mut data = vec![0u8; 128];
        page_with(&[(1, &[4]), (2, &[5])]).encode(&mut data).unwrap();
        data[PAGE_HEADER_SIZE] = 3;

        let err = InfoPage::decode(&data).unwrap_err();

        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn replace_overwrites_existing_payload() {
        let mut page = page_with(&[(4, &[1, 2])]);

        page.replace(4, vec![8]);

        assert_eq!(page.get(4), Some(&[8][..]));
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn remove_returns_entry_once() {
        let mut page = page_with(&[(4, &[1])]);

        assert!(page.remove(4).is_some());
        assert!(page.remove(4).is_none());
        assert!(page.is_empty());
    }

    #[test]
    fn merge_sorted_skips_duplicates() {
        assert_eq!(merge_sorted(&[1, 4, 9], &[9, 2, 4, 2]), vec![1, 2, 4, 9]);
        assert_eq!(merge_sorted(&[], &[3, 1]), vec![1, 3]);
        assert_eq!(merge_sorted(&[5], &[]), vec![5]);
    }

    #[test]
    fn max_payload_len_leaves_room_for_slack() {
        let len = max_payload_len(512);
        let page = page_with(&[(1, &vec![0; len])]);

        assert!(page.fits(512));
        assert!(page.encoded_size() + PAYLOAD_LENGTH_SLACK * ITEM_SIZE <= 512);
    }
}
