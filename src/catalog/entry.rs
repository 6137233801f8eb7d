//! # Catalog Entry Records
//!
//! Every row id owns one fixed-size record in the catalog record store:
//!
//! ```text
//! Offset  Size   Field         Description
//! ------  -----  ------------  ------------------------------------------
//! 0       4      parent        Parent row id (0 = top level)
//! 4       4      tree_page     Trie position: page
//! 8       2      tree_record   Trie position: record on that page
//! 10      2      tree_item     Trie position: item in that record
//! 12      2      flags         Bit 0: tombstoned
//! 14      2      reserved
//! 16      4 * L  layer pages   Payload page per layer (0 = unset)
//! ```
//!
//! ## Lazy Resolution
//!
//! A `CatalogEntry` is a handle, not a borrow. It holds the row id and, once
//! resolved, the record slot it was last found in. Every field access first
//! checks whether the record store has moved the record since then and
//! re-resolves by row id if so. Handles for parents start unresolved, so
//! following a parent link costs nothing until a field is actually read.

use eyre::{ensure, eyre, Result};
use tracing::trace;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::ENTRY_HEADER_SIZE;
use crate::records::{RecordSlot, RecordStore};
use crate::trie::TriePos;
use crate::{PageId, RowId};

const FLAG_DELETED: u16 = 0x0001;

/// Record size of a catalog entry with `layer_count` payload layers.
pub const fn entry_record_size(layer_count: usize) -> usize {
    ENTRY_HEADER_SIZE + 4 * layer_count
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct EntryHeader {
    parent: U32,
    tree_page: U32,
    tree_record: U16,
    tree_item: U16,
    flags: U16,
    reserved: [u8; 2],
}

const _: () = assert!(size_of::<EntryHeader>() == ENTRY_HEADER_SIZE);

impl EntryHeader {
    le_accessors! {
        parent: u32 => U32,
        tree_page: u32 => U32,
        tree_record: u16 => U16,
        tree_item: u16 => U16,
        flags: u16 => U16,
    }

    fn from_record(record: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(&record[..ENTRY_HEADER_SIZE])
            .map_err(|e| eyre!("failed to parse EntryHeader: {:?}", e))
    }

    fn from_record_mut(record: &mut [u8]) -> Result<&mut Self> {
        Self::mut_from_bytes(&mut record[..ENTRY_HEADER_SIZE])
            .map_err(|e| eyre!("failed to parse EntryHeader: {:?}", e))
    }

    pub fn tree_pos(&self) -> TriePos {
        TriePos {
            page: self.tree_page(),
            record: self.tree_record(),
            item: self.tree_item(),
        }
    }

    pub fn set_tree_pos(&mut self, pos: TriePos) {
        self.set_tree_page(pos.page);
        self.set_tree_record(pos.record);
        self.set_tree_item(pos.item);
    }

    pub fn is_deleted(&self) -> bool {
        self.flags() & FLAG_DELETED != 0
    }
}

/// Lazily resolved handle to the catalog record of one row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    row_id: RowId,
    slot: Option<RecordSlot>,
}

impl CatalogEntry {
    pub fn resolved(row_id: RowId, slot: RecordSlot) -> Self {
        Self {
            row_id,
            slot: Some(slot),
        }
    }

    pub fn unresolved(row_id: RowId) -> Self {
        Self { row_id, slot: None }
    }

    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.is_some()
    }

    /// Current slot of the record, re-resolved if it moved since last use.
    pub fn locate(&mut self, records: &RecordStore) -> Result<RecordSlot> {
        if let Some(slot) = self.slot {
            if !records.has_moved(self.row_id, slot) {
                return Ok(slot);
            }
        }

        let slot = records
            .resolve(self.row_id)
            .ok_or_else(|| eyre!("row {} has no catalog entry", self.row_id))?;
        trace!(row_id = self.row_id, page = slot.page, slot = slot.slot, "resolved catalog entry");
        self.slot = Some(slot);
        Ok(slot)
    }

    fn header<'a>(&mut self, records: &'a RecordStore) -> Result<&'a EntryHeader> {
        let slot = self.locate(records)?;
        EntryHeader::from_record(records.record(slot)?)
    }

    fn header_mut<'a>(&mut self, records: &'a mut RecordStore) -> Result<&'a mut EntryHeader> {
        let slot = self.locate(records)?;
        EntryHeader::from_record_mut(records.record_mut(slot)?)
    }

    /// Fills a freshly allocated record.
    pub fn init(&mut self, records: &mut RecordStore, parent: RowId, pos: TriePos) -> Result<()> {
        let slot = self.locate(records)?;
        let record = records.record_mut(slot)?;
        record.fill(0);
        let header = EntryHeader::from_record_mut(record)?;
        header.set_parent(parent);
        header.set_tree_pos(pos);
        Ok(())
    }

    pub fn parent_row_id(&mut self, records: &RecordStore) -> Result<RowId> {
        Ok(self.header(records)?.parent())
    }

    /// Unresolved handle to the parent entry, `None` at the top level.
    pub fn parent(&mut self, records: &RecordStore) -> Result<Option<CatalogEntry>> {
        let parent = self.parent_row_id(records)?;
        Ok((parent != 0).then(|| CatalogEntry::unresolved(parent)))
    }

    pub fn tree_pos(&mut self, records: &RecordStore) -> Result<TriePos> {
        Ok(self.header(records)?.tree_pos())
    }

    pub fn set_tree_pos(&mut self, records: &mut RecordStore, pos: TriePos) -> Result<()> {
        self.header_mut(records)?.set_tree_pos(pos);
        Ok(())
    }

    pub fn is_deleted(&mut self, records: &RecordStore) -> Result<bool> {
        Ok(self.header(records)?.is_deleted())
    }

    pub fn mark_deleted(&mut self, records: &mut RecordStore) -> Result<()> {
        let header = self.header_mut(records)?;
        let flags = header.flags();
        header.set_flags(flags | FLAG_DELETED);
        Ok(())
    }

    fn layer_offset(records: &RecordStore, layer: usize) -> Result<usize> {
        let layer_count = (records.record_size() - ENTRY_HEADER_SIZE) / 4;
        ensure!(
            layer < layer_count,
            "layer {} out of range for {} layers",
            layer,
            layer_count
        );
        Ok(ENTRY_HEADER_SIZE + 4 * layer)
    }

    /// Own payload page of this entry in `layer`, 0 if unset.
    pub fn layer_page(&mut self, records: &RecordStore, layer: usize) -> Result<PageId> {
        let offset = Self::layer_offset(records, layer)?;
        let slot = self.locate(records)?;
        let record = records.record(slot)?;
        U32::read_from_bytes(&record[offset..offset + 4])
            .map(|v| v.get())
            .map_err(|e| eyre!("failed to read layer {} page: {:?}", layer, e))
    }

    pub fn set_layer_page(
        &mut self,
        records: &mut RecordStore,
        layer: usize,
        page: PageId,
    ) -> Result<()> {
        let offset = Self::layer_offset(records, layer)?;
        let slot = self.locate(records)?;
        let record = records.record_mut(slot)?;
        record[offset..offset + 4].copy_from_slice(U32::new(page).as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::INITIAL_PAGE_COUNT;
    use crate::storage::{AnyStorage, MemoryStorage, PagedFile, StoreKind};

    const LAYERS: usize = 2;

    fn new_records() -> RecordStore {
        let storage = AnyStorage::Memory(MemoryStorage::new(512, INITIAL_PAGE_COUNT).unwrap());
        let file = PagedFile::create(storage, StoreKind::Catalog).unwrap();
        RecordStore::create(file, entry_record_size(LAYERS)).unwrap()
    }

    fn pos(page: PageId, record: u16, item: u16) -> TriePos {
        TriePos { page, record, item }
    }

    fn new_entry(records: &mut RecordStore, parent: RowId) -> CatalogEntry {
        let (row_id, slot) = records.allocate().unwrap();
        let mut entry = CatalogEntry::resolved(row_id, slot);
        entry.init(records, parent, pos(3, 1, 4)).unwrap();
        entry
    }

    #[test]
    fn init_sets_parent_and_tree_pos() {
        let mut records = new_records();

        let mut entry = new_entry(&mut records, 7);

        assert_eq!(entry.parent_row_id(&records).unwrap(), 7);
        assert_eq!(entry.tree_pos(&records).unwrap(), pos(3, 1, 4));
        assert!(!entry.is_deleted(&records).unwrap());
        assert_eq!(entry.layer_page(&records, 0).unwrap(), 0);
        assert_eq!(entry.layer_page(&records, 1).unwrap(), 0);
    }

    #[test]
    fn layer_pages_are_independent() {
        let mut records = new_records();
        let mut entry = new_entry(&mut records, 0);

        entry.set_layer_page(&mut records, 1, 42).unwrap();

        assert_eq!(entry.layer_page(&records, 0).unwrap(), 0);
        assert_eq!(entry.layer_page(&records, 1).unwrap(), 42);
    }

    #[test]
    fn layer_out_of_range_is_rejected() {
        let mut records = new_records();
        let mut entry = new_entry(&mut records, 0);

        assert!(entry.layer_page(&records, LAYERS).is_err());
        assert!(entry.set_layer_page(&mut records, LAYERS, 1).is_err());
    }

    #[test]
    fn mark_deleted_keeps_other_fields() {
        let mut records = new_records();
        let mut entry = new_entry(&mut records, 5);
        entry.set_layer_page(&mut records, 0, 9).unwrap();

        entry.mark_deleted(&mut records).unwrap();

        assert!(entry.is_deleted(&records).unwrap());
        assert_eq!(entry.parent_row_id(&records).unwrap(), 5);
        assert_eq!(entry.layer_page(&records, 0).unwrap(), 9);
    }

    #[test]
    fn parent_handle_starts_unresolved() {
        let mut records = new_records();
        let parent = new_entry(&mut records, 0);
        let mut child = new_entry(&mut records, parent.row_id());

        let mut handle = child.parent(&records).unwrap().unwrap();

        assert!(!handle.is_resolved());
        assert_eq!(handle.row_id(), parent.row_id());
        assert_eq!(handle.tree_pos(&records).unwrap(), pos(3, 1, 4));
        assert!(handle.is_resolved());
    }

    #[test]
    fn top_level_entry_has_no_parent_handle() {
        let mut records = new_records();
        let mut entry = new_entry(&mut records, 0);

        assert!(entry.parent(&records).unwrap().is_none());
    }

    #[test]
    fn handle_follows_record_moved_by_compaction() {
        let mut records = new_records();
        let mut entries: Vec<CatalogEntry> = (0..40).map(|_| new_entry(&mut records, 0)).collect();
        let last = entries.len() - 1;
        entries[last]
            .set_layer_page(&mut records, 0, 77)
            .unwrap();
        for entry in &entries[1..last] {
            records.free(entry.row_id()).unwrap();
        }

        let before = entries[last].locate(&records).unwrap();
        let moved = records.compact().unwrap();

        assert!(moved > 0);
        assert_ne!(records.resolve(entries[last].row_id()), Some(before));
        assert_eq!(entries[last].layer_page(&records, 0).unwrap(), 77);
        assert_ne!(entries[last].locate(&records).unwrap(), before);
    }

    #[test]
    fn handle_for_unknown_row_fails_to_resolve() {
        let records = new_records();
        let mut entry = CatalogEntry::unresolved(99);

        assert!(entry.locate(&records).is_err());
    }
}
