//! # Fixed-Size Record Store
//!
//! This module stores the fixed-size records that back catalog entries. Each
//! record is addressed by a stable 32-bit row id; its physical location (page
//! and slot) is private to the store and may change when the store compacts.
//!
//! ## Slot Layout
//!
//! Catalog pages are an array of equally sized slots after the page header:
//!
//! ```text
//! +-------------+----------------------+----------------------+-----+
//! | PageHeader  | slot 0               | slot 1               | ... |
//! | (16 bytes)  | row_id u32 | record  | row_id u32 | record  |     |
//! +-------------+----------------------+----------------------+-----+
//! ```
//!
//! A slot whose row id is 0 is free. The page header `entry_count` holds the
//! number of live slots on the page.
//!
//! ## Row Id Allocation
//!
//! Row ids are handed out as `high_water + 1`, and the high-water mark is
//! persisted in the file header. Ids are never reused, even after `free()`,
//! so a row id read back out of an old record can never alias a newer entry.
//!
//! ## Directory
//!
//! The row id to slot directory is an in-memory `Vec` rebuilt by scanning all
//! catalog pages on open. Lookups are O(1); nothing about it is persisted.
//!
//! ## Relocation
//!
//! `compact()` moves records from the highest catalog pages into free slots of
//! lower pages and releases pages that become empty. Callers holding a
//! `RecordSlot` detect this with `has_moved()` and re-resolve by row id.


use std::collections::BTreeMap;
use std::fmt;

use eyre::{bail, ensure, Result, WrapErr};
use tracing::debug;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, IntoBytes};

use crate::config::{MIN_SLOTS_PER_PAGE, PAGE_HEADER_SIZE, SLOT_ROW_ID_SIZE};
use crate::storage::{validate_page, PageHeader, PageType, PagedFile, StoreKind};
use crate::{PageId, RowId};

/// Physical location of a record: catalog page and slot index on that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordSlot {
    pub page: PageId,
    pub slot: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub pages: u32,
    pub live_records: u32,
    pub free_slots: u32,
    pub record_size: usize,
    pub relocations: u64,
}

impl fmt::Display for RecordStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records of {} bytes on {} pages ({} free slots, {} relocated)",
            self.live_records, self.record_size, self.pages, self.free_slots, self.relocations
        )
    }
}

#[derive(Debug)]
pub struct RecordStore {
    file: PagedFile,
    record_size: usize,
    slots_per_page: usize,
    directory: Vec<Option<RecordSlot>>,
    fill: BTreeMap<PageId, u16>,
    relocations: u64,
}

impl RecordStore {
    pub fn create(mut file: PagedFile, record_size: usize) -> Result<Self> {
        ensure!(
            file.kind() == StoreKind::Catalog,
            "record store requires a catalog file, got {:?}",
            file.kind()
        );
        let slots_per_page = Self::slots_for(file.page_size(), record_size)?;
        file.header_mut()?.set_record_size(record_size as u32);

        Ok(Self {
            file,
            record_size,
            slots_per_page,
            directory: vec![None],
            fill: BTreeMap::new(),
            relocations: 0,
        })
    }

    pub fn open(file: PagedFile, record_size: usize) -> Result<Self> {
        let stored = file.header()?.record_size() as usize;
        ensure!(
            stored == record_size,
            "catalog record size {} does not match expected {}",
            stored,
            record_size
        );
        let slots_per_page = Self::slots_for(file.page_size(), record_size)?;
        let high_water = file.header()?.high_water();

        let mut store = Self {
            file,
            record_size,
            slots_per_page,
            directory: vec![None; high_water as usize + 1],
            fill: BTreeMap::new(),
            relocations: 0,
        };
        store.rebuild_directory(high_water)?;
        Ok(store)
    }

    fn slots_for(page_size: usize, record_size: usize) -> Result<usize> {
        ensure!(record_size > 0, "record size must be positive");
        let slots = (page_size - PAGE_HEADER_SIZE) / (SLOT_ROW_ID_SIZE + record_size);
        ensure!(
            slots >= MIN_SLOTS_PER_PAGE,
            "record size {} leaves only {} slots in a {}-byte page",
            record_size,
            slots,
            page_size
        );
        Ok(slots.min(u16::MAX as usize))
    }

    fn rebuild_directory(&mut self, high_water: RowId) -> Result<()> {
        for page in self.file.pages_of_type(PageType::Catalog)? {
            let mut live = 0u16;
            for slot in 0..self.slots_per_page as u16 {
                let row_id = self.slot_row_id(page, slot)?;
                if row_id == 0 {
                    continue;
                }
                ensure!(
                    row_id <= high_water,
                    "catalog page {} slot {} holds row {} above high-water mark {}",
                    page,
                    slot,
                    row_id,
                    high_water
                );
                let entry = &mut self.directory[row_id as usize];
                ensure!(
                    entry.is_none(),
                    "row {} stored twice in catalog (page {} slot {})",
                    row_id,
                    page,
                    slot
                );
                *entry = Some(RecordSlot { page, slot });
                live += 1;
            }
            self.fill.insert(page, live);
        }
        Ok(())
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn max_row_id(&self) -> Result<RowId> {
        Ok(self.file.header()?.high_water())
    }

    pub fn tag(&self) -> Result<u32> {
        Ok(self.file.header()?.tag())
    }

    pub fn set_tag(&mut self, tag: u32) -> Result<()> {
        self.file.header_mut()?.set_tag(tag);
        Ok(())
    }

    pub fn resolve(&self, row_id: RowId) -> Option<RecordSlot> {
        self.directory.get(row_id as usize).copied().flatten()
    }

    pub fn has_moved(&self, row_id: RowId, slot: RecordSlot) -> bool {
        self.resolve(row_id) != Some(slot)
    }

    fn slot_offset(&self, slot: u16) -> usize {
        PAGE_HEADER_SIZE + slot as usize * (SLOT_ROW_ID_SIZE + self.record_size)
    }

    fn slot_row_id(&self, page: PageId, slot: u16) -> Result<RowId> {
        let offset = self.slot_offset(slot);
        let data = self.file.page(page)?;
        U32::read_from_bytes(&data[offset..offset + SLOT_ROW_ID_SIZE])
            .map(|v| v.get())
            .map_err(|e| eyre::eyre!("failed to read row id of slot {}: {:?}", slot, e))
    }

    fn write_slot_row_id(&mut self, page: PageId, slot: u16, row_id: RowId) -> Result<()> {
        let offset = self.slot_offset(slot);
        let data = self.file.page_mut(page)?;
        data[offset..offset + SLOT_ROW_ID_SIZE].copy_from_slice(U32::new(row_id).as_bytes());
        Ok(())
    }

    fn first_free_slot(&self, page: PageId) -> Result<u16> {
        for slot in 0..self.slots_per_page as u16 {
            if self.slot_row_id(page, slot)? == 0 {
                return Ok(slot);
            }
        }
        bail!("catalog page {} has no free slot", page)
    }

    fn first_live_slot(&self, page: PageId) -> Result<(u16, RowId)> {
        for slot in 0..self.slots_per_page as u16 {
            let row_id = self.slot_row_id(page, slot)?;
            if row_id != 0 {
                return Ok((slot, row_id));
            }
        }
        bail!("catalog page {} has no live slot", page)
    }

    fn set_fill(&mut self, page: PageId, live: u16) -> Result<()> {
        self.fill.insert(page, live);
        PageHeader::from_bytes_mut(self.file.page_mut(page)?)?.set_entry_count(live);
        Ok(())
    }

    pub fn record(&self, slot: RecordSlot) -> Result<&[u8]> {
        let data = self.file.page(slot.page)?;
        validate_page(data, PageType::Catalog)?;
        let offset = self.slot_offset(slot.slot) + SLOT_ROW_ID_SIZE;
        Ok(&data[offset..offset + self.record_size])
    }

    pub fn record_mut(&mut self, slot: RecordSlot) -> Result<&mut [u8]> {
        let offset = self.slot_offset(slot.slot) + SLOT_ROW_ID_SIZE;
        let record_size = self.record_size;
        let data = self.file.page_mut(slot.page)?;
        validate_page(data, PageType::Catalog)?;
        Ok(&mut data[offset..offset + record_size])
    }

    /// Allocates a zeroed record under a fresh row id.
    pub fn allocate(&mut self) -> Result<(RowId, RecordSlot)> {
        let row_id = self
            .max_row_id()?
            .checked_add(1)
            .ok_or_else(|| eyre::eyre!("row id space exhausted"))?;

        let room = self
            .fill
            .iter()
            .find(|&(_, &live)| (live as usize) < self.slots_per_page)
            .map(|(&page, &live)| (page, live));
        let (page, live) = match room {
            Some(found) => found,
            None => (self.file.allocate(PageType::Catalog)?, 0),
        };

        let slot = self.first_free_slot(page)?;
        self.write_slot_row_id(page, slot, row_id)?;
        let location = RecordSlot { page, slot };
        self.record_mut(location)?.fill(0);
        self.set_fill(page, live + 1)?;
        self.file.header_mut()?.set_high_water(row_id);

        if self.directory.len() <= row_id as usize {
            self.directory.resize(row_id as usize + 1, None);
        }
        self.directory[row_id as usize] = Some(location);

        debug!(row_id, page, slot, "allocated catalog record");
        Ok((row_id, location))
    }

    /// Removes a record entirely. Its row id is not handed out again.
    pub fn free(&mut self, row_id: RowId) -> Result<()> {
        let Some(location) = self.resolve(row_id) else {
            bail!("cannot free unknown row {}", row_id);
        };

        let offset = self.slot_offset(location.slot);
        let slot_size = SLOT_ROW_ID_SIZE + self.record_size;
        self.file.page_mut(location.page)?[offset..offset + slot_size].fill(0);
        self.directory[row_id as usize] = None;

        let live = self.fill.get(&location.page).copied().unwrap_or(1) - 1;
        if live == 0 {
            self.fill.remove(&location.page);
            self.file.release(location.page)?;
        } else {
            self.set_fill(location.page, live)?;
        }

        debug!(row_id, page = location.page, "freed catalog record");
        Ok(())
    }

    /// Packs records into the lowest pages, releasing emptied pages.
    /// Returns the number of records that moved.
    pub fn compact(&mut self) -> Result<u32> {
        let mut moved = 0u32;

        loop {
            let Some((&high, &high_live)) = self.fill.iter().next_back() else {
                break;
            };
            let target = self
                .fill
                .range(..high)
                .find(|&(_, &live)| (live as usize) < self.slots_per_page)
                .map(|(&page, &live)| (page, live));
            let Some((low, low_live)) = target else {
                break;
            };

            let (from_slot, row_id) = self.first_live_slot(high)?;
            let to_slot = self.first_free_slot(low)?;
            let from = RecordSlot {
                page: high,
                slot: from_slot,
            };
            let to = RecordSlot {
                page: low,
                slot: to_slot,
            };

            let bytes = self.record(from)?.to_vec();
            self.write_slot_row_id(low, to_slot, row_id)?;
            self.record_mut(to)?.copy_from_slice(&bytes);
            self.set_fill(low, low_live + 1)?;

            let offset = self.slot_offset(from_slot);
            let slot_size = SLOT_ROW_ID_SIZE + self.record_size;
            self.file.page_mut(high)?[offset..offset + slot_size].fill(0);
            if high_live == 1 {
                self.fill.remove(&high);
                self.file.release(high)?;
            } else {
                self.set_fill(high, high_live - 1)?;
            }

            self.directory[row_id as usize] = Some(to);
            moved += 1;
        }

        self.relocations += moved as u64;
        if moved > 0 {
            debug!(moved, pages = self.fill.len(), "compacted catalog records");
        }
        Ok(moved)
    }

    pub fn stats(&self) -> RecordStats {
        let pages = self.fill.len() as u32;
        let live_records = self.fill.values().map(|&n| n as u32).sum();
        RecordStats {
            pages,
            live_records,
            free_slots: pages * self.slots_per_page as u32 - live_records,
            record_size: self.record_size,
            relocations: self.relocations,
        }
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync().wrap_err("failed to sync catalog records")
    }
}
