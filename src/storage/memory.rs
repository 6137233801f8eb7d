//! # In-Memory Store Files
//!
//! `MemoryStorage` keeps every page in its own boxed buffer. It backs
//! `MappingBuilder::in_memory()` mappings and the unit tests of the paged
//! stores, which want the exact page semantics of a store file without
//! touching the filesystem.
//!
//! Growing appends zeroed pages; existing pages never move, but the borrow
//! rules are the same as for `MmapStorage` so code cannot tell the two apart.

use eyre::{ensure, Result};

use super::Storage;

#[derive(Debug)]
pub struct MemoryStorage {
    pages: Vec<Box<[u8]>>,
    page_size: usize,
}

impl MemoryStorage {
    pub fn new(page_size: usize, initial_page_count: u32) -> Result<Self> {
        ensure!(page_size > 0, "page size must be positive");
        ensure!(
            initial_page_count > 0,
            "initial page count must be at least 1"
        );

        let pages = (0..initial_page_count)
            .map(|_| vec![0u8; page_size].into_boxed_slice())
            .collect();

        Ok(Self { pages, page_size })
    }
}

impl Storage for MemoryStorage {
    fn page(&self, page_no: u32) -> Result<&[u8]> {
        self.pages
            .get(page_no as usize)
            .map(|page| &page[..])
            .ok_or_else(|| {
                eyre::eyre!(
                    "page {} out of bounds (page_count={})",
                    page_no,
                    self.pages.len()
                )
            })
    }

    fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        let page_count = self.pages.len();
        self.pages
            .get_mut(page_no as usize)
            .map(|page| &mut page[..])
            .ok_or_else(|| {
                eyre::eyre!(
                    "page {} out of bounds (page_count={})",
                    page_no,
                    page_count
                )
            })
    }

    fn grow(&mut self, new_page_count: u32) -> Result<()> {
        let page_size = self.page_size;
        while self.pages.len() < new_page_count as usize {
            self.pages.push(vec![0u8; page_size].into_boxed_slice());
        }
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
