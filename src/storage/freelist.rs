//! # Freelist Management
//!
//! Pages released by a store (an emptied catalog page after compaction, a trie
//! page whose subtree moved) go onto the freelist and are handed out again
//! before the file grows.
//!
//! ## Chained Free Pages
//!
//! Store files are small compared to a database, so instead of trunk pages
//! the freelist is a simple chain threaded through the page headers of the
//! free pages themselves:
//!
//! ```text
//! FileHeader.free_head ──> page 7 ──> page 3 ──> page 12 ──> 0
//!                          (Free)     (Free)     (Free)
//!                          next_page  next_page  next_page
//! ```
//!
//! Push and pop both touch only the head, so they are O(1). The head page
//! number and count are mirrored into the file header by `PagedFile`.
//!
//! ## Validation
//!
//! A popped page must carry the `Free` page type; anything else means the
//! chain is corrupt and is reported as a storage error instead of handing out
//! a page that is still in use.

use eyre::{ensure, Result};

use super::page::{PageHeader, PageType};
use super::Storage;

#[derive(Debug)]
pub struct Freelist {
    head_page: u32,
    free_count: u32,
}

impl Freelist {
    pub fn new() -> Self {
        Self {
            head_page: 0,
            free_count: 0,
        }
    }

    pub fn with_head(head_page: u32, free_count: u32) -> Self {
        Self {
            head_page,
            free_count,
        }
    }

    pub fn head_page(&self) -> u32 {
        self.head_page
    }

    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    pub fn is_empty(&self) -> bool {
        self.head_page == 0
    }

    /// Marks `page_no` free and makes it the new head of the chain.
    pub fn push<S: Storage + ?Sized>(&mut self, storage: &mut S, page_no: u32) -> Result<()> {
        ensure!(page_no != 0, "page 0 holds the file header and cannot be freed");

        let data = storage.page_mut(page_no)?;
        data.fill(0);

        let mut header = PageHeader::new(PageType::Free);
        header.set_next_page(self.head_page);
        header.write_to(data)?;

        self.head_page = page_no;
        self.free_count += 1;
        Ok(())
    }

    /// Takes the head page off the chain, or returns None if the chain is empty.
    pub fn pop<S: Storage + ?Sized>(&mut self, storage: &mut S) -> Result<Option<u32>> {
        if self.head_page == 0 {
            return Ok(None);
        }

        let page_no = self.head_page;
        let header = PageHeader::from_bytes(storage.page(page_no)?)?;

        ensure!(
            header.page_type() == PageType::Free,
            "freelist page {} has type {:?}, expected Free",
            page_no,
            header.page_type()
        );

        self.head_page = header.next_page();
        self.free_count = self.free_count.saturating_sub(1);
        Ok(Some(page_no))
    }
}

impl Default for Freelist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn freelist_new_creates_empty_freelist() {
        let freelist = Freelist::new();

        assert_eq!(freelist.head_page(), 0);
        assert_eq!(freelist.free_count(), 0);
        assert!(freelist.is_empty());
    }

    #[test]
    fn freelist_with_head_sets_head_page() {
        let freelist = Freelist::with_head(42, 100);

        assert_eq!(freelist.head_page(), 42);
        assert_eq!(freelist.free_count(), 100);
        assert!(!freelist.is_empty());
    }

    #[test]
    fn freelist_pops_pages_in_reverse_push_order() {
        let mut storage = MemoryStorage::new(512, 6).unwrap();
        let mut freelist = Freelist::new();

        freelist.push(&mut storage, 2).unwrap();
        freelist.push(&mut storage, 5).unwrap();

        assert_eq!(freelist.free_count(), 2);
        assert_eq!(freelist.pop(&mut storage).unwrap(), Some(5));
        assert_eq!(freelist.pop(&mut storage).unwrap(), Some(2));
        assert_eq!(freelist.pop(&mut storage).unwrap(), None);
        assert_eq!(freelist.free_count(), 0);
    }

    #[test]
    fn freelist_push_clears_page_contents() {
        let mut storage = MemoryStorage::new(512, 3).unwrap();
        storage.page_mut(1).unwrap()[100] = 0xAA;
        let mut freelist = Freelist::new();

        freelist.push(&mut storage, 1).unwrap();

        assert_eq!(storage.page(1).unwrap()[100], 0);
        let header = PageHeader::from_bytes(storage.page(1).unwrap()).unwrap();
        assert_eq!(header.page_type(), PageType::Free);
    }

    #[test]
    fn freelist_rejects_page_zero() {
        let mut storage = MemoryStorage::new(512, 2).unwrap();
        let mut freelist = Freelist::new();

        assert!(freelist.push(&mut storage, 0).is_err());
    }

    #[test]
    fn freelist_pop_detects_corrupt_chain() {
        let mut storage = MemoryStorage::new(512, 3).unwrap();
        PageHeader::new(PageType::TrieNode)
            .write_to(storage.page_mut(2).unwrap())
            .unwrap();
        let mut freelist = Freelist::with_head(2, 1);

        let err = freelist.pop(&mut storage).unwrap_err();

        assert!(err.to_string().contains("expected Free"));
    }
}
