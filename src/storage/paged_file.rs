//! # Paged Store Files
//!
//! `PagedFile` is the page allocator shared by the catalog record store, the
//! path trie and the payload layers. It combines a storage backend, the file
//! header in page 0 and the freelist into one handle:
//!
//! ```text
//! page 0        FileHeader (magic, page size, next_page, freelist, ...)
//! page 1..n     data pages, each starting with a PageHeader
//! next_page..   pre-grown space, never handed out yet
//! ```
//!
//! ## Allocation
//!
//! `allocate()` pops the freelist first. Only when the freelist is empty is
//! `next_page` advanced, and the backing storage grows by `GROW_PAGE_COUNT`
//! pages whenever `next_page` reaches its end. Every allocated page is zeroed
//! and gets a fresh header of the requested type.
//!
//! ## Header Mirroring
//!
//! The freelist head and count live in memory in `Freelist` and are written
//! back to the file header after every push or pop, so the header is always
//! current without a separate flush step.

use eyre::{ensure, Result};
use tracing::trace;

use super::freelist::Freelist;
use super::headers::{FileHeader, StoreKind};
use super::page::{PageHeader, PageType};
use super::{AnyStorage, Storage};
use crate::config::GROW_PAGE_COUNT;
use crate::PageId;

#[derive(Debug)]
pub struct PagedFile {
    storage: AnyStorage,
    kind: StoreKind,
    freelist: Freelist,
}

impl PagedFile {
    pub fn create(mut storage: AnyStorage, kind: StoreKind) -> Result<Self> {
        let page_size = u32::try_from(storage.page_size())?;
        let page0 = storage.page_mut(0)?;
        page0.fill(0);
        FileHeader::new(kind, page_size).write_to(page0)?;

        Ok(Self {
            storage,
            kind,
            freelist: Freelist::new(),
        })
    }

    pub fn open(storage: AnyStorage, kind: StoreKind) -> Result<Self> {
        let header = FileHeader::from_bytes(storage.page(0)?, kind)?;

        ensure!(
            header.page_size() as usize == storage.page_size(),
            "{:?} store header page size {} does not match storage page size {}",
            kind,
            header.page_size(),
            storage.page_size()
        );

        ensure!(
            header.next_page() >= 1 && header.next_page() <= storage.page_count(),
            "{:?} store header next_page {} outside file of {} pages",
            kind,
            header.next_page(),
            storage.page_count()
        );

        let freelist = Freelist::with_head(header.free_head(), header.free_count());

        Ok(Self {
            storage,
            kind,
            freelist,
        })
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn page_size(&self) -> usize {
        self.storage.page_size()
    }

    pub fn header(&self) -> Result<&FileHeader> {
        FileHeader::from_bytes(self.storage.page(0)?, self.kind)
    }

    pub fn header_mut(&mut self) -> Result<&mut FileHeader> {
        FileHeader::from_bytes_mut(self.storage.page_mut(0)?, self.kind)
    }

    /// First page number that has never been handed out.
    pub fn next_page(&self) -> Result<PageId> {
        Ok(self.header()?.next_page())
    }

    /// Pages currently in use (neither free nor never allocated).
    pub fn allocated_page_count(&self) -> Result<u32> {
        Ok(self.next_page()? - 1 - self.freelist.free_count())
    }

    pub fn page(&self, page_no: PageId) -> Result<&[u8]> {
        self.check_data_page(page_no)?;
        self.storage.page(page_no)
    }

    pub fn page_mut(&mut self, page_no: PageId) -> Result<&mut [u8]> {
        self.check_data_page(page_no)?;
        self.storage.page_mut(page_no)
    }

    fn check_data_page(&self, page_no: PageId) -> Result<()> {
        ensure!(page_no != 0, "page 0 of a {:?} store is not a data page", self.kind);
        let next_page = self.next_page()?;
        ensure!(
            page_no < next_page,
            "page {} of {:?} store was never allocated (next_page={})",
            page_no,
            self.kind,
            next_page
        );
        Ok(())
    }

    pub fn allocate(&mut self, page_type: PageType) -> Result<PageId> {
        let page_no = match self.freelist.pop(&mut self.storage)? {
            Some(page_no) => {
                self.sync_freelist_header()?;
                page_no
            }
            None => {
                let page_no = self.next_page()?;
                if page_no >= self.storage.page_count() {
                    let grown = self.storage.page_count() + GROW_PAGE_COUNT;
                    self.storage.grow(grown)?;
                }
                self.header_mut()?.set_next_page(page_no + 1);
                page_no
            }
        };

        let data = self.storage.page_mut(page_no)?;
        data.fill(0);
        PageHeader::new(page_type).write_to(data)?;

        trace!(store = ?self.kind, page = page_no, ?page_type, "allocated page");
        Ok(page_no)
    }

    pub fn release(&mut self, page_no: PageId) -> Result<()> {
        self.check_data_page(page_no)?;
        self.freelist.push(&mut self.storage, page_no)?;
        self.sync_freelist_header()?;

        trace!(store = ?self.kind, page = page_no, "released page");
        Ok(())
    }

    fn sync_freelist_header(&mut self) -> Result<()> {
        let head = self.freelist.head_page();
        let count = self.freelist.free_count();
        let header = self.header_mut()?;
        header.set_free_head(head);
        header.set_free_count(count);
        Ok(())
    }

    /// Lists every allocated page whose header carries `page_type`.
    pub fn pages_of_type(&self, page_type: PageType) -> Result<Vec<PageId>> {
        let next_page = self.next_page()?;
        let mut pages = Vec::new();
        for page_no in 1..next_page {
            let header = PageHeader::from_bytes(self.storage.page(page_no)?)?;
            if header.page_type() == page_type {
                pages.push(page_no);
            }
        }
        Ok(pages)
    }

    pub fn sync(&self) -> Result<()> {
        self.storage.sync()
    }
}
