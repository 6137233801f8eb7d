//! # Storage Module
//!
//! This module provides the paged storage layer underneath the three stores of
//! a mapping: the catalog record store, the path trie and the payload layers.
//! Every store is one file of fixed-size pages; the layer knows nothing about
//! records, trie nodes or payloads beyond the page type tag in each header.
//!
//! ## Mapping Directory Layout
//!
//! ```text
//! mapping_dir/
//! ├── catalog.pcat     # Catalog records, one slot per row id
//! ├── trie.ptri        # Path trie pages
//! ├── layer0.pinf      # Payload layer 0
//! └── layer1.pinf      # Payload layer 1 (one file per layer)
//! ```
//!
//! ## Safety Model
//!
//! Page access hands out slices that point straight into the backing memory.
//! Growing may remap that memory, so the `Storage` trait ties slices to the
//! borrow of the storage:
//!
//! ```text
//! Storage::page(&self) -> &[u8]     // borrows &self immutably
//! Storage::grow(&mut self)          // requires &mut self exclusively
//! ```
//!
//! The borrow checker prevents holding a page slice across a `grow()` call.
//!
//! ## Module Organization
//!
//! - `mmap`: memory-mapped store files (`MmapStorage`)
//! - `memory`: in-process pages for in-memory mappings (`MemoryStorage`)
//! - `driver`: backend selection (`StorageKind`, `AnyStorage`)
//! - `page`: page types and the 16-byte page header
//! - `headers`: the 64-byte file header in page 0
//! - `freelist`: chain of released pages
//! - `paged_file`: page allocator combining the above (`PagedFile`)
//!
//! ## Thread Safety
//!
//! Backends are `Send` but not synchronized. A `Mapping` owns all of its
//! store files behind one mutex.

mod driver;
mod freelist;
mod headers;
mod memory;
mod mmap;
mod page;
mod paged_file;

use eyre::Result;

pub use driver::{AnyStorage, StorageKind};
pub use freelist::Freelist;
pub use headers::{peek_page_size, FileHeader, StoreKind};
pub use memory::MemoryStorage;
pub use mmap::MmapStorage;
pub use page::{validate_page, PageHeader, PageType};
pub use paged_file::PagedFile;

/// Zero-copy page access implemented by every storage backend.
pub trait Storage: Send {
    /// Returns page `page_no` as a slice of `page_size()` bytes.
    fn page(&self, page_no: u32) -> Result<&[u8]>;

    /// Returns page `page_no` for in-place modification.
    fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]>;

    /// Extends the storage to `new_page_count` zeroed pages.
    ///
    /// A no-op if the storage already has that many pages.
    fn grow(&mut self, new_page_count: u32) -> Result<()>;

    fn page_count(&self) -> u32;

    fn page_size(&self) -> usize;

    /// Flushes all pending writes to durable storage.
    fn sync(&self) -> Result<()>;
}
