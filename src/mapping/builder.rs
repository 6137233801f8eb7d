//! # Mapping Builder
//!
//! `MappingBuilder` configures and opens a `Mapping`. It picks the storage
//! backend, the number of payload layers and the page size, then either
//! creates a fresh set of store files or opens the existing ones.
//!
//! ## Configuration Options
//!
//! | Option     | Default               | Description                          |
//! |------------|-----------------------|--------------------------------------|
//! | path       | (required or memory)  | Directory holding the store files    |
//! | in_memory  | -                     | Keep all pages in process memory     |
//! | layers     | 2 / stored value      | Number of payload layers             |
//! | page_size  | 4096 / stored value   | Page size of every store file        |
//!
//! When the directory already holds a mapping, `layers` and `page_size`
//! default to the stored values. Setting them explicitly to something else
//! is an error rather than a silent reformat.
//!
//! ## Usage
//!
//! ```ignore
//! let mapping = Mapping::builder()
//!     .path("./index")
//!     .layers(3)
//!     .open()?;
//!
//! let scratch = Mapping::builder().in_memory().page_size(1024).open()?;
//! ```

use std::path::Path;

use eyre::{ensure, eyre, Result, WrapErr};
use tracing::debug;

use super::{Mapping, MappingState};
use crate::catalog::Catalog;
use crate::config::{
    layer_file_name, CATALOG_FILE_NAME, DEFAULT_LAYER_COUNT, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    MIN_PAGE_SIZE, TRIE_FILE_NAME,
};
use crate::info::InfoStore;
use crate::storage::{PagedFile, StorageKind, StoreKind};
use crate::trie::PathTrie;

/// Builder for configuring and opening a [`Mapping`].
#[derive(Debug, Clone, Default)]
pub struct MappingBuilder {
    storage_kind: Option<StorageKind>,
    layers: Option<usize>,
    page_size: Option<usize>,
}

impl MappingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the mapping as memory-mapped files in `path`, which is created
    /// if it does not exist.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.storage_kind = Some(StorageKind::mmap(path.as_ref()));
        self
    }

    /// Keeps the mapping in memory only.
    pub fn in_memory(mut self) -> Self {
        self.storage_kind = Some(StorageKind::Memory);
        self
    }

    pub fn storage_kind(mut self, kind: StorageKind) -> Self {
        self.storage_kind = Some(kind);
        self
    }

    pub fn layers(mut self, count: usize) -> Self {
        self.layers = Some(count);
        self
    }

    /// Page size in bytes, a power of two between 512 and 32768.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = Some(bytes);
        self
    }

    pub fn get_storage_kind(&self) -> Option<&StorageKind> {
        self.storage_kind.as_ref()
    }

    pub fn get_layers(&self) -> Option<usize> {
        self.layers
    }

    pub fn get_page_size(&self) -> Option<usize> {
        self.page_size
    }

    /// Opens the mapping, creating its files if there are none yet.
    pub fn open(self) -> Result<Mapping> {
        let kind = self.storage_kind.as_ref().ok_or_else(|| {
            eyre!("storage kind not specified: call .path() or .in_memory() first")
        })?;

        let state = if kind.exists(CATALOG_FILE_NAME) {
            self.open_existing(kind)?
        } else {
            self.create_new(kind)?
        };
        Ok(Mapping::from_state(state))
    }

    fn create_new(&self, kind: &StorageKind) -> Result<MappingState> {
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        ensure!(
            page_size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size),
            "page size {} must be a power of two between {} and {}",
            page_size,
            MIN_PAGE_SIZE,
            MAX_PAGE_SIZE
        );
        let layer_count = self.layers.unwrap_or(DEFAULT_LAYER_COUNT);

        let file = PagedFile::create(
            kind.create_storage(CATALOG_FILE_NAME, page_size)?,
            StoreKind::Catalog,
        )?;
        let catalog = Catalog::create(file, layer_count)?;

        let file = PagedFile::create(kind.create_storage(TRIE_FILE_NAME, page_size)?, StoreKind::Trie)?;
        let trie = PathTrie::create(file)?;

        let layers = (0..layer_count)
            .map(|layer| {
                let storage = kind.create_storage(&layer_file_name(layer), page_size)?;
                InfoStore::create(PagedFile::create(storage, StoreKind::Info)?, layer)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            path = ?kind.path(),
            layers = layer_count,
            page_size,
            "created mapping"
        );
        Ok(MappingState {
            catalog,
            trie,
            layers,
        })
    }

    fn open_existing(&self, kind: &StorageKind) -> Result<MappingState> {
        let catalog_file = self.open_file(kind, CATALOG_FILE_NAME, StoreKind::Catalog)?;
        let page_size = catalog_file.page_size();
        if let Some(requested) = self.page_size {
            ensure!(
                requested == page_size,
                "mapping was created with page size {}, not {}",
                page_size,
                requested
            );
        }

        let catalog = Catalog::open(catalog_file).wrap_err("failed to open catalog")?;
        let layer_count = catalog.layer_count();
        if let Some(requested) = self.layers {
            ensure!(
                requested == layer_count,
                "mapping was created with {} layers, not {}",
                layer_count,
                requested
            );
        }

        let trie_file = self.open_file(kind, TRIE_FILE_NAME, StoreKind::Trie)?;
        ensure!(
            trie_file.page_size() == page_size,
            "trie page size {} differs from catalog page size {}",
            trie_file.page_size(),
            page_size
        );
        let trie = PathTrie::open(trie_file).wrap_err("failed to open path trie")?;

        let layers = (0..layer_count)
            .map(|layer| {
                let file = self.open_file(kind, &layer_file_name(layer), StoreKind::Info)?;
                ensure!(
                    file.page_size() == page_size,
                    "layer {} page size {} differs from catalog page size {}",
                    layer,
                    file.page_size(),
                    page_size
                );
                InfoStore::open(file, layer)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            path = ?kind.path(),
            layers = layer_count,
            page_size,
            "opened mapping"
        );
        Ok(MappingState {
            catalog,
            trie,
            layers,
        })
    }

    fn open_file(&self, kind: &StorageKind, file_name: &str, store: StoreKind) -> Result<PagedFile> {
        let storage = kind
            .open_storage(file_name)?
            .ok_or_else(|| eyre!("mapping file '{}' is missing", file_name))?;
        PagedFile::open(storage, store).wrap_err_with(|| format!("failed to open '{}'", file_name))
    }
}
