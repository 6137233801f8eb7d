//! # Storage Backend Selection
//!
//! A mapping is made of several store files (catalog, trie, one file per
//! payload layer) that must all live on the same kind of backend.
//! `StorageKind` names that backend once, at `MappingBuilder::open()` time, and
//! hands out one `AnyStorage` per store file.
//!
//! ## Storage Backends
//!
//! | Backend       | Persistence      | Zero-Copy | Sync Required |
//! |---------------|------------------|-----------|---------------|
//! | MmapStorage   | Files in a dir   | Yes       | msync         |
//! | MemoryStorage | None             | Yes       | No            |
//!
//! ## Opening Existing Files
//!
//! The page size of an existing file is stored in its header, which lives in
//! page 0. Before the file can be mapped page by page, the first
//! `FILE_HEADER_SIZE` bytes are read with plain file I/O and the page size is
//! taken from there:
//!
//! ```text
//! open_storage("trie.ptri")
//!   -> read 64 header bytes
//!   -> peek_page_size()
//!   -> MmapStorage::open(path, page_size)
//! ```
//!
//! Memory storage never has existing files; `open_storage` reports `None` and
//! the builder creates a fresh mapping instead.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use super::headers::peek_page_size;
use super::memory::MemoryStorage;
use super::mmap::MmapStorage;
use super::Storage;
use crate::config::{FILE_HEADER_SIZE, INITIAL_PAGE_COUNT};

/// Configuration for storage backend selection.
#[derive(Debug, Clone, Default)]
pub enum StorageKind {
    /// Memory-mapped files inside a mapping directory.
    Mmap {
        /// Path to the mapping directory.
        path: PathBuf,
    },

    /// Pages held in process memory; nothing survives the mapping.
    #[default]
    Memory,
}

impl StorageKind {
    pub fn mmap<P: Into<PathBuf>>(path: P) -> Self {
        StorageKind::Mmap { path: path.into() }
    }

    pub fn is_mmap(&self) -> bool {
        matches!(self, StorageKind::Mmap { .. })
    }

    /// Returns the directory for mmap storage, or None for memory storage.
    pub fn path(&self) -> Option<&Path> {
        match self {
            StorageKind::Mmap { path } => Some(path),
            StorageKind::Memory => None,
        }
    }

    /// Returns true if a store file of this name already exists.
    pub fn exists(&self, file_name: &str) -> bool {
        match self {
            StorageKind::Mmap { path } => path.join(file_name).is_file(),
            StorageKind::Memory => false,
        }
    }

    /// Creates the backing storage for a fresh store file.
    pub fn create_storage(&self, file_name: &str, page_size: usize) -> Result<AnyStorage> {
        match self {
            StorageKind::Mmap { path } => {
                std::fs::create_dir_all(path).wrap_err_with(|| {
                    format!("failed to create mapping directory '{}'", path.display())
                })?;
                let storage =
                    MmapStorage::create(path.join(file_name), page_size, INITIAL_PAGE_COUNT)?;
                Ok(AnyStorage::Mmap(storage))
            }
            StorageKind::Memory => Ok(AnyStorage::Memory(MemoryStorage::new(
                page_size,
                INITIAL_PAGE_COUNT,
            )?)),
        }
    }

    /// Opens the backing storage of an existing store file, using the page
    /// size recorded in its header. Returns `None` if there is no such file.
    pub fn open_storage(&self, file_name: &str) -> Result<Option<AnyStorage>> {
        let StorageKind::Mmap { path } = self else {
            return Ok(None);
        };

        let file_path = path.join(file_name);
        if !file_path.is_file() {
            return Ok(None);
        }

        let mut header = [0u8; FILE_HEADER_SIZE];
        File::open(&file_path)
            .and_then(|mut file| file.read_exact(&mut header))
            .wrap_err_with(|| format!("failed to read header of '{}'", file_path.display()))?;

        let page_size = peek_page_size(&header)?;
        let storage = MmapStorage::open(&file_path, page_size as usize)?;
        Ok(Some(AnyStorage::Mmap(storage)))
    }
}

/// Type-erased storage backend, so the paged stores need no generics.
#[derive(Debug)]
pub enum AnyStorage {
    Mmap(MmapStorage),
    Memory(MemoryStorage),
}

impl AnyStorage {
    pub fn is_mmap(&self) -> bool {
        matches!(self, AnyStorage::Mmap(_))
    }
}

impl Storage for AnyStorage {
    fn page(&self, page_no: u32) -> Result<&[u8]> {
        match self {
            AnyStorage::Mmap(s) => s.page(page_no),
            AnyStorage::Memory(s) => s.page(page_no),
        }
    }

    fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        match self {
            AnyStorage::Mmap(s) => s.page_mut(page_no),
            AnyStorage::Memory(s) => s.page_mut(page_no),
        }
    }

    fn grow(&mut self, new_page_count: u32) -> Result<()> {
        match self {
            AnyStorage::Mmap(s) => s.grow(new_page_count),
            AnyStorage::Memory(s) => s.grow(new_page_count),
        }
    }

    fn page_count(&self) -> u32 {
        match self {
            AnyStorage::Mmap(s) => s.page_count(),
            AnyStorage::Memory(s) => s.page_count(),
        }
    }

    fn page_size(&self) -> usize {
        match self {
            AnyStorage::Mmap(s) => s.page_size(),
            AnyStorage::Memory(s) => s.page_size(),
        }
    }

    fn sync(&self) -> Result<()> {
        match self {
            AnyStorage::Mmap(s) => s.sync(),
            AnyStorage::Memory(s) => s.sync(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::headers::{FileHeader, StoreKind};
    use tempfile::tempdir;

    #[test]
    fn storage_kind_mmap_path_accessor_returns_directory() {
        let kind = StorageKind::mmap("/var/lib/pathcat/index");

        assert!(kind.is_mmap());
        assert_eq!(kind.path(), Some(Path::new("/var/lib/pathcat/index")));
    }

    #[test]
    fn storage_kind_defaults_to_memory() {
        let kind = StorageKind::default();

        assert!(!kind.is_mmap());
        assert_eq!(kind.path(), None);
        assert!(!kind.exists("catalog.pcat"));
    }

    #[test]
    fn memory_kind_never_opens_existing_storage() {
        let kind = StorageKind::Memory;

        assert!(kind.open_storage("trie.ptri").unwrap().is_none());
    }

    #[test]
    fn mmap_kind_creates_directory_and_file() {
        let dir = tempdir().unwrap();
        let mapping_dir = dir.path().join("nested").join("index");
        let kind = StorageKind::mmap(&mapping_dir);

        let storage = kind.create_storage("layer0.pinf", 1024).unwrap();

        assert!(storage.is_mmap());
        assert_eq!(storage.page_size(), 1024);
        assert_eq!(storage.page_count(), INITIAL_PAGE_COUNT);
        assert!(kind.exists("layer0.pinf"));
    }

    #[test]
    fn mmap_kind_reopens_with_page_size_from_header() {
        let dir = tempdir().unwrap();
        let kind = StorageKind::mmap(dir.path());

        {
            let mut storage = kind.create_storage("trie.ptri", 2048).unwrap();
            FileHeader::new(StoreKind::Trie, 2048)
                .write_to(storage.page_mut(0).unwrap())
                .unwrap();
            storage.sync().unwrap();
        }

        let storage = kind.open_storage("trie.ptri").unwrap().unwrap();

        assert_eq!(storage.page_size(), 2048);
        assert!(kind.open_storage("missing.ptri").unwrap().is_none());
    }
}
