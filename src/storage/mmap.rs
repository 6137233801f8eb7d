//! # Memory-Mapped Store Files
//!
//! `MmapStorage` backs one store file (catalog, trie or a payload layer) with a
//! shared memory mapping. Pages are handed out as slices directly into the
//! mapping, so decoding a trie or payload page reads straight from the OS page
//! cache.
//!
//! ## Page Size
//!
//! Unlike a database with one compiled-in page size, every mapping chooses its
//! page size when it is created. The size is recorded in the file header and
//! passed back in when the file is reopened; the file length must always be a
//! multiple of it.
//!
//! ## Safety Considerations
//!
//! A mapping becomes invalid when the file is grown and remapped. The borrow
//! checker rules this out:
//!
//! ```text
//! page(&self) -> &[u8]              // shared borrow of self
//! page_mut(&mut self) -> &mut [u8]  // exclusive borrow of self
//! grow(&mut self)                   // exclusive borrow, no slices alive
//! ```
//!
//! ## Durability
//!
//! Writes land in the shared mapping immediately. `sync()` flushes the mapping
//! to disk; stores call it from `Mapping::sync`.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::Storage;

#[derive(Debug)]
pub struct MmapStorage {
    file: File,
    mmap: MmapMut,
    page_size: usize,
    page_count: u32,
}

impl MmapStorage {
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref();

        ensure!(page_size > 0, "page size must be positive");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0,
            "cannot open empty store file '{}'",
            path.display()
        );

        ensure!(
            file_size % page_size as u64 == 0,
            "store file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            page_size
        );

        let page_count = u32::try_from(file_size / page_size as u64)
            .wrap_err_with(|| format!("store file '{}' has too many pages", path.display()))?;

        // SAFETY: map_mut is unsafe because the file could be modified by another
        // process while mapped. Store files are owned by a single Mapping, which
        // holds them open read+write for its whole lifetime, and every access goes
        // through page()/page_mut() which bounds-check page_no.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_size,
            page_count,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, page_size: usize, initial_page_count: u32) -> Result<Self> {
        let path = path.as_ref();

        ensure!(page_size > 0, "page size must be positive");
        ensure!(
            initial_page_count > 0,
            "initial page count must be at least 1"
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        let file_size = initial_page_count as u64 * page_size as u64;

        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        // SAFETY: the file was just created and truncated by this process and its
        // length is a whole number of pages; the mapping lives exactly as long as
        // the MmapStorage that owns the file handle.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_size,
            page_count: initial_page_count,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.page_count as u64 * self.page_size as u64
    }
}

impl Storage for MmapStorage {
    fn page(&self, page_no: u32) -> Result<&[u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        let offset = page_no as usize * self.page_size;
        Ok(&self.mmap[offset..offset + self.page_size])
    }

    fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        let offset = page_no as usize * self.page_size;
        Ok(&mut self.mmap[offset..offset + self.page_size])
    }

    fn grow(&mut self, new_page_count: u32) -> Result<()> {
        if new_page_count <= self.page_count {
            return Ok(());
        }

        self.mmap
            .flush()
            .wrap_err("failed to flush mmap before grow")?;

        let new_size = new_page_count as u64 * self.page_size as u64;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend file to {} bytes", new_size))?;

        // SAFETY: grow() takes &mut self, so no page slices into the old mapping
        // can be alive. The old mapping was flushed and the file extended before
        // remapping; the old mapping is dropped on assignment.
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file).wrap_err("failed to remap file after grow")? };

        self.page_count = new_page_count;

        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync mmap to disk")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEST_PAGE: usize = 512;

    #[test]
    fn create_sizes_file_in_whole_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layer0.pinf");

        let storage = MmapStorage::create(&path, TEST_PAGE, 10).unwrap();

        assert_eq!(storage.page_count(), 10);
        assert_eq!(storage.page_size(), TEST_PAGE);
        assert_eq!(storage.file_size(), 10 * TEST_PAGE as u64);
    }

    #[test]
    fn create_fails_with_zero_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trie.ptri");

        let result = MmapStorage::create(&path, TEST_PAGE, 0);

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("initial page count must be at least 1"));
    }

    #[test]
    fn open_rejects_mismatched_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.pcat");
        MmapStorage::create(&path, TEST_PAGE, 3).unwrap();

        let err = MmapStorage::open(&path, 1024).unwrap_err();

        assert!(err.to_string().contains("not a multiple of page size"));
    }

    #[test]
    fn open_fails_for_nonexistent_file() {
        let dir = tempdir().unwrap();

        assert!(MmapStorage::open(dir.path().join("missing.pcat"), TEST_PAGE).is_err());
    }

    #[test]
    fn pages_are_disjoint_slices() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trie.ptri");
        let mut storage = MmapStorage::create(&path, TEST_PAGE, 3).unwrap();

        storage.page_mut(0).unwrap()[TEST_PAGE - 1] = 0x11;
        storage.page_mut(1).unwrap()[0] = 0x22;

        assert_eq!(storage.page(0).unwrap()[TEST_PAGE - 1], 0x11);
        assert_eq!(storage.page(1).unwrap()[0], 0x22);
        assert_eq!(storage.page(2).unwrap()[0], 0x00);
        assert!(storage.page(3).is_err());
    }

    #[test]
    fn grow_preserves_existing_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layer1.pinf");
        let mut storage = MmapStorage::create(&path, TEST_PAGE, 2).unwrap();
        storage.page_mut(1).unwrap()[7] = 0xCA;

        storage.grow(8).unwrap();
        storage.grow(4).unwrap();

        assert_eq!(storage.page_count(), 8);
        assert_eq!(storage.page(1).unwrap()[7], 0xCA);
        assert!(storage.page(7).is_ok());
    }

    #[test]
    fn sync_persists_changes_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.pcat");

        {
            let mut storage = MmapStorage::create(&path, TEST_PAGE, 2).unwrap();
            storage.page_mut(1).unwrap()[50] = 0xBE;
            storage.sync().unwrap();
        }

        let storage = MmapStorage::open(&path, TEST_PAGE).unwrap();

        assert_eq!(storage.page_count(), 2);
        assert_eq!(storage.page(1).unwrap()[50], 0xBE);
    }
}
