//! # Store File Header
//!
//! Page 0 of every store file starts with a 64-byte `FileHeader`. The rest of
//! page 0 is unused so that regular pages never have to account for it.
//!
//! ## Layout (64 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ------------------------------------------------
//! 0       8     magic        Store kind marker (catalog, trie, payload layer)
//! 8       4     version      FORMAT_VERSION
//! 12      4     page_size    Page size the file was created with
//! 16      4     next_page    First page never handed out by the allocator
//! 20      4     free_head    First page of the freelist chain (0 = empty)
//! 24      4     free_count   Number of pages on the freelist
//! 28      4     root_page    Trie root page (trie files only)
//! 32      4     high_water   Largest row id ever allocated (catalog only)
//! 36      4     record_size  Catalog record size in bytes (catalog only)
//! 40      4     tag          Layer count (catalog) or layer index (payload)
//! 44      20    reserved
//! ```
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian zerocopy wrappers, which keeps the
//! struct `Unaligned` and lets it be referenced in place inside page 0.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{FILE_HEADER_SIZE, FORMAT_VERSION};

pub const CATALOG_MAGIC: &[u8; 8] = b"PCATREC\x00";
pub const TRIE_MAGIC: &[u8; 8] = b"PCATTRI\x00";
pub const INFO_MAGIC: &[u8; 8] = b"PCATINF\x00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Catalog,
    Trie,
    Info,
}

impl StoreKind {
    pub fn magic(self) -> &'static [u8; 8] {
        match self {
            StoreKind::Catalog => CATALOG_MAGIC,
            StoreKind::Trie => TRIE_MAGIC,
            StoreKind::Info => INFO_MAGIC,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: [u8; 8],
    version: U32,
    page_size: U32,
    next_page: U32,
    free_head: U32,
    free_count: U32,
    root_page: U32,
    high_water: U32,
    record_size: U32,
    tag: U32,
    reserved: [u8; 20],
}

const _: () = assert!(size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new(kind: StoreKind, page_size: u32) -> Self {
        Self {
            magic: *kind.magic(),
            version: U32::new(FORMAT_VERSION),
            page_size: U32::new(page_size),
            next_page: U32::new(1),
            free_head: U32::new(0),
            free_count: U32::new(0),
            root_page: U32::new(0),
            high_water: U32::new(0),
            record_size: U32::new(0),
            tag: U32::new(0),
            reserved: [0u8; 20],
        }
    }

    pub fn from_bytes(bytes: &[u8], kind: StoreKind) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))?;
        header.check(kind)?;
        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8], kind: StoreKind) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))?;
        header.check(kind)?;
        Ok(header)
    }

    pub fn write_to(&self, bytes: &mut [u8]) -> Result<()> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        bytes[..FILE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    fn check(&self, kind: StoreKind) -> Result<()> {
        ensure!(
            &self.magic == kind.magic(),
            "invalid magic bytes for {:?} store file",
            kind
        );

        ensure!(
            self.version.get() == FORMAT_VERSION,
            "unsupported version: {} (expected {})",
            self.version.get(),
            FORMAT_VERSION
        );

        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    le_accessors! {
        next_page: u32 => U32,
        free_head: u32 => U32,
        free_count: u32 => U32,
        root_page: u32 => U32,
        high_water: u32 => U32,
        record_size: u32 => U32,
        tag: u32 => U32,
    }
}

/// Reads the page size recorded in a raw header without validating the magic.
pub fn peek_page_size(bytes: &[u8]) -> Result<u32> {
    ensure!(
        bytes.len() >= FILE_HEADER_SIZE,
        "file too small to hold a header: {} < {}",
        bytes.len(),
        FILE_HEADER_SIZE
    );

    let header = FileHeader::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
        .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))?;
    Ok(header.page_size())
}
