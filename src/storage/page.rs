//! # Page Types and Header Layout
//!
//! Every page of every store file, except page 0 which carries the file header,
//! begins with a 16-byte header describing what the page holds.
//!
//! ## Page Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------------
//! 0       1     page_type    Catalog, TrieNode, InfoItems or Free
//! 1       1     flags        Reserved page flags
//! 2       2     entry_count  Live catalog slots / trie records / payload entries
//! 4       4     used_bytes   Encoded size of the page contents, header included
//! 8       4     next_page    Freelist link (Free) or record 0 continuation (TrieNode)
//! 12      4     reserved     Reserved for future use
//! ```
//!
//! ## Page Types
//!
//! - **Catalog** (0x01): fixed-size catalog record slots
//! - **TrieNode** (0x02): path trie records and their items
//! - **InfoItems** (0x03): packed per-row payload arrays of one layer
//! - **Free** (0x30): released page waiting on the freelist
//!
//! ## Zero-Copy Access
//!
//! The header is an `Unaligned` zerocopy struct made of little-endian
//! wrappers, so it can be referenced in place at the start of any page slice:
//!
//! ```text
//! let header = PageHeader::from_bytes(page)?;
//! ```
//!
//! `used_bytes` is maintained by the trie and payload stores and feeds the
//! fill-factor statistics; the catalog store tracks occupancy in
//! `entry_count` instead.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::PAGE_HEADER_SIZE;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0x00,
    Catalog = 0x01,
    TrieNode = 0x02,
    InfoItems = 0x03,
    Free = 0x30,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::Catalog,
            0x02 => PageType::TrieNode,
            0x03 => PageType::InfoItems,
            0x30 => PageType::Free,
            _ => PageType::Unknown,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    flags: u8,
    entry_count: U16,
    used_bytes: U32,
    next_page: U32,
    reserved: [u8; 4],
}

const _: () = assert!(size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type: page_type as u8,
            flags: 0,
            entry_count: U16::new(0),
            used_bytes: U32::new(PAGE_HEADER_SIZE as u32),
            next_page: U32::new(0),
            reserved: [0; 4],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        data[..PAGE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type as u8;
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    le_accessors! {
        entry_count: u16 => U16,
        used_bytes: u32 => U32,
        next_page: u32 => U32,
    }
}

/// Checks that `data` is a page of `expected` type whose recorded size fits.
pub fn validate_page(data: &[u8], expected: PageType) -> Result<&PageHeader> {
    let header = PageHeader::from_bytes(data)?;

    ensure!(
        header.page_type() == expected,
        "page type mismatch: expected {:?}, found {:?} (0x{:02x})",
        expected,
        header.page_type(),
        header.page_type
    );

    ensure!(
        header.used_bytes() as usize >= PAGE_HEADER_SIZE
            && header.used_bytes() as usize <= data.len(),
        "page used_bytes {} outside [{}, {}]",
        header.used_bytes(),
        PAGE_HEADER_SIZE,
        data.len()
    );

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_type_from_byte() {
        assert_eq!(PageType::from_byte(0x00), PageType::Unknown);
        assert_eq!(PageType::from_byte(0x01), PageType::Catalog);
        assert_eq!(PageType::from_byte(0x02), PageType::TrieNode);
        assert_eq!(PageType::from_byte(0x03), PageType::InfoItems);
        assert_eq!(PageType::from_byte(0x30), PageType::Free);
        assert_eq!(PageType::from_byte(0xFF), PageType::Unknown);
    }

    #[test]
    fn page_header_new_initializes_counts() {
        let header = PageHeader::new(PageType::InfoItems);

        assert_eq!(header.page_type(), PageType::InfoItems);
        assert_eq!(header.flags(), 0);
        assert_eq!(header.entry_count(), 0);
        assert_eq!(header.used_bytes(), PAGE_HEADER_SIZE as u32);
        assert_eq!(header.next_page(), 0);
    }

    #[test]
    fn page_header_reads_little_endian_fields() {
        let mut data = [0u8; 16];
        data[0] = 0x02;
        data[2] = 5;
        data[4] = 0x00;
        data[5] = 0x01;
        data[8] = 9;

        let header = PageHeader::from_bytes(&data).unwrap();

        assert_eq!(header.page_type(), PageType::TrieNode);
        assert_eq!(header.entry_count(), 5);
        assert_eq!(header.used_bytes(), 256);
        assert_eq!(header.next_page(), 9);
    }

    #[test]
    fn page_header_from_bytes_too_small() {
        let data = [0u8; 8];
        let result = PageHeader::from_bytes(&data);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("buffer too small"));
    }

    #[test]
    fn page_header_from_bytes_mut_modifies_in_place() {
        let mut data = [0u8; 16];

        {
            let header = PageHeader::from_bytes_mut(&mut data).unwrap();
            header.set_page_type(PageType::Free);
            header.set_next_page(42);
        }

        assert_eq!(data[0], 0x30);
        assert_eq!(data[8], 42);
    }

    #[test]
    fn validate_page_rejects_wrong_type() {
        let mut data = [0u8; 64];
        PageHeader::new(PageType::Catalog).write_to(&mut data).unwrap();

        let err = validate_page(&data, PageType::TrieNode).unwrap_err();

        assert!(err.to_string().contains("page type mismatch"));
    }

    #[test]
    fn validate_page_rejects_oversized_used_bytes() {
        let mut data = [0u8; 64];
        let mut header = PageHeader::new(PageType::InfoItems);
        header.set_used_bytes(65);
        header.write_to(&mut data).unwrap();

        assert!(validate_page(&data, PageType::InfoItems).is_err());
    }

    #[test]
    fn validate_page_accepts_fresh_page() {
        let mut data = [0u8; 64];
        PageHeader::new(PageType::InfoItems).write_to(&mut data).unwrap();

        assert!(validate_page(&data, PageType::InfoItems).is_ok());
    }
}
