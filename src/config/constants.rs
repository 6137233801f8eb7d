//! # pathcat Configuration Constants
//!
//! This module centralizes the numeric and naming constants shared by the three
//! paged stores (catalog records, path trie, payload layers) and the mapping
//! coordinator. Values that depend on each other are co-located and their
//! relationships are checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> MIN_PAGE_SIZE <= DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE
//!       │
//!       ├─> PAGE_HEADER_SIZE (16 bytes, every page)
//!       │
//!       └─> FILE_HEADER_SIZE (64 bytes, page 0 only)
//!
//! MAX_PAGE_SIZE (32768 bytes)
//!       │
//!       └─> Trie and payload pages store in-page lengths and counts as u16,
//!           so every byte offset inside a page must fit in a u16.
//!
//! ENTRY_HEADER_SIZE (16 bytes)
//!       │
//!       └─> catalog record size = ENTRY_HEADER_SIZE + 4 * layer_count
//!           MAX_LAYER_COUNT bounds the record so that at least
//!           MIN_SLOTS_PER_PAGE records fit in a MIN_PAGE_SIZE page.
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use crate::config::{DEFAULT_PAGE_SIZE, PAGE_HEADER_SIZE};
//! ```

// ============================================================================
// PAGE LAYOUT CONSTANTS
// ============================================================================

/// Page size used when a mapping is created without an explicit size.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size accepted by the builder.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size accepted by the builder.
/// In-page offsets and counts are u16.
pub const MAX_PAGE_SIZE: usize = 32768;

/// Size of the header at the start of every page.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Size of the file header stored in page 0 of every store file.
pub const FILE_HEADER_SIZE: usize = 64;

const _: () = assert!(MIN_PAGE_SIZE <= DEFAULT_PAGE_SIZE);
const _: () = assert!(DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE);
const _: () = assert!(MAX_PAGE_SIZE <= u16::MAX as usize + 1);
const _: () = assert!(
    FILE_HEADER_SIZE <= MIN_PAGE_SIZE,
    "file header must fit in page 0 of the smallest page size"
);
const _: () = assert!(MIN_PAGE_SIZE.is_power_of_two() && MAX_PAGE_SIZE.is_power_of_two());

// ============================================================================
// FILE GROWTH
// ============================================================================

/// Pages created together with a fresh store file (header page included).
pub const INITIAL_PAGE_COUNT: u32 = 4;

/// Number of pages a store file grows by when it runs out of fresh pages.
pub const GROW_PAGE_COUNT: u32 = 16;

/// On-disk format version written into every file header.
pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// CATALOG / LAYER CONFIGURATION
// ============================================================================

/// Fixed part of a catalog record: parent id, trie position, flags.
pub const ENTRY_HEADER_SIZE: usize = 16;

/// Bytes used by the row id stored in front of every catalog record slot.
pub const SLOT_ROW_ID_SIZE: usize = 4;

/// Number of payload layers used when none is configured.
pub const DEFAULT_LAYER_COUNT: usize = 2;

/// Upper bound on payload layers per mapping.
pub const MAX_LAYER_COUNT: usize = 16;

/// Minimum number of catalog records that must fit in one page.
pub const MIN_SLOTS_PER_PAGE: usize = 4;

/// Largest catalog record slot for the configured layer bound.
pub const MAX_SLOT_SIZE: usize = SLOT_ROW_ID_SIZE + ENTRY_HEADER_SIZE + 4 * MAX_LAYER_COUNT;

const _: () = assert!(
    (MIN_PAGE_SIZE - PAGE_HEADER_SIZE) / MAX_SLOT_SIZE >= MIN_SLOTS_PER_PAGE,
    "MAX_LAYER_COUNT leaves too few catalog slots per page"
);

// ============================================================================
// PAYLOAD PAGES
// ============================================================================

/// Slack kept below the theoretical maximum payload length of a single item,
/// so that a page holding one maximal payload can still absorb small appends.
pub const PAYLOAD_LENGTH_SLACK: usize = 10;

// ============================================================================
// FILE NAMES
// ============================================================================

/// Catalog record store file inside a mapping directory.
pub const CATALOG_FILE_NAME: &str = "catalog.pcat";

/// Path trie file inside a mapping directory.
pub const TRIE_FILE_NAME: &str = "trie.ptri";

/// Returns the payload store file name for `layer`.
pub fn layer_file_name(layer: usize) -> String {
    format!("layer{}.pinf", layer)
}
