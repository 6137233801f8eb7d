//! # pathcat - Paged Path Catalog
//!
//! pathcat maps hierarchical string paths (fully qualified symbol or
//! resource names) to stable 32-bit row ids, and keeps per-row integer
//! payloads in several independent layers. It is the storage core of a
//! source-code index: paths are created as they are seen, payloads point
//! at postings, and everything lives in memory-mapped page files.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pathcat::Mapping;
//!
//! let mapping = Mapping::builder()
//!     .path("./index")
//!     .layers(2)
//!     .open()?;
//!
//! let bar = mapping.find_or_create(&["com", "foo", "Bar"])?.unwrap();
//! let baz = mapping.find_or_create(&["com", "foo", "Bar", "baz"])?.unwrap();
//! assert_eq!(mapping.parent_of(baz)?, Some(bar));
//!
//! mapping.write_info(baz, 0, &[42])?;
//! mapping.delete(bar)?;
//! assert_eq!(mapping.find(&["com", "foo", "Bar"])?, None);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           Mapping (one coarse mutex)          │
//! ├───────────────┬───────────────┬──────────────┤
//! │   PathTrie    │    Catalog    │  InfoStore   │
//! │ (components)  │ (row entries) │  (per layer) │
//! ├───────────────┴───────────────┴──────────────┤
//! │      PagedFile: header, freelist, pages      │
//! ├──────────────────────────────────────────────┤
//! │        MmapStorage / MemoryStorage           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The trie and the payload stores move data between pages on their own.
//! They report each move to the catalog through the callback traits in
//! [`hierarchy`], which keeps every entry's trie position and payload page
//! pointers current.
//!
//! ## Module Overview
//!
//! - [`storage`]: page backends, headers, freelist, page allocator
//! - [`records`]: fixed-size records addressed by row id
//! - [`trie`]: paged trie of path components
//! - [`info`]: layered integer payloads
//! - [`catalog`]: catalog entries and store callbacks
//! - [`mapping`]: the coordinator, its builder and statistics
//! - [`error`]: storage versus fatal consistency errors

#[macro_use]
mod macros;

pub mod catalog;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod info;
pub mod mapping;
pub mod records;
pub mod storage;
pub mod trie;

/// Stable identifier of one path; 0 means "none".
pub type RowId = u32;

/// Page number inside one store file; 0 means "unset".
pub type PageId = u32;

pub use error::{is_fatal, FatalConsistencyError};
pub use hierarchy::{ItemsHierarchy, TreeCoordListener};
pub use info::InfoPos;
pub use mapping::{Mapping, MappingBuilder, MappingStats};
pub use trie::TriePos;
