//! # pathcat Configuration Module
//!
//! Constants shared by the paged stores and the mapping coordinator live in
//! [`constants`]. Runtime settings (directory, layer count, page size) are
//! chosen through [`crate::mapping::MappingBuilder`] and persisted in the file
//! headers, so reopening a mapping does not depend on these defaults.
//!
//! ## Module Organization
//!
//! - [`constants`]: numeric limits, header sizes and file names

pub mod constants;
pub use constants::*;
