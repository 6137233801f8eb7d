//! # Store Callbacks
//!
//! The path trie and the payload layers relocate data on their own (trie
//! subtrees move to new pages, payload pages split). The catalog keeps the
//! authoritative pointers to both, so the stores report every move back
//! through these two traits.
//!
//! ```text
//!   PathTrie ──tree_coord_changed──────────────────┐
//!                                                  v
//!   InfoStore ──find_page_of / parent_of────────> Catalog
//!             ──write_newly_allocated_page_id──>   (implements both traits)
//!             ──update_page_id────────────────>
//! ```
//!
//! ## Lock Discipline
//!
//! Callbacks run synchronously inside an operation that already holds the
//! mapping lock. Implementations must never try to take that lock again; the
//! catalog implements them as plain method calls on state the caller has
//! already borrowed.
//!
//! ## Errors
//!
//! A storage failure inside a callback leaves the calling store unable to roll
//! back, so implementations report it as a fatal consistency error (see
//! `error::escalate`).

use eyre::Result;

use crate::trie::TriePos;
use crate::{PageId, RowId};

/// Parent chain and payload page pointers, as seen by a payload layer.
pub trait ItemsHierarchy {
    /// Parent of `row_id`, `Some(0)` for a top-level entry, or `None` if the
    /// row has no catalog entry.
    fn parent_of(&self, row_id: RowId) -> Result<Option<RowId>>;

    /// Page of `row_id` in `layer`, inheriting from the nearest ancestor that
    /// has one. `None` if no entry on the chain has a page yet.
    fn find_page_of(&self, layer: usize, row_id: RowId) -> Result<Option<PageId>>;

    /// Records a brand-new page for `row_id` and for every ancestor that does
    /// not have a page of its own yet.
    fn write_newly_allocated_page_id(
        &mut self,
        layer: usize,
        row_id: RowId,
        page: PageId,
    ) -> Result<()>;

    /// Overwrites the page of `row_id` after its payload moved.
    fn update_page_id(&mut self, layer: usize, row_id: RowId, page: PageId) -> Result<()>;
}

/// Receives trie position changes of bound items.
pub trait TreeCoordListener {
    fn tree_coord_changed(&mut self, row_id: RowId, pos: TriePos) -> Result<()>;
}
