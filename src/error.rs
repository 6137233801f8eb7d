//! # Error Kinds
//!
//! Every fallible operation in pathcat returns `eyre::Result`. Two kinds of
//! failure travel through those reports:
//!
//! - **Storage errors**: I/O failures, out-of-bounds page access and detected
//!   page-format corruption, raised by the paged stores with `ensure!`,
//!   `bail!` and `wrap_err`. These are recoverable at a higher level: the
//!   caller of a mapping operation decides whether to retry or give up.
//!
//! - **Fatal consistency errors**: a [`FatalConsistencyError`] somewhere in the
//!   report chain. Raised when an internal post-condition fails (a payload
//!   block that still lacks its row id after a write) or when a storage error
//!   surfaces inside a store callback, where the calling store cannot roll
//!   back. The index must be considered untrustworthy; the session should
//!   stop instead of retrying.
//!
//! Lookups that simply do not find a path are not errors at all; they return
//! `None`.
//!
//! ## Detecting Fatal Errors
//!
//! ```ignore
//! match mapping.add_to_info(row, 0, 7) {
//!     Err(err) if pathcat::error::is_fatal(&err) => abort_session(err),
//!     Err(err) => retry_later(err),
//!     Ok(()) => {}
//! }
//! ```

use eyre::Report;
use thiserror::Error;
use tracing::error;

use crate::RowId;

/// Internal invariant of the catalog, trie or payload stores no longer holds.
#[derive(Debug, Error)]
#[error("fatal consistency error: {message}")]
pub struct FatalConsistencyError {
    message: String,
}

impl FatalConsistencyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Shorthand for an `eyre::Report` carrying a [`FatalConsistencyError`].
pub fn fatal(message: impl Into<String>) -> Report {
    Report::new(FatalConsistencyError::new(message))
}

/// Returns true if `err` or any error in its cause chain is fatal.
pub fn is_fatal(err: &Report) -> bool {
    err.chain().any(|cause| cause.is::<FatalConsistencyError>())
}

/// Converts a storage failure raised inside a store callback into a fatal
/// consistency error, logging the original failure first. Errors that are
/// already fatal pass through untouched.
pub(crate) fn escalate<T>(
    operation: &'static str,
    row_id: RowId,
    result: eyre::Result<T>,
) -> eyre::Result<T> {
    result.map_err(|err| {
        if is_fatal(&err) {
            return err;
        }
        error!(
            operation,
            row_id,
            error = %format!("{:#}", err),
            "storage failure inside store callback"
        );
        fatal(format!("{} for row {} failed: {:#}", operation, row_id, err))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn plain_report_is_not_fatal() {
        let err = eyre::eyre!("disk on fire");

        assert!(!is_fatal(&err));
    }

    #[test]
    fn fatal_report_is_detected_through_context() {
        let err: eyre::Result<()> = Err(fatal("payload lost"));
        let err = err.wrap_err("while adding items").unwrap_err();

        assert!(is_fatal(&err));
        assert!(format!("{:#}", err).contains("payload lost"));
    }

    #[test]
    fn escalate_turns_storage_error_into_fatal() {
        let result: eyre::Result<()> = Err(eyre::eyre!("page 7 out of bounds"));

        let err = escalate("update_page_id", 3, result).unwrap_err();

        assert!(is_fatal(&err));
        assert!(err.to_string().contains("update_page_id for row 3"));
        assert!(err.to_string().contains("page 7 out of bounds"));
    }

    #[test]
    fn escalate_keeps_ok_values() {
        assert_eq!(escalate("find_page_of", 1, Ok(5)).unwrap(), 5);
    }
}
