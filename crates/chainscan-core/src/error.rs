//! Error types for the scanning pipeline.

use thiserror::Error;

/// Errors that can occur while scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Transient node/network failure; the current invocation ends early and
    /// the next scheduled run retries.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// The node reports the transaction as unknown (pruned or invalid).
    /// The sweeper treats this as permanent and prunes it.
    #[error("transaction not found: {tx_id}")]
    TransactionNotFound { tx_id: String },

    /// Store failure. Fatal for the current invocation: the cursor must not
    /// advance when its persistence cannot be trusted.
    #[error("storage error: {0}")]
    Storage(String),

    /// At least one transaction in the block failed extraction. The failures
    /// are recorded as unscan records; callers treat this as non-fatal.
    #[error("extraction failed for {failed} transaction(s) in block {block_height}")]
    Extraction { block_height: u64, failed: usize },

    /// An observer rejected a delivery.
    #[error("observer delivery failed: {reason}")]
    Notify { reason: String },

    #[error("{0}")]
    Other(String),
}

impl ScanError {
    /// Returns `true` if retrying can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::TransactionNotFound { .. })
    }

    /// Returns `true` for store failures, which abort the invocation.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
