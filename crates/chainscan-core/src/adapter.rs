//! Chain adapter boundary — the per-asset RPC surface the engine consumes.

use async_trait::async_trait;

use crate::error::ScanError;
use crate::types::{BlockSummary, ChainTransaction};

/// Read-only view of one blockchain.
///
/// One implementation per asset; the engine is generic over this trait so
/// the scan loop, fork handling, and retry logic are written once. Every
/// method is network I/O and may fail transiently with
/// [`ScanError::Adapter`].
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Current best block height.
    async fn chain_head(&self) -> Result<u64, ScanError>;

    /// Block at an exact height.
    async fn block_by_height(&self, height: u64) -> Result<BlockSummary, ScanError>;

    /// Block by hash.
    async fn block_by_hash(&self, hash: &str) -> Result<BlockSummary, ScanError>;

    /// A single transaction, normalized.
    ///
    /// Implementations must return [`ScanError::TransactionNotFound`] when
    /// the node reports the id as unknown, so the sweeper can classify the
    /// failure as permanent instead of retrying it forever.
    async fn transaction(&self, tx_id: &str) -> Result<ChainTransaction, ScanError>;
}
