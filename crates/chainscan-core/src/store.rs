//! Persistence boundary: scan cursor, block cache, and unscan records.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::ScanCursor;
use crate::error::ScanError;
use crate::types::BlockSummary;

// ─── UnscanRecord ─────────────────────────────────────────────────────────────

/// Durable marker of a block or transaction whose extraction (or delivery)
/// failed and must be retried by the sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnscanRecord {
    /// Deterministic id derived from `(block_height, tx_id)`. Saving the
    /// same failure twice upserts a single record.
    pub id: String,
    /// Height the failure occurred at.
    pub block_height: u64,
    /// `None` marks a whole-block failure: the block could not be fetched,
    /// or its header notification was rejected.
    pub tx_id: Option<String>,
    /// Why the attempt failed (the error's display form).
    pub reason: String,
    /// Unix timestamp of the latest save.
    pub updated_at: i64,
}

impl UnscanRecord {
    /// Record a whole-block failure at `height`.
    pub fn block(height: u64, reason: impl Into<String>) -> Self {
        Self {
            id: Self::derive_id(height, None),
            block_height: height,
            tx_id: None,
            reason: reason.into(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Record a single-transaction failure at `height`.
    pub fn tx(height: u64, tx_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let tx_id = tx_id.into();
        Self {
            id: Self::derive_id(height, Some(&tx_id)),
            block_height: height,
            tx_id: Some(tx_id),
            reason: reason.into(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Stable identity of a `(height, tx)` failure. The composite key keeps
    /// records idempotent and inspectable.
    pub fn derive_id(height: u64, tx_id: Option<&str>) -> String {
        format!("{height}:{}", tx_id.unwrap_or(""))
    }
}

// ─── ScanStore ────────────────────────────────────────────────────────────────

/// Persistence contract for one asset's scanner.
///
/// Every operation is short-lived and independently fallible: no long
/// transactions, no handle shared across calls. Scanners for different
/// assets each get their own store and never contend on each other's
/// storage. All failures surface as [`ScanError::Storage`].
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Load the scan cursor; an unset cursor (`(0, "")`) when uninitialized.
    async fn cursor(&self) -> Result<ScanCursor, ScanError>;

    /// Overwrite the scan cursor.
    async fn set_cursor(&self, cursor: &ScanCursor) -> Result<(), ScanError>;

    /// Load a cached block by height.
    async fn block(&self, height: u64) -> Result<Option<BlockSummary>, ScanError>;

    /// Cache a block, replacing any previous block at its height (a fork may
    /// substitute the occupant).
    async fn save_block(&self, block: &BlockSummary) -> Result<(), ScanError>;

    /// Upsert an unscan record, keyed by its deterministic id.
    async fn save_unscan_record(&self, record: &UnscanRecord) -> Result<(), ScanError>;

    /// All unscan records at `height`.
    async fn unscan_records(&self, height: u64) -> Result<Vec<UnscanRecord>, ScanError>;

    /// Delete every unscan record at `height`.
    async fn delete_unscan_records(&self, height: u64) -> Result<(), ScanError>;

    /// Every stored unscan record, ordered by height then id.
    async fn all_unscan_records(&self) -> Result<Vec<UnscanRecord>, ScanError>;

    /// Delete unscan records whose reason starts with `reason_prefix`.
    async fn prune_unscan_records(&self, reason_prefix: &str) -> Result<(), ScanError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory scan store for tests and ephemeral scanners.
///
/// All state is lost when the value is dropped.
#[derive(Default)]
pub struct MemoryScanStore {
    cursor: Mutex<ScanCursor>,
    blocks: Mutex<HashMap<u64, BlockSummary>>,
    unscan: Mutex<HashMap<String, UnscanRecord>>,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn cursor(&self) -> Result<ScanCursor, ScanError> {
        Ok(self.cursor.lock().unwrap().clone())
    }

    async fn set_cursor(&self, cursor: &ScanCursor) -> Result<(), ScanError> {
        *self.cursor.lock().unwrap() = cursor.clone();
        Ok(())
    }

    async fn block(&self, height: u64) -> Result<Option<BlockSummary>, ScanError> {
        Ok(self.blocks.lock().unwrap().get(&height).cloned())
    }

    async fn save_block(&self, block: &BlockSummary) -> Result<(), ScanError> {
        self.blocks.lock().unwrap().insert(block.height, block.clone());
        Ok(())
    }

    async fn save_unscan_record(&self, record: &UnscanRecord) -> Result<(), ScanError> {
        self.unscan
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn unscan_records(&self, height: u64) -> Result<Vec<UnscanRecord>, ScanError> {
        let mut records: Vec<UnscanRecord> = self
            .unscan
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.block_height == height)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn delete_unscan_records(&self, height: u64) -> Result<(), ScanError> {
        self.unscan
            .lock()
            .unwrap()
            .retain(|_, r| r.block_height != height);
        Ok(())
    }

    async fn all_unscan_records(&self) -> Result<Vec<UnscanRecord>, ScanError> {
        let mut records: Vec<UnscanRecord> =
            self.unscan.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| {
            a.block_height
                .cmp(&b.block_height)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn prune_unscan_records(&self, reason_prefix: &str) -> Result<(), ScanError> {
        self.unscan
            .lock()
            .unwrap()
            .retain(|_, r| !r.reason.starts_with(reason_prefix));
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cursor_roundtrip() {
        let store = MemoryScanStore::new();
        assert!(store.cursor().await.unwrap().is_unset());

        store
            .set_cursor(&ScanCursor::new(1_000, "0xabc"))
            .await
            .unwrap();
        let cursor = store.cursor().await.unwrap();
        assert_eq!(cursor.height, 1_000);
        assert_eq!(cursor.hash, "0xabc");
    }

    #[tokio::test]
    async fn block_upsert_replaces_forked_occupant() {
        let store = MemoryScanStore::new();
        let old = BlockSummary {
            height: 50,
            hash: "0xold".into(),
            previous_hash: "0x49".into(),
            timestamp: 0,
            tx_ids: vec!["t1".into()],
        };
        let new = BlockSummary {
            hash: "0xnew".into(),
            ..old.clone()
        };

        store.save_block(&old).await.unwrap();
        store.save_block(&new).await.unwrap();

        let cached = store.block(50).await.unwrap().unwrap();
        assert_eq!(cached.hash, "0xnew");
        assert!(store.block(51).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unscan_record_save_is_idempotent() {
        let store = MemoryScanStore::new();
        store
            .save_unscan_record(&UnscanRecord::tx(90, "t1", "timeout"))
            .await
            .unwrap();
        store
            .save_unscan_record(&UnscanRecord::tx(90, "t1", "timeout again"))
            .await
            .unwrap();

        let records = store.unscan_records(90).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, "timeout again"); // latest save wins
    }

    #[tokio::test]
    async fn block_and_tx_records_are_distinct() {
        let store = MemoryScanStore::new();
        store
            .save_unscan_record(&UnscanRecord::block(90, "fetch failed"))
            .await
            .unwrap();
        store
            .save_unscan_record(&UnscanRecord::tx(90, "t1", "timeout"))
            .await
            .unwrap();
        assert_eq!(store.unscan_records(90).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_by_height_spares_other_heights() {
        let store = MemoryScanStore::new();
        store
            .save_unscan_record(&UnscanRecord::tx(90, "t1", "timeout"))
            .await
            .unwrap();
        store
            .save_unscan_record(&UnscanRecord::tx(91, "t2", "timeout"))
            .await
            .unwrap();

        store.delete_unscan_records(90).await.unwrap();

        assert!(store.unscan_records(90).await.unwrap().is_empty());
        assert_eq!(store.all_unscan_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn prune_by_reason_prefix() {
        let store = MemoryScanStore::new();
        store
            .save_unscan_record(&UnscanRecord::tx(90, "t1", "transaction not found: t1"))
            .await
            .unwrap();
        store
            .save_unscan_record(&UnscanRecord::tx(91, "t2", "connection reset"))
            .await
            .unwrap();

        store
            .prune_unscan_records("transaction not found")
            .await
            .unwrap();

        let remaining = store.all_unscan_records().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tx_id.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn all_records_ordered_by_height() {
        let store = MemoryScanStore::new();
        store
            .save_unscan_record(&UnscanRecord::tx(95, "t5", "x"))
            .await
            .unwrap();
        store
            .save_unscan_record(&UnscanRecord::tx(90, "t0", "x"))
            .await
            .unwrap();

        let records = store.all_unscan_records().await.unwrap();
        assert_eq!(records[0].block_height, 90);
        assert_eq!(records[1].block_height, 95);
    }
}
