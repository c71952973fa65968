//! SQLite scan store.
//!
//! Persists the scan cursor, the block cache, and unscan records to a single
//! SQLite file (one file per asset). Every operation opens its own
//! connection and closes it on return, so scanners sharing a process never
//! contend on a pooled handle and each call is independently fallible.
//!
//! # Usage
//! ```rust,no_run
//! use chainscan_storage::sqlite::SqliteScanStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteScanStore::open("./btc-scan.db").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::{Connection, Row, SqliteConnection};
use tracing::debug;

use chainscan_core::cursor::ScanCursor;
use chainscan_core::error::ScanError;
use chainscan_core::store::{ScanStore, UnscanRecord};
use chainscan_core::types::BlockSummary;

/// File-backed scan store. Holds only the database URL; connections are
/// opened per call.
pub struct SqliteScanStore {
    url: String,
}

impl SqliteScanStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// The path may be a plain file path (`"./scan.db"`) or a full SQLite
    /// URL (`"sqlite:./scan.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ScanError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let store = Self { url };
        let mut conn = store.connect().await?;
        init_schema(&mut conn).await?;
        Ok(store)
    }

    async fn connect(&self) -> Result<SqliteConnection, ScanError> {
        SqliteConnection::connect(&self.url)
            .await
            .map_err(storage_err)
    }
}

fn storage_err(e: sqlx::Error) -> ScanError {
    ScanError::Storage(e.to_string())
}

async fn init_schema(conn: &mut SqliteConnection) -> Result<(), ScanError> {
    // WAL mode — better concurrent read throughput
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;

    // Single-row cursor table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS scan_cursor (
            id           INTEGER PRIMARY KEY CHECK (id = 0),
            block_height INTEGER NOT NULL,
            block_hash   TEXT    NOT NULL
        );",
    )
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;

    // Block cache keyed by height; a fork overwrites the occupant
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS blocks (
            height        INTEGER PRIMARY KEY,
            hash          TEXT    NOT NULL,
            previous_hash TEXT    NOT NULL,
            timestamp     INTEGER NOT NULL,
            tx_ids        TEXT    NOT NULL
        );",
    )
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;

    // Unscan records keyed by their deterministic id
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS unscan_records (
            id           TEXT PRIMARY KEY,
            block_height INTEGER NOT NULL,
            tx_id        TEXT,
            reason       TEXT    NOT NULL,
            updated_at   INTEGER NOT NULL
        );",
    )
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_unscan_height ON unscan_records (block_height);")
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;

    Ok(())
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> UnscanRecord {
    UnscanRecord {
        id: row.get("id"),
        block_height: row.get::<i64, _>("block_height") as u64,
        tx_id: row.get("tx_id"),
        reason: row.get("reason"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl ScanStore for SqliteScanStore {
    async fn cursor(&self) -> Result<ScanCursor, ScanError> {
        let mut conn = self.connect().await?;
        let row = sqlx::query("SELECT block_height, block_hash FROM scan_cursor WHERE id = 0")
            .fetch_optional(&mut conn)
            .await
            .map_err(storage_err)?;

        Ok(match row {
            Some(r) => ScanCursor::new(
                r.get::<i64, _>("block_height") as u64,
                r.get::<String, _>("block_hash"),
            ),
            None => ScanCursor::default(),
        })
    }

    async fn set_cursor(&self, cursor: &ScanCursor) -> Result<(), ScanError> {
        let mut conn = self.connect().await?;
        sqlx::query(
            "INSERT OR REPLACE INTO scan_cursor (id, block_height, block_hash) VALUES (0, ?, ?)",
        )
        .bind(cursor.height as i64)
        .bind(&cursor.hash)
        .execute(&mut conn)
        .await
        .map_err(storage_err)?;

        debug!(height = cursor.height, hash = %cursor.hash, "cursor saved");
        Ok(())
    }

    async fn block(&self, height: u64) -> Result<Option<BlockSummary>, ScanError> {
        let mut conn = self.connect().await?;
        let row = sqlx::query(
            "SELECT height, hash, previous_hash, timestamp, tx_ids FROM blocks WHERE height = ?",
        )
        .bind(height as i64)
        .fetch_optional(&mut conn)
        .await
        .map_err(storage_err)?;

        match row {
            Some(r) => {
                let tx_ids: Vec<String> =
                    serde_json::from_str(&r.get::<String, _>("tx_ids"))
                        .map_err(|e| ScanError::Storage(e.to_string()))?;
                Ok(Some(BlockSummary {
                    height: r.get::<i64, _>("height") as u64,
                    hash: r.get("hash"),
                    previous_hash: r.get("previous_hash"),
                    timestamp: r.get("timestamp"),
                    tx_ids,
                }))
            }
            None => Ok(None),
        }
    }

    async fn save_block(&self, block: &BlockSummary) -> Result<(), ScanError> {
        let tx_ids =
            serde_json::to_string(&block.tx_ids).map_err(|e| ScanError::Storage(e.to_string()))?;
        let mut conn = self.connect().await?;
        sqlx::query(
            "INSERT OR REPLACE INTO blocks (height, hash, previous_hash, timestamp, tx_ids)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(block.height as i64)
        .bind(&block.hash)
        .bind(&block.previous_hash)
        .bind(block.timestamp)
        .bind(&tx_ids)
        .execute(&mut conn)
        .await
        .map_err(storage_err)?;

        debug!(height = block.height, hash = %block.hash, "block cached");
        Ok(())
    }

    async fn save_unscan_record(&self, record: &UnscanRecord) -> Result<(), ScanError> {
        let mut conn = self.connect().await?;
        sqlx::query(
            "INSERT OR REPLACE INTO unscan_records (id, block_height, tx_id, reason, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.block_height as i64)
        .bind(&record.tx_id)
        .bind(&record.reason)
        .bind(record.updated_at)
        .execute(&mut conn)
        .await
        .map_err(storage_err)?;

        debug!(
            height = record.block_height,
            tx = record.tx_id.as_deref().unwrap_or("<block>"),
            "unscan record saved"
        );
        Ok(())
    }

    async fn unscan_records(&self, height: u64) -> Result<Vec<UnscanRecord>, ScanError> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query(
            "SELECT id, block_height, tx_id, reason, updated_at
             FROM unscan_records WHERE block_height = ? ORDER BY id",
        )
        .bind(height as i64)
        .fetch_all(&mut conn)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn delete_unscan_records(&self, height: u64) -> Result<(), ScanError> {
        let mut conn = self.connect().await?;
        sqlx::query("DELETE FROM unscan_records WHERE block_height = ?")
            .bind(height as i64)
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn all_unscan_records(&self) -> Result<Vec<UnscanRecord>, ScanError> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query(
            "SELECT id, block_height, tx_id, reason, updated_at
             FROM unscan_records ORDER BY block_height, id",
        )
        .fetch_all(&mut conn)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn prune_unscan_records(&self, reason_prefix: &str) -> Result<(), ScanError> {
        let mut conn = self.connect().await?;
        sqlx::query("DELETE FROM unscan_records WHERE substr(reason, 1, length(?)) = ?")
            .bind(reason_prefix)
            .bind(reason_prefix)
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_store() -> (TempDir, SqliteScanStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.db");
        let store = SqliteScanStore::open(path.to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    fn block(height: u64, hash: &str, prev: &str, tx_ids: &[&str]) -> BlockSummary {
        BlockSummary {
            height,
            hash: hash.into(),
            previous_hash: prev.into(),
            timestamp: (height * 600) as i64,
            tx_ids: tx_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    // ── Cursor ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cursor_defaults_to_unset() {
        let (_dir, store) = temp_store().await;
        assert!(store.cursor().await.unwrap().is_unset());
    }

    #[tokio::test]
    async fn cursor_roundtrip_and_overwrite() {
        let (_dir, store) = temp_store().await;

        store
            .set_cursor(&ScanCursor::new(100, "0xold"))
            .await
            .unwrap();
        store
            .set_cursor(&ScanCursor::new(200, "0xnew"))
            .await
            .unwrap();

        let cursor = store.cursor().await.unwrap();
        assert_eq!(cursor.height, 200);
        assert_eq!(cursor.hash, "0xnew");
    }

    // ── Block cache ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn block_roundtrip() {
        let (_dir, store) = temp_store().await;
        let b = block(50, "0xaaa", "0x999", &["t1", "t2"]);
        store.save_block(&b).await.unwrap();

        let loaded = store.block(50).await.unwrap().unwrap();
        assert_eq!(loaded, b);
        assert!(store.block(51).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forked_block_replaces_height() {
        let (_dir, store) = temp_store().await;
        store
            .save_block(&block(50, "0xold", "0x49", &["t1"]))
            .await
            .unwrap();
        store
            .save_block(&block(50, "0xnew", "0x49", &["t9"]))
            .await
            .unwrap();

        let loaded = store.block(50).await.unwrap().unwrap();
        assert_eq!(loaded.hash, "0xnew");
        assert_eq!(loaded.tx_ids, vec!["t9"]);
    }

    // ── Unscan records ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unscan_save_is_idempotent() {
        let (_dir, store) = temp_store().await;
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
        assert_eq!(records[0].reason, "timeout again");
    }

    #[tokio::test]
    async fn delete_by_height() {
        let (_dir, store) = temp_store().await;
        store
            .save_unscan_record(&UnscanRecord::block(90, "fetch failed"))
            .await
            .unwrap();
        store
            .save_unscan_record(&UnscanRecord::tx(90, "t1", "timeout"))
            .await
            .unwrap();
        store
            .save_unscan_record(&UnscanRecord::tx(91, "t2", "timeout"))
            .await
            .unwrap();

        store.delete_unscan_records(90).await.unwrap();

        let remaining = store.all_unscan_records().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].block_height, 91);
    }

    #[tokio::test]
    async fn prune_by_reason_prefix() {
        let (_dir, store) = temp_store().await;
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
        let (_dir, store) = temp_store().await;
        store
            .save_unscan_record(&UnscanRecord::tx(95, "t5", "x"))
            .await
            .unwrap();
        store
            .save_unscan_record(&UnscanRecord::block(90, "x"))
            .await
            .unwrap();

        let records = store.all_unscan_records().await.unwrap();
        assert_eq!(records[0].block_height, 90);
        assert!(records[0].tx_id.is_none());
        assert_eq!(records[1].block_height, 95);
    }

    #[tokio::test]
    async fn reopen_preserves_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteScanStore::open(path).await.unwrap();
            store
                .set_cursor(&ScanCursor::new(123, "0xabc"))
                .await
                .unwrap();
        }

        let store = SqliteScanStore::open(path).await.unwrap();
        let cursor = store.cursor().await.unwrap();
        assert_eq!(cursor.height, 123);
        assert_eq!(cursor.hash, "0xabc");
    }
}
