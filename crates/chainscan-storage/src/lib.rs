//! chainscan-storage — durable storage backends for the chainscan engine.
//!
//! The in-memory store ships with `chainscan-core` (re-exported here as
//! [`MemoryScanStore`]); this crate adds persistence:
//! - [`sqlite`] — SQLite via `sqlx`, one file per asset (feature `sqlite`,
//!   on by default)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteScanStore;

pub use chainscan_core::store::MemoryScanStore;
