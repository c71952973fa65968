//! chainscan-core — the reorg-safe block scanning engine for multi-chain wallets.
//!
//! # Architecture
//!
//! ```text
//! BlockScanner (one per asset)
//!     ├── ChainAdapter       (per-chain RPC boundary, supplied by the caller)
//!     ├── ScanStore          (cursor + block cache + unscan records)
//!     ├── AddressLookup      (address → source key, owned by the wallet layer)
//!     ├── extraction pipeline (semaphore-bounded workers, ordered merge)
//!     ├── retry sweeper      (re-runs failed extractions, prunes dead ones)
//!     └── Notifier           (observer fan-out)
//! ```
//!
//! The engine is written once and parameterized by a [`ChainAdapter`]; each
//! asset supplies an adapter implementation and gets the same scan loop,
//! fork handling, and failure-recovery semantics.

pub mod adapter;
pub mod config;
pub mod cursor;
pub mod error;
pub mod observer;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod types;

mod extract;
mod sweeper;

pub use adapter::ChainAdapter;
pub use config::{ScannerConfig, ScannerState};
pub use cursor::ScanCursor;
pub use error::ScanError;
pub use observer::{Notifier, Observer};
pub use registry::{AddressLookup, AddressRegistry};
pub use scanner::BlockScanner;
pub use store::{MemoryScanStore, ScanStore, UnscanRecord};
pub use types::{BlockHeader, BlockSummary, ChainTransaction, TxExtractData, TxParticipant};
