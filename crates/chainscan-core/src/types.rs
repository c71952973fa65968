//! Shared types for the scanning pipeline.

use serde::{Deserialize, Serialize};

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// A block reduced to what the scan loop needs: chain linkage plus the ids
/// of the transactions to extract.
///
/// The adapter returns this shape and the store caches the same shape per
/// height, so a cache hit and a re-fetch are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: String,
    /// Parent block hash.
    pub previous_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
    /// Ids of the transactions contained in the block.
    pub tx_ids: Vec<String>,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.height == parent.height + 1 && self.previous_hash == parent.hash
    }

    /// Notification header for this block.
    pub fn header(&self, fork: bool) -> BlockHeader {
        BlockHeader {
            height: self.height,
            hash: self.hash.clone(),
            previous_hash: self.previous_hash.clone(),
            timestamp: self.timestamp,
            fork,
        }
    }
}

/// Payload pushed to observers for every scanned block.
///
/// `fork == true` rewinds: the block was the scanner's position after a
/// rollback, and consumers should reverse effects applied above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub timestamp: i64,
    pub fork: bool,
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// One side of a value movement within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxParticipant {
    /// Chain address.
    pub address: String,
    /// Amount as a decimal string; the engine never does arithmetic on it.
    pub amount: String,
    /// Position among the transaction's inputs or outputs.
    pub index: u32,
}

/// A chain transaction normalized by the adapter.
///
/// For account-model chains `inputs`/`outputs` each hold a single entry;
/// UTXO chains list every spent and created output. `payload_json` carries
/// the raw decoded form for consumers that need chain-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub tx_id: String,
    pub block_height: u64,
    pub block_hash: String,
    pub timestamp: i64,
    pub inputs: Vec<TxParticipant>,
    pub outputs: Vec<TxParticipant>,
    pub payload_json: serde_json::Value,
}

/// The wallet-relevant slice of one transaction attributed to a single
/// source key: the full transaction plus the inputs and outputs owned by
/// that key's addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxExtractData {
    pub transaction: ChainTransaction,
    pub tx_inputs: Vec<TxParticipant>,
    pub tx_outputs: Vec<TxParticipant>,
}

impl TxExtractData {
    /// Empty attribution for `transaction`; sides are filled in as the
    /// owning addresses are resolved.
    pub fn new(transaction: ChainTransaction) -> Self {
        Self {
            transaction,
            tx_inputs: vec![],
            tx_outputs: vec![],
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
