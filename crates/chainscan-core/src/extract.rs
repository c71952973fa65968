//! Extraction pipeline: bounded-concurrency workers per transaction, drained
//! by a single merge stage that applies results in arrival order.
//!
//! Workers may finish in any order; persistence and notification happen
//! strictly sequentially in the drain loop, so a block's results are fully
//! applied before the scan loop advances the cursor past it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use crate::adapter::ChainAdapter;
use crate::error::ScanError;
use crate::observer::Notifier;
use crate::registry::AddressLookup;
use crate::store::{ScanStore, UnscanRecord};
use crate::types::{BlockSummary, ChainTransaction, TxExtractData};

/// Outcome of extracting one transaction. Produced by a worker, applied
/// exactly once by the merge stage.
#[derive(Debug)]
pub(crate) struct ExtractResult {
    pub block_height: u64,
    pub tx_id: String,
    pub success: bool,
    pub reason: Option<String>,
    /// source key → data extracted for that key.
    pub extract_data: HashMap<String, TxExtractData>,
}

/// Run extraction for every transaction in `block` and apply the results.
///
/// Each transaction id acquires a semaphore permit (at most `max_in_flight`
/// workers against the adapter at once) and runs on its own task. Results
/// flow through a channel to this task, which alone persists failures and
/// notifies observers.
///
/// Per-transaction failures become unscan records and are summarized as
/// [`ScanError::Extraction`]; store failures propagate as
/// [`ScanError::Storage`] and abort the drain.
pub(crate) async fn extract_block<A, S, L>(
    adapter: &Arc<A>,
    store: &S,
    lookup: &Arc<L>,
    notifier: &Notifier,
    block: &BlockSummary,
    max_in_flight: usize,
) -> Result<(), ScanError>
where
    A: ChainAdapter + 'static,
    S: ScanStore,
    L: AddressLookup + 'static,
{
    let expected = block.tx_ids.len();
    if expected == 0 {
        return Ok(());
    }

    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ExtractResult>();

    for tx_id in block.tx_ids.clone() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ScanError::Other(format!("extraction semaphore closed: {e}")))?;
        let adapter = Arc::clone(adapter);
        let lookup = Arc::clone(lookup);
        let sender = result_tx.clone();
        let block_height = block.height;
        tokio::spawn(async move {
            let result =
                extract_transaction(adapter.as_ref(), lookup.as_ref(), block_height, &tx_id).await;
            let _ = sender.send(result);
            drop(permit);
        });
    }
    drop(result_tx);

    let mut applied = 0usize;
    let mut failed = 0usize;
    while let Some(result) = result_rx.recv().await {
        if apply_result(store, notifier, result).await? {
            failed += 1;
        }
        applied += 1;
        if applied == expected {
            break;
        }
    }

    if failed > 0 {
        return Err(ScanError::Extraction {
            block_height: block.height,
            failed,
        });
    }
    Ok(())
}

/// Fetch one transaction and attribute its participants. Never fails: fetch
/// errors are encoded as an unsuccessful result.
pub(crate) async fn extract_transaction<A, L>(
    adapter: &A,
    lookup: &L,
    block_height: u64,
    tx_id: &str,
) -> ExtractResult
where
    A: ChainAdapter + ?Sized,
    L: AddressLookup + ?Sized,
{
    match adapter.transaction(tx_id).await {
        Ok(tx) => ExtractResult {
            block_height,
            tx_id: tx_id.to_string(),
            success: true,
            reason: None,
            extract_data: attribute(&tx, lookup),
        },
        Err(err) => ExtractResult {
            block_height,
            tx_id: tx_id.to_string(),
            success: false,
            reason: Some(err.to_string()),
            extract_data: HashMap::new(),
        },
    }
}

/// Apply one result: persist the failure or deliver the extracted data.
/// Returns `true` if the transaction needs a retry.
pub(crate) async fn apply_result<S>(
    store: &S,
    notifier: &Notifier,
    result: ExtractResult,
) -> Result<bool, ScanError>
where
    S: ScanStore,
{
    if !result.success {
        let reason = result
            .reason
            .unwrap_or_else(|| "extraction failed".to_string());
        warn!(
            block = result.block_height,
            tx = %result.tx_id,
            %reason,
            "transaction extraction failed"
        );
        store
            .save_unscan_record(&UnscanRecord::tx(result.block_height, &result.tx_id, reason))
            .await?;
        return Ok(true);
    }

    let mut needs_retry = false;
    for (source_key, data) in &result.extract_data {
        for err in notifier.notify_extract_data(source_key, data).await {
            warn!(
                block = result.block_height,
                tx = %result.tx_id,
                source_key = %source_key,
                %err,
                "observer rejected extract data"
            );
            store
                .save_unscan_record(&UnscanRecord::tx(
                    result.block_height,
                    &result.tx_id,
                    err.to_string(),
                ))
                .await?;
            needs_retry = true;
        }
    }
    Ok(needs_retry)
}

/// Group a transaction's wallet-owned inputs and outputs by source key.
///
/// A key owning both sides of a transfer gets a single entry carrying both
/// its inputs and its outputs (a self-transfer is attributed once).
pub(crate) fn attribute<L>(tx: &ChainTransaction, lookup: &L) -> HashMap<String, TxExtractData>
where
    L: AddressLookup + ?Sized,
{
    let mut by_key: HashMap<String, TxExtractData> = HashMap::new();
    for input in &tx.inputs {
        if let Some(key) = lookup.lookup(&input.address) {
            by_key
                .entry(key)
                .or_insert_with(|| TxExtractData::new(tx.clone()))
                .tx_inputs
                .push(input.clone());
        }
    }
    for output in &tx.outputs {
        if let Some(key) = lookup.lookup(&output.address) {
            by_key
                .entry(key)
                .or_insert_with(|| TxExtractData::new(tx.clone()))
                .tx_outputs
                .push(output.clone());
        }
    }
    by_key
}
