//! Retry sweeper: re-attempts extraction for recorded failures and prunes
//! the permanently unresolvable ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::adapter::ChainAdapter;
use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::extract;
use crate::observer::Notifier;
use crate::registry::AddressLookup;
use crate::store::{ScanStore, UnscanRecord};

/// One sweep: prune permanent failures, then group the remaining unscan
/// records by height and re-run extraction. A height's records are deleted
/// only when every retry for it succeeds.
pub(crate) async fn sweep<A, S, L>(
    adapter: &Arc<A>,
    store: &S,
    lookup: &Arc<L>,
    notifier: &Notifier,
    config: &ScannerConfig,
) -> Result<(), ScanError>
where
    A: ChainAdapter + 'static,
    S: ScanStore,
    L: AddressLookup + 'static,
{
    for prefix in &config.permanent_reason_prefixes {
        store.prune_unscan_records(prefix).await?;
    }

    let records = store.all_unscan_records().await?;
    if records.is_empty() {
        return Ok(());
    }

    let mut by_height: BTreeMap<u64, Vec<UnscanRecord>> = BTreeMap::new();
    for record in records {
        by_height.entry(record.block_height).or_default().push(record);
    }

    for (height, group) in by_height {
        let tx_ids: Vec<String> = group.iter().filter_map(|r| r.tx_id.clone()).collect();
        // A record without a tx id means the block itself failed; re-run the
        // whole block in that case.
        let whole_block = tx_ids.len() < group.len();

        let outcome = if whole_block {
            retry_block(adapter, store, lookup, notifier, height, config).await
        } else {
            retry_transactions(adapter, store, lookup, notifier, height, &tx_ids).await
        };

        match outcome {
            Ok(()) => {
                store.delete_unscan_records(height).await?;
                info!(chain = %config.chain, height, "unscan records resolved");
            }
            Err(err) if err.is_storage() => return Err(err),
            Err(err) => {
                debug!(chain = %config.chain, height, %err, "retry still failing; records kept");
            }
        }
    }
    Ok(())
}

/// Re-fetch the whole block, re-extract it, and re-deliver its header.
async fn retry_block<A, S, L>(
    adapter: &Arc<A>,
    store: &S,
    lookup: &Arc<L>,
    notifier: &Notifier,
    height: u64,
    config: &ScannerConfig,
) -> Result<(), ScanError>
where
    A: ChainAdapter + 'static,
    S: ScanStore,
    L: AddressLookup + 'static,
{
    let block = adapter.block_by_height(height).await?;
    extract::extract_block(
        adapter,
        store,
        lookup,
        notifier,
        &block,
        config.max_extracting_size,
    )
    .await?;
    store.save_block(&block).await?;

    let failures = notifier.notify_new_block(&block.header(false)).await;
    if let Some(err) = failures.into_iter().next() {
        return Err(ScanError::Notify {
            reason: err.to_string(),
        });
    }
    Ok(())
}

/// Re-fetch and re-apply the specific transactions recorded as failed.
async fn retry_transactions<A, S, L>(
    adapter: &Arc<A>,
    store: &S,
    lookup: &Arc<L>,
    notifier: &Notifier,
    height: u64,
    tx_ids: &[String],
) -> Result<(), ScanError>
where
    A: ChainAdapter + 'static,
    S: ScanStore,
    L: AddressLookup + 'static,
{
    let mut failed = 0usize;
    for tx_id in tx_ids {
        let result =
            extract::extract_transaction(adapter.as_ref(), lookup.as_ref(), height, tx_id).await;
        if extract::apply_result(store, notifier, result).await? {
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(ScanError::Extraction {
            block_height: height,
            failed,
        });
    }
    Ok(())
}
