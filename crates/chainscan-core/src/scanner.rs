//! The block scan loop: bootstrap, forward walk, fork rollback, and the
//! control surface exposed to the wallet layer.
//!
//! # One invocation
//!
//! [`BlockScanner::scan_once`] walks from the cursor to the chain head:
//! - an unset cursor bootstraps to `chain head - 1` (no genesis walk),
//! - each candidate block's parent hash is checked against the cursor; a
//!   mismatch rolls the cursor back one block past the divergence point and
//!   notifies observers with `fork = true`,
//! - otherwise the block's transactions run through the extraction pipeline,
//!   the block and cursor are persisted, and observers are notified.
//!
//! After the walk the scanner optionally re-scans the most recent heights
//! and runs the retry sweeper over recorded failures.
//!
//! Cancellation is cooperative: [`pause`](BlockScanner::pause) and
//! [`stop`](BlockScanner::stop) flip a flag polled at the top of every
//! iteration, and in-flight work for the current block finishes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::adapter::ChainAdapter;
use crate::config::{ScannerConfig, ScannerState};
use crate::cursor::ScanCursor;
use crate::error::ScanError;
use crate::extract;
use crate::observer::{Notifier, Observer};
use crate::registry::AddressLookup;
use crate::store::{ScanStore, UnscanRecord};
use crate::sweeper;
use crate::types::BlockHeader;

/// Generic scanning engine for one asset.
///
/// The scanner owns no chain knowledge: the adapter fetches, the lookup
/// resolves address ownership, the store persists progress, and observers
/// receive results. Multiple assets run independent scanners that share
/// nothing.
pub struct BlockScanner<A, S, L> {
    adapter: Arc<A>,
    store: Arc<S>,
    lookup: Arc<L>,
    notifier: Arc<Notifier>,
    config: ScannerConfig,
    /// Scanning-enabled flag, polled at the top of every loop iteration.
    scanning: AtomicBool,
    stop_requested: AtomicBool,
    /// Mirror of the cursor height for lock-free reads.
    scanned_height: AtomicU64,
    state: Mutex<ScannerState>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<A, S, L> BlockScanner<A, S, L>
where
    A: ChainAdapter + 'static,
    S: ScanStore + 'static,
    L: AddressLookup + 'static,
{
    /// Create a scanner. Scanning starts enabled; call
    /// [`run`](Self::run) to drive it on a schedule or
    /// [`scan_once`](Self::scan_once) to drive it manually.
    pub fn new(adapter: Arc<A>, store: Arc<S>, lookup: Arc<L>, config: ScannerConfig) -> Self {
        Self {
            adapter,
            store,
            lookup,
            notifier: Arc::new(Notifier::new()),
            config,
            scanning: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
            scanned_height: AtomicU64::new(0),
            state: Mutex::new(ScannerState::Idle),
            task: Mutex::new(None),
        }
    }

    /// Register an observer for block and extract-data notifications.
    pub fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.notifier.register(observer);
    }

    /// Current state of the scanner.
    pub fn state(&self) -> ScannerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ScannerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Height of the last fully scanned block (0 before the first scan).
    pub fn scanned_height(&self) -> u64 {
        self.scanned_height.load(Ordering::SeqCst)
    }

    // ─── Control surface ──────────────────────────────────────────────────────

    /// Spawn the background task that invokes [`scan_once`](Self::scan_once)
    /// every `poll_interval_ms`. Takes an `Arc` receiver; clone the handle
    /// first to keep using the control surface (`scanner.clone().run()`).
    /// Calling it again while running only re-enables scanning.
    pub fn run(self: Arc<Self>) {
        self.scanning.store(true, Ordering::SeqCst);
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        let scanner = Arc::clone(&self);
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        *task = Some(tokio::spawn(async move {
            info!(chain = %scanner.config.chain, "block scanner started");
            loop {
                if scanner.stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                if scanner.scanning.load(Ordering::SeqCst) {
                    if let Err(err) = scanner.scan_once().await {
                        error!(chain = %scanner.config.chain, %err, "scan invocation aborted");
                    }
                }
                tokio::time::sleep(interval).await;
            }
            scanner.set_state(ScannerState::Stopped);
            info!(chain = %scanner.config.chain, "block scanner stopped");
        }));
    }

    /// Disable scanning. The block in flight finishes; the loop exits at its
    /// next iteration.
    pub fn pause(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        info!(chain = %self.config.chain, "block scanner paused");
    }

    /// Re-enable scanning after [`pause`](Self::pause).
    pub fn restart(&self) {
        self.scanning.store(true, Ordering::SeqCst);
        info!(chain = %self.config.chain, "block scanner restarted");
    }

    /// Request the background task to terminate. Cooperative: in-flight work
    /// finishes first.
    pub fn stop(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Rewind the cursor so the next invocation scans forward from `height`.
    /// The anchor hash comes from the local cache, falling back to the chain.
    pub async fn set_rescan_height(&self, height: u64) -> Result<(), ScanError> {
        if height == 0 {
            return Err(ScanError::Other("rescan height must be at least 1".into()));
        }
        let anchor = height - 1;
        let hash = if anchor == 0 {
            // Rescanning from the first block anchors on the chain's block 0;
            // chains without one reject the request here.
            self.adapter.block_by_height(0).await?.hash
        } else {
            match self.store.block(anchor).await? {
                Some(block) => block.hash,
                None => self.adapter.block_by_height(anchor).await?.hash,
            }
        };
        let cursor = ScanCursor::new(anchor, hash);
        self.store.set_cursor(&cursor).await?;
        self.scanned_height.store(anchor, Ordering::SeqCst);
        info!(chain = %self.config.chain, height, "cursor rewound for rescan");
        Ok(())
    }

    /// Header of the scanner's current position: the cursor when set,
    /// otherwise the block just below the chain head (the bootstrap point).
    pub async fn current_block_header(&self) -> Result<BlockHeader, ScanError> {
        let cursor = self.store.cursor().await?;
        if cursor.is_unset() {
            let head = self.adapter.chain_head().await?;
            let start = head.saturating_sub(1);
            let block = self.adapter.block_by_height(start).await?;
            return Ok(block.header(false));
        }
        if let Some(block) = self.store.block(cursor.height).await? {
            return Ok(block.header(false));
        }
        // Cache miss (e.g. fresh store after a manual rewind): resolve the
        // cursor hash on-chain, degrading to a bare header if unreachable.
        match self.adapter.block_by_hash(&cursor.hash).await {
            Ok(block) => Ok(block.header(false)),
            Err(err) => {
                warn!(chain = %self.config.chain, %err, "cursor block not resolvable on-chain");
                Ok(BlockHeader {
                    height: cursor.height,
                    hash: cursor.hash,
                    previous_hash: String::new(),
                    timestamp: 0,
                    fork: false,
                })
            }
        }
    }

    /// Re-scan a single height outside the main loop: extract its
    /// transactions and re-deliver its header. The cursor is not touched.
    /// Returns [`ScanError::Extraction`] when some transactions still fail
    /// (they are recorded for the sweeper).
    pub async fn scan_block(&self, height: u64) -> Result<(), ScanError> {
        let block = match self.store.block(height).await? {
            Some(block) => block,
            None => self.adapter.block_by_height(height).await?,
        };

        let extraction = match extract::extract_block(
            &self.adapter,
            self.store.as_ref(),
            &self.lookup,
            self.notifier.as_ref(),
            &block,
            self.config.max_extracting_size,
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(err @ ScanError::Extraction { .. }) => Err(err),
            Err(err) => return Err(err),
        };

        self.store.save_block(&block).await?;
        self.deliver_block(&block.header(false)).await?;
        extraction
    }

    /// Re-attempt recorded extraction failures and prune permanent ones.
    pub async fn sweep_failures(&self) -> Result<(), ScanError> {
        sweeper::sweep(
            &self.adapter,
            self.store.as_ref(),
            &self.lookup,
            self.notifier.as_ref(),
            &self.config,
        )
        .await
    }

    // ─── Scan loop ────────────────────────────────────────────────────────────

    /// One scan invocation: walk from the cursor to the chain head, then
    /// re-scan recent heights and retry recorded failures.
    ///
    /// Adapter failures end the walk early (the next scheduled invocation
    /// retries); store failures abort with an error, leaving the cursor at
    /// the last fully processed block.
    pub async fn scan_once(&self) -> Result<(), ScanError> {
        let mut cursor = self.store.cursor().await?;

        if cursor.is_unset() {
            cursor = match self.bootstrap().await? {
                Some(cursor) => cursor,
                None => return Ok(()), // chain unavailable; retry next run
            };
        }
        self.scanned_height.store(cursor.height, Ordering::SeqCst);
        self.set_state(ScannerState::Scanning);

        while self.scanning.load(Ordering::SeqCst) {
            let head = match self.adapter.chain_head().await {
                Ok(head) => head,
                Err(err) => {
                    warn!(chain = %self.config.chain, %err, "chain head unavailable; ending invocation");
                    break;
                }
            };

            if cursor.height >= head {
                self.set_state(ScannerState::CaughtUp);
                debug!(chain = %self.config.chain, height = cursor.height, "caught up with chain head");
                break;
            }

            let candidate = cursor.next_height();
            let block = match self.adapter.block_by_height(candidate).await {
                Ok(block) => block,
                Err(err) => {
                    warn!(chain = %self.config.chain, height = candidate, %err, "block fetch failed; recorded for retry");
                    self.store
                        .save_unscan_record(&UnscanRecord::block(candidate, err.to_string()))
                        .await?;
                    continue; // cursor holds; the chain is eventually consistent
                }
            };

            // Fork check. An empty cursor hash (floor rollback) skips the
            // comparison for one block.
            if !cursor.hash.is_empty() && block.previous_hash != cursor.hash {
                if !self.rollback(&mut cursor, candidate).await? {
                    break;
                }
                continue;
            }

            // Normal advance. Partial extraction failure is recorded and does
            // not hold the cursor back; the sweeper repairs it out of band.
            match extract::extract_block(
                &self.adapter,
                self.store.as_ref(),
                &self.lookup,
                self.notifier.as_ref(),
                &block,
                self.config.max_extracting_size,
            )
            .await
            {
                Ok(()) => {}
                Err(ScanError::Extraction { failed, .. }) => {
                    warn!(chain = %self.config.chain, height = candidate, failed, "block extracted with failures; sweeper will retry");
                }
                Err(err) => return Err(err),
            }

            cursor.advance(block.height, block.hash.clone());
            self.store.save_block(&block).await?;
            self.store.set_cursor(&cursor).await?;
            self.scanned_height.store(cursor.height, Ordering::SeqCst);

            self.deliver_block(&block.header(false)).await?;
            info!(
                chain = %self.config.chain,
                height = block.height,
                txs = block.tx_ids.len(),
                "block scanned"
            );
        }

        self.rescan_recent(&cursor).await?;
        self.sweep_failures().await
    }

    /// Initialize an unset cursor just below the chain head, avoiding a full
    /// walk from genesis on first run. Returns `None` when the chain is
    /// unreachable (transient; retried next invocation).
    async fn bootstrap(&self) -> Result<Option<ScanCursor>, ScanError> {
        self.set_state(ScannerState::Bootstrapping);
        let head = match self.adapter.chain_head().await {
            Ok(head) => head,
            Err(err) => {
                warn!(chain = %self.config.chain, %err, "bootstrap postponed: chain head unavailable");
                return Ok(None);
            }
        };
        let start = head.saturating_sub(1);
        let block = match self.adapter.block_by_height(start).await {
            Ok(block) => block,
            Err(err) => {
                warn!(chain = %self.config.chain, height = start, %err, "bootstrap postponed: block unavailable");
                return Ok(None);
            }
        };
        let cursor = ScanCursor::new(start, block.hash);
        self.store.set_cursor(&cursor).await?;
        info!(chain = %self.config.chain, height = start, "scan cursor bootstrapped below chain head");
        Ok(Some(cursor))
    }

    /// Fork repair: step the cursor back one block past the divergence point,
    /// adopt the hash there, and tell observers to rewind. Returns `false`
    /// when the rollback target could not be resolved (ends the invocation;
    /// the cursor is left untouched and the fork is re-detected next run).
    async fn rollback(&self, cursor: &mut ScanCursor, candidate: u64) -> Result<bool, ScanError> {
        self.set_state(ScannerState::RollingBack);
        let clamped = candidate <= 3;
        let target = if clamped { 1 } else { candidate - 2 };
        warn!(
            chain = %self.config.chain,
            at = candidate,
            target,
            "fork detected; rolling back"
        );

        self.store.delete_unscan_records(target).await?;

        // Resolve the rolled-back block locally; fall back to the chain. At
        // the height-1 floor the local hash may itself be stale, so trust
        // the chain there and skip the next parent check.
        let cached = self.store.block(target).await?;
        let (rolled_back, adopt_hash) = match cached {
            Some(block) if !clamped => {
                let hash = block.hash.clone();
                (Some(block), hash)
            }
            cached => match self.adapter.block_by_height(target).await {
                Ok(block) => {
                    let hash = if clamped {
                        String::new()
                    } else {
                        block.hash.clone()
                    };
                    (Some(block), hash)
                }
                Err(err) => {
                    warn!(
                        chain = %self.config.chain,
                        height = target,
                        %err,
                        "rollback target unavailable; ending invocation"
                    );
                    return match cached {
                        // Keep the cached floor block for notification even
                        // if the chain is briefly unreachable.
                        Some(block) => {
                            self.finish_rollback(cursor, target, String::new(), Some(block))
                                .await?;
                            Ok(true)
                        }
                        None => Ok(false),
                    };
                }
            },
        };

        self.finish_rollback(cursor, target, adopt_hash, rolled_back)
            .await?;
        Ok(true)
    }

    async fn finish_rollback(
        &self,
        cursor: &mut ScanCursor,
        target: u64,
        hash: String,
        rolled_back: Option<crate::types::BlockSummary>,
    ) -> Result<(), ScanError> {
        cursor.height = target;
        cursor.hash = hash;
        self.store.set_cursor(cursor).await?;
        self.scanned_height.store(target, Ordering::SeqCst);

        if let Some(block) = rolled_back {
            self.deliver_block(&block.header(true)).await?;
        }
        self.set_state(ScannerState::Scanning);
        Ok(())
    }

    /// Defensive pass over the most recent heights after the main loop:
    /// re-extract and re-deliver them in case notifications were lost by a
    /// previous run.
    async fn rescan_recent(&self, cursor: &ScanCursor) -> Result<(), ScanError> {
        let count = self.config.rescan_last_blocks;
        if count == 0 || cursor.height == 0 {
            return Ok(());
        }
        let from = cursor.height.saturating_sub(count - 1).max(1);
        for height in from..=cursor.height {
            if !self.scanning.load(Ordering::SeqCst) {
                break;
            }
            match self.scan_block(height).await {
                Ok(()) => {}
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => {
                    warn!(chain = %self.config.chain, height, %err, "rescan pass failed");
                }
            }
        }
        Ok(())
    }

    /// Deliver a block header; observer failures become unscan records so
    /// the event can be retried instead of silently lost.
    async fn deliver_block(&self, header: &BlockHeader) -> Result<(), ScanError> {
        for err in self.notifier.notify_new_block(header).await {
            warn!(
                chain = %self.config.chain,
                height = header.height,
                %err,
                "observer rejected block notification"
            );
            self.store
                .save_unscan_record(&UnscanRecord::block(header.height, err.to_string()))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Rollback arithmetic is pure; the end-to-end behavior lives in
    // tests/scan_flow.rs against a scripted chain.
    #[test]
    fn rollback_target_clamps_at_floor() {
        let target = |candidate: u64| -> u64 {
            if candidate <= 3 {
                1
            } else {
                candidate - 2
            }
        };
        assert_eq!(target(51), 49);
        assert_eq!(target(4), 2);
        assert_eq!(target(3), 1);
        assert_eq!(target(2), 1);
    }
}
