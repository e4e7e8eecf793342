//! Block Scanner
//!
//! Confirmation-aware polling loop. Each cycle reads the chain head, walks
//! every newly confirmed height in order, filters its transactions, fetches
//! receipts for candidates, classifies them and hands qualifying records to
//! the emitter. The watermark moves only after the whole range is done; a
//! transport failure anywhere in the range leaves it untouched so the same
//! range is attempted again on the next cycle.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::classifier::classify;
use crate::emitter::{Emitter, EmitterClosed};
use crate::filter::is_candidate;
use crate::rpc::{LedgerClient, LedgerError};
use crate::status::StatusHandle;
use crate::types::{BlockHeight, DistributionRecord, RawTransaction, ScanWatermark};

/// Default number of trailing blocks left unscanned
pub const DEFAULT_CONFIRMATIONS: u64 = 3;

/// Default pause between poll cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The range could not be read; it is retried next cycle
    #[error("Ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    EmitterClosed(#[from] EmitterClosed),
}

/// Scanner settings
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Target A: receives `yield_distribution` calls
    pub rewards_manager: Address,
    /// Target B: the slvlUSD token
    pub slvlusd: Address,
    pub confirmations: u64,
    pub poll_interval: Duration,
    /// First height to scan; defaults to the current head
    pub start_block: Option<BlockHeight>,
}

impl ScannerConfig {
    pub fn new(rewards_manager: Address, slvlusd: Address) -> Self {
        Self {
            rewards_manager,
            slvlusd,
            confirmations: DEFAULT_CONFIRMATIONS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            start_block: None,
        }
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing newly confirmed since the last cycle
    UpToDate { head: BlockHeight },
    /// Heights `from..=to` were scanned and the watermark moved to `to`
    Advanced {
        from: BlockHeight,
        to: BlockHeight,
        distributions: usize,
    },
}

/// Confirmed heights from `next_height` on, if any
pub fn confirmed_range(
    head: BlockHeight,
    confirmations: u64,
    next_height: BlockHeight,
) -> Option<RangeInclusive<BlockHeight>> {
    let confirmed = head.checked_sub(confirmations)?;
    (confirmed >= next_height).then(|| next_height..=confirmed)
}

pub struct BlockScanner<C> {
    client: Arc<C>,
    config: ScannerConfig,
    watermark: ScanWatermark,
    /// Highest height whose records were already handed to the emitter.
    /// A retried range re-reads these heights without emitting twice.
    delivered_through: Option<BlockHeight>,
    last_processed: watch::Sender<Option<BlockHeight>>,
}

impl<C: LedgerClient> BlockScanner<C> {
    /// Create a scanner positioned just before `start_block`, or just before
    /// the current head when no start block is configured. History older than
    /// that is never scanned.
    pub async fn new(client: Arc<C>, config: ScannerConfig) -> Result<Self, LedgerError> {
        let start = match config.start_block {
            Some(start) => start,
            None => client.current_height().await?,
        };
        info!(start, "Starting blockchain monitoring");
        Ok(Self::from_watermark(client, config, ScanWatermark::before(start)))
    }

    /// Create a scanner with an explicit watermark
    pub fn with_watermark(client: Arc<C>, config: ScannerConfig, watermark: BlockHeight) -> Self {
        Self::from_watermark(client, config, ScanWatermark::new(watermark))
    }

    fn from_watermark(client: Arc<C>, config: ScannerConfig, watermark: ScanWatermark) -> Self {
        let (last_processed, _) = watch::channel(watermark.height());
        Self {
            client,
            config,
            watermark,
            delivered_through: watermark.height(),
            last_processed,
        }
    }

    /// Last fully scanned height; `None` until a scan from genesis covers block 0
    pub fn watermark(&self) -> Option<BlockHeight> {
        self.watermark.height()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Read-only status view that stays valid after the scanner is moved
    /// into its task
    pub fn status_handle(&self) -> StatusHandle<C> {
        StatusHandle::new(
            Arc::clone(&self.client),
            self.last_processed.subscribe(),
            self.config.rewards_manager,
            self.config.slvlusd,
        )
    }

    /// Run one Polling → Advancing pass
    pub async fn poll_once(&mut self, emitter: &Emitter) -> Result<PollOutcome, ScanError> {
        let head = self.client.current_height().await?;
        let Some(range) = confirmed_range(head, self.config.confirmations, self.watermark.next_height()) else {
            debug!(head, watermark = ?self.watermark(), "No newly confirmed blocks");
            return Ok(PollOutcome::UpToDate { head });
        };

        let (from, to) = (*range.start(), *range.end());
        debug!(range_start = from, range_end = to, head, "Scanning confirmed range");

        let mut distributions = 0;
        for height in range {
            let records = self.scan_height(height).await?;
            if self.delivered_through.is_some_and(|delivered| height <= delivered) {
                debug!(block = height, "Records already delivered, not re-emitting");
                continue;
            }
            distributions += records.len();
            for record in records {
                emitter.emit(record).await?;
            }
            self.delivered_through = Some(height);
        }

        self.watermark.advance_to(to);
        self.last_processed.send_replace(Some(to));
        info!(range_start = from, range_end = to, distributions, "Advanced watermark");

        Ok(PollOutcome::Advanced { from, to, distributions })
    }

    /// Scan a single height without touching the watermark
    ///
    /// Used for one-off block checks; nothing is emitted.
    pub async fn scan_block(&self, height: BlockHeight) -> Result<Vec<DistributionRecord>, LedgerError> {
        info!(block = height, "Checking single block");
        self.scan_height(height).await
    }

    /// Fetch, filter and classify one height
    ///
    /// Only transport failures are returned; missing or malformed data is
    /// logged and treated as no activity.
    async fn scan_height(&self, height: BlockHeight) -> Result<Vec<DistributionRecord>, LedgerError> {
        let transactions = match self.client.get_block(height).await {
            Ok(Some(transactions)) => transactions,
            Ok(None) => {
                warn!(block = height, "Block not found, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(block = height, error = %e, "Unusable block, treating as empty");
                return Ok(Vec::new());
            }
        };

        let candidates: Vec<&RawTransaction> = transactions
            .iter()
            .filter(|tx| is_candidate(tx, self.config.rewards_manager))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        for tx in &candidates {
            info!(block = height, tx = %tx.hash, "Found yield distribution call");
        }

        // Fetched concurrently, zipped back in block order.
        let receipts = join_all(candidates.iter().map(|tx| self.client.get_receipt(tx.hash))).await;

        let mut records = Vec::new();
        for (tx, receipt) in candidates.into_iter().zip(receipts) {
            let receipt = match receipt {
                Ok(Some(receipt)) => receipt,
                Ok(None) => {
                    warn!(block = height, tx = %tx.hash, "Receipt not found, skipping transaction");
                    continue;
                }
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(block = height, tx = %tx.hash, error = %e, "Unusable receipt, skipping transaction");
                    continue;
                }
            };

            let classification = classify(&receipt, self.config.rewards_manager, self.config.slvlusd);
            if !classification.is_distribution() {
                debug!(block = height, tx = %tx.hash, "Receipt touched no monitored contract");
                continue;
            }
            info!(
                block = height,
                tx = %tx.hash,
                kind = %classification.transaction_type,
                "Yield distribution detected"
            );
            records.push(classification.into_record(tx, height, &receipt));
        }
        Ok(records)
    }

    /// Poll until `shutdown` flips to `true` or the consumer goes away
    ///
    /// Ledger failures are logged and the same range is retried after the
    /// poll interval. Cancellation is observed at every network wait and
    /// during the sleep.
    pub async fn run(mut self, emitter: Emitter, mut shutdown: watch::Receiver<bool>) -> Result<(), ScanError> {
        info!(
            watermark = ?self.watermark(),
            confirmations = self.config.confirmations,
            poll_interval = ?self.config.poll_interval,
            "Block scanner running"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.poll_once(&emitter) => outcome,
                _ = shutdown.changed() => break,
            };
            match outcome {
                Ok(PollOutcome::UpToDate { .. }) | Ok(PollOutcome::Advanced { .. }) => {}
                Err(ScanError::Ledger(e)) => {
                    error!(
                        watermark = ?self.watermark(),
                        error = %e,
                        "Error in monitoring loop, retrying range next cycle"
                    );
                }
                Err(e @ ScanError::EmitterClosed(_)) => {
                    warn!("Distribution consumer stopped, stopping scanner");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => break,
                _ = emitter.closed() => {
                    warn!("Distribution consumer stopped, stopping scanner");
                    return Err(ScanError::EmitterClosed(EmitterClosed));
                }
            }
        }

        info!(watermark = ?self.watermark(), "Block scanner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== confirmed_range tests ====================

    #[test]
    fn test_range_with_confirmations() {
        // head 1000, 3 confirmations, watermark 995 -> 996..=997
        assert_eq!(confirmed_range(1000, 3, 996), Some(996..=997));
    }

    #[test]
    fn test_range_empty_when_nothing_confirmed() {
        assert_eq!(confirmed_range(1000, 3, 998), None);
        assert_eq!(confirmed_range(1000, 3, 1000), None);
        assert_eq!(confirmed_range(2, 3, 0), None);
    }

    #[test]
    fn test_range_with_zero_confirmations() {
        assert_eq!(confirmed_range(1000, 0, 1000), Some(1000..=1000));
    }

    #[test]
    fn test_range_single_block() {
        assert_eq!(confirmed_range(1001, 3, 998), Some(998..=998));
    }

    #[test]
    fn test_range_includes_genesis() {
        assert_eq!(confirmed_range(3, 3, 0), Some(0..=0));
        assert_eq!(confirmed_range(5, 0, 0), Some(0..=5));
    }

    #[test]
    fn test_scanner_config_defaults() {
        let config = ScannerConfig::new(Address::repeat_byte(1), Address::repeat_byte(2));
        assert_eq!(config.confirmations, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.start_block, None);
    }
}
