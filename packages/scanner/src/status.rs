//! Read-only health snapshot for external checks.

use std::sync::Arc;

use alloy::primitives::Address;
use serde::Serialize;
use tokio::sync::watch;

use crate::notifier::format_address;
use crate::rpc::LedgerClient;
use crate::types::BlockHeight;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
    pub connected: bool,
    /// `None` while the node is unreachable
    pub chain_id: Option<u64>,
    /// `None` until the first height has been scanned
    pub last_processed_block: Option<BlockHeight>,
    pub rewards_manager_address: String,
    pub slvlusd_address: String,
}

/// Cloneable view of a running scanner
pub struct StatusHandle<C> {
    client: Arc<C>,
    last_processed: watch::Receiver<Option<BlockHeight>>,
    rewards_manager: Address,
    slvlusd: Address,
}

impl<C> Clone for StatusHandle<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            last_processed: self.last_processed.clone(),
            rewards_manager: self.rewards_manager,
            slvlusd: self.slvlusd,
        }
    }
}

impl<C: LedgerClient> StatusHandle<C> {
    pub(crate) fn new(
        client: Arc<C>,
        last_processed: watch::Receiver<Option<BlockHeight>>,
        rewards_manager: Address,
        slvlusd: Address,
    ) -> Self {
        Self {
            client,
            last_processed,
            rewards_manager,
            slvlusd,
        }
    }

    pub fn last_processed_block(&self) -> Option<BlockHeight> {
        *self.last_processed.borrow()
    }

    /// Query the node and report the scanner's progress
    pub async fn snapshot(&self) -> ScanStatus {
        let chain_id = match self.client.chain_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Status query failed");
                None
            }
        };
        ScanStatus {
            connected: chain_id.is_some(),
            chain_id,
            last_processed_block: self.last_processed_block(),
            rewards_manager_address: format_address(self.rewards_manager),
            slvlusd_address: format_address(self.slvlusd),
        }
    }
}
