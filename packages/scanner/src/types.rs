//! Core data model shared by the filter, classifier, scanner and emitter.

use std::fmt;

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use serde::{Deserialize, Serialize};

/// Height of a block on the ledger
pub type BlockHeight = u64;

/// Parse a textual address in any letter case into its canonical byte form
///
/// Comparison everywhere in the core happens on `Address` bytes, so two
/// spellings of the same address always compare equal.
pub fn normalize_address(text: &str) -> Option<Address> {
    let trimmed = text.trim();
    trimmed.strip_prefix("0X").unwrap_or(trimmed).parse().ok()
}

/// A block transaction as seen by the scanner during one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub hash: TxHash,
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub input: Bytes,
}

/// One log entry of a transaction receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    pub emitting_address: Address,
    /// `topics[0]` is the event selector when present
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Position of the log in the block, when the node reports it
    pub log_index: Option<u64>,
}

/// Execution result of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub gas_used: U256,
    pub logs: Vec<ReceiptLog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Transfer,
    Rewarded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Transfer => "Transfer",
            EventKind::Rewarded => "Rewarded",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded `Transfer` or `Rewarded` log. Only the classifier builds these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub kind: EventKind,
    pub raw_amount: U256,
    pub display_amount: String,
    pub emitting_address: Address,
    pub asset_address: Option<Address>,
    pub recipient_address: Option<Address>,
}

/// What a qualifying transaction did, derived from the contracts it touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Logs emitted by the rewards manager
    YieldDistributionCall,
    /// Logs emitted only by the slvlUSD contract
    SlvlusdInteraction,
    Unknown,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::YieldDistributionCall => "yield_distribution_call",
            TransactionType::SlvlusdInteraction => "slvlusd_interaction",
            TransactionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of output handed to the notifier, one per qualifying transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRecord {
    pub transaction_hash: TxHash,
    pub block_height: BlockHeight,
    pub from_address: Address,
    pub to_address: Option<Address>,
    pub transaction_type: TransactionType,
    /// Rewards manager emitted at least one log
    pub involves_target_a: bool,
    /// slvlUSD emitted at least one log
    pub involves_target_b: bool,
    pub total_display_amount: String,
    /// Emitting address of the last decoded event
    pub token_address: Option<Address>,
    pub events: Vec<ClassifiedEvent>,
    pub gas_used: U256,
}

/// Highest block height known to be fully scanned
///
/// Empty until the first height is scanned, so a scan starting at genesis
/// still covers block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScanWatermark {
    last_confirmed_height: Option<BlockHeight>,
}

impl ScanWatermark {
    pub fn new(last_confirmed_height: BlockHeight) -> Self {
        Self {
            last_confirmed_height: Some(last_confirmed_height),
        }
    }

    /// Watermark for a scan whose first height is `start`
    pub fn before(start: BlockHeight) -> Self {
        Self {
            last_confirmed_height: start.checked_sub(1),
        }
    }

    pub fn height(&self) -> Option<BlockHeight> {
        self.last_confirmed_height
    }

    /// First height not yet scanned
    pub fn next_height(&self) -> BlockHeight {
        self.last_confirmed_height.map_or(0, |height| height + 1)
    }

    /// Move forward to `height`; a lower height leaves the watermark as is.
    ///
    /// # Returns
    /// `true` if the watermark moved
    pub fn advance_to(&mut self, height: BlockHeight) -> bool {
        if self.last_confirmed_height.map_or(true, |current| height > current) {
            self.last_confirmed_height = Some(height);
            true
        } else {
            false
        }
    }
}
