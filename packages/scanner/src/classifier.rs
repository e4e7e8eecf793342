//! Log Classifier
//!
//! Decodes a transaction receipt's logs against the signature registry and
//! produces typed distribution events plus a transaction classification.
//! Pure: no I/O, and the same receipt always yields the same result.

use alloy::primitives::{address, Address, B256, U256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::signatures::EventSignature;
use crate::types::{
    BlockHeight, ClassifiedEvent, DistributionRecord, EventKind, RawTransaction, ReceiptLog,
    TransactionReceipt, TransactionType,
};

/// The one asset known to use 6 decimals (USDC on mainnet)
pub const SIX_DECIMAL_ASSET: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

/// Placeholder amount for a qualifying transaction without decoded events
pub const UNKNOWN_AMOUNT: &str = "Unknown";

const USDC_UNIT: u64 = 1_000_000;
const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Errors that can occur while decoding a single log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Log data is empty")]
    EmptyData,

    #[error("Log data of {0} bytes does not fit a uint256")]
    AmountOverflow(usize),
}

/// Result of classifying one receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub transaction_type: TransactionType,
    pub involves_target_a: bool,
    pub involves_target_b: bool,
    pub events: Vec<ClassifiedEvent>,
}

impl Classification {
    /// A receipt that touched neither target and decoded nothing is not a
    /// distribution; the scanner drops it.
    pub fn is_distribution(&self) -> bool {
        self.involves_target_a || self.involves_target_b || !self.events.is_empty()
    }

    /// Display amount of the last decoded event
    pub fn total_display_amount(&self) -> String {
        self.events
            .last()
            .map(|event| event.display_amount.clone())
            .unwrap_or_else(|| UNKNOWN_AMOUNT.to_string())
    }

    /// Emitting address of the last decoded event
    pub fn token_address(&self) -> Option<Address> {
        self.events.last().map(|event| event.emitting_address)
    }

    /// Build the output record for the transaction this classification came from
    pub fn into_record(
        self,
        tx: &RawTransaction,
        block_height: BlockHeight,
        receipt: &TransactionReceipt,
    ) -> DistributionRecord {
        DistributionRecord {
            transaction_hash: tx.hash,
            block_height,
            from_address: tx.from,
            to_address: tx.to,
            transaction_type: self.transaction_type,
            involves_target_a: self.involves_target_a,
            involves_target_b: self.involves_target_b,
            total_display_amount: self.total_display_amount(),
            token_address: self.token_address(),
            events: self.events,
            gas_used: receipt.gas_used,
        }
    }
}

/// Classify a receipt's logs
///
/// # Arguments
/// * `receipt` - The transaction receipt
/// * `target_a` - The rewards manager (administrative target)
/// * `target_b` - The slvlUSD contract (secondary target)
pub fn classify(receipt: &TransactionReceipt, target_a: Address, target_b: Address) -> Classification {
    let mut involves_target_a = false;
    let mut involves_target_b = false;
    let mut events = Vec::new();

    for (position, log) in receipt.logs.iter().enumerate() {
        let from_a = log.emitting_address == target_a;
        let from_b = log.emitting_address == target_b;
        if !from_a && !from_b {
            continue;
        }
        involves_target_a |= from_a;
        involves_target_b |= from_b;

        match decode_log(log) {
            Ok(Some(event)) => {
                info!(
                    tx = %receipt.transaction_hash,
                    kind = %event.kind,
                    amount = %event.display_amount,
                    "Decoded distribution event"
                );
                events.push(event);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    tx = %receipt.transaction_hash,
                    log_index = log.log_index.unwrap_or(position as u64),
                    error = %e,
                    "Skipping undecodable log"
                );
            }
        }
    }

    let transaction_type = if involves_target_a {
        TransactionType::YieldDistributionCall
    } else if involves_target_b {
        TransactionType::SlvlusdInteraction
    } else {
        TransactionType::Unknown
    };

    Classification {
        transaction_type,
        involves_target_a,
        involves_target_b,
        events,
    }
}

/// Decode a single log already known to come from a target contract
///
/// # Returns
/// `Ok(None)` for logs without a topic or with an unrelated selector
pub fn decode_log(log: &ReceiptLog) -> Result<Option<ClassifiedEvent>, ClassifyError> {
    let Some(signature) = log.topics.first().and_then(EventSignature::from_topic) else {
        return Ok(None);
    };

    match signature {
        EventSignature::Rewarded => {
            let asset_address = log.topics.get(1).map(address_from_topic);
            let recipient_address = log.topics.get(2).map(address_from_topic);
            let raw_amount = decode_amount(&log.data)?;
            debug!(?asset_address, ?recipient_address, %raw_amount, "Rewarded log");
            Ok(Some(ClassifiedEvent {
                kind: EventKind::Rewarded,
                raw_amount,
                display_amount: format_amount(raw_amount, asset_address),
                emitting_address: log.emitting_address,
                asset_address,
                recipient_address,
            }))
        }
        EventSignature::Transfer => {
            let raw_amount = decode_amount(&log.data)?;
            Ok(Some(ClassifiedEvent {
                kind: EventKind::Transfer,
                raw_amount,
                display_amount: format_amount(raw_amount, Some(log.emitting_address)),
                emitting_address: log.emitting_address,
                asset_address: None,
                recipient_address: None,
            }))
        }
    }
}

/// Low 20 bytes of a right-aligned address topic
pub fn address_from_topic(topic: &B256) -> Address {
    Address::from_word(*topic)
}

/// Decode a big-endian unsigned amount from log data
///
/// Leading zero bytes beyond the 32-byte word are tolerated.
pub fn decode_amount(data: &[u8]) -> Result<U256, ClassifyError> {
    if data.is_empty() {
        return Err(ClassifyError::EmptyData);
    }
    let significant = data.iter().position(|b| *b != 0).map_or(&[][..], |i| &data[i..]);
    if significant.len() > 32 {
        return Err(ClassifyError::AmountOverflow(data.len()));
    }
    Ok(U256::from_be_slice(significant))
}

/// Render an amount for display, keyed off the token it is denominated in
///
/// The 6-decimal asset renders with two decimals and a `USDC` suffix;
/// everything else is treated as an 18-decimal token.
pub fn format_amount(raw: U256, token: Option<Address>) -> String {
    match token {
        Some(token) if token == SIX_DECIMAL_ASSET => format!("{} USDC", format_usdc(raw)),
        _ => format!("{} tokens", format_whole_units(raw)),
    }
}

/// Two-decimal rendering with thousands separators, rounding half up
fn format_usdc(raw: U256) -> String {
    let (cents, remainder) = raw.div_rem(U256::from(USDC_UNIT / 100));
    // Half-up without adding first, so U256::MAX cannot wrap.
    let cents = cents + U256::from((remainder >= U256::from(USDC_UNIT / 200)) as u64);
    let whole = cents / U256::from(100u64);
    let fraction = cents % U256::from(100u64);
    format!("{}.{:0>2}", group_thousands(&whole.to_string()), fraction.to_string())
}

/// Exact 18-decimal rendering with trailing zeros trimmed
fn format_whole_units(raw: U256) -> String {
    let unit = U256::from(WEI_PER_TOKEN);
    let whole = raw / unit;
    let fraction = raw % unit;
    if fraction.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{:0>18}", fraction.to_string());
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}
