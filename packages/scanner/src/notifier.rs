//! Distribution Notifier
//!
//! Delivers distribution records to the downstream chat bot. Records are
//! formatted as JSON and published to a Redis pub/sub channel; the bot owns
//! rendering and its own retry policy.

use alloy::primitives::{b256, Address, U256};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::emitter::DistributionStream;
use crate::types::{ClassifiedEvent, DistributionRecord, TransactionType};

/// Default Redis channel for distribution notifications
pub const DEFAULT_CHANNEL: &str = "yield_distributions";

/// Errors that can occur during publishing
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sink for distribution records
///
/// `deliver` is called at most once per record. A `false` return is logged
/// by the caller and never retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, record: &DistributionRecord) -> bool;
}

/// One decoded event inside a [`DistributionMessage`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// "Transfer" or "Rewarded"
    #[serde(rename = "type")]
    pub kind: String,
    /// Display amount (e.g., "1.50 USDC")
    pub amount: String,
    /// Raw integer amount as decimal string
    pub amount_raw: String,
    /// Emitting contract
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

impl From<&ClassifiedEvent> for EventMessage {
    fn from(event: &ClassifiedEvent) -> Self {
        EventMessage {
            kind: event.kind.to_string(),
            amount: event.display_amount.clone(),
            amount_raw: event.raw_amount.to_string(),
            address: format_address(event.emitting_address),
            asset: event.asset_address.map(format_address),
            recipient: event.recipient_address.map(format_address),
        }
    }
}

/// Distribution message format for Redis publication
///
/// This is the JSON structure the chat bot consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionMessage {
    /// Transaction hash with 0x prefix
    pub hash: String,
    pub block_number: u64,
    pub from: String,
    /// Empty string for contract creation
    pub to: String,
    /// "yield_distribution_call", "slvlusd_interaction" or "unknown"
    pub transaction_type: String,
    pub involves_rewards_manager: bool,
    pub involves_slvlusd: bool,
    /// Display amount of the last decoded event, or "Unknown"
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    /// Gas used as decimal string
    pub gas_used: String,
    pub events: Vec<EventMessage>,
    /// Unix timestamp in milliseconds when the record was published
    pub timestamp: u64,
}

impl DistributionMessage {
    pub fn from_record(record: &DistributionRecord) -> Self {
        DistributionMessage {
            hash: format!("{:#x}", record.transaction_hash),
            block_number: record.block_height,
            from: format_address(record.from_address),
            to: record.to_address.map(format_address).unwrap_or_default(),
            transaction_type: record.transaction_type.to_string(),
            involves_rewards_manager: record.involves_target_a,
            involves_slvlusd: record.involves_target_b,
            amount: record.total_display_amount.clone(),
            token_address: record.token_address.map(format_address),
            gas_used: record.gas_used.to_string(),
            events: record.events.iter().map(EventMessage::from).collect(),
            timestamp: current_timestamp_millis(),
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a message from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Format an address as lowercase hex string with 0x prefix
pub fn format_address(address: Address) -> String {
    format!("{:#x}", address)
}

/// Redis publisher for distribution messages
pub struct RedisNotifier {
    connection: MultiplexedConnection,
    channel: String,
}

impl RedisNotifier {
    /// Create a new notifier with a Redis connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `channel` - The pub/sub channel name to publish to
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Open a connection to `url` and publish on `channel`
    pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self, NotifyError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, channel))
    }

    /// Publish a pre-formatted message to Redis
    ///
    /// # Returns
    /// The number of subscribers that received the message
    pub async fn publish_message(&self, message: &DistributionMessage) -> Result<i64, NotifyError> {
        let json = message.to_json()?;
        let mut connection = self.connection.clone();
        let subscribers: i64 = connection.publish(&self.channel, &json).await?;
        Ok(subscribers)
    }

    /// Get the channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn deliver(&self, record: &DistributionRecord) -> bool {
        let message = DistributionMessage::from_record(record);
        match self.publish_message(&message).await {
            Ok(subscribers) => {
                if subscribers == 0 {
                    warn!(tx = %message.hash, channel = %self.channel, "Published with no subscribers");
                }
                true
            }
            Err(e) => {
                error!(tx = %message.hash, error = %e, "Failed to publish distribution");
                false
            }
        }
    }
}

/// Dry-run sink that only logs each record
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, record: &DistributionRecord) -> bool {
        match DistributionMessage::from_record(record).to_json() {
            Ok(json) => {
                info!(block = record.block_height, message = %json, "Distribution");
                true
            }
            Err(e) => {
                error!(tx = %record.transaction_hash, error = %e, "Failed to format distribution");
                false
            }
        }
    }
}

/// Fixed record used to check the notification path end to end
pub fn sample_record() -> DistributionRecord {
    DistributionRecord {
        transaction_hash: b256!("1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef"),
        block_height: 18_500_000,
        from_address: Address::ZERO,
        to_address: None,
        transaction_type: TransactionType::YieldDistributionCall,
        involves_target_a: true,
        involves_target_b: false,
        total_display_amount: "1,337.42 USDC".to_string(),
        token_address: None,
        events: Vec::new(),
        gas_used: U256::ZERO,
    }
}

/// Send [`sample_record`] through `notifier`
pub async fn send_test_notification<N: Notifier + ?Sized>(notifier: &N) -> bool {
    let record = sample_record();
    let delivered = notifier.deliver(&record).await;
    if delivered {
        info!(tx = %record.transaction_hash, "Test notification sent");
    } else {
        warn!(tx = %record.transaction_hash, "Test notification failed");
    }
    delivered
}

/// Delivery counts reported when the notifier task ends
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySummary {
    pub delivered: u64,
    pub failed: u64,
}

/// Consume the stream and deliver every record exactly once
///
/// Returns when the scanner side closes, `shutdown` flips to `true`, or the
/// shutdown sender is dropped.
pub async fn run_notifier<N: Notifier + ?Sized>(
    mut stream: DistributionStream,
    notifier: &N,
    mut shutdown: watch::Receiver<bool>,
) -> DeliverySummary {
    let mut summary = DeliverySummary::default();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let record = tokio::select! {
            record = stream.next() => record,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };
        let Some(record) = record else {
            break;
        };

        if notifier.deliver(&record).await {
            summary.delivered += 1;
            info!(tx = %record.transaction_hash, block = record.block_height, "Notification sent");
        } else {
            summary.failed += 1;
            warn!(tx = %record.transaction_hash, block = record.block_height, "Notification failed");
        }
    }
    stream.close();
    info!(delivered = summary.delivered, failed = summary.failed, "Notifier stopped");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter;
    use crate::types::{EventKind, TransactionType};
    use alloy::primitives::{address, TxHash, U256};

    fn record(block_height: u64) -> DistributionRecord {
        DistributionRecord {
            transaction_hash: TxHash::repeat_byte(0xab),
            block_height,
            from_address: address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            to_address: Some(address!("1111111111111111111111111111111111111111")),
            transaction_type: TransactionType::YieldDistributionCall,
            involves_target_a: true,
            involves_target_b: false,
            total_display_amount: "1.50 USDC".to_string(),
            token_address: Some(address!("1111111111111111111111111111111111111111")),
            events: vec![ClassifiedEvent {
                kind: EventKind::Rewarded,
                raw_amount: U256::from(1_500_000u64),
                display_amount: "1.50 USDC".to_string(),
                emitting_address: address!("1111111111111111111111111111111111111111"),
                asset_address: Some(address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")),
                recipient_address: None,
            }],
            gas_used: U256::from(21_000u64),
        }
    }

    // ==================== DistributionMessage tests ====================

    #[test]
    fn test_message_format_includes_all_fields() {
        let json = DistributionMessage::from_record(&record(18_500_000)).to_json().unwrap();

        for field in [
            "\"hash\"",
            "\"blockNumber\"",
            "\"from\"",
            "\"to\"",
            "\"transactionType\"",
            "\"involvesRewardsManager\"",
            "\"involvesSlvlusd\"",
            "\"amount\"",
            "\"tokenAddress\"",
            "\"gasUsed\"",
            "\"events\"",
            "\"timestamp\"",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
    }

    #[test]
    fn test_message_values() {
        let message = DistributionMessage::from_record(&record(18_500_000));
        assert_eq!(
            message.hash,
            "0xabababababababababababababababababababababababababababababababab"
        );
        assert_eq!(message.block_number, 18_500_000);
        assert_eq!(message.from, "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        assert_eq!(message.transaction_type, "yield_distribution_call");
        assert_eq!(message.amount, "1.50 USDC");
        assert_eq!(message.gas_used, "21000");
        assert!(message.timestamp > 0);
    }

    #[test]
    fn test_event_message_uses_type_key() {
        let message = DistributionMessage::from_record(&record(1));
        let json = serde_json::to_value(&message.events[0]).unwrap();
        assert_eq!(json["type"], "Rewarded");
        assert_eq!(json["amountRaw"], "1500000");
        assert_eq!(json["asset"], "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert!(json.get("recipient").is_none());
    }

    #[test]
    fn test_contract_creation_has_empty_to() {
        let mut record = record(1);
        record.to_address = None;
        assert_eq!(DistributionMessage::from_record(&record).to, "");
    }

    #[test]
    fn test_message_json_roundtrip() {
        let message = DistributionMessage::from_record(&record(7));
        let parsed = DistributionMessage::from_json(&message.to_json().unwrap()).unwrap();
        assert_eq!(parsed, message);
    }

    // ==================== run_notifier tests ====================

    #[tokio::test]
    async fn test_run_notifier_delivers_each_record_once() {
        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().times(3).returning(|_| true);

        let (emitter, stream) = emitter::channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let producer = tokio::spawn(async move {
            for height in 1..=3 {
                emitter.emit(record(height)).await.unwrap();
            }
        });

        let summary = run_notifier(stream, &notifier, shutdown_rx).await;
        producer.await.unwrap();
        assert_eq!(summary, DeliverySummary { delivered: 3, failed: 0 });
    }

    #[tokio::test]
    async fn test_run_notifier_does_not_retry_failures() {
        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().times(2).returning(|record| record.block_height != 1);

        let (emitter, stream) = emitter::channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            emitter.emit(record(1)).await.unwrap();
            emitter.emit(record(2)).await.unwrap();
        });

        let summary = run_notifier(stream, &notifier, shutdown_rx).await;
        assert_eq!(summary, DeliverySummary { delivered: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_run_notifier_stops_on_shutdown() {
        let notifier = MockNotifier::new();
        let (emitter, stream) = emitter::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move { run_notifier(stream, &notifier, shutdown_rx).await });
        shutdown_tx.send(true).unwrap();

        let summary = task.await.unwrap();
        assert_eq!(summary, DeliverySummary::default());
        assert!(emitter.is_closed());
    }

    #[tokio::test]
    async fn test_send_test_notification_uses_sample_record() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_deliver()
            .withf(|record| record.block_height == 18_500_000 && record.total_display_amount == "1,337.42 USDC")
            .times(1)
            .returning(|_| false);
        assert!(!send_test_notification(&notifier).await);
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.deliver(&record(1)).await);
    }
}
