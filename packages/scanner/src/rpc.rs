//! Ledger RPC Module
//!
//! Connects to the node over HTTP, WebSocket or an IPC socket and interprets
//! the block and receipt responses the scanner needs. Wire payloads are kept
//! loosely typed so one malformed transaction or log is skipped on its own
//! instead of failing the whole block.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::{BoxTransport, RpcError, TransportError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::types::{BlockHeight, RawTransaction, ReceiptLog, TransactionReceipt};

/// Default endpoint when none is configured
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8545";

/// Maximum number of connection attempts before giving up at startup
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay between connection attempts
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay between connection attempts
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Per-request timeout in milliseconds
pub const REQUEST_TIMEOUT_MS: u64 = 15000;

/// Errors returned by the ledger client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Malformed RPC payload: {0}")]
    Decode(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),

    /// The node answered with a JSON-RPC error object
    #[error("RPC request rejected: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Transient failures are retried by re-polling the same range
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport(_) | LedgerError::ConnectionFailed(_) => true,
            LedgerError::Rejected(msg) => is_retryable_message(msg),
            LedgerError::Decode(_) | LedgerError::MaxReconnectAttemptsExceeded(_) => false,
        }
    }
}

/// Whether a node error message describes a temporary condition
fn is_retryable_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    [
        "timeout",
        "timed out",
        "rate limit",
        "too many requests",
        "429",
        "502",
        "503",
        "504",
        "internal server error",
        "service unavailable",
        "temporarily",
        "try again",
        "header not found",
        "not yet indexed",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}

impl From<TransportError> for LedgerError {
    fn from(e: TransportError) -> Self {
        match e {
            RpcError::ErrorResp(payload) => LedgerError::Rejected(payload.to_string()),
            e if e.is_deser_error() => LedgerError::Decode(e.to_string()),
            e => LedgerError::Transport(e.to_string()),
        }
    }
}

/// Read access to the ledger
///
/// `Ok(None)` means the node answered and the data does not exist; `Err`
/// means the question could not be answered right now.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn current_height(&self) -> Result<BlockHeight, LedgerError>;

    async fn chain_id(&self) -> Result<u64, LedgerError>;

    /// Full transaction list of the block at `height`
    async fn get_block(&self, height: BlockHeight) -> Result<Option<Vec<RawTransaction>>, LedgerError>;

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>, LedgerError>;
}

#[async_trait]
impl<C: LedgerClient + ?Sized> LedgerClient for Arc<C> {
    async fn current_height(&self) -> Result<BlockHeight, LedgerError> {
        (**self).current_height().await
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        (**self).chain_id().await
    }

    async fn get_block(&self, height: BlockHeight) -> Result<Option<Vec<RawTransaction>>, LedgerError> {
        (**self).get_block(height).await
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>, LedgerError> {
        (**self).get_receipt(hash).await
    }
}

/// Configuration for the ledger connection
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// http(s)://, ws(s):// URL or IPC socket path
    pub endpoint: String,
    /// Maximum connection attempts at startup
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            timeout_ms: REQUEST_TIMEOUT_MS,
        }
    }
}

impl RpcConfig {
    /// Create a new config for the given endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }

    /// Endpoint with a leading `~` expanded for socket paths
    pub fn resolved_endpoint(&self) -> String {
        if is_network_endpoint(&self.endpoint) {
            self.endpoint.clone()
        } else {
            expand_path(&self.endpoint)
        }
    }
}

/// Whether the endpoint is a URL rather than a socket path
pub fn is_network_endpoint(endpoint: &str) -> bool {
    ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| endpoint.starts_with(scheme))
}

/// Check if an IPC socket exists at the given path
pub fn socket_exists(path: &str) -> bool {
    Path::new(&expand_path(path)).exists()
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// Ledger client backed by an alloy provider
#[derive(Clone)]
pub struct AlloyLedgerClient {
    provider: RootProvider<BoxTransport>,
    request_timeout: Duration,
}

impl AlloyLedgerClient {
    /// Connect with exponential backoff
    ///
    /// Each attempt opens the transport and asks for the chain id, so an
    /// unreachable node fails here rather than in the scan loop.
    pub async fn connect(config: &RpcConfig) -> Result<Self, LedgerError> {
        let mut attempt = 0;
        loop {
            match Self::try_connect(config).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    attempt += 1;
                    if attempt >= config.max_reconnect_attempts {
                        error!("Connection attempt {} failed: {}", attempt, e);
                        return Err(LedgerError::MaxReconnectAttemptsExceeded(
                            config.max_reconnect_attempts,
                        ));
                    }
                    let delay = config.backoff_delay(attempt - 1);
                    warn!(
                        "Connection attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, config.max_reconnect_attempts, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn try_connect(config: &RpcConfig) -> Result<Self, LedgerError> {
        let endpoint = config.resolved_endpoint();
        if !is_network_endpoint(&endpoint) && !Path::new(&endpoint).exists() {
            return Err(LedgerError::ConnectionFailed(format!(
                "IPC socket not found at path: {}",
                endpoint
            )));
        }

        info!("Connecting to ledger at {}", endpoint);
        let provider = ProviderBuilder::new()
            .on_builtin(&endpoint)
            .await
            .map_err(|e| LedgerError::ConnectionFailed(e.to_string()))?;

        let client = Self {
            provider,
            request_timeout: Duration::from_millis(config.timeout_ms),
        };
        let chain_id = client.chain_id().await?;
        info!(chain_id, "Connected to ledger");
        Ok(client)
    }

    async fn bounded<T, F>(&self, method: &str, request: F) -> Result<T, LedgerError>
    where
        F: std::future::Future<Output = Result<T, TransportError>>,
    {
        match timeout(self.request_timeout, request).await {
            Ok(result) => result.map_err(LedgerError::from),
            Err(_) => Err(LedgerError::Transport(format!(
                "{} timed out after {:?}",
                method, self.request_timeout
            ))),
        }
    }
}

#[async_trait]
impl LedgerClient for AlloyLedgerClient {
    async fn current_height(&self) -> Result<BlockHeight, LedgerError> {
        self.bounded("eth_blockNumber", async { self.provider.get_block_number().await })
            .await
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.bounded("eth_chainId", async { self.provider.get_chain_id().await })
            .await
    }

    async fn get_block(&self, height: BlockHeight) -> Result<Option<Vec<RawTransaction>>, LedgerError> {
        let params = (format!("{:#x}", height), true);
        let block: Option<WireBlock> = self
            .bounded("eth_getBlockByNumber", async {
                self.provider
                    .raw_request("eth_getBlockByNumber".into(), params)
                    .await
            })
            .await?;
        Ok(block.map(|block| block.into_transactions(height)))
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>, LedgerError> {
        let receipt: Option<WireReceipt> = self
            .bounded("eth_getTransactionReceipt", async {
                self.provider
                    .raw_request("eth_getTransactionReceipt".into(), (hash,))
                    .await
            })
            .await?;
        receipt.map(|receipt| receipt.into_receipt(hash)).transpose()
    }
}

/// `eth_getBlockByNumber` response with full transactions
#[derive(Debug, Clone, Deserialize)]
pub struct WireBlock {
    #[serde(default)]
    pub transactions: Vec<Value>,
}

impl WireBlock {
    /// Convert every well-formed transaction, skipping the rest
    pub fn into_transactions(self, height: BlockHeight) -> Vec<RawTransaction> {
        self.transactions
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| {
                match serde_json::from_value::<WireTransaction>(value)
                    .map_err(|e| LedgerError::Decode(e.to_string()))
                    .and_then(RawTransaction::try_from)
                {
                    Ok(tx) => Some(tx),
                    Err(e) => {
                        warn!(block = height, index, error = %e, "Skipping malformed transaction");
                        None
                    }
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    #[serde(alias = "data")]
    pub input: Option<String>,
}

impl TryFrom<WireTransaction> for RawTransaction {
    type Error = LedgerError;

    fn try_from(wire: WireTransaction) -> Result<Self, Self::Error> {
        let hash: TxHash = wire
            .hash
            .parse()
            .map_err(|_| LedgerError::Decode(format!("bad transaction hash {:?}", wire.hash)))?;
        let from: Address = wire
            .from
            .parse()
            .map_err(|_| LedgerError::Decode(format!("bad sender {:?} in {}", wire.from, hash)))?;

        // A garbled recipient or calldata can never match the filter, so it
        // degrades to "no recipient" / "no input" instead of dropping the tx.
        let to = wire.to.as_deref().and_then(|to| match to.parse::<Address>() {
            Ok(address) => Some(address),
            Err(_) => {
                debug!(tx = %hash, to, "Unparseable recipient");
                None
            }
        });
        let input = wire
            .input
            .as_deref()
            .and_then(|input| hex_to_bytes(input).ok())
            .unwrap_or_default();

        Ok(RawTransaction { hash, from, to, input })
    }
}

/// `eth_getTransactionReceipt` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReceipt {
    pub transaction_hash: Option<String>,
    pub gas_used: Option<String>,
    #[serde(default)]
    pub logs: Vec<Value>,
}

impl WireReceipt {
    /// Convert the receipt, skipping logs that do not parse
    pub fn into_receipt(self, requested: TxHash) -> Result<TransactionReceipt, LedgerError> {
        let transaction_hash = match self.transaction_hash.as_deref() {
            Some(hash) => hash
                .parse()
                .map_err(|_| LedgerError::Decode(format!("bad receipt hash {:?}", hash)))?,
            None => requested,
        };
        let gas_used = match self.gas_used.as_deref() {
            Some(gas) => gas
                .parse::<U256>()
                .map_err(|e| LedgerError::Decode(format!("bad gasUsed {:?}: {}", gas, e)))?,
            None => U256::ZERO,
        };

        let logs = self
            .logs
            .into_iter()
            .enumerate()
            .filter_map(|(position, value)| {
                match serde_json::from_value::<WireLog>(value)
                    .map_err(|e| LedgerError::Decode(e.to_string()))
                    .and_then(ReceiptLog::try_from)
                {
                    Ok(log) => Some(log),
                    Err(e) => {
                        warn!(tx = %transaction_hash, log_index = position, error = %e, "Skipping malformed log");
                        None
                    }
                }
            })
            .collect();

        Ok(TransactionReceipt {
            transaction_hash,
            gas_used,
            logs,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    pub log_index: Option<String>,
}

impl TryFrom<WireLog> for ReceiptLog {
    type Error = LedgerError;

    fn try_from(wire: WireLog) -> Result<Self, Self::Error> {
        let emitting_address: Address = wire
            .address
            .parse()
            .map_err(|_| LedgerError::Decode(format!("bad log address {:?}", wire.address)))?;
        let topics = wire
            .topics
            .iter()
            .map(|topic| {
                topic
                    .parse::<B256>()
                    .map_err(|_| LedgerError::Decode(format!("bad topic {:?}", topic)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let data = hex_to_bytes(&wire.data)?;
        let log_index = wire.log_index.as_deref().and_then(parse_hex_u64);

        Ok(ReceiptLog {
            emitting_address,
            topics,
            data,
            log_index,
        })
    }
}

/// Parse a hex string to bytes (with or without 0x prefix)
pub fn hex_to_bytes(hex_str: &str) -> Result<Bytes, LedgerError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str)
        .map(Bytes::from)
        .map_err(|e| LedgerError::Decode(e.to_string()))
}

/// Parse a hex quantity (with or without 0x prefix)
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use alloy::rpc::json_rpc::ErrorPayload;
    use serde_json::json;

    // ==================== RpcConfig tests ====================

    #[test]
    fn test_rpc_config_default() {
        let config = RpcConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.max_reconnect_attempts, MAX_RECONNECT_ATTEMPTS);
        assert_eq!(config.initial_backoff_ms, INITIAL_BACKOFF_MS);
        assert_eq!(config.max_backoff_ms, MAX_BACKOFF_MS);
        assert_eq!(config.timeout_ms, REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn test_rpc_config_backoff_delay() {
        let config = RpcConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_rpc_config_backoff_delay_caps_at_max() {
        let config = RpcConfig {
            max_backoff_ms: 1000,
            initial_backoff_ms: 100,
            ..Default::default()
        };
        assert_eq!(config.backoff_delay(10), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(20), Duration::from_millis(1000));
    }

    #[test]
    fn test_resolved_endpoint_keeps_urls() {
        let config = RpcConfig::with_endpoint("https://eth.example.org/v1/key");
        assert_eq!(config.resolved_endpoint(), "https://eth.example.org/v1/key");
    }

    #[test]
    fn test_resolved_endpoint_expands_socket_path() {
        let config = RpcConfig::with_endpoint("~/.foundry/anvil.ipc");
        let resolved = config.resolved_endpoint();
        assert!(!resolved.starts_with("~/"));
        assert!(resolved.ends_with(".foundry/anvil.ipc"));
    }

    // ==================== expand_path tests ====================

    #[test]
    fn test_expand_path_without_tilde() {
        assert_eq!(expand_path("/tmp/test.ipc"), "/tmp/test.ipc");
    }

    #[test]
    fn test_expand_path_tilde_in_middle() {
        assert_eq!(expand_path("/some/~path/test.ipc"), "/some/~path/test.ipc");
    }

    #[test]
    fn test_socket_exists_for_missing_path() {
        assert!(!socket_exists("/definitely/not/a/real/socket.ipc"));
    }

    // ==================== error classification ====================

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(LedgerError::Transport("connection reset".into()).is_retryable());
        assert!(LedgerError::ConnectionFailed("refused".into()).is_retryable());
        assert!(!LedgerError::Decode("bad".into()).is_retryable());
        assert!(!LedgerError::MaxReconnectAttemptsExceeded(3).is_retryable());
    }

    #[test]
    fn test_error_responses_are_classified_by_message() {
        let rejected = |code: i64, message: &'static str| {
            LedgerError::from(TransportError::ErrorResp(ErrorPayload {
                code,
                message: message.into(),
                data: None,
            }))
        };

        let permanent = rejected(-32602, "invalid argument 0: hex number > 64 bits");
        assert!(matches!(permanent, LedgerError::Rejected(_)));
        assert!(!permanent.is_retryable());

        assert!(rejected(-32005, "Too Many Requests").is_retryable());
        assert!(rejected(-32000, "header not found").is_retryable());
    }

    // ==================== wire conversion tests ====================

    #[test]
    fn test_block_conversion_skips_malformed_transactions() {
        let block: WireBlock = serde_json::from_value(json!({
            "number": "0x3e5",
            "transactions": [
                {
                    "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
                    "from": "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266",
                    "to": "0x1111111111111111111111111111111111111111",
                    "input": "0x6a76120200"
                },
                { "hash": "not-a-hash", "from": "0x00" },
                {
                    "hash": "0x2222222222222222222222222222222222222222222222222222222222222222",
                    "from": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
                    "to": null,
                    "input": "0x6080"
                }
            ]
        }))
        .unwrap();

        let txs = block.into_transactions(997);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].from, address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
        assert_eq!(txs[0].to, Some(address!("1111111111111111111111111111111111111111")));
        assert_eq!(txs[0].input.as_ref(), &[0x6a, 0x76, 0x12, 0x02, 0x00]);
        assert_eq!(txs[1].to, None);
    }

    #[test]
    fn test_transaction_with_garbled_input_keeps_empty_input() {
        let wire = WireTransaction {
            hash: format!("{:#x}", TxHash::repeat_byte(0x01)),
            from: format!("{:#x}", Address::repeat_byte(0x02)),
            to: Some("0xnot-an-address".to_string()),
            input: Some("0xzz".to_string()),
        };
        let tx = RawTransaction::try_from(wire).unwrap();
        assert_eq!(tx.to, None);
        assert!(tx.input.is_empty());
    }

    #[test]
    fn test_transaction_accepts_data_alias() {
        let wire: WireTransaction = serde_json::from_value(json!({
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
            "to": "0x1111111111111111111111111111111111111111",
            "data": "0x6a761202"
        }))
        .unwrap();
        let tx = RawTransaction::try_from(wire).unwrap();
        assert_eq!(tx.input.as_ref(), &[0x6a, 0x76, 0x12, 0x02]);
    }

    #[test]
    fn test_receipt_conversion_skips_malformed_logs() {
        let receipt: WireReceipt = serde_json::from_value(json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "gasUsed": "0x5208",
            "logs": [
                {
                    "address": "0x2222222222222222222222222222222222222222",
                    "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                    "data": "0x0de0b6b3a7640000",
                    "logIndex": "0x4"
                },
                {
                    "address": "0x2222222222222222222222222222222222222222",
                    "topics": ["0xddf252ad"],
                    "data": "0x00"
                },
                {
                    "address": "0x2222222222222222222222222222222222222222",
                    "topics": [],
                    "data": "0xnothex"
                }
            ]
        }))
        .unwrap();

        let receipt = receipt.into_receipt(TxHash::ZERO).unwrap();
        assert_eq!(receipt.transaction_hash, TxHash::repeat_byte(0x11));
        assert_eq!(receipt.gas_used, U256::from(21_000u64));
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].log_index, Some(4));
        assert_eq!(receipt.logs[0].data.len(), 8);
    }

    #[test]
    fn test_receipt_without_hash_uses_requested_hash() {
        let receipt = WireReceipt {
            transaction_hash: None,
            gas_used: None,
            logs: vec![],
        };
        let requested = TxHash::repeat_byte(0x77);
        let receipt = receipt.into_receipt(requested).unwrap();
        assert_eq!(receipt.transaction_hash, requested);
        assert_eq!(receipt.gas_used, U256::ZERO);
    }

    // ==================== hex helpers ====================

    #[test]
    fn test_hex_to_bytes_with_and_without_prefix() {
        assert_eq!(hex_to_bytes("0x6a761202").unwrap().as_ref(), &[0x6a, 0x76, 0x12, 0x02]);
        assert_eq!(hex_to_bytes("6a761202").unwrap().as_ref(), &[0x6a, 0x76, 0x12, 0x02]);
        assert!(hex_to_bytes("").unwrap().is_empty());
        assert!(hex_to_bytes("0xGGGG").is_err());
    }

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x3e8"), Some(1000));
        assert_eq!(parse_hex_u64("ff"), Some(255));
        assert_eq!(parse_hex_u64("0xzz"), None);
    }
}
