//! YieldScope Scanner Library
//!
//! This crate watches a chain for yield distributions: it walks confirmed
//! blocks, filters for `yield_distribution` calls, classifies the receipt
//! logs and hands qualifying records to a notifier.

pub mod classifier;
pub mod config;
pub mod emitter;
pub mod filter;
pub mod notifier;
pub mod rpc;
pub mod scanner;
pub mod service;
pub mod signatures;
pub mod status;
pub mod types;

// Re-export commonly used types
pub use classifier::{classify, format_amount, Classification};
pub use config::{Config, ConfigError};
pub use emitter::{DistributionStream, Emitter, EmitterClosed};
pub use filter::is_candidate;
pub use notifier::{DistributionMessage, LogNotifier, Notifier, RedisNotifier};
pub use rpc::{AlloyLedgerClient, LedgerClient, LedgerError, RpcConfig};
pub use scanner::{BlockScanner, PollOutcome, ScanError, ScannerConfig};
pub use service::{ScannerService, ServiceError, ServiceReport, ShutdownHandle};
pub use status::{ScanStatus, StatusHandle};
pub use types::{DistributionRecord, TransactionType};
