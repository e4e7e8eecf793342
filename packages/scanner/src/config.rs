//! Runtime configuration
//!
//! Read from environment variables, optionally seeded from a `.env` file.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use alloy::primitives::Address;
use thiserror::Error;

use crate::notifier::DEFAULT_CHANNEL;
use crate::rpc::RpcConfig;
use crate::scanner::{ScannerConfig, DEFAULT_CONFIRMATIONS, DEFAULT_POLL_INTERVAL};
use crate::types::{normalize_address, BlockHeight};

pub const RPC_URL: &str = "RPC_URL";
pub const REWARDS_MANAGER_ADDRESS: &str = "REWARDS_MANAGER_ADDRESS";
pub const SLVLUSD_ADDRESS: &str = "SLVLUSD_ADDRESS";
pub const CHAIN_ID: &str = "CHAIN_ID";
pub const BLOCK_CONFIRMATIONS: &str = "BLOCK_CONFIRMATIONS";
pub const POLL_INTERVAL: &str = "POLL_INTERVAL";
pub const START_BLOCK: &str = "START_BLOCK";
pub const REDIS_URL: &str = "REDIS_URL";
pub const REDIS_CHANNEL: &str = "REDIS_CHANNEL";

pub const DEFAULT_CHAIN_ID: u64 = 1;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to read env file: {0}")]
    EnvFile(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub rpc_url: String,
    pub rewards_manager: Address,
    pub slvlusd: Address,
    /// Chain the operator expects; a mismatch with the node is only logged
    pub chain_id: u64,
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub start_block: Option<BlockHeight>,
    pub redis_url: String,
    pub redis_channel: String,
}

impl Config {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an env file; keys missing there fall back to the process
    /// environment. The process environment itself is left untouched.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let vars = dotenvy::from_path_iter(path)
            .map_err(|e| ConfigError::EnvFile(e.to_string()))?
            .collect::<Result<HashMap<String, String>, _>>()
            .map_err(|e| ConfigError::EnvFile(e.to_string()))?;
        Self::from_lookup(|key| vars.get(key).cloned().or_else(|| env::var(key).ok()))
    }

    /// Build from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&'static str> = [RPC_URL, REWARDS_MANAGER_ADDRESS, SLVLUSD_ADDRESS]
            .into_iter()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let poll_secs = parse_u64(POLL_INTERVAL, get(POLL_INTERVAL))?
            .unwrap_or(DEFAULT_POLL_INTERVAL.as_secs());
        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                key: POLL_INTERVAL,
                reason: "must be at least 1 second".to_string(),
            });
        }

        Ok(Self {
            rpc_url: get(RPC_URL).unwrap_or_default(),
            rewards_manager: parse_address(REWARDS_MANAGER_ADDRESS, get(REWARDS_MANAGER_ADDRESS))?,
            slvlusd: parse_address(SLVLUSD_ADDRESS, get(SLVLUSD_ADDRESS))?,
            chain_id: parse_u64(CHAIN_ID, get(CHAIN_ID))?.unwrap_or(DEFAULT_CHAIN_ID),
            confirmations: parse_u64(BLOCK_CONFIRMATIONS, get(BLOCK_CONFIRMATIONS))?
                .unwrap_or(DEFAULT_CONFIRMATIONS),
            poll_interval: Duration::from_secs(poll_secs),
            start_block: parse_u64(START_BLOCK, get(START_BLOCK))?,
            redis_url: get(REDIS_URL).unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            redis_channel: get(REDIS_CHANNEL).unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
        })
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            rewards_manager: self.rewards_manager,
            slvlusd: self.slvlusd,
            confirmations: self.confirmations,
            poll_interval: self.poll_interval,
            start_block: self.start_block,
        }
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig::with_endpoint(self.rpc_url.clone())
    }
}

fn parse_address(key: &'static str, value: Option<String>) -> Result<Address, ConfigError> {
    let value = value.unwrap_or_default();
    normalize_address(&value).ok_or_else(|| ConfigError::Invalid {
        key,
        reason: format!("{:?} is not a 20-byte hex address", value),
    })
}

fn parse_u64(key: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    value
        .map(|v| {
            v.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key,
                reason: format!("{:?}: {}", v, e),
            })
        })
        .transpose()
}
