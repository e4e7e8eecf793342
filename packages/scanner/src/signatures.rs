//! Signature Registry
//!
//! Static mapping of the event and method names the scanner cares about to
//! their binary selectors. `Transfer` and `yield_distribution` are fixed
//! constants; `Rewarded` is derived once from its canonical signature.

use std::collections::HashMap;
use std::sync::LazyLock;

use alloy::primitives::{b256, keccak256, B256};

/// Canonical textual signature of the rewards manager's payout event
pub const REWARDED_SIGNATURE: &str = "Rewarded(address,address,uint256)";

/// Standard ERC-20 `Transfer(address,address,uint256)` topic
pub const TRANSFER_SELECTOR: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Administrative method on the rewards manager that triggers a distribution
pub const YIELD_DISTRIBUTION_SELECTOR: [u8; 4] = [0x6a, 0x76, 0x12, 0x02];

static REWARDED_SELECTOR: LazyLock<B256> =
    LazyLock::new(|| keccak256(REWARDED_SIGNATURE.as_bytes()));

/// The two log events the classifier decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSignature {
    /// Transfer(address,address,uint256)
    Transfer,
    /// Rewarded(address,address,uint256)
    Rewarded,
}

impl EventSignature {
    /// Returns the 32-byte topic selector
    pub fn selector(&self) -> B256 {
        match self {
            EventSignature::Transfer => TRANSFER_SELECTOR,
            EventSignature::Rewarded => *REWARDED_SELECTOR,
        }
    }

    /// Returns the symbolic event name
    pub fn name(&self) -> &'static str {
        match self {
            EventSignature::Transfer => "Transfer",
            EventSignature::Rewarded => "Rewarded",
        }
    }

    /// Match a log's first topic against the known events
    pub fn from_topic(topic: &B256) -> Option<Self> {
        if *topic == *REWARDED_SELECTOR {
            Some(EventSignature::Rewarded)
        } else if *topic == TRANSFER_SELECTOR {
            Some(EventSignature::Transfer)
        } else {
            None
        }
    }
}

/// Contract methods the transaction filter recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodSignature {
    /// yield_distribution - 0x6a761202
    YieldDistribution,
}

impl MethodSignature {
    /// Returns the 4-byte method selector
    pub fn selector(&self) -> [u8; 4] {
        match self {
            MethodSignature::YieldDistribution => YIELD_DISTRIBUTION_SELECTOR,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MethodSignature::YieldDistribution => "yield_distribution",
        }
    }

    /// Returns the hex-encoded method ID with 0x prefix
    pub fn hex(&self) -> &'static str {
        match self {
            MethodSignature::YieldDistribution => "0x6a761202",
        }
    }
}

/// Name -> selector bytes, built once per process
static REGISTRY: LazyLock<HashMap<&'static str, Vec<u8>>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for event in [EventSignature::Transfer, EventSignature::Rewarded] {
        map.insert(event.name(), event.selector().to_vec());
    }
    let method = MethodSignature::YieldDistribution;
    map.insert(method.name(), method.selector().to_vec());
    map
});

/// Look up the selector registered under `name`
///
/// # Returns
/// 32 bytes for events, 4 bytes for methods, `None` for unknown names
pub fn selector_of(name: &str) -> Option<&'static [u8]> {
    REGISTRY.get(name).map(Vec::as_slice)
}

/// Force the registry so the derived selector is computed during startup
/// rather than on the first classified log.
pub fn init() {
    LazyLock::force(&REGISTRY);
    tracing::info!(
        rewarded = %EventSignature::Rewarded.selector(),
        transfer = %EventSignature::Transfer.selector(),
        method = MethodSignature::YieldDistribution.hex(),
        "Signature registry initialised"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== selector tests ====================

    #[test]
    fn test_transfer_selector_is_standard_topic() {
        assert_eq!(
            format!("{:#x}", EventSignature::Transfer.selector()),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_transfer_selector_matches_hash_of_signature() {
        assert_eq!(
            EventSignature::Transfer.selector(),
            keccak256("Transfer(address,address,uint256)".as_bytes())
        );
    }

    #[test]
    fn test_rewarded_selector_is_derived_from_signature() {
        assert_eq!(
            EventSignature::Rewarded.selector(),
            b256!("6876a213a761d9b4f8d7ba3609528ef85da671684271f75fdacb41be8db29f45")
        );
    }

    #[test]
    fn test_method_selector_and_hex_agree() {
        let method = MethodSignature::YieldDistribution;
        assert_eq!(method.selector(), [0x6a, 0x76, 0x12, 0x02]);
        assert_eq!(method.hex(), format!("0x{}", hex::encode(method.selector())));
    }

    // ==================== from_topic tests ====================

    #[test]
    fn test_from_topic_recognises_both_events() {
        assert_eq!(
            EventSignature::from_topic(&TRANSFER_SELECTOR),
            Some(EventSignature::Transfer)
        );
        assert_eq!(
            EventSignature::from_topic(&EventSignature::Rewarded.selector()),
            Some(EventSignature::Rewarded)
        );
    }

    #[test]
    fn test_from_topic_unknown_returns_none() {
        assert_eq!(EventSignature::from_topic(&B256::ZERO), None);
        // Approval(address,address,uint256)
        let approval =
            b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");
        assert_eq!(EventSignature::from_topic(&approval), None);
    }

    // ==================== selector_of tests ====================

    #[test]
    fn test_selector_of_known_names() {
        assert_eq!(selector_of("Transfer").map(<[u8]>::len), Some(32));
        assert_eq!(selector_of("Rewarded").map(<[u8]>::len), Some(32));
        assert_eq!(
            selector_of("yield_distribution"),
            Some(&YIELD_DISTRIBUTION_SELECTOR[..])
        );
    }

    #[test]
    fn test_selector_of_unknown_name() {
        assert_eq!(selector_of("Approval"), None);
        assert_eq!(selector_of(""), None);
    }

    #[test]
    fn test_exactly_three_entries_in_registry() {
        assert_eq!(REGISTRY.len(), 3);
    }
}
