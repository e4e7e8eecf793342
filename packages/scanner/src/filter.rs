//! Transaction Filtering
//!
//! Cheap pre-filter over a transaction's raw fields. Only calls to the
//! rewards manager's `yield_distribution` method are worth a receipt fetch.

use alloy::primitives::Address;

use crate::signatures::MethodSignature;
use crate::types::RawTransaction;

/// Extract method ID from transaction input data
///
/// # Arguments
/// * `input` - The full transaction input/calldata
///
/// # Returns
/// `Some([u8; 4])` if input has at least 4 bytes, `None` otherwise
pub fn extract_method_id(input: &[u8]) -> Option<[u8; 4]> {
    input.get(..4)?.try_into().ok()
}

/// Match transaction input against the known administrative method
pub fn filter_input(input: &[u8]) -> Option<MethodSignature> {
    let method = MethodSignature::YieldDistribution;
    (extract_method_id(input)? == method.selector()).then_some(method)
}

/// Decide whether a transaction warrants a receipt fetch
///
/// # Arguments
/// * `tx` - The block transaction
/// * `target_contract` - The rewards manager address
///
/// # Returns
/// `true` only for calls to `target_contract` whose input starts with the
/// `yield_distribution` selector. Contract creations and short or empty
/// input are never candidates.
pub fn is_candidate(tx: &RawTransaction, target_contract: Address) -> bool {
    match tx.to {
        Some(to) if to == target_contract => filter_input(&tx.input).is_some(),
        _ => false,
    }
}
