//! Policy engine
//!
//! Checks every approval intent against the user's deny and allow lists.
//! A blocked unlimited approval comes with a capped alternative that the
//! caller may resubmit as a fresh request.

use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::PolicyConfig;
use crate::decoder::evm::{APPROVE, INCREASE_ALLOWANCE};
use crate::decoder::{ApprovalIntent, ApprovalStandard};
use crate::error::{Error, Result};
use crate::evm::typed_data::parse_integer;
use crate::evm::{EvmTransaction, TypedData, Word};

/// Why an approval was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// Spender is on the denylist
    DeniedSpender { spender: String },

    /// Unlimited allowance while unlimited approvals are blocked
    UnlimitedApproval { token: String, spender: String },
}

impl PolicyViolation {
    pub fn as_error(&self) -> Error {
        match self {
            PolicyViolation::DeniedSpender { spender } => Error::PolicyBlocked(spender.clone()),
            PolicyViolation::UnlimitedApproval { spender, .. } => {
                Error::PolicyBlockedUnlimited(spender.clone())
            }
        }
    }
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::DeniedSpender { spender } => {
                write!(f, "Spender {} is on the denylist", spender)
            }
            PolicyViolation::UnlimitedApproval { token, spender } => {
                write!(
                    f,
                    "Unlimited approval of {} to {} is not allowed",
                    token, spender
                )
            }
        }
    }
}

/// Offer to resubmit the same approval with a finite amount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CappedAlternative {
    pub token: String,
    pub spender: String,
    pub standard: ApprovalStandard,
}

/// Outcome of evaluating a request's approvals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Block {
        violation: PolicyViolation,
        alternative: Option<CappedAlternative>,
    },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    pub fn error(&self) -> Option<Error> {
        match self {
            PolicyDecision::Allow => None,
            PolicyDecision::Block { violation, .. } => Some(violation.as_error()),
        }
    }
}

/// Deny/allow list evaluation; spender matching ignores case
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    denylist: HashSet<String>,
    allowlist: HashSet<String>,
    block_unlimited: bool,
}

impl PolicyEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            denylist: config.denylist.iter().map(|s| normalize(s)).collect(),
            allowlist: config.allowlist.iter().map(|s| normalize(s)).collect(),
            block_unlimited: config.block_unlimited,
        }
    }

    pub fn block_unlimited(&self) -> bool {
        self.block_unlimited
    }

    pub fn is_denied(&self, spender: &str) -> bool {
        self.denylist.contains(&normalize(spender))
    }

    pub fn is_allowed(&self, spender: &str) -> bool {
        self.allowlist.contains(&normalize(spender))
    }

    /// Decision for a single intent
    pub fn evaluate(&self, intent: &ApprovalIntent) -> PolicyDecision {
        if self.is_denied(&intent.spender) {
            warn!("Approval to denylisted spender {} blocked", intent.spender);
            return PolicyDecision::Block {
                violation: PolicyViolation::DeniedSpender {
                    spender: intent.spender.clone(),
                },
                alternative: None,
            };
        }

        if self.block_unlimited && intent.is_unlimited && !self.is_allowed(&intent.spender) {
            warn!(
                "Unlimited approval of {} to {} blocked",
                intent.token, intent.spender
            );
            let alternative = intent.standard.supports_cap().then(|| CappedAlternative {
                token: intent.token.clone(),
                spender: intent.spender.clone(),
                standard: intent.standard,
            });
            return PolicyDecision::Block {
                violation: PolicyViolation::UnlimitedApproval {
                    token: intent.token.clone(),
                    spender: intent.spender.clone(),
                },
                alternative,
            };
        }

        debug!("Approval to {} allowed", intent.spender);
        PolicyDecision::Allow
    }

    /// First block among all intents wins
    pub fn evaluate_all(&self, intents: &[ApprovalIntent]) -> PolicyDecision {
        intents
            .iter()
            .map(|i| self.evaluate(i))
            .find(|d| !d.is_allowed())
            .unwrap_or(PolicyDecision::Allow)
    }
}

/// Re-encode an `approve` / `increaseAllowance` call with a finite amount
pub fn build_capped_approval(tx: &EvmTransaction, amount: Word) -> Result<EvmTransaction> {
    if tx.data.len() != 4 + 32 * 2 {
        return Err(Error::ValidationFailed(
            "not a two-argument approval call".to_string(),
        ));
    }

    let selector = &tx.data[..4];
    if selector != APPROVE.as_slice() && selector != INCREASE_ALLOWANCE.as_slice() {
        return Err(Error::ValidationFailed(format!(
            "selector 0x{} cannot be capped",
            hex::encode(selector)
        )));
    }

    if amount.is_zero() || amount == Word::MAX {
        return Err(Error::ValidationFailed(
            "capped amount must be finite and non-zero".to_string(),
        ));
    }

    let mut data = tx.data[..36].to_vec();
    data.extend_from_slice(&amount.0);
    Ok(tx.with_data(data))
}

/// Rewrite an EIP-2612 or Permit2 signature request with a finite amount
///
/// Only amounts at their type's maximum are replaced; finite entries of a
/// batch keep what the requester asked for.
pub fn build_capped_permit(data: &TypedData, amount: Word) -> Result<TypedData> {
    let mut capped = data.clone();
    let message = &mut capped.message;

    match data.primary_type.as_str() {
        "Permit" if message.get("allowed").is_some() => {
            return Err(Error::ValidationFailed(
                "DAI-style permit has no amount to cap".to_string(),
            ))
        }
        "Permit" => cap_amount(message, "value", amount, 256)?,
        "PermitSingle" => cap_amount(field_mut(message, "details")?, "amount", amount, 160)?,
        "PermitBatch" => {
            for item in array_mut(message, "details")? {
                cap_amount(item, "amount", amount, 160)?;
            }
        }
        "PermitTransferFrom" | "PermitWitnessTransferFrom" => {
            cap_amount(field_mut(message, "permitted")?, "amount", amount, 256)?
        }
        "PermitBatchTransferFrom" | "PermitBatchWitnessTransferFrom" => {
            for item in array_mut(message, "permitted")? {
                cap_amount(item, "amount", amount, 256)?;
            }
        }
        other => {
            return Err(Error::ValidationFailed(format!(
                "{} cannot be capped",
                other
            )))
        }
    }

    capped.signing_hash()?;
    Ok(capped)
}

fn cap_amount(target: &mut Value, name: &str, amount: Word, bits: u16) -> Result<()> {
    let limit = Word::max_for_bits(bits);
    if amount.is_zero() || amount >= limit {
        return Err(Error::ValidationFailed(format!(
            "capped amount must be non-zero and below the uint{} maximum",
            bits
        )));
    }

    let slot = target
        .get_mut(name)
        .ok_or_else(|| Error::ValidationFailed(format!("typed data field {} missing", name)))?;
    if parse_integer(slot, false)? >= limit {
        *slot = Value::String(amount.to_decimal());
    }
    Ok(())
}

fn field_mut<'a>(value: &'a mut Value, name: &str) -> Result<&'a mut Value> {
    value
        .get_mut(name)
        .ok_or_else(|| Error::ValidationFailed(format!("typed data field {} missing", name)))
}

fn array_mut<'a>(value: &'a mut Value, name: &str) -> Result<&'a mut Vec<Value>> {
    field_mut(value, name)?
        .as_array_mut()
        .ok_or_else(|| Error::ValidationFailed(format!("{} must be an array", name)))
}

fn normalize(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::evm::EvmAnalyzer;
    use crate::evm::{address_to_word, parse_address};
    use serde_json::json;

    const TOKEN: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const SPENDER: &str = "0x1111111254EEB25477B68fb85Ed929f73A960582";

    fn intent(amount: Word) -> ApprovalIntent {
        ApprovalIntent::new(
            TOKEN.to_string(),
            SPENDER.to_string(),
            amount,
            ApprovalStandard::Erc20Approve,
            256,
        )
    }

    fn config(deny: &[&str], allow: &[&str], block_unlimited: bool) -> PolicyConfig {
        PolicyConfig {
            denylist: deny.iter().map(|s| s.to_string()).collect(),
            allowlist: allow.iter().map(|s| s.to_string()).collect(),
            block_unlimited,
        }
    }

    fn approve_tx(amount: Word) -> EvmTransaction {
        let mut data = APPROVE.to_vec();
        data.extend_from_slice(&address_to_word(&parse_address(SPENDER).unwrap()).0);
        data.extend_from_slice(&amount.0);
        EvmTransaction {
            to: Some(parse_address(TOKEN).unwrap()),
            data,
            ..Default::default()
        }
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        let engine = PolicyEngine::new(&config(&[&SPENDER.to_lowercase()], &[], false));
        let decision = engine.evaluate(&intent(Word::from_u128(5)));
        assert!(matches!(
            decision.error(),
            Some(Error::PolicyBlocked(_))
        ));
    }

    #[test]
    fn test_denylist_beats_allowlist() {
        let engine = PolicyEngine::new(&config(&[SPENDER], &[SPENDER], false));
        assert!(!engine.evaluate(&intent(Word::from_u128(5))).is_allowed());
    }

    #[test]
    fn test_unlimited_blocked_with_alternative() {
        let engine = PolicyEngine::new(&config(&[], &[], true));
        match engine.evaluate(&intent(Word::MAX)) {
            PolicyDecision::Block {
                violation,
                alternative,
            } => {
                assert!(matches!(violation.as_error(), Error::PolicyBlockedUnlimited(_)));
                assert_eq!(alternative.unwrap().spender, SPENDER);
            }
            PolicyDecision::Allow => panic!("unlimited approval allowed"),
        }
    }

    #[test]
    fn test_allowlisted_spender_may_be_unlimited() {
        let engine = PolicyEngine::new(&config(&[], &[&SPENDER.to_uppercase().replace("0X", "0x")], true));
        assert!(engine.evaluate(&intent(Word::MAX)).is_allowed());
    }

    #[test]
    fn test_unlimited_allowed_when_not_blocking() {
        let engine = PolicyEngine::new(&config(&[], &[], false));
        assert!(engine.evaluate(&intent(Word::MAX)).is_allowed());
    }

    fn permit_single(amount: &str) -> TypedData {
        TypedData::from_value(&json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "chainId", "type": "uint256"},
                    {"name": "verifyingContract", "type": "address"}
                ],
                "PermitDetails": [
                    {"name": "token", "type": "address"},
                    {"name": "amount", "type": "uint160"},
                    {"name": "expiration", "type": "uint48"},
                    {"name": "nonce", "type": "uint48"}
                ],
                "PermitSingle": [
                    {"name": "details", "type": "PermitDetails"},
                    {"name": "spender", "type": "address"},
                    {"name": "sigDeadline", "type": "uint256"}
                ]
            },
            "primaryType": "PermitSingle",
            "domain": {
                "name": "Permit2",
                "chainId": 1,
                "verifyingContract": "0x000000000022D473030F116dDEE9F6B43aC78BA3"
            },
            "message": {
                "details": {
                    "token": TOKEN,
                    "amount": amount,
                    "expiration": "1900000000",
                    "nonce": "0"
                },
                "spender": SPENDER,
                "sigDeadline": "1900000000"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_permit2_capped_resubmission_passes_fresh_decode() {
        let engine = PolicyEngine::new(&config(&[], &[], true));
        let analyzer = EvmAnalyzer::new(u128::MAX, 1);

        let unlimited = permit_single(&Word::max_for_bits(160).to_decimal());
        let original = analyzer.analyze_typed_data(&unlimited).unwrap();
        match engine.evaluate_all(&original.approvals) {
            PolicyDecision::Block { alternative, .. } => {
                assert_eq!(alternative.unwrap().standard, ApprovalStandard::Permit2);
            }
            PolicyDecision::Allow => panic!("unlimited permit allowed"),
        }

        let capped = build_capped_permit(&unlimited, Word::from_u128(5_000)).unwrap();
        assert_ne!(
            capped.signing_hash().unwrap(),
            unlimited.signing_hash().unwrap()
        );
        let decoded = analyzer.analyze_typed_data(&capped).unwrap();
        assert_eq!(decoded.approvals[0].amount, Word::from_u128(5_000));
        assert!(engine.evaluate_all(&decoded.approvals).is_allowed());

        // uint160 bounds the cap
        assert!(build_capped_permit(&unlimited, Word::max_for_bits(160)).is_err());
        assert!(build_capped_permit(&unlimited, Word::ZERO).is_err());
    }

    #[test]
    fn test_dai_permit_has_no_capped_alternative() {
        let engine = PolicyEngine::new(&config(&[], &[], true));
        let dai = ApprovalIntent::new(
            TOKEN.to_string(),
            SPENDER.to_string(),
            Word::MAX,
            ApprovalStandard::DaiPermit,
            256,
        );
        assert!(matches!(
            engine.evaluate(&dai),
            PolicyDecision::Block {
                alternative: None,
                ..
            }
        ));
    }

    #[test]
    fn test_capped_resubmission_passes_fresh_decode() {
        let engine = PolicyEngine::new(&config(&[], &[], true));
        let analyzer = EvmAnalyzer::new(u128::MAX, 1);

        let original = analyzer.analyze_transaction(&approve_tx(Word::MAX)).unwrap();
        assert!(!engine.evaluate_all(&original.approvals).is_allowed());

        let capped = build_capped_approval(&approve_tx(Word::MAX), Word::from_u128(1_000)).unwrap();
        let decoded = analyzer.analyze_transaction(&capped).unwrap();
        assert!(!decoded.approvals[0].is_unlimited);
        assert_eq!(decoded.approvals[0].amount, Word::from_u128(1_000));
        assert!(engine.evaluate_all(&decoded.approvals).is_allowed());
    }

    #[test]
    fn test_capped_rejects_bad_inputs() {
        let tx = approve_tx(Word::MAX);
        assert!(build_capped_approval(&tx, Word::ZERO).is_err());
        assert!(build_capped_approval(&tx, Word::MAX).is_err());

        let transfer = tx.with_data(vec![0xa9, 0x05, 0x9c, 0xbb]);
        assert!(build_capped_approval(&transfer, Word::from_u128(1)).is_err());
    }
}
