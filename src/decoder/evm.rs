//! EVM call classification and signature-request analysis

use serde_json::Value;

use crate::chain::{wei_to_eth, Chain};
use crate::error::{Error, Result};
use crate::evm::typed_data::parse_integer;
use crate::evm::{
    checksum_address, parse_address, selector, word_to_address, Address, EvmTransaction,
    TypedData, Word,
};

use super::types::{
    ApprovalIntent, ApprovalStandard, DecodedInstruction, DecodedTransaction, PayloadKind,
    RiskLevel, RiskWarning,
};

lazy_static::lazy_static! {
    pub static ref APPROVE: [u8; 4] = selector("approve(address,uint256)");
    pub static ref INCREASE_ALLOWANCE: [u8; 4] = selector("increaseAllowance(address,uint256)");
    pub static ref SET_APPROVAL_FOR_ALL: [u8; 4] = selector("setApprovalForAll(address,bool)");
    pub static ref TRANSFER: [u8; 4] = selector("transfer(address,uint256)");
    pub static ref TRANSFER_FROM: [u8; 4] = selector("transferFrom(address,address,uint256)");
    /// Permit2 allowance: approve(token, spender, uint160 amount, uint48 expiration)
    pub static ref PERMIT2_APPROVE: [u8; 4] = selector("approve(address,address,uint160,uint48)");
}

/// ABI argument cursor over calldata after the selector
struct Args<'a> {
    data: &'a [u8],
}

impl<'a> Args<'a> {
    fn word(&self, i: usize) -> Result<Word> {
        let start = 4 + i * 32;
        let bytes = self.data.get(start..start + 32).ok_or_else(|| {
            Error::TransactionDecode(format!("calldata too short for argument {}", i))
        })?;
        Word::from_be_slice(bytes)
    }

    fn address(&self, i: usize) -> Result<Address> {
        let word = self.word(i)?;
        if word.0[..12].iter().any(|b| *b != 0) {
            return Err(Error::TransactionDecode(format!(
                "argument {} is not a valid address",
                i
            )));
        }
        Ok(word_to_address(&word))
    }
}

/// Classifies EVM transactions and signature payloads
#[derive(Debug, Clone)]
pub struct EvmAnalyzer {
    large_value_wei: u128,
    chain_id: u64,
}

impl EvmAnalyzer {
    pub fn new(large_value_wei: u128, chain_id: u64) -> Self {
        Self {
            large_value_wei,
            chain_id,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn analyze_transaction(&self, tx: &EvmTransaction) -> Result<DecodedTransaction> {
        let mut out = DecodedTransaction::new(Chain::Evm, PayloadKind::Transaction);

        if let Some(found) = tx.chain_id {
            if found != self.chain_id {
                out.warn(RiskWarning::ChainMismatch {
                    expected: self.chain_id,
                    found,
                });
                out.raise(RiskLevel::High);
            }
        }

        let value_wei = tx.value.as_u128().unwrap_or(u128::MAX);
        if value_wei > self.large_value_wei {
            out.warn(RiskWarning::LargeValue {
                amount: format!("{} ETH", wei_to_eth(value_wei)),
            });
            out.raise(RiskLevel::High);
        }

        let Some(to) = tx.to else {
            out.push_instruction(DecodedInstruction {
                program_id: "<create>".to_string(),
                program_label: None,
                name: "contract_creation".to_string(),
                summary: format!("Deploy contract ({} bytes)", tx.data.len()),
                accounts: vec![],
                risk: RiskLevel::Medium,
            });
            return Ok(out);
        };

        let to_str = checksum_address(&to);

        if tx.data.is_empty() {
            out.push_instruction(call(
                &to_str,
                "native_transfer",
                format!("Send {} ETH to {}", wei_to_eth(value_wei), to_str),
                vec![to_str.clone()],
                RiskLevel::Low,
            ));
            return Ok(out);
        }

        if tx.data.len() < 4 {
            out.warn(RiskWarning::UnknownContract {
                address: to_str.clone(),
            });
            out.push_instruction(call(
                &to_str,
                "contract_call",
                format!("Call {} with {} bytes of data", to_str, tx.data.len()),
                vec![],
                RiskLevel::Medium,
            ));
            return Ok(out);
        }

        let sel: [u8; 4] = [tx.data[0], tx.data[1], tx.data[2], tx.data[3]];
        let args = Args { data: &tx.data };

        if sel == *APPROVE || sel == *INCREASE_ALLOWANCE {
            let spender = args.address(0)?;
            let amount = args.word(1)?;
            let standard = if sel == *APPROVE {
                ApprovalStandard::Erc20Approve
            } else {
                ApprovalStandard::Erc20IncreaseAllowance
            };
            self.approval(
                &mut out,
                ApprovalIntent::new(to_str.clone(), checksum_address(&spender), amount, standard, 256),
            );
        } else if sel == *SET_APPROVAL_FOR_ALL {
            let operator = checksum_address(&args.address(0)?);
            let approved = !args.word(1)?.is_zero();
            if approved {
                self.approval(
                    &mut out,
                    ApprovalIntent::new(
                        to_str.clone(),
                        operator,
                        Word::MAX,
                        ApprovalStandard::SetApprovalForAll,
                        256,
                    ),
                );
            } else {
                out.push_instruction(call(
                    &to_str,
                    "revoke_approval_for_all",
                    format!("Revoke operator {} on collection {}", operator, to_str),
                    vec![operator.clone()],
                    RiskLevel::Low,
                ));
            }
        } else if sel == *PERMIT2_APPROVE {
            let token = checksum_address(&args.address(0)?);
            let spender = checksum_address(&args.address(1)?);
            let amount = args.word(2)?;
            self.approval(
                &mut out,
                ApprovalIntent::new(token, spender, amount, ApprovalStandard::Permit2, 160),
            );
        } else if sel == *TRANSFER {
            let recipient = checksum_address(&args.address(0)?);
            let amount = args.word(1)?;
            out.push_instruction(call(
                &to_str,
                "token_transfer",
                format!("Send {} units of token {} to {}", amount, to_str, recipient),
                vec![recipient],
                RiskLevel::Low,
            ));
        } else if sel == *TRANSFER_FROM {
            let from = checksum_address(&args.address(0)?);
            let recipient = checksum_address(&args.address(1)?);
            let amount = args.word(2)?;
            out.push_instruction(call(
                &to_str,
                "token_transfer_from",
                format!(
                    "Move {} units of token {} from {} to {}",
                    amount, to_str, from, recipient
                ),
                vec![from, recipient],
                RiskLevel::Medium,
            ));
        } else {
            out.warn(RiskWarning::UnknownContract {
                address: to_str.clone(),
            });
            out.push_instruction(call(
                &to_str,
                "contract_call",
                format!("Call 0x{} on {}", hex::encode(sel), to_str),
                vec![],
                RiskLevel::Medium,
            ));
        }

        Ok(out)
    }

    /// `eth_signTypedData_v4` analysis; permits become approval intents
    pub fn analyze_typed_data(&self, data: &TypedData) -> Result<DecodedTransaction> {
        // Hashing proves the payload is well formed before anything is shown
        data.signing_hash()?;

        let mut out = DecodedTransaction::new(Chain::Evm, PayloadKind::TypedData);

        if let Some(found) = data.chain_id() {
            if found != self.chain_id {
                out.warn(RiskWarning::ChainMismatch {
                    expected: self.chain_id,
                    found,
                });
                out.raise(RiskLevel::High);
            }
        }

        let contract = data
            .verifying_contract()
            .map(|a| checksum_address(&a))
            .unwrap_or_else(|| "<none>".to_string());

        match data.primary_type.as_str() {
            "Permit" if data.message_field("allowed").is_some() => {
                self.dai_permit(data, &contract, &mut out)?
            }
            "Permit" => {
                let spender = message_address(&data.message, "spender")?;
                let value = message_integer(&data.message, "value")?;
                self.approval(
                    &mut out,
                    ApprovalIntent::new(contract, spender, value, ApprovalStandard::Permit, 256),
                );
            }
            "PermitSingle" => {
                let spender = message_address(&data.message, "spender")?;
                let details = field(&data.message, "details")?;
                self.permit2_details(details, &spender, &mut out)?;
            }
            "PermitBatch" => {
                let spender = message_address(&data.message, "spender")?;
                let details = field(&data.message, "details")?
                    .as_array()
                    .ok_or_else(|| Error::ValidationFailed("details must be an array".to_string()))?;
                for item in details {
                    self.permit2_details(item, &spender, &mut out)?;
                }
            }
            "PermitTransferFrom" | "PermitWitnessTransferFrom" => {
                let spender = message_address(&data.message, "spender")?;
                let permitted = field(&data.message, "permitted")?;
                self.permit2_transfer(permitted, &spender, &mut out)?;
            }
            "PermitBatchTransferFrom" | "PermitBatchWitnessTransferFrom" => {
                let spender = message_address(&data.message, "spender")?;
                let permitted = field(&data.message, "permitted")?
                    .as_array()
                    .ok_or_else(|| Error::ValidationFailed("permitted must be an array".to_string()))?;
                for item in permitted {
                    self.permit2_transfer(item, &spender, &mut out)?;
                }
            }
            other => {
                out.push_instruction(DecodedInstruction {
                    program_id: contract.clone(),
                    program_label: data.domain_name().map(str::to_string),
                    name: "typed_data".to_string(),
                    summary: format!(
                        "Sign {} for {}",
                        other,
                        data.domain_name().unwrap_or("unknown app")
                    ),
                    accounts: vec![],
                    risk: RiskLevel::Medium,
                });
            }
        }

        Ok(out)
    }

    /// `personal_sign`: displayed as text when it is UTF-8
    pub fn analyze_personal_message(&self, message: &[u8]) -> DecodedTransaction {
        let mut out = DecodedTransaction::new(Chain::Evm, PayloadKind::Message);
        out.display_text = Some(display_message(message));
        out
    }

    /// `eth_sign`: opaque 32-byte payloads get flagged
    pub fn analyze_eth_sign(&self, message: &[u8]) -> DecodedTransaction {
        let mut out = self.analyze_personal_message(message);
        if message.len() == 32 && std::str::from_utf8(message).is_err() {
            out.warn(RiskWarning::BlindHashSignature);
            out.raise(RiskLevel::High);
        }
        out
    }

    fn approval(&self, out: &mut DecodedTransaction, intent: ApprovalIntent) {
        let (risk, summary) = if intent.is_unlimited {
            out.warn(RiskWarning::UnlimitedApproval {
                spender: intent.spender.clone(),
            });
            (
                RiskLevel::High,
                format!(
                    "Allow {} to spend ALL of token {}",
                    intent.spender, intent.token
                ),
            )
        } else {
            (
                RiskLevel::Medium,
                format!(
                    "Allow {} to spend {} units of token {}",
                    intent.spender, intent.amount, intent.token
                ),
            )
        };

        let name = match intent.standard {
            ApprovalStandard::Erc20Approve => "approve",
            ApprovalStandard::Erc20IncreaseAllowance => "increase_allowance",
            ApprovalStandard::SetApprovalForAll => "set_approval_for_all",
            ApprovalStandard::Permit => "permit",
            ApprovalStandard::DaiPermit => "dai_permit",
            ApprovalStandard::Permit2 => "permit2",
        };

        out.push_instruction(call(
            &intent.token,
            name,
            summary,
            vec![intent.spender.clone()],
            risk,
        ));
        out.approvals.push(intent);
    }

    fn dai_permit(
        &self,
        data: &TypedData,
        contract: &str,
        out: &mut DecodedTransaction,
    ) -> Result<()> {
        let spender = message_address(&data.message, "spender")?;
        let allowed = match field(&data.message, "allowed")? {
            Value::Bool(b) => *b,
            Value::String(s) => s == "true",
            _ => return Err(Error::ValidationFailed("allowed must be a bool".to_string())),
        };

        if allowed {
            self.approval(
                out,
                ApprovalIntent::new(
                    contract.to_string(),
                    spender,
                    Word::MAX,
                    ApprovalStandard::DaiPermit,
                    256,
                ),
            );
        } else {
            out.push_instruction(call(
                contract,
                "permit_revoke",
                format!("Revoke allowance of {}", spender),
                vec![spender.clone()],
                RiskLevel::Low,
            ));
        }
        Ok(())
    }

    fn permit2_details(
        &self,
        details: &Value,
        spender: &str,
        out: &mut DecodedTransaction,
    ) -> Result<()> {
        let token = message_address(details, "token")?;
        let amount = message_integer(details, "amount")?;
        self.approval(
            out,
            ApprovalIntent::new(token, spender.to_string(), amount, ApprovalStandard::Permit2, 160),
        );
        Ok(())
    }

    fn permit2_transfer(
        &self,
        permitted: &Value,
        spender: &str,
        out: &mut DecodedTransaction,
    ) -> Result<()> {
        let token = message_address(permitted, "token")?;
        let amount = message_integer(permitted, "amount")?;
        self.approval(
            out,
            ApprovalIntent::new(token, spender.to_string(), amount, ApprovalStandard::Permit2, 256),
        );
        Ok(())
    }
}

fn call(
    target: &str,
    name: &str,
    summary: String,
    accounts: Vec<String>,
    risk: RiskLevel,
) -> DecodedInstruction {
    DecodedInstruction {
        program_id: target.to_string(),
        program_label: None,
        name: name.to_string(),
        summary,
        accounts,
        risk,
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value> {
    value
        .get(name)
        .ok_or_else(|| Error::ValidationFailed(format!("typed data field {} missing", name)))
}

fn message_address(value: &Value, name: &str) -> Result<String> {
    let text = field(value, name)?
        .as_str()
        .ok_or_else(|| Error::ValidationFailed(format!("{} must be an address", name)))?;
    Ok(checksum_address(&parse_address(text)?))
}

fn message_integer(value: &Value, name: &str) -> Result<Word> {
    parse_integer(field(value, name)?, false)
}

/// UTF-8 text, or hex for binary payloads
pub fn display_message(message: &[u8]) -> String {
    match std::str::from_utf8(message) {
        Ok(text) if !text.chars().any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t') => {
            text.to_string()
        }
        _ => format!("0x{}", hex::encode(message)),
    }
}
