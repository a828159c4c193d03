//! Solana transaction decoding and instruction risk classification

use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::instruction::CompiledInstruction;
use solana_sdk::message::VersionedMessage;
use solana_sdk::packet::PACKET_DATA_SIZE;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction::SystemInstruction;
use solana_sdk::transaction::VersionedTransaction;
use spl_token::instruction::TokenInstruction;
use tracing::debug;

use crate::chain::{lamports_to_sol, Chain};
use crate::error::{Error, Result};

use super::programs::{
    is_jito_tip_account, match_pump_discriminator, ProgramInfo, ProgramKind, ProgramRegistry,
    PumpInstructionType,
};
use super::types::{
    DecodedInstruction, DecodedTransaction, DrainerType, PayloadKind, RiskLevel, RiskWarning,
};

/// SPL Token `SetAuthority` instruction tag, shared by Token-2022
const TOKEN_SET_AUTHORITY_TAG: u8 = 6;

/// BPF upgradeable loader instruction tags (u32 little endian)
const LOADER_SET_AUTHORITY: u32 = 4;
const LOADER_SET_AUTHORITY_CHECKED: u32 = 7;
const LOADER_UPGRADE: u32 = 3;

/// Stake program instruction tags (u32 little endian)
const STAKE_AUTHORIZE: u32 = 1;
const STAKE_WITHDRAW: u32 = 4;
const STAKE_SET_LOCKUP: u32 = 6;
const STAKE_AUTHORIZE_WITH_SEED: u32 = 8;
const STAKE_AUTHORIZE_CHECKED: u32 = 10;
const STAKE_AUTHORIZE_CHECKED_WITH_SEED: u32 = 11;
const STAKE_SET_LOCKUP_CHECKED: u32 = 12;

const MEMO_PREVIEW_CHARS: usize = 80;

/// Decode base64 or base58 transaction text into a bounds-checked transaction
pub fn parse_transaction_text(text: &str) -> Result<(Vec<u8>, VersionedTransaction)> {
    let text = text.trim();

    if let Ok(bytes) = STANDARD.decode(text) {
        if let Ok(tx) = parse_transaction_bytes(&bytes) {
            return Ok((bytes, tx));
        }
    }

    let bytes = bs58::decode(text)
        .into_vec()
        .map_err(|_| Error::TransactionDecode("payload is neither base64 nor base58".to_string()))?;
    let tx = parse_transaction_bytes(&bytes)?;
    Ok((bytes, tx))
}

/// Deserialize wire bytes and run structural checks
pub fn parse_transaction_bytes(bytes: &[u8]) -> Result<VersionedTransaction> {
    if bytes.is_empty() || bytes.len() > PACKET_DATA_SIZE {
        return Err(Error::TransactionDecode(format!(
            "transaction size {} outside 1..={}",
            bytes.len(),
            PACKET_DATA_SIZE
        )));
    }

    let tx: VersionedTransaction = bincode::deserialize(bytes)
        .map_err(|e| Error::TransactionDecode(format!("invalid transaction encoding: {}", e)))?;

    let required = tx.message.header().num_required_signatures as usize;
    if tx.signatures.len() != required {
        return Err(Error::TransactionDecode(format!(
            "{} signature slots for {} required signers",
            tx.signatures.len(),
            required
        )));
    }

    check_message_bounds(&tx.message)?;
    Ok(tx)
}

/// Parse bytes that must be exactly one serialized message
pub fn parse_message_bytes(bytes: &[u8]) -> Result<VersionedMessage> {
    if bytes.is_empty() || bytes.len() > PACKET_DATA_SIZE {
        return Err(Error::TransactionDecode("message size out of range".to_string()));
    }

    let message: VersionedMessage = bincode::deserialize(bytes)
        .map_err(|e| Error::TransactionDecode(format!("invalid message encoding: {}", e)))?;

    // Trailing bytes mean this was not a message after all
    let reencoded = bincode::serialize(&message)?;
    if reencoded.len() != bytes.len() {
        return Err(Error::TransactionDecode("trailing bytes after message".to_string()));
    }

    check_message_bounds(&message)?;
    Ok(message)
}

/// Header and index sanity checks ahead of analysis
pub fn check_message_bounds(message: &VersionedMessage) -> Result<()> {
    let header = message.header();
    let static_len = message.static_account_keys().len();
    let required = header.num_required_signatures as usize;

    if required == 0 || required > static_len {
        return Err(Error::TransactionDecode(format!(
            "header requires {} signers but has {} static keys",
            required, static_len
        )));
    }
    if header.num_readonly_signed_accounts as usize >= required {
        return Err(Error::TransactionDecode(
            "fee payer cannot be read-only".to_string(),
        ));
    }
    if header.num_readonly_unsigned_accounts as usize > static_len - required {
        return Err(Error::TransactionDecode(
            "too many read-only unsigned accounts".to_string(),
        ));
    }

    let total = total_account_count(message);
    for (i, ix) in message.instructions().iter().enumerate() {
        if ix.program_id_index as usize >= static_len {
            return Err(Error::TransactionDecode(format!(
                "instruction {} program index {} out of bounds",
                i, ix.program_id_index
            )));
        }
        if let Some(bad) = ix.accounts.iter().find(|a| **a as usize >= total) {
            return Err(Error::TransactionDecode(format!(
                "instruction {} account index {} out of bounds",
                i, bad
            )));
        }
    }

    Ok(())
}

fn total_account_count(message: &VersionedMessage) -> usize {
    let lookups: usize = message
        .address_table_lookups()
        .map(|lookups| {
            lookups
                .iter()
                .map(|l| l.writable_indexes.len() + l.readonly_indexes.len())
                .sum()
        })
        .unwrap_or(0);
    message.static_account_keys().len() + lookups
}

/// Position of `wallet` among the required signers
pub fn signer_index(message: &VersionedMessage, wallet: &Pubkey) -> Option<usize> {
    let required = message.header().num_required_signatures as usize;
    message
        .static_account_keys()
        .iter()
        .take(required)
        .position(|k| k == wallet)
}

/// Per-instruction inputs
struct IxContext<'a> {
    program_id: Pubkey,
    info: Option<&'a ProgramInfo>,
    data: &'a [u8],
    /// None for accounts loaded through lookup tables
    accounts: Vec<Option<Pubkey>>,
    wallet: &'a Pubkey,
}

impl IxContext<'_> {
    fn account(&self, i: usize) -> Option<Pubkey> {
        self.accounts.get(i).copied().flatten()
    }

    fn account_str(&self, i: usize) -> String {
        match self.accounts.get(i) {
            Some(Some(pk)) => pk.to_string(),
            Some(None) => "<lookup table>".to_string(),
            None => "<missing>".to_string(),
        }
    }

    fn is_wallet(&self, i: usize) -> bool {
        self.account(i).as_ref() == Some(self.wallet)
    }

    fn instruction(&self, name: &str, summary: String, risk: RiskLevel) -> DecodedInstruction {
        DecodedInstruction {
            program_id: self.program_id.to_string(),
            program_label: self.info.map(|i| i.label.clone()),
            name: name.to_string(),
            summary,
            accounts: (0..self.accounts.len()).map(|i| self.account_str(i)).collect(),
            risk,
        }
    }
}

/// Classifies Solana instructions against the known-program registry
#[derive(Debug, Clone)]
pub struct SolanaAnalyzer {
    registry: ProgramRegistry,
    large_value_lamports: u64,
}

impl SolanaAnalyzer {
    pub fn new(registry: ProgramRegistry, large_value_lamports: u64) -> Self {
        Self {
            registry,
            large_value_lamports,
        }
    }

    pub fn analyze_transaction(
        &self,
        tx: &VersionedTransaction,
        wallet: &Pubkey,
    ) -> Result<DecodedTransaction> {
        self.analyze_message(&tx.message, wallet)
    }

    pub fn analyze_message(
        &self,
        message: &VersionedMessage,
        wallet: &Pubkey,
    ) -> Result<DecodedTransaction> {
        check_message_bounds(message)?;

        let mut out = DecodedTransaction::new(Chain::Solana, PayloadKind::Transaction);
        let keys = message.static_account_keys();

        let unresolved = total_account_count(message) - keys.len();
        if unresolved > 0 {
            out.warn(RiskWarning::UnresolvedAccounts { count: unresolved });
        }

        for ix in message.instructions() {
            let ctx = self.context_for(ix, keys, wallet);
            self.analyze_instruction(&ctx, &mut out);
        }

        debug!(
            "Decoded {} instructions, risk {}",
            out.instructions.len(),
            out.risk
        );
        Ok(out)
    }

    /// `signMessage` payload: analyzed as a transaction when it is one
    pub fn analyze_sign_message(&self, bytes: &[u8], wallet: &Pubkey) -> DecodedTransaction {
        if let Ok(message) = parse_message_bytes(bytes) {
            if let Ok(decoded) = self.analyze_message(&message, wallet) {
                debug!("signMessage payload is a serialized transaction message");
                return decoded;
            }
        }
        if let Ok(tx) = parse_transaction_bytes(bytes) {
            if let Ok(decoded) = self.analyze_transaction(&tx, wallet) {
                debug!("signMessage payload is a serialized transaction");
                return decoded;
            }
        }

        let mut out = DecodedTransaction::new(Chain::Solana, PayloadKind::Message);
        out.display_text = Some(match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => format!("0x{}", hex::encode(bytes)),
        });
        out
    }

    fn context_for<'a>(
        &'a self,
        ix: &'a CompiledInstruction,
        keys: &[Pubkey],
        wallet: &'a Pubkey,
    ) -> IxContext<'a> {
        let program_id = keys[ix.program_id_index as usize];
        IxContext {
            program_id,
            info: self.registry.lookup(&program_id),
            data: &ix.data,
            accounts: ix
                .accounts
                .iter()
                .map(|a| keys.get(*a as usize).copied())
                .collect(),
            wallet,
        }
    }

    fn analyze_instruction(&self, ctx: &IxContext<'_>, out: &mut DecodedTransaction) {
        let Some(info) = ctx.info else {
            out.warn(RiskWarning::UnknownProgram {
                program_id: ctx.program_id.to_string(),
            });
            out.push_instruction(ctx.instruction(
                "unknown",
                format!("Call to unverified program {}", ctx.program_id),
                RiskLevel::Medium,
            ));
            return;
        };

        match info.kind {
            ProgramKind::System => self.analyze_system(ctx, out),
            ProgramKind::Token | ProgramKind::Token2022 => self.analyze_token(ctx, out),
            ProgramKind::AssociatedToken => out.push_instruction(ctx.instruction(
                "create_associated_token_account",
                format!("Create token account for {}", ctx.account_str(2)),
                RiskLevel::Low,
            )),
            ProgramKind::ComputeBudget => out.push_instruction(compute_budget(ctx)),
            ProgramKind::Memo => {
                let text: String = String::from_utf8_lossy(ctx.data)
                    .chars()
                    .take(MEMO_PREVIEW_CHARS)
                    .collect();
                out.push_instruction(ctx.instruction(
                    "memo",
                    format!("Memo: {}", text),
                    RiskLevel::Low,
                ));
            }
            ProgramKind::BpfUpgradeableLoader => analyze_loader(ctx, out),
            ProgramKind::Stake => analyze_stake(ctx, out),
            ProgramKind::PumpFun => out.push_instruction(pump_instruction(ctx)),
            ProgramKind::PumpAmm | ProgramKind::Labelled => out.push_instruction(ctx.instruction(
                "program_call",
                format!("{} instruction", info.label),
                RiskLevel::Low,
            )),
        }
    }

    fn analyze_system(&self, ctx: &IxContext<'_>, out: &mut DecodedTransaction) {
        let Ok(ix) = bincode::deserialize::<SystemInstruction>(ctx.data) else {
            out.push_instruction(ctx.instruction(
                "unknown",
                "Unrecognized System Program instruction".to_string(),
                RiskLevel::Medium,
            ));
            return;
        };

        match ix {
            SystemInstruction::Transfer { lamports } => {
                self.native_transfer(ctx, out, lamports, 1, "transfer");
            }
            SystemInstruction::TransferWithSeed { lamports, .. } => {
                self.native_transfer(ctx, out, lamports, 2, "transfer_with_seed");
            }
            SystemInstruction::Assign { owner } => {
                assign(ctx, out, &owner, "assign");
            }
            SystemInstruction::AssignWithSeed { owner, .. } => {
                assign(ctx, out, &owner, "assign_with_seed");
            }
            SystemInstruction::AuthorizeNonceAccount(new_authority) => {
                let description = format!(
                    "Nonce account {} authority moves to {}",
                    ctx.account_str(0),
                    new_authority
                );
                out.warn(RiskWarning::AuthorityChange {
                    description: description.clone(),
                });
                out.push_instruction(ctx.instruction(
                    "authorize_nonce_account",
                    description,
                    RiskLevel::High,
                ));
            }
            SystemInstruction::WithdrawNonceAccount(lamports) => {
                self.native_transfer(ctx, out, lamports, 1, "withdraw_nonce_account");
            }
            SystemInstruction::Allocate { space } => {
                let risk = if ctx.is_wallet(0) {
                    RiskLevel::High
                } else {
                    RiskLevel::Low
                };
                out.push_instruction(ctx.instruction(
                    "allocate",
                    format!("Allocate {} bytes for {}", space, ctx.account_str(0)),
                    risk,
                ));
            }
            SystemInstruction::CreateAccount {
                lamports, owner, ..
            }
            | SystemInstruction::CreateAccountWithSeed {
                lamports, owner, ..
            } => {
                out.push_instruction(ctx.instruction(
                    "create_account",
                    format!(
                        "Create account {} owned by {} funded with {} SOL",
                        ctx.account_str(1),
                        owner,
                        lamports_to_sol(lamports)
                    ),
                    RiskLevel::Low,
                ));
            }
            other => {
                out.push_instruction(ctx.instruction(
                    "system",
                    format!("System Program: {:?}", other),
                    RiskLevel::Low,
                ));
            }
        }
    }

    fn native_transfer(
        &self,
        ctx: &IxContext<'_>,
        out: &mut DecodedTransaction,
        lamports: u64,
        to_index: usize,
        name: &str,
    ) {
        let sol = lamports_to_sol(lamports);
        let to = ctx.account(to_index);
        let tip = to.as_ref().map(is_jito_tip_account).unwrap_or(false);

        let summary = if tip {
            format!("Jito tip {} SOL", sol)
        } else {
            format!("Send {} SOL to {}", sol, ctx.account_str(to_index))
        };

        let risk = if lamports > self.large_value_lamports {
            out.warn(RiskWarning::LargeValue {
                amount: format!("{} SOL", sol),
            });
            RiskLevel::High
        } else {
            RiskLevel::Low
        };

        out.push_instruction(ctx.instruction(name, summary, risk));
    }

    #[allow(deprecated)]
    fn analyze_token(&self, ctx: &IxContext<'_>, out: &mut DecodedTransaction) {
        let program = ctx.info.map(|i| i.label.as_str()).unwrap_or("Token");

        if ctx.data.first() == Some(&TOKEN_SET_AUTHORITY_TAG) {
            let description = format!(
                "{}: reassign authority of {} to {}",
                program,
                ctx.account_str(0),
                describe_new_authority(ctx.data)
            );
            out.warn(RiskWarning::AuthorityChange {
                description: description.clone(),
            });
            out.flag_drainer(DrainerType::SetAuthority);
            out.push_instruction(ctx.instruction(
                "set_authority",
                description,
                RiskLevel::Blocked,
            ));
            return;
        }

        let ix = match TokenInstruction::unpack(ctx.data) {
            Ok(ix) => ix,
            Err(_) => {
                // Token-2022 extension instructions land here too
                out.push_instruction(ctx.instruction(
                    "unknown",
                    format!("Unrecognized {} instruction", program),
                    RiskLevel::Medium,
                ));
                return;
            }
        };

        match ix {
            TokenInstruction::Transfer { amount } => {
                out.push_instruction(ctx.instruction(
                    "token_transfer",
                    format!("Send {} token units to {}", amount, ctx.account_str(1)),
                    RiskLevel::Low,
                ));
            }
            TokenInstruction::TransferChecked { amount, decimals } => {
                out.push_instruction(ctx.instruction(
                    "token_transfer",
                    format!(
                        "Send {} of mint {} to {}",
                        ui_amount(amount, decimals),
                        ctx.account_str(1),
                        ctx.account_str(2)
                    ),
                    RiskLevel::Low,
                ));
            }
            TokenInstruction::Approve { amount } => {
                delegation(ctx, out, amount, 1);
            }
            TokenInstruction::ApproveChecked { amount, .. } => {
                delegation(ctx, out, amount, 2);
            }
            TokenInstruction::Revoke => {
                out.push_instruction(ctx.instruction(
                    "revoke",
                    format!("Revoke delegate on {}", ctx.account_str(0)),
                    RiskLevel::Low,
                ));
            }
            TokenInstruction::CloseAccount => {
                let risk = if ctx.is_wallet(1) {
                    RiskLevel::Low
                } else {
                    RiskLevel::Medium
                };
                out.push_instruction(ctx.instruction(
                    "close_account",
                    format!(
                        "Close {} and send rent to {}",
                        ctx.account_str(0),
                        ctx.account_str(1)
                    ),
                    risk,
                ));
            }
            TokenInstruction::Burn { amount } | TokenInstruction::BurnChecked { amount, .. } => {
                out.push_instruction(ctx.instruction(
                    "burn",
                    format!("Burn {} token units from {}", amount, ctx.account_str(0)),
                    RiskLevel::Low,
                ));
            }
            TokenInstruction::SyncNative => {
                out.push_instruction(ctx.instruction(
                    "sync_native",
                    "Sync wrapped SOL balance".to_string(),
                    RiskLevel::Low,
                ));
            }
            _ => {
                out.push_instruction(ctx.instruction(
                    "token",
                    format!("{} instruction", program),
                    RiskLevel::Low,
                ));
            }
        }
    }
}

fn assign(ctx: &IxContext<'_>, out: &mut DecodedTransaction, owner: &Pubkey, name: &str) {
    if ctx.is_wallet(0) {
        let description = format!("Reassign owner of your account to program {}", owner);
        out.warn(RiskWarning::AuthorityChange {
            description: description.clone(),
        });
        out.flag_drainer(DrainerType::Assign);
        out.push_instruction(ctx.instruction(name, description, RiskLevel::Blocked));
    } else {
        out.push_instruction(ctx.instruction(
            name,
            format!("Assign {} to program {}", ctx.account_str(0), owner),
            RiskLevel::Medium,
        ));
    }
}

fn delegation(ctx: &IxContext<'_>, out: &mut DecodedTransaction, amount: u64, delegate_index: usize) {
    let delegate = ctx.account_str(delegate_index);
    if amount == u64::MAX {
        out.warn(RiskWarning::UnlimitedDelegation {
            delegate: delegate.clone(),
        });
        out.push_instruction(ctx.instruction(
            "approve",
            format!("Allow {} to spend unlimited tokens from {}", delegate, ctx.account_str(0)),
            RiskLevel::High,
        ));
    } else {
        out.push_instruction(ctx.instruction(
            "approve",
            format!(
                "Allow {} to spend {} token units from {}",
                delegate,
                amount,
                ctx.account_str(0)
            ),
            RiskLevel::Medium,
        ));
    }
}

fn analyze_loader(ctx: &IxContext<'_>, out: &mut DecodedTransaction) {
    match read_u32_tag(ctx.data) {
        Some(LOADER_SET_AUTHORITY) | Some(LOADER_SET_AUTHORITY_CHECKED) => {
            let description = format!(
                "Transfer upgrade authority of {} to {}",
                ctx.account_str(0),
                ctx.account_str(2)
            );
            out.warn(RiskWarning::AuthorityChange {
                description: description.clone(),
            });
            out.flag_drainer(DrainerType::SetAuthority);
            out.push_instruction(ctx.instruction("set_authority", description, RiskLevel::Blocked));
        }
        Some(LOADER_UPGRADE) => out.push_instruction(ctx.instruction(
            "upgrade",
            format!("Upgrade program {}", ctx.account_str(1)),
            RiskLevel::Medium,
        )),
        _ => out.push_instruction(ctx.instruction(
            "loader",
            "Program deployment instruction".to_string(),
            RiskLevel::Medium,
        )),
    }
}

fn analyze_stake(ctx: &IxContext<'_>, out: &mut DecodedTransaction) {
    match read_u32_tag(ctx.data) {
        Some(STAKE_AUTHORIZE)
        | Some(STAKE_AUTHORIZE_WITH_SEED)
        | Some(STAKE_AUTHORIZE_CHECKED)
        | Some(STAKE_AUTHORIZE_CHECKED_WITH_SEED) => {
            let description = format!("Reassign authority of stake account {}", ctx.account_str(0));
            out.warn(RiskWarning::AuthorityChange {
                description: description.clone(),
            });
            out.flag_drainer(DrainerType::SetAuthority);
            out.push_instruction(ctx.instruction("stake_authorize", description, RiskLevel::Blocked));
        }
        Some(STAKE_SET_LOCKUP) | Some(STAKE_SET_LOCKUP_CHECKED) => {
            out.push_instruction(ctx.instruction(
                "stake_set_lockup",
                format!("Change lockup of stake account {}", ctx.account_str(0)),
                RiskLevel::High,
            ));
        }
        Some(STAKE_WITHDRAW) => out.push_instruction(ctx.instruction(
            "stake_withdraw",
            format!(
                "Withdraw from stake account {} to {}",
                ctx.account_str(0),
                ctx.account_str(1)
            ),
            RiskLevel::Medium,
        )),
        _ => out.push_instruction(ctx.instruction(
            "stake",
            "Stake Program instruction".to_string(),
            RiskLevel::Low,
        )),
    }
}

fn compute_budget(ctx: &IxContext<'_>) -> DecodedInstruction {
    let summary = match ctx.data.first() {
        Some(2) if ctx.data.len() >= 5 => {
            let units = u32::from_le_bytes([ctx.data[1], ctx.data[2], ctx.data[3], ctx.data[4]]);
            format!("Set compute unit limit {}", units)
        }
        Some(3) if ctx.data.len() >= 9 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&ctx.data[1..9]);
            format!("Set compute unit price {} micro-lamports", u64::from_le_bytes(buf))
        }
        _ => "Compute budget".to_string(),
    };
    ctx.instruction("compute_budget", summary, RiskLevel::Low)
}

fn pump_instruction(ctx: &IxContext<'_>) -> DecodedInstruction {
    let args = ctx.data.get(8..).unwrap_or(&[]);
    match match_pump_discriminator(ctx.data) {
        Some(PumpInstructionType::Buy) if args.len() >= 16 => {
            let amount = read_u64(args, 0);
            let max_sol_cost = read_u64(args, 8);
            ctx.instruction(
                "pump_buy",
                format!(
                    "Buy {} tokens of {} for at most {} SOL",
                    amount,
                    ctx.account_str(2),
                    lamports_to_sol(max_sol_cost)
                ),
                RiskLevel::Low,
            )
        }
        Some(PumpInstructionType::Sell) if args.len() >= 16 => {
            let amount = read_u64(args, 0);
            let min_sol_output = read_u64(args, 8);
            ctx.instruction(
                "pump_sell",
                format!(
                    "Sell {} tokens of {} for at least {} SOL",
                    amount,
                    ctx.account_str(2),
                    lamports_to_sol(min_sol_output)
                ),
                RiskLevel::Low,
            )
        }
        Some(PumpInstructionType::Create) => ctx.instruction(
            "pump_create",
            "Create pump.fun token".to_string(),
            RiskLevel::Low,
        ),
        Some(PumpInstructionType::Withdraw) => ctx.instruction(
            "pump_withdraw",
            "pump.fun admin withdraw".to_string(),
            RiskLevel::Medium,
        ),
        _ => ctx.instruction("pump", "pump.fun instruction".to_string(), RiskLevel::Low),
    }
}

fn describe_new_authority(data: &[u8]) -> String {
    // SetAuthority: tag, authority_type, COption<Pubkey>
    match data.get(2) {
        Some(1) if data.len() >= 35 => Pubkey::try_from(&data[3..35])
            .map(|pk| pk.to_string())
            .unwrap_or_else(|_| "<invalid>".to_string()),
        Some(0) => "nobody".to_string(),
        _ => "<unknown>".to_string(),
    }
}

fn ui_amount(amount: u64, decimals: u8) -> String {
    let divisor = 10f64.powi(decimals as i32);
    format!("{}", amount as f64 / divisor)
}

fn read_u32_tag(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::programs::{PUMP_DISCRIMINATORS, PUMP_PROGRAM_ID, TOKEN_2022_PROGRAM_ID};
    use solana_sdk::hash::Hash;
    use solana_sdk::instruction::{AccountMeta, Instruction};
    use solana_sdk::message::{v0, Message};
    use solana_sdk::signature::{Keypair, Signature};
    use solana_sdk::signer::Signer;
    use solana_sdk::system_instruction;
    use spl_token::instruction::AuthorityType;

    fn analyzer() -> SolanaAnalyzer {
        SolanaAnalyzer::new(ProgramRegistry::default(), 10 * crate::chain::LAMPORTS_PER_SOL)
    }

    fn unsigned(instructions: &[Instruction], payer: &Pubkey) -> VersionedTransaction {
        let message = Message::new(instructions, Some(payer));
        VersionedTransaction {
            signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
            message: VersionedMessage::Legacy(message),
        }
    }

    fn analyze(instructions: &[Instruction], wallet: &Pubkey) -> DecodedTransaction {
        let tx = unsigned(instructions, wallet);
        let bytes = bincode::serialize(&tx).unwrap();
        let parsed = parse_transaction_bytes(&bytes).unwrap();
        analyzer().analyze_transaction(&parsed, wallet).unwrap()
    }

    #[test]
    fn test_simple_transfer_is_low() {
        let wallet = Keypair::new().pubkey();
        let to = Pubkey::new_unique();
        let decoded = analyze(&[system_instruction::transfer(&wallet, &to, 1_000_000)], &wallet);

        assert_eq!(decoded.risk, RiskLevel::Low);
        assert!(decoded.drainer.is_none());
        assert_eq!(decoded.instructions[0].name, "transfer");
    }

    #[test]
    fn test_large_transfer_is_high() {
        let wallet = Pubkey::new_unique();
        let decoded = analyze(
            &[system_instruction::transfer(
                &wallet,
                &Pubkey::new_unique(),
                50 * crate::chain::LAMPORTS_PER_SOL,
            )],
            &wallet,
        );
        assert_eq!(decoded.risk, RiskLevel::High);
        assert!(matches!(decoded.warnings[0], RiskWarning::LargeValue { .. }));
    }

    #[test]
    fn test_token_set_authority_is_blocked() {
        let wallet = Pubkey::new_unique();
        let token_account = Pubkey::new_unique();
        let attacker = Pubkey::new_unique();
        let ix = spl_token::instruction::set_authority(
            &spl_token::id(),
            &token_account,
            Some(&attacker),
            AuthorityType::AccountOwner,
            &wallet,
            &[],
        )
        .unwrap();

        let decoded = analyze(&[ix], &wallet);
        assert_eq!(decoded.risk, RiskLevel::Blocked);
        assert_eq!(decoded.drainer, Some(DrainerType::SetAuthority));
        assert!(decoded.instructions[0].summary.contains(&attacker.to_string()));
    }

    #[test]
    fn test_token_2022_set_authority_is_blocked() {
        let wallet = Pubkey::new_unique();
        let ix = Instruction {
            program_id: TOKEN_2022_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(Pubkey::new_unique(), false),
                AccountMeta::new_readonly(wallet, true),
            ],
            // SetAuthority with an extension-only authority type
            data: vec![6, 9, 0],
        };
        let decoded = analyze(&[ix], &wallet);
        assert_eq!(decoded.drainer, Some(DrainerType::SetAuthority));
    }

    #[test]
    fn test_assign_wallet_is_blocked() {
        let wallet = Pubkey::new_unique();
        let decoded = analyze(&[system_instruction::assign(&wallet, &Pubkey::new_unique())], &wallet);
        assert_eq!(decoded.drainer, Some(DrainerType::Assign));
        assert_eq!(decoded.risk, RiskLevel::Blocked);
    }

    #[test]
    fn test_assign_other_account_is_medium() {
        let wallet = Pubkey::new_unique();
        let other = Keypair::new().pubkey();
        let decoded = analyze(
            &[
                system_instruction::transfer(&wallet, &other, 1),
                system_instruction::assign(&other, &Pubkey::new_unique()),
            ],
            &wallet,
        );
        assert!(decoded.drainer.is_none());
        assert_eq!(decoded.risk, RiskLevel::Medium);
    }

    #[test]
    fn test_unlimited_delegation_is_high() {
        let wallet = Pubkey::new_unique();
        let ix = spl_token::instruction::approve(
            &spl_token::id(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &wallet,
            &[],
            u64::MAX,
        )
        .unwrap();
        let decoded = analyze(&[ix], &wallet);
        assert_eq!(decoded.risk, RiskLevel::High);
    }

    #[test]
    fn test_unknown_program_is_medium_with_warning() {
        let wallet = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let ix = Instruction::new_with_bytes(
            program,
            &[1, 2, 3],
            vec![AccountMeta::new(wallet, true)],
        );
        let decoded = analyze(&[ix], &wallet);
        assert_eq!(decoded.risk, RiskLevel::Medium);
        assert!(decoded.drainer.is_none());
        assert_eq!(
            decoded.warnings,
            vec![RiskWarning::UnknownProgram {
                program_id: program.to_string()
            }]
        );
    }

    #[test]
    fn test_loader_and_stake_authority_blocked() {
        let wallet = Pubkey::new_unique();
        let loader_ix = Instruction::new_with_bytes(
            solana_sdk::bpf_loader_upgradeable::id(),
            &LOADER_SET_AUTHORITY.to_le_bytes(),
            vec![AccountMeta::new(Pubkey::new_unique(), false), AccountMeta::new_readonly(wallet, true)],
        );
        assert_eq!(analyze(&[loader_ix], &wallet).drainer, Some(DrainerType::SetAuthority));

        let mut data = STAKE_AUTHORIZE.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 36]);
        let stake_ix = Instruction::new_with_bytes(
            solana_sdk::stake::program::id(),
            &data,
            vec![AccountMeta::new(Pubkey::new_unique(), false), AccountMeta::new_readonly(wallet, true)],
        );
        assert_eq!(analyze(&[stake_ix], &wallet).drainer, Some(DrainerType::SetAuthority));
    }

    #[test]
    fn test_pump_buy_is_labelled() {
        let wallet = Pubkey::new_unique();
        let mut data = PUMP_DISCRIMINATORS::BUY.to_vec();
        data.extend_from_slice(&1_000u64.to_le_bytes());
        data.extend_from_slice(&500_000_000u64.to_le_bytes());
        let ix = Instruction::new_with_bytes(
            PUMP_PROGRAM_ID,
            &data,
            vec![
                AccountMeta::new_readonly(Pubkey::new_unique(), false),
                AccountMeta::new(Pubkey::new_unique(), false),
                AccountMeta::new_readonly(Pubkey::new_unique(), false),
                AccountMeta::new(wallet, true),
            ],
        );
        let decoded = analyze(&[ix], &wallet);
        assert_eq!(decoded.risk, RiskLevel::Low);
        assert_eq!(decoded.instructions[0].name, "pump_buy");
        assert_eq!(decoded.instructions[0].program_label.as_deref(), Some("pump.fun"));
    }

    #[test]
    fn test_out_of_bounds_program_index_rejected() {
        let wallet = Pubkey::new_unique();
        let mut tx = unsigned(&[system_instruction::transfer(&wallet, &Pubkey::new_unique(), 1)], &wallet);
        if let VersionedMessage::Legacy(ref mut m) = tx.message {
            m.instructions[0].program_id_index = 42;
        }
        let bytes = bincode::serialize(&tx).unwrap();
        assert!(matches!(
            parse_transaction_bytes(&bytes),
            Err(Error::TransactionDecode(_))
        ));
    }

    #[test]
    fn test_lookup_accounts_are_unresolved() {
        let wallet = Pubkey::new_unique();
        let program = solana_sdk::system_program::id();
        let message = v0::Message {
            header: solana_sdk::message::MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 1,
            },
            account_keys: vec![wallet, program],
            recent_blockhash: Hash::default(),
            instructions: vec![CompiledInstruction {
                program_id_index: 1,
                accounts: vec![0, 2],
                data: bincode::serialize(&SystemInstruction::Transfer { lamports: 5 }).unwrap(),
            }],
            address_table_lookups: vec![solana_sdk::message::v0::MessageAddressTableLookup {
                account_key: Pubkey::new_unique(),
                writable_indexes: vec![0],
                readonly_indexes: vec![],
            }],
        };
        let decoded = analyzer()
            .analyze_message(&VersionedMessage::V0(message), &wallet)
            .unwrap();
        assert!(decoded
            .warnings
            .contains(&RiskWarning::UnresolvedAccounts { count: 1 }));
        assert!(decoded.instructions[0].summary.contains("<lookup table>"));
    }

    #[test]
    fn test_text_encodings() {
        let wallet = Pubkey::new_unique();
        let tx = unsigned(&[system_instruction::transfer(&wallet, &Pubkey::new_unique(), 1)], &wallet);
        let bytes = bincode::serialize(&tx).unwrap();

        let (from_b64, _) = parse_transaction_text(&STANDARD.encode(&bytes)).unwrap();
        let (from_b58, _) = parse_transaction_text(&bs58::encode(&bytes).into_string()).unwrap();
        assert_eq!(from_b64, bytes);
        assert_eq!(from_b58, bytes);
        assert!(parse_transaction_text("!!!").is_err());
    }

    #[test]
    fn test_sign_message_with_hidden_transaction() {
        let wallet = Pubkey::new_unique();
        let ix = spl_token::instruction::set_authority(
            &spl_token::id(),
            &Pubkey::new_unique(),
            Some(&Pubkey::new_unique()),
            AuthorityType::AccountOwner,
            &wallet,
            &[],
        )
        .unwrap();
        let message = VersionedMessage::Legacy(Message::new(&[ix], Some(&wallet)));
        let bytes = bincode::serialize(&message).unwrap();

        let decoded = analyzer().analyze_sign_message(&bytes, &wallet);
        assert_eq!(decoded.kind, PayloadKind::Transaction);
        assert_eq!(decoded.drainer, Some(DrainerType::SetAuthority));

        let plain = analyzer().analyze_sign_message(b"Sign in to example.com", &wallet);
        assert_eq!(plain.kind, PayloadKind::Message);
        assert_eq!(plain.risk, RiskLevel::Low);
        assert_eq!(plain.display_text.as_deref(), Some("Sign in to example.com"));
    }

    #[test]
    fn test_signer_index() {
        let wallet = Pubkey::new_unique();
        let tx = unsigned(&[system_instruction::transfer(&wallet, &Pubkey::new_unique(), 1)], &wallet);
        assert_eq!(signer_index(&tx.message, &wallet), Some(0));
        assert_eq!(signer_index(&tx.message, &Pubkey::new_unique()), None);
    }
}
