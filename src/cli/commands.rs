//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::{Confirm, Password};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::{Chain, WalletId};
use crate::config::{Config, UrgencyMode};
use crate::decoder::{
    ApprovalIntent, ApprovalStandard, DecodedTransaction, RiskAnalyzer, WalletContext,
};
use crate::evm::{checksum_address, parse_address, Word};
use crate::pipeline::{Consent, Review, ReviewAction, SigningPipeline};
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::request::{RequestKind, SolanaTx};
use crate::swap::{self, PumpPortalSource, SwapOrder};
use crate::vault::{generate_mnemonic, FileSecureStore, UnlockOptions, VaultManager, VaultState};

fn open_vault(config: &Config) -> Result<Arc<VaultManager>> {
    let store = FileSecureStore::new(&config.vault.store_dir)
        .with_context(|| format!("Cannot open vault store at {}", config.vault.store_dir))?;
    Ok(Arc::new(VaultManager::new(&config.vault, Arc::new(store))))
}

fn prompt_secret(prompt: &str) -> Result<String> {
    Ok(Password::new().with_prompt(prompt).interact()?)
}

fn prompt_new_secret() -> Result<String> {
    Ok(Password::new()
        .with_prompt("New vault secret")
        .with_confirmation("Repeat secret", "Secrets do not match")
        .interact()?)
}

async fn unlock(vault: &VaultManager) -> Result<()> {
    if vault.unlock_with_cached_key().await {
        return Ok(());
    }
    let secret = prompt_secret("Vault secret")?;
    vault.unlock_with_secret(&secret).await?;
    Ok(())
}

async fn wallet_context(vault: &VaultManager, wallet: WalletId) -> Result<WalletContext> {
    let (solana, evm) = vault.public_addresses(wallet).await?;
    Ok(WalletContext {
        solana,
        evm: parse_address(&evm)?,
    })
}

/// Create a vault from a fresh recovery phrase
pub async fn vault_create(config: &Config) -> Result<()> {
    let vault = open_vault(config)?;
    if vault.exists()? {
        anyhow::bail!("Vault {} already exists", vault.vault_id());
    }

    let mnemonic = generate_mnemonic();
    println!("\n=== RECOVERY PHRASE ===\n");
    println!("{}", mnemonic.as_str());
    println!("\nWrite it down. It will not be shown again.\n");

    let saved = Confirm::new()
        .with_prompt("Have you written down the recovery phrase?")
        .default(false)
        .interact()?;
    if !saved {
        info!("Vault creation cancelled");
        return Ok(());
    }

    let secret = prompt_new_secret()?;
    vault.create(&secret, &mnemonic).await?;
    print_addresses(&vault, config).await
}

/// Import an existing recovery phrase
pub async fn vault_import(config: &Config) -> Result<()> {
    let vault = open_vault(config)?;
    let phrase = Password::new().with_prompt("Recovery phrase").interact()?;
    let secret = prompt_new_secret()?;
    vault.import(&secret, &phrase).await?;
    print_addresses(&vault, config).await
}

pub async fn vault_change_secret(config: &Config) -> Result<()> {
    let vault = open_vault(config)?;
    let old = prompt_secret("Current secret")?;
    let new = prompt_new_secret()?;
    vault.change_secret(&old, &new).await?;
    println!("Vault secret changed.");
    Ok(())
}

pub async fn vault_status(config: &Config) -> Result<()> {
    let vault = open_vault(config)?;
    println!("\n=== VAULT STATUS ===\n");
    println!("Vault: {}", vault.vault_id());
    println!("Store: {}", config.vault.store_dir);

    if !vault.exists()? {
        println!("State: not created");
        return Ok(());
    }

    let reveal = Confirm::new()
        .with_prompt("Unlock to show addresses?")
        .default(true)
        .interact()?;
    if reveal {
        unlock(&vault).await?;
        print_addresses(&vault, config).await?;
    }

    let state = match vault.state().await {
        VaultState::Locked => "locked",
        VaultState::Unlocking => "unlocking",
        VaultState::Unlocked => "unlocked",
    };
    println!("State: {}", state);
    Ok(())
}

async fn print_addresses(vault: &VaultManager, config: &Config) -> Result<()> {
    let wallet = WalletId(config.vault.account_index);
    let (solana, evm) = vault.public_addresses(wallet).await?;
    println!("Account {}:", wallet.0);
    println!("  Solana: {}", solana);
    println!("  EVM:    {}", evm);
    Ok(())
}

/// Decode a payload offline and print the analysis
pub fn decode(config: &Config, chain: Chain, payload: &str, wallet: Option<&str>) -> Result<()> {
    let analyzer = RiskAnalyzer::new(&config.decoder, &config.evm);
    let decoded = match chain {
        Chain::Solana => {
            let wallet = match wallet {
                Some(w) => Pubkey::from_str(w).map_err(|e| anyhow::anyhow!("Invalid wallet: {}", e))?,
                None => Pubkey::default(),
            };
            analyzer.analyze_solana_text(payload, &wallet)?
        }
        Chain::Evm => analyzer.analyze_evm_json(payload)?,
    };

    print_decoded(&decoded);
    println!("\n{}", serde_json::to_string_pretty(&decoded)?);
    Ok(())
}

/// Evaluate an approval against the configured policy
pub fn policy_check(config: &Config, spender: &str, amount: &str, token: Option<&str>) -> Result<()> {
    let spender = checksum_address(&parse_address(spender)?);
    let token = match token {
        Some(t) => checksum_address(&parse_address(t)?),
        None => "unknown".to_string(),
    };
    let amount = if amount.eq_ignore_ascii_case("max") {
        Word::MAX
    } else {
        Word::parse(amount)?
    };

    let intent = ApprovalIntent::new(token, spender, amount, ApprovalStandard::Erc20Approve, 256);
    match PolicyEngine::new(&config.policy).evaluate(&intent) {
        PolicyDecision::Allow => println!("ALLOWED"),
        PolicyDecision::Block {
            violation,
            alternative,
        } => {
            println!("BLOCKED: {}", violation);
            if alternative.is_some() {
                println!("A capped allowance would be offered instead.");
            }
        }
    }
    Ok(())
}

/// Review, sign and broadcast a Solana transaction
pub async fn send(config: &Config, transaction: &str, mode: Option<UrgencyMode>, force: bool) -> Result<()> {
    let tx = SolanaTx::parse(transaction)?;
    sign_and_send(config, RequestKind::SolanaSignAndSendTransaction(tx), mode, force).await
}

/// Fetch a swap transaction and run it through the signing flow
pub async fn swap_buy(config: &Config, mint: &str, sol_amount: f64, force: bool) -> Result<()> {
    if sol_amount <= 0.0 {
        anyhow::bail!("Amount must be positive");
    }
    let mint = Pubkey::from_str(mint).map_err(|e| anyhow::anyhow!("Invalid mint: {}", e))?;
    swap(config, SwapOrder::buy(mint, sol_amount), force).await
}

pub async fn swap_sell(config: &Config, mint: &str, amount: &str, force: bool) -> Result<()> {
    let mint = Pubkey::from_str(mint).map_err(|e| anyhow::anyhow!("Invalid mint: {}", e))?;

    if let Some(pct) = amount.strip_suffix('%') {
        let pct: f64 = pct.parse().map_err(|e| anyhow::anyhow!("Invalid amount: {}", e))?;
        if pct <= 0.0 || pct > 100.0 {
            anyhow::bail!("Percentage must be between 0 and 100");
        }
    } else {
        amount
            .parse::<f64>()
            .map_err(|e| anyhow::anyhow!("Invalid amount: {}", e))?;
    }

    swap(config, SwapOrder::sell(mint, amount), force).await
}

async fn swap(config: &Config, order: SwapOrder, force: bool) -> Result<()> {
    let vault = open_vault(config)?;
    unlock(&vault).await?;
    let context = wallet_context(&vault, WalletId(config.vault.account_index)).await?;

    let source = PumpPortalSource::new(&config.swap)?;
    let tx = source.fetch_transaction(&order, &context.solana).await?;
    run_pipeline(config, vault, context, swap::into_request(tx), None, force).await
}

async fn sign_and_send(
    config: &Config,
    request: RequestKind,
    mode: Option<UrgencyMode>,
    force: bool,
) -> Result<()> {
    let vault = open_vault(config)?;
    unlock(&vault).await?;
    let context = wallet_context(&vault, WalletId(config.vault.account_index)).await?;
    run_pipeline(config, vault, context, request, mode, force).await
}

async fn run_pipeline(
    config: &Config,
    vault: Arc<VaultManager>,
    context: WalletContext,
    request: RequestKind,
    mode: Option<UrgencyMode>,
    force: bool,
) -> Result<()> {
    let wallet = WalletId(config.vault.account_index);
    let mut pipeline = SigningPipeline::from_config(config, vault, wallet, context)?;
    if let Some(mode) = mode {
        pipeline = pipeline.with_mode(mode);
    }

    let review = pipeline.review(&request)?;
    print_review(&review);

    if review.allows(ReviewAction::Dismiss) {
        warn!("Drainer pattern detected; transaction dismissed");
        anyhow::bail!("Transaction blocked: it would hand control of your assets to someone else");
    }
    if !review.allows(ReviewAction::Approve) {
        anyhow::bail!(
            "Request blocked by policy: {}",
            review
                .blocking_error()
                .map(|e| e.to_string())
                .unwrap_or_default()
        );
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Sign and send ({} risk)?", review.risk))
            .default(false)
            .interact()?;
        if !confirmed {
            info!("Signing cancelled by user");
            return Ok(());
        }
    }

    let outcome = pipeline
        .approve(&review, Consent::granted_by_user(), &UnlockOptions::default())
        .await?;

    let job = match outcome.job {
        Some(job) => job,
        None => {
            println!("Result: {}", outcome.result);
            return Ok(());
        }
    };

    println!("\nSubmitted: {}", job.signature);
    println!("Job {} ({} mode, until {})", job.id, job.mode, job.deadline);

    let mut updates = job.updates();
    while let Some(status) = updates.next().await {
        println!("Status: {}", status);
    }
    let status = job.wait().await;
    println!("Final status: {}", status);
    if !status.is_landed() {
        anyhow::bail!("Transaction did not land: {}", status);
    }
    Ok(())
}

fn print_decoded(decoded: &DecodedTransaction) {
    println!("\n=== {:?} {:?} ===", decoded.chain, decoded.kind);
    for ix in &decoded.instructions {
        let program = ix.program_label.as_deref().unwrap_or(&ix.program_id);
        println!("  [{}] {}: {}", ix.risk, program, ix.summary);
    }
    if let Some(text) = &decoded.display_text {
        println!("  Message: {}", text);
    }
    for approval in &decoded.approvals {
        println!(
            "  Approval: {} of {} to {}{}",
            approval.amount,
            approval.token,
            approval.spender,
            if approval.is_unlimited { " (UNLIMITED)" } else { "" }
        );
    }
    for warning in &decoded.warnings {
        println!("  Warning: {}", warning);
    }
    if let Some(drainer) = decoded.drainer {
        println!("  DRAINER: {}", drainer);
    }
    println!("  Risk: {}", decoded.risk);
}

fn print_review(review: &Review) {
    println!("\n=== REVIEW {} ===", review.id);
    println!("Method: {}", review.request.method());
    for decoded in &review.decoded {
        print_decoded(decoded);
    }
    for (address, label) in &review.labels {
        println!("Label: {} = {}", address, label);
    }
    if let PolicyDecision::Block { violation, .. } = &review.policy {
        println!("Policy: {}", violation);
    }
    println!("Overall risk: {}", review.risk);
}

pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
