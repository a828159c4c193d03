//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::vault::record::MAX_KDF_ITERATIONS;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub evm: EvmConfig,
    #[serde(default)]
    pub swap: SwapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Directory holding vault records
    #[serde(default = "default_vault_dir")]
    pub store_dir: String,
    /// Record id of the seed vault in the secure store
    #[serde(default = "default_vault_id")]
    pub vault_id: String,
    /// Account index inside the seed used for signing
    #[serde(default)]
    pub account_index: u32,
    /// PBKDF2-HMAC-SHA256 iterations for new records
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    /// How long a derived unlock key stays cached
    #[serde(default = "default_key_cache_ttl_secs")]
    pub key_cache_ttl_secs: u64,
    #[serde(default = "default_true")]
    pub biometric_enabled: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            store_dir: default_vault_dir(),
            vault_id: default_vault_id(),
            account_index: 0,
            kdf_iterations: default_kdf_iterations(),
            key_cache_ttl_secs: default_key_cache_ttl_secs(),
            biometric_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of an approved session
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Lifetime of a pending request before it is rejected as expired
    #[serde(default = "default_request_ttl_secs")]
    pub request_ttl_secs: u64,
    /// How often the expiry sweep runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            request_ttl_secs: default_request_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Extra program id the decoder should treat as attributable
#[derive(Debug, Clone, Deserialize)]
pub struct KnownProgramEntry {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    /// Native SOL transfers at or above this are High risk
    #[serde(default = "default_large_value_sol")]
    pub large_value_sol: f64,
    /// Native ETH transfers at or above this are High risk
    #[serde(default = "default_large_value_eth")]
    pub large_value_eth: f64,
    #[serde(default)]
    pub extra_known_programs: Vec<KnownProgramEntry>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            large_value_sol: default_large_value_sol(),
            large_value_eth: default_large_value_eth(),
            extra_known_programs: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default = "default_true")]
    pub block_unlimited: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            denylist: vec![],
            allowlist: vec![],
            block_unlimited: true,
        }
    }
}

/// Rebroadcast urgency
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyMode {
    Standard,
    Fast,
    Turbo,
}

impl std::fmt::Display for UrgencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrgencyMode::Standard => write!(f, "standard"),
            UrgencyMode::Fast => write!(f, "fast"),
            UrgencyMode::Turbo => write!(f, "turbo"),
        }
    }
}

impl std::str::FromStr for UrgencyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(UrgencyMode::Standard),
            "fast" => Ok(UrgencyMode::Fast),
            "turbo" => Ok(UrgencyMode::Turbo),
            other => Err(format!("unknown urgency mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeConfig {
    pub interval_ms: u64,
    pub max_duration_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrgencyModes {
    #[serde(default = "default_standard_mode")]
    pub standard: ModeConfig,
    #[serde(default = "default_fast_mode")]
    pub fast: ModeConfig,
    #[serde(default = "default_turbo_mode")]
    pub turbo: ModeConfig,
}

impl UrgencyModes {
    pub fn get(&self, mode: UrgencyMode) -> &ModeConfig {
        match mode {
            UrgencyMode::Standard => &self.standard,
            UrgencyMode::Fast => &self.fast,
            UrgencyMode::Turbo => &self.turbo,
        }
    }
}

impl Default for UrgencyModes {
    fn default() -> Self {
        Self {
            standard: default_standard_mode(),
            fast: default_fast_mode(),
            turbo: default_turbo_mode(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Jito block engine (priority relay)
    #[serde(default = "default_priority_relay_url")]
    pub priority_relay_url: String,
    #[serde(default = "default_rpc_endpoint")]
    pub primary_rpc: String,
    #[serde(default)]
    pub fallback_rpcs: Vec<String>,
    #[serde(default = "default_endpoint_timeout_ms")]
    pub endpoint_timeout_ms: u64,
    #[serde(default = "default_mode")]
    pub default_mode: UrgencyMode,
    #[serde(default)]
    pub modes: UrgencyModes,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            priority_relay_url: default_priority_relay_url(),
            primary_rpc: default_rpc_endpoint(),
            fallback_rpcs: vec![],
            endpoint_timeout_ms: default_endpoint_timeout_ms(),
            default_mode: default_mode(),
            modes: UrgencyModes::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmConfig {
    #[serde(default = "default_evm_rpc_endpoint")]
    pub rpc_url: String,
    #[serde(default)]
    pub fallback_rpcs: Vec<String>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

impl Default for EvmConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_evm_rpc_endpoint(),
            fallback_rpcs: vec![],
            chain_id: default_chain_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    #[serde(default = "default_swap_api_url")]
    pub local_api_url: String,
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: u32,
    #[serde(default = "default_priority_fee_sol")]
    pub priority_fee_sol: f64,
    /// Error keywords that mean the bonding curve has migrated to the AMM pool
    #[serde(default = "default_migration_keywords")]
    pub migration_keywords: Vec<String>,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            local_api_url: default_swap_api_url(),
            slippage_pct: default_slippage_pct(),
            priority_fee_sol: default_priority_fee_sol(),
            migration_keywords: default_migration_keywords(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

// Default value functions
fn default_vault_dir() -> String {
    std::env::var("WALLET_VAULT_DIR").unwrap_or_else(|_| "vault".into())
}

fn default_vault_id() -> String {
    "default".to_string()
}

fn default_kdf_iterations() -> u32 {
    600_000
}

fn default_key_cache_ttl_secs() -> u64 {
    300
}

fn default_session_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_request_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_large_value_sol() -> f64 {
    10.0
}

fn default_large_value_eth() -> f64 {
    2.0
}

fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_priority_relay_url() -> String {
    std::env::var("JITO_BLOCK_ENGINE_URL")
        .unwrap_or_else(|_| "https://mainnet.block-engine.jito.wtf".into())
}

fn default_endpoint_timeout_ms() -> u64 {
    3000
}

fn default_mode() -> UrgencyMode {
    UrgencyMode::Standard
}

fn default_standard_mode() -> ModeConfig {
    ModeConfig {
        interval_ms: 2000,
        max_duration_secs: 60,
    }
}

fn default_fast_mode() -> ModeConfig {
    ModeConfig {
        interval_ms: 1000,
        max_duration_secs: 45,
    }
}

fn default_turbo_mode() -> ModeConfig {
    ModeConfig {
        interval_ms: 500,
        max_duration_secs: 30,
    }
}

fn default_evm_rpc_endpoint() -> String {
    std::env::var("EVM_RPC_ENDPOINT")
        .unwrap_or_else(|_| "https://ethereum-rpc.publicnode.com".into())
}

fn default_chain_id() -> u64 {
    1
}

fn default_swap_api_url() -> String {
    "https://pumpportal.fun/api/trade-local".into()
}

fn default_slippage_pct() -> u32 {
    10
}

fn default_priority_fee_sol() -> f64 {
    0.0005
}

fn default_migration_keywords() -> Vec<String> {
    vec!["graduated".into(), "bonding curve complete".into()]
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

/// Lowest KDF iteration count accepted for new vault records
const MIN_KDF_ITERATIONS: u32 = 100_000;

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .set_default("broadcast.primary_rpc", default_rpc_endpoint())?
            .set_default("broadcast.endpoint_timeout_ms", default_endpoint_timeout_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WALLET_)
            .add_source(
                config::Environment::with_prefix("WALLET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.vault.kdf_iterations < MIN_KDF_ITERATIONS {
            anyhow::bail!(
                "vault.kdf_iterations must be at least {}, got {}",
                MIN_KDF_ITERATIONS,
                self.vault.kdf_iterations
            );
        }

        if self.vault.kdf_iterations > MAX_KDF_ITERATIONS {
            anyhow::bail!(
                "vault.kdf_iterations must be at most {}, got {}",
                MAX_KDF_ITERATIONS,
                self.vault.kdf_iterations
            );
        }

        if self.vault.key_cache_ttl_secs == 0 {
            anyhow::bail!("vault.key_cache_ttl_secs must be positive");
        }

        if self.session.request_ttl_secs == 0 {
            anyhow::bail!("session.request_ttl_secs must be positive");
        }

        if self.decoder.large_value_sol <= 0.0 || self.decoder.large_value_eth <= 0.0 {
            anyhow::bail!("decoder large value thresholds must be positive");
        }

        for program in &self.decoder.extra_known_programs {
            program
                .id
                .parse::<solana_sdk::pubkey::Pubkey>()
                .with_context(|| format!("Invalid extra_known_programs id: {}", program.id))?;
        }

        for spender in self.policy.denylist.iter().chain(self.policy.allowlist.iter()) {
            if !is_evm_address(spender) {
                anyhow::bail!("Invalid policy address: {}", spender);
            }
        }

        let endpoints = std::iter::once(&self.broadcast.priority_relay_url)
            .chain(std::iter::once(&self.broadcast.primary_rpc))
            .chain(self.broadcast.fallback_rpcs.iter())
            .chain(std::iter::once(&self.evm.rpc_url))
            .chain(self.evm.fallback_rpcs.iter())
            .chain(std::iter::once(&self.swap.local_api_url));
        for endpoint in endpoints {
            url::Url::parse(endpoint).with_context(|| format!("Invalid endpoint URL: {}", endpoint))?;
        }

        if self.broadcast.endpoint_timeout_ms == 0 {
            anyhow::bail!("broadcast.endpoint_timeout_ms must be positive");
        }

        for mode in [UrgencyMode::Standard, UrgencyMode::Fast, UrgencyMode::Turbo] {
            let m = self.broadcast.modes.get(mode);
            if m.interval_ms == 0 || m.max_duration_secs == 0 {
                anyhow::bail!("broadcast mode {} needs a positive interval and duration", mode);
            }
            if m.interval_ms >= m.max_duration_secs * 1000 {
                anyhow::bail!("broadcast mode {} interval must be shorter than its max duration", mode);
            }
        }

        // Keywords are matched as literal, case-insensitive patterns
        for keyword in &self.swap.migration_keywords {
            regex::Regex::new(&format!("(?i){}", regex::escape(keyword)))
                .with_context(|| format!("Invalid migration keyword: {}", keyword))?;
        }

        if self.swap.migration_keywords.is_empty() {
            tracing::warn!("swap.migration_keywords is empty - AMM pool fallback is disabled");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Vault:
    store_dir: {}
    vault_id: {}
    account_index: {}
    kdf_iterations: {}
    key_cache_ttl: {}s
  Session:
    session_ttl: {}s
    request_ttl: {}s
  Decoder:
    large_value: {} SOL / {} ETH
    extra_known_programs: {}
  Policy:
    block_unlimited: {}
    denylist: {} entries
    allowlist: {} entries
  Broadcast:
    priority_relay: {}
    primary_rpc: {}
    fallback_rpcs: {}
    default_mode: {}
  EVM:
    rpc: {}
    chain_id: {}
  Swap:
    api: {}
    migration_keywords: {:?}
"#,
            self.vault.store_dir,
            self.vault.vault_id,
            self.vault.account_index,
            self.vault.kdf_iterations,
            self.vault.key_cache_ttl_secs,
            self.session.session_ttl_secs,
            self.session.request_ttl_secs,
            self.decoder.large_value_sol,
            self.decoder.large_value_eth,
            self.decoder.extra_known_programs.len(),
            self.policy.block_unlimited,
            self.policy.denylist.len(),
            self.policy.allowlist.len(),
            mask_url(&self.broadcast.priority_relay_url),
            mask_url(&self.broadcast.primary_rpc),
            self.broadcast.fallback_rpcs.len(),
            self.broadcast.default_mode,
            mask_url(&self.evm.rpc_url),
            self.evm.chain_id,
            mask_url(&self.swap.local_api_url),
            self.swap.migration_keywords,
        )
    }
}

fn is_evm_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault: VaultConfig::default(),
            session: SessionConfig::default(),
            decoder: DecoderConfig::default(),
            policy: PolicyConfig::default(),
            broadcast: BroadcastConfig::default(),
            evm: EvmConfig::default(),
            swap: SwapConfig::default(),
        }
    }
}
