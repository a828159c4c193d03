//! wallet-guard - non-custodial wallet signing and broadcast from the command line
//!
//! # WARNING
//! - Signed transactions move real funds. Read every review before confirming.
//! - The recovery phrase is shown once at vault creation. Nobody can restore it for you.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

use wallet_guard::chain::Chain;
use wallet_guard::cli::commands;
use wallet_guard::config::{Config, UrgencyMode};

/// Non-custodial wallet: vault, transaction review, signing and broadcast
#[derive(Parser)]
#[command(name = "wallet-guard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChainArg {
    Solana,
    Evm,
}

impl From<ChainArg> for Chain {
    fn from(arg: ChainArg) -> Self {
        match arg {
            ChainArg::Solana => Chain::Solana,
            ChainArg::Evm => Chain::Evm,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Vault management
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Decode and risk-check a transaction without signing
    Decode {
        #[arg(long, value_enum)]
        chain: ChainArg,

        /// Solana base64/base58 transaction, or EVM transaction JSON
        payload: String,

        /// Wallet whose accounts are checked for ownership changes (Solana)
        #[arg(long)]
        wallet: Option<String>,
    },

    /// Approval policy
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Review, sign and broadcast a Solana transaction
    Send {
        /// Base64 or base58 transaction
        transaction: String,

        /// Rebroadcast urgency: standard, fast, turbo
        #[arg(long)]
        mode: Option<UrgencyMode>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Bonding-curve swaps through PumpPortal
    Swap {
        #[command(subcommand)]
        action: SwapAction,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[derive(Subcommand)]
enum VaultAction {
    /// Create a vault with a new recovery phrase
    Create,
    /// Import an existing recovery phrase
    Import,
    /// Re-encrypt the vault under a new secret
    ChangeSecret,
    /// Show vault state and addresses
    Status,
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Check whether an ERC-20 approval would be allowed
    Check {
        spender: String,

        /// Decimal or 0x amount, or "max"
        amount: String,

        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Subcommand)]
enum SwapAction {
    Buy {
        mint: String,

        /// Amount of SOL to spend
        sol_amount: f64,

        #[arg(long)]
        force: bool,
    },
    Sell {
        mint: String,

        /// Token amount or percentage like "50%"
        #[arg(default_value = "100%")]
        amount: String,

        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wallet_guard=info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Vault { action } => match action {
            VaultAction::Create => commands::vault_create(&config).await,
            VaultAction::Import => commands::vault_import(&config).await,
            VaultAction::ChangeSecret => commands::vault_change_secret(&config).await,
            VaultAction::Status => commands::vault_status(&config).await,
        },
        Commands::Decode {
            chain,
            payload,
            wallet,
        } => commands::decode(&config, chain.into(), &payload, wallet.as_deref()),
        Commands::Policy { action } => match action {
            PolicyAction::Check {
                spender,
                amount,
                token,
            } => commands::policy_check(&config, &spender, &amount, token.as_deref()),
        },
        Commands::Send {
            transaction,
            mode,
            force,
        } => commands::send(&config, &transaction, mode, force).await,
        Commands::Swap { action } => match action {
            SwapAction::Buy {
                mint,
                sol_amount,
                force,
            } => commands::swap_buy(&config, &mint, sol_amount, force).await,
            SwapAction::Sell {
                mint,
                amount,
                force,
            } => commands::swap_sell(&config, &mint, &amount, force).await,
        },
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
