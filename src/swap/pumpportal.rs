//! PumpPortal local-trade API
//!
//! Returns an unsigned transaction for the wallet's public key. Signing stays
//! with the wallet: the transaction goes through review like any dapp request.
//!
//! API Documentation: https://pumpportal.fun/trading-api/

use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SwapConfig;
use crate::error::{Error, Result};
use crate::request::SolanaTx;

use super::migration::{MigrationMatcher, MigrationSignal};

/// Trade action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// Pool the trade is routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    /// Bonding curve
    Pump,
    /// AMM pool a graduated token migrates to
    #[serde(rename = "pump-amm")]
    PumpAmm,
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolType::Pump => write!(f, "pump"),
            PoolType::PumpAmm => write!(f, "pump-amm"),
        }
    }
}

/// What the user asked to trade
#[derive(Debug, Clone, PartialEq)]
pub struct SwapOrder {
    pub action: TradeAction,
    pub mint: Pubkey,
    /// SOL for buys; token amount or percentage like "100%" for sells
    pub amount: String,
}

impl SwapOrder {
    pub fn buy(mint: Pubkey, sol_amount: f64) -> Self {
        Self {
            action: TradeAction::Buy,
            mint,
            amount: sol_amount.to_string(),
        }
    }

    pub fn sell(mint: Pubkey, amount: impl Into<String>) -> Self {
        Self {
            action: TradeAction::Sell,
            mint,
            amount: amount.into(),
        }
    }

    fn denominated_in_sol(&self) -> bool {
        self.action == TradeAction::Buy
    }
}

/// Local trade request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTradeRequest {
    pub action: TradeAction,
    pub mint: String,
    pub amount: String,
    pub denominated_in_sol: String,
    pub slippage: u32,
    pub priority_fee: f64,
    pub public_key: String,
    pub pool: PoolType,
}

/// Error body returned instead of transaction bytes
#[derive(Debug, Clone, Deserialize)]
struct LocalTradeError {
    error: Option<String>,
    errors: Option<Vec<String>>,
}

pub struct PumpPortalSource {
    client: Client,
    url: String,
    slippage_pct: u32,
    priority_fee_sol: f64,
    migration: MigrationMatcher,
    retry_delay: Duration,
}

impl PumpPortalSource {
    pub fn new(config: &SwapConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            url: config.local_api_url.clone(),
            slippage_pct: config.slippage_pct,
            priority_fee_sol: config.priority_fee_sol,
            migration: MigrationMatcher::new(&config.migration_keywords)?,
            retry_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    pub fn request_body(&self, order: &SwapOrder, wallet: &Pubkey, pool: PoolType) -> LocalTradeRequest {
        LocalTradeRequest {
            action: order.action,
            mint: order.mint.to_string(),
            amount: order.amount.clone(),
            denominated_in_sol: order.denominated_in_sol().to_string(),
            slippage: self.slippage_pct,
            priority_fee: self.priority_fee_sol,
            public_key: wallet.to_string(),
            pool,
        }
    }

    /// Unsigned transaction for `order`, rerouted once to the AMM if the curve has migrated
    pub async fn fetch_transaction(&self, order: &SwapOrder, wallet: &Pubkey) -> Result<SolanaTx> {
        info!(
            "Fetching {:?} transaction for {} ({})",
            order.action, order.mint, order.amount
        );
        with_migration_fallback(&self.migration, self.retry_delay, |pool| {
            self.fetch_from(order, wallet, pool)
        })
        .await
    }

    async fn fetch_from(&self, order: &SwapOrder, wallet: &Pubkey, pool: PoolType) -> Result<SolanaTx> {
        let body = self.request_body(order, wallet, pool);
        debug!("Requesting local trade from pool {}", pool);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::SwapQuote(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(Error::SwapQuote(error_text(&bytes)));
        }

        let tx: VersionedTransaction = bincode::deserialize(&bytes)
            .map_err(|_| Error::SwapQuote(error_text(&bytes)))?;
        Ok(SolanaTx {
            bytes: bytes.to_vec(),
            tx,
        })
    }
}

fn error_text(body: &[u8]) -> String {
    match serde_json::from_slice::<LocalTradeError>(body) {
        Ok(LocalTradeError { error: Some(e), .. }) => e,
        Ok(LocalTradeError { errors: Some(list), .. }) if !list.is_empty() => list.join(", "),
        _ => String::from_utf8_lossy(body).trim().to_string(),
    }
}

/// Run `fetch` against the bonding curve, retrying once on the AMM pool
/// when the failure matches a migration keyword
pub async fn with_migration_fallback<T, F, Fut>(
    matcher: &MigrationMatcher,
    retry_delay: Duration,
    mut fetch: F,
) -> Result<T>
where
    F: FnMut(PoolType) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let message = match fetch(PoolType::Pump).await {
        Ok(value) => return Ok(value),
        Err(Error::SwapQuote(message)) => message,
        Err(e) => return Err(e),
    };

    match matcher.classify(&message) {
        MigrationSignal::Migrated => {
            info!("Bonding curve migrated ({}), retrying on {}", message, PoolType::PumpAmm);
            tokio::time::sleep(retry_delay).await;
            fetch(PoolType::PumpAmm).await
        }
        MigrationSignal::Ambiguous => {
            warn!("Ambiguous pool error, not rerouting: {}", message);
            Err(Error::SwapQuote(message))
        }
        MigrationSignal::Unrelated => Err(Error::SwapQuote(message)),
    }
}
