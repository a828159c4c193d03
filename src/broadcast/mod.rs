//! Broadcast Engine
//!
//! Multi-endpoint submission with a background rebroadcast loop per job.

pub mod endpoint;
pub mod engine;
pub mod evm_rpc;
pub mod jito;
pub mod jsonrpc;
pub mod rpc;

pub use endpoint::{EndpointKind, SendOutcome, TxEndpoint, TxStatus};
pub use engine::{BroadcastEngine, BroadcastJob, BroadcastStatus, StatusUpdates};
pub use evm_rpc::EvmRpcEndpoint;
pub use jito::JitoRelay;
pub use rpc::SolanaRpcEndpoint;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BroadcastConfig, EvmConfig};
use crate::error::{Error, Result};

const RELAY_RETRY_BASE_DELAY_MS: u64 = 100;

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(16)
        .build()
        .map_err(|e| Error::Config(format!("http client: {}", e)))
}

/// Jito relay, primary RPC and fallbacks
pub fn solana_engine(config: &BroadcastConfig) -> Result<BroadcastEngine> {
    let timeout = Duration::from_millis(config.endpoint_timeout_ms);
    let http = http_client(timeout)?;

    let mut endpoints: Vec<Arc<dyn TxEndpoint>> = vec![
        Arc::new(JitoRelay::new(
            http,
            &config.priority_relay_url,
            Duration::from_millis(RELAY_RETRY_BASE_DELAY_MS),
        )),
        Arc::new(SolanaRpcEndpoint::new(
            "primary",
            &config.primary_rpc,
            EndpointKind::Primary,
            timeout,
        )),
    ];
    for (i, url) in config.fallback_rpcs.iter().enumerate() {
        endpoints.push(Arc::new(SolanaRpcEndpoint::new(
            format!("fallback-{}", i + 1),
            url,
            EndpointKind::Fallback,
            timeout,
        )));
    }

    BroadcastEngine::new(endpoints, config.modes.clone(), timeout)
}

/// EVM primary RPC and fallbacks; the primary is also returned for field filling
pub fn evm_engine(
    config: &BroadcastConfig,
    evm: &EvmConfig,
) -> Result<(BroadcastEngine, Arc<EvmRpcEndpoint>)> {
    let timeout = Duration::from_millis(config.endpoint_timeout_ms);
    let http = http_client(timeout)?;

    let primary = Arc::new(EvmRpcEndpoint::new(
        "evm-primary",
        http.clone(),
        &evm.rpc_url,
        EndpointKind::Primary,
    ));
    let mut endpoints: Vec<Arc<dyn TxEndpoint>> = vec![primary.clone()];
    for (i, url) in evm.fallback_rpcs.iter().enumerate() {
        endpoints.push(Arc::new(EvmRpcEndpoint::new(
            format!("evm-fallback-{}", i + 1),
            http.clone(),
            url,
            EndpointKind::Fallback,
        )));
    }

    Ok((BroadcastEngine::new(endpoints, config.modes.clone(), timeout)?, primary))
}
