//! Broadcast engine
//!
//! Fans a signed transaction out to every endpoint, returns on the first
//! acceptance, then keeps a time-boxed rebroadcast loop running in the
//! background until the transaction confirms, expires, or the urgency mode's
//! max duration elapses.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ModeConfig, UrgencyMode, UrgencyModes};
use crate::error::{Error, Result};

use super::endpoint::{timed_send, timed_status, SendOutcome, TxEndpoint, TxStatus};

/// Job status as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum BroadcastStatus {
    Submitted,
    Processed,
    Confirmed,
    Finalized,
    Expired,
    Failed(String),
}

impl BroadcastStatus {
    pub fn is_landed(&self) -> bool {
        matches!(
            self,
            BroadcastStatus::Processed | BroadcastStatus::Confirmed | BroadcastStatus::Finalized
        )
    }
}

impl std::fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastStatus::Submitted => write!(f, "submitted"),
            BroadcastStatus::Processed => write!(f, "processed"),
            BroadcastStatus::Confirmed => write!(f, "confirmed"),
            BroadcastStatus::Finalized => write!(f, "finalized"),
            BroadcastStatus::Expired => write!(f, "expired"),
            BroadcastStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-endpoint failures collected during one fan-out
#[derive(Debug, Clone, Default)]
pub struct EndpointErrors(Vec<(String, String)>);

impl EndpointErrors {
    pub fn push(&mut self, endpoint: &str, err: &Error) {
        self.0.push((endpoint.to_string(), err.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn summary(&self) -> String {
        self.0
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Consumable stream of status changes
pub struct StatusUpdates {
    rx: watch::Receiver<BroadcastStatus>,
}

impl StatusUpdates {
    /// Next change; None once the job ended and every change was delivered
    pub async fn next(&mut self) -> Option<BroadcastStatus> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }
}

/// Handle to a running rebroadcast; dropping it leaves the loop running
pub struct BroadcastJob {
    pub id: Uuid,
    pub signature: String,
    pub mode: UrgencyMode,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub endpoints_attempted: Vec<String>,
    status: watch::Receiver<BroadcastStatus>,
    handle: JoinHandle<BroadcastStatus>,
}

impl BroadcastJob {
    /// Latest published status
    pub fn status(&self) -> BroadcastStatus {
        self.status.borrow().clone()
    }

    pub fn updates(&self) -> StatusUpdates {
        StatusUpdates {
            rx: self.status.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to terminate and return its final status
    pub async fn wait(self) -> BroadcastStatus {
        match self.handle.await {
            Ok(status) => status,
            Err(e) => BroadcastStatus::Failed(format!("rebroadcast task ended: {}", e)),
        }
    }
}

pub struct BroadcastEngine {
    endpoints: Vec<Arc<dyn TxEndpoint>>,
    modes: UrgencyModes,
    endpoint_timeout: Duration,
    /// Index of the endpoint that last accepted a send
    last_good: Arc<RwLock<Option<usize>>>,
}

impl BroadcastEngine {
    pub fn new(
        endpoints: Vec<Arc<dyn TxEndpoint>>,
        modes: UrgencyModes,
        endpoint_timeout: Duration,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::Config("broadcast needs at least one endpoint".to_string()));
        }
        Ok(Self {
            endpoints,
            modes,
            endpoint_timeout,
            last_good: Arc::new(RwLock::new(None)),
        })
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.name().to_string()).collect()
    }

    /// Send to all endpoints; returns on the first acceptance
    pub async fn submit(&self, raw: Vec<u8>, mode: UrgencyMode) -> Result<BroadcastJob> {
        let started = Instant::now();
        let started_at = Utc::now();
        let raw = Arc::new(raw);

        let (outcome, index) = self.initial_fan_out(&raw).await?;
        *self.last_good.write().await = Some(index);

        let signature = outcome.signature().to_string();
        let initial = match outcome {
            SendOutcome::AlreadyProcessed(_) => BroadcastStatus::Processed,
            SendOutcome::Accepted(_) => BroadcastStatus::Submitted,
        };

        let ModeConfig {
            interval_ms,
            max_duration_secs,
        } = self.modes.get(mode).clone();
        let max_duration = Duration::from_secs(max_duration_secs);

        let id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(initial.clone());
        let ctx = LoopContext {
            id,
            endpoints: self.endpoints.clone(),
            last_good: self.last_good.clone(),
            timeout: self.endpoint_timeout,
            raw,
            signature: signature.clone(),
            interval: Duration::from_millis(interval_ms),
            deadline: started + max_duration,
        };
        let handle = match initial {
            // The chain already has it; nothing left to rebroadcast
            BroadcastStatus::Processed => {
                info!("Job {} already processed on first send", id);
                tokio::spawn(async move { publish(&status_tx, BroadcastStatus::Processed) })
            }
            _ => tokio::spawn(rebroadcast_loop(ctx, status_tx, initial)),
        };

        info!(
            "Broadcast job {} accepted by {} as {} ({} mode)",
            id,
            self.endpoints[index].name(),
            signature,
            mode
        );

        Ok(BroadcastJob {
            id,
            signature,
            mode,
            started_at,
            deadline: started_at
                + chrono::Duration::from_std(max_duration).unwrap_or(chrono::Duration::zero()),
            endpoints_attempted: self.endpoint_names(),
            status: status_rx,
            handle,
        })
    }

    async fn initial_fan_out(&self, raw: &Arc<Vec<u8>>) -> Result<(SendOutcome, usize)> {
        let mut sends: FuturesUnordered<JoinHandle<(usize, Result<SendOutcome>)>> = self
            .endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| {
                let endpoint = endpoint.clone();
                let raw = raw.clone();
                let timeout = self.endpoint_timeout;
                tokio::spawn(async move {
                    (index, timed_send(endpoint.as_ref(), &raw, timeout).await)
                })
            })
            .collect();

        let mut errors = EndpointErrors::default();
        while let Some(joined) = sends.next().await {
            match joined {
                Ok((index, Ok(outcome))) => {
                    let names = self.endpoint_names();
                    tokio::spawn(drain_late_sends(sends, names, errors));
                    return Ok((outcome, index));
                }
                Ok((index, Err(e))) => {
                    debug!("Endpoint {} rejected send: {}", self.endpoints[index].name(), e);
                    errors.push(self.endpoints[index].name(), &e);
                }
                Err(e) => errors.push("send task", &Error::Internal(e.to_string())),
            }
        }

        warn!("No endpoint accepted the transaction: {}", errors.summary());
        Err(Error::AllEndpointsFailed(errors.summary()))
    }
}

/// Let sends still in flight after the first acceptance settle, then log
/// every endpoint failure of the fan-out as one summary
async fn drain_late_sends(
    mut sends: FuturesUnordered<JoinHandle<(usize, Result<SendOutcome>)>>,
    names: Vec<String>,
    mut errors: EndpointErrors,
) -> EndpointErrors {
    while let Some(joined) = sends.next().await {
        match joined {
            Ok((index, Ok(_))) => debug!("Endpoint {} also accepted", names[index]),
            Ok((index, Err(e))) => errors.push(&names[index], &e),
            Err(e) => errors.push("send task", &Error::Internal(e.to_string())),
        }
    }
    if !errors.is_empty() {
        debug!("Initial fan-out endpoint errors: {}", errors.summary());
    }
    errors
}

enum RoundOutcome {
    Sent,
    NoneAccepted,
    AlreadyProcessed,
    Expired,
}

struct LoopContext {
    id: Uuid,
    endpoints: Vec<Arc<dyn TxEndpoint>>,
    last_good: Arc<RwLock<Option<usize>>>,
    timeout: Duration,
    raw: Arc<Vec<u8>>,
    signature: String,
    interval: Duration,
    deadline: Instant,
}

impl LoopContext {
    /// Best status across every status-capable endpoint
    async fn poll(&self) -> TxStatus {
        let polls = self
            .endpoints
            .iter()
            .filter(|e| e.supports_status())
            .map(|endpoint| async move {
                match timed_status(endpoint.as_ref(), &self.signature, self.timeout).await {
                    Ok(status) => status,
                    Err(e) => {
                        debug!("Status poll on {} failed: {}", endpoint.name(), e);
                        TxStatus::Unknown
                    }
                }
            });

        join_all(polls)
            .await
            .into_iter()
            .fold(TxStatus::Unknown, TxStatus::merge)
    }

    /// Last good endpoint first, full fan-out if it fails
    async fn resend(&self) -> RoundOutcome {
        let preferred = *self.last_good.read().await;
        if let Some(endpoint) = preferred.and_then(|i| self.endpoints.get(i)) {
            match timed_send(endpoint.as_ref(), &self.raw, self.timeout).await {
                Ok(SendOutcome::Accepted(_)) => return RoundOutcome::Sent,
                Ok(SendOutcome::AlreadyProcessed(_)) => return RoundOutcome::AlreadyProcessed,
                Err(Error::ValidityWindowExpired) => return RoundOutcome::Expired,
                Err(e) => {
                    debug!("Preferred endpoint {} failed: {}", endpoint.name(), e);
                    *self.last_good.write().await = None;
                }
            }
        }

        let results = join_all(self.endpoints.iter().enumerate().map(|(i, endpoint)| async move {
            (i, timed_send(endpoint.as_ref(), &self.raw, self.timeout).await)
        }))
        .await;

        let mut accepted = None;
        let mut expired = false;
        let mut errors = EndpointErrors::default();
        for (i, result) in results {
            match result {
                Ok(SendOutcome::AlreadyProcessed(_)) => return RoundOutcome::AlreadyProcessed,
                Ok(SendOutcome::Accepted(_)) => {
                    accepted.get_or_insert(i);
                }
                Err(Error::ValidityWindowExpired) => expired = true,
                Err(e) => errors.push(self.endpoints[i].name(), &e),
            }
        }

        if expired {
            return RoundOutcome::Expired;
        }
        match accepted {
            Some(i) => {
                *self.last_good.write().await = Some(i);
                RoundOutcome::Sent
            }
            None => {
                debug!("Rebroadcast round for {} failed: {}", self.id, errors.summary());
                RoundOutcome::NoneAccepted
            }
        }
    }
}

fn publish(tx: &watch::Sender<BroadcastStatus>, status: BroadcastStatus) -> BroadcastStatus {
    tx.send_replace(status.clone());
    status
}

async fn rebroadcast_loop(
    ctx: LoopContext,
    status_tx: watch::Sender<BroadcastStatus>,
    mut last: BroadcastStatus,
) -> BroadcastStatus {
    loop {
        sleep(ctx.interval).await;

        match ctx.poll().await {
            TxStatus::Confirmed => {
                info!("Job {} confirmed", ctx.id);
                return publish(&status_tx, BroadcastStatus::Confirmed);
            }
            TxStatus::Finalized => {
                info!("Job {} finalized", ctx.id);
                return publish(&status_tx, BroadcastStatus::Finalized);
            }
            TxStatus::Failed(reason) => {
                warn!("Job {} failed on chain: {}", ctx.id, reason);
                return publish(&status_tx, BroadcastStatus::Failed(reason));
            }
            TxStatus::Processed => {
                last = BroadcastStatus::Processed;
                status_tx.send_if_modified(|current| {
                    if *current != BroadcastStatus::Processed {
                        *current = BroadcastStatus::Processed;
                        true
                    } else {
                        false
                    }
                });
            }
            TxStatus::Unknown => {}
        }

        match ctx.resend().await {
            RoundOutcome::AlreadyProcessed => {
                info!("Job {} already processed", ctx.id);
                return publish(&status_tx, BroadcastStatus::Processed);
            }
            RoundOutcome::Expired => {
                // A resend can look expired because the original already landed
                let status = match ctx.poll().await {
                    TxStatus::Finalized => BroadcastStatus::Finalized,
                    TxStatus::Confirmed => BroadcastStatus::Confirmed,
                    TxStatus::Processed => BroadcastStatus::Processed,
                    TxStatus::Failed(reason) => BroadcastStatus::Failed(reason),
                    TxStatus::Unknown => {
                        warn!("Job {} validity window expired", ctx.id);
                        BroadcastStatus::Expired
                    }
                };
                return publish(&status_tx, status);
            }
            RoundOutcome::Sent | RoundOutcome::NoneAccepted => {}
        }

        if Instant::now() >= ctx.deadline {
            info!("Job {} reached max duration, last status {}", ctx.id, last);
            return publish(&status_tx, last);
        }
    }
}
