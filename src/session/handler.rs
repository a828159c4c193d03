//! Session protocol handler
//!
//! Owns pairing proposals, live sessions and inbound requests. At most one
//! request is pending for a user decision at any moment; a newer request
//! supersedes the older one, which is rejected over the wire before the new
//! one becomes pending.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::config::SessionConfig;
use crate::decoder::DecodedTransaction;
use crate::error::{Error, Result};
use crate::request::RequestKind;

use super::relay::RelayTransport;
use super::store::SessionStore;
use super::types::{
    Namespaces, Proposal, RequestKey, RequestStatus, Session, SessionRequest, SessionState,
    WireError,
};

/// What a sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_sessions: Vec<String>,
    pub expired_requests: Vec<RequestKey>,
}

pub struct SessionHandler {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    relay: Arc<dyn RelayTransport>,
    proposals: DashMap<u64, Proposal>,
    requests: DashMap<RequestKey, SessionRequest>,
    /// Application-wide slot for the one request awaiting a decision
    pending: Mutex<Option<RequestKey>>,
}

impl SessionHandler {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        relay: Arc<dyn RelayTransport>,
    ) -> Self {
        Self {
            config,
            store,
            relay,
            proposals: DashMap::new(),
            requests: DashMap::new(),
            pending: Mutex::new(None),
        }
    }

    pub fn on_proposal(&self, proposal: Proposal) {
        info!(
            "Pairing proposal {} from {} ({})",
            proposal.id, proposal.proposer.name, proposal.proposer.url
        );
        self.proposals.insert(proposal.id, proposal);
    }

    pub fn proposal(&self, id: u64) -> Option<Proposal> {
        self.proposals.get(&id).map(|p| p.clone())
    }

    /// Settle a session; it becomes Active once the relay acknowledges
    pub async fn approve_proposal(&self, id: u64, namespaces: Namespaces) -> Result<Session> {
        let proposal = self
            .proposals
            .remove(&id)
            .map(|(_, p)| p)
            .ok_or_else(|| Error::ValidationFailed(format!("unknown proposal {}", id)))?;

        if let Err(wire) = check_required(&proposal.required_namespaces, &namespaces) {
            warn!("Proposal {} not satisfiable: {}", id, wire);
            if let Err(e) = self.relay.reject_proposal(id, &wire).await {
                warn!("Failed to send proposal rejection: {}", e);
            }
            return Err(wire_to_error(&wire));
        }

        let mut session = Session {
            topic: new_topic(),
            pairing_topic: proposal.pairing_topic.clone(),
            state: SessionState::Approved,
            namespaces,
            peer: proposal.proposer.clone(),
            expiry: Utc::now() + chrono::Duration::seconds(self.config.session_ttl_secs as i64),
        };
        self.store.create(session.clone())?;

        if let Err(e) = self.relay.settle_session(&session).await {
            warn!("Session settlement for {} failed: {}", session.topic, e);
            self.store.remove(&session.topic);
            return Err(e);
        }

        session.state = SessionState::Active;
        self.store.update(session.clone())?;
        info!("Session {} active with {}", session.topic, session.peer.name);
        Ok(session)
    }

    pub async fn reject_proposal(&self, id: u64) -> Result<()> {
        self.proposals.remove(&id);
        self.relay
            .reject_proposal(id, &WireError::user_rejected())
            .await
    }

    pub fn session(&self, topic: &str) -> Option<Session> {
        self.store.get(topic)
    }

    /// Decode an inbound request; on success it is the one pending request
    pub async fn on_request(
        &self,
        topic: &str,
        id: u64,
        method: &str,
        params: Value,
        chain_id: Option<String>,
    ) -> Result<SessionRequest> {
        let now = Utc::now();
        let session = match self.store.get(topic) {
            Some(s) if s.state == SessionState::Active && !s.is_expired(now) => s,
            _ => {
                self.send_error(topic, id, &WireError::session_expired()).await;
                return Err(Error::SessionExpired(topic.to_string()));
            }
        };

        let key = RequestKey::new(topic, id);
        if let Some(existing) = self.request(&key) {
            let err = Error::ValidationFailed(format!("duplicate request id {}", id));
            // A redelivered pending request is still answered by the user decision
            if existing.is_pending() {
                debug!("Ignoring redelivered request {}", key);
            } else {
                warn!("Rejecting reused request id {}", key);
                self.send_error(topic, id, &WireError::from_error(&err)).await;
            }
            return Err(err);
        }

        let kind = match RequestKind::parse(method, &params) {
            Ok(RequestKind::Unsupported(m)) => {
                self.send_error(topic, id, &WireError::unsupported_method(&m))
                    .await;
                return Err(Error::UnsupportedMethod(m));
            }
            Ok(kind) => kind,
            Err(e) => {
                self.send_error(topic, id, &WireError::from_error(&e)).await;
                return Err(e);
            }
        };

        let chain = kind.chain().unwrap_or(Chain::Evm);
        if let Err(wire) = session.allows(chain, chain_id.as_deref(), method) {
            self.send_error(topic, id, &wire).await;
            return Err(wire_to_error(&wire));
        }

        let request = SessionRequest {
            id,
            topic: topic.to_string(),
            method: method.to_string(),
            params,
            chain_id,
            kind,
            analysis: None,
            status: RequestStatus::Pending,
            received_at: now,
        };

        let mut slot = self.pending.lock().await;
        if let Some(previous) = slot.take() {
            self.supersede(previous).await;
        }
        self.requests.insert(key.clone(), request.clone());
        *slot = Some(key);

        info!("Request {} ({}) pending on {}", id, method, topic);
        Ok(request)
    }

    /// The request awaiting a user decision
    pub async fn pending(&self) -> Option<SessionRequest> {
        let slot = self.pending.lock().await;
        slot.as_ref().and_then(|key| self.request(key))
    }

    pub fn request(&self, key: &RequestKey) -> Option<SessionRequest> {
        self.requests.get(key).map(|r| r.clone())
    }

    /// Store the decoder output next to a pending request
    pub fn attach_analysis(&self, key: &RequestKey, analysis: Vec<DecodedTransaction>) -> Result<()> {
        match self.requests.get_mut(key) {
            Some(mut r) if r.is_pending() => {
                r.analysis = Some(analysis);
                Ok(())
            }
            _ => Err(Error::RequestNotPending(key.id)),
        }
    }

    /// Send the result and resolve the request as Approved
    pub async fn approve_request(&self, key: &RequestKey, result: Value) -> Result<()> {
        let mut slot = self.pending.lock().await;
        if slot.as_ref() != Some(key) {
            return Err(Error::RequestNotPending(key.id));
        }

        self.relay.respond_result(&key.topic, key.id, &result).await?;
        self.set_status(key, RequestStatus::Approved);
        *slot = None;

        info!("Request {} approved", key);
        Ok(())
    }

    pub async fn reject_request(&self, key: &RequestKey) -> Result<()> {
        self.reject_with(key, WireError::user_rejected()).await
    }

    /// Resolve the pending request as Rejected with a specific wire error
    pub async fn reject_with(&self, key: &RequestKey, error: WireError) -> Result<()> {
        let mut slot = self.pending.lock().await;
        if slot.as_ref() != Some(key) {
            return Err(Error::RequestNotPending(key.id));
        }

        self.send_error(&key.topic, key.id, &error).await;
        self.set_status(key, RequestStatus::Rejected);
        *slot = None;

        info!("Request {} rejected: {}", key, error);
        Ok(())
    }

    /// Local disconnect: tell the peer, then forget the session
    pub async fn disconnect(&self, topic: &str) -> Result<()> {
        let removed = self.store.remove(topic);
        if removed.is_none() {
            return Err(Error::SessionExpired(topic.to_string()));
        }
        if let Err(e) = self
            .relay
            .disconnect(topic, &WireError::user_disconnected())
            .await
        {
            warn!("Failed to notify peer of disconnect on {}: {}", topic, e);
        }
        self.clear_topic(topic).await;
        info!("Session {} disconnected", topic);
        Ok(())
    }

    /// Remote deletion; pending work on the topic is dropped without a reply
    pub async fn on_session_delete(&self, topic: &str) {
        self.store.remove(topic);
        self.clear_topic(topic).await;
        info!("Session {} deleted by peer", topic);
    }

    /// Expire stale sessions and pending requests past their TTL
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            expired_sessions: self.store.sweep_expired(now),
            ..Default::default()
        };
        for topic in &report.expired_sessions {
            self.clear_topic(topic).await;
        }

        let request_ttl = chrono::Duration::seconds(self.config.request_ttl_secs as i64);

        let mut slot = self.pending.lock().await;
        let stale = slot
            .as_ref()
            .and_then(|key| self.request(key))
            .filter(|request| now - request.received_at >= request_ttl);
        if let Some(request) = stale {
            let key = request.key();
            self.send_error(&key.topic, key.id, &WireError::request_expired())
                .await;
            self.set_status(&key, RequestStatus::Rejected);
            *slot = None;
            report.expired_requests.push(key);
        }
        drop(slot);

        // Resolved requests are kept for one TTL so late lookups still work
        self.requests
            .retain(|_, r| r.is_pending() || now - r.received_at < request_ttl);

        if !report.expired_sessions.is_empty() || !report.expired_requests.is_empty() {
            info!(
                "Sweep expired {} sessions and {} requests",
                report.expired_sessions.len(),
                report.expired_requests.len()
            );
        }
        report
    }

    /// Periodic sweep; stops once the handler is dropped
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let Some(handler) = weak.upgrade() else {
                    debug!("Session handler dropped, sweeper exiting");
                    break;
                };
                handler.sweep_expired(Utc::now()).await;
            }
        })
    }

    async fn supersede(&self, key: RequestKey) {
        match self.requests.get_mut(&key) {
            Some(mut r) => r.status = RequestStatus::Superseded,
            None => return,
        }

        info!("Request {} superseded", key);
        self.send_error(&key.topic, key.id, &WireError::superseded())
            .await;
    }

    async fn clear_topic(&self, topic: &str) {
        let mut slot = self.pending.lock().await;
        if slot.as_ref().is_some_and(|key| key.topic == topic) {
            debug!("Dropping pending request for closed session {}", topic);
            *slot = None;
        }
        self.requests.retain(|key, _| key.topic != topic);
    }

    async fn send_error(&self, topic: &str, id: u64, error: &WireError) {
        if let Err(e) = self.relay.respond_error(topic, id, error).await {
            warn!("Failed to send error for request {}: {}", id, e);
        }
    }

    fn set_status(&self, key: &RequestKey, status: RequestStatus) {
        if let Some(mut r) = self.requests.get_mut(key) {
            r.status = status;
        }
    }
}

/// Every required chain and method must be granted
fn check_required(required: &Namespaces, granted: &Namespaces) -> std::result::Result<(), WireError> {
    for (key, need) in required {
        if Chain::from_namespace(key).is_none() {
            return Err(WireError::unsupported_chain(key));
        }
        let Some(have) = granted.get(key) else {
            return Err(WireError::unsupported_chain(key));
        };
        if let Some(chain) = need.chains.iter().find(|c| !have.chains.contains(c)) {
            return Err(WireError::unsupported_chain(chain));
        }
        if let Some(method) = need.methods.iter().find(|m| !have.methods.contains(m)) {
            return Err(WireError::unsupported_method(method));
        }
    }
    Ok(())
}

fn wire_to_error(wire: &WireError) -> Error {
    match wire.code {
        WireError::UNSUPPORTED_CHAINS => Error::UnsupportedChain(wire.message.clone()),
        WireError::UNSUPPORTED_METHODS => Error::UnsupportedMethod(wire.message.clone()),
        _ => Error::ValidationFailed(wire.message.clone()),
    }
}

fn new_topic() -> String {
    hex::encode(Sha256::digest(uuid::Uuid::new_v4().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::relay::{MemoryRelay, RelayMessage};
    use crate::session::store::MemorySessionStore;
    use crate::session::types::{Namespace, PeerMetadata};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::OnceLock;

    const WALLET: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";

    fn namespaces() -> Namespaces {
        let mut ns = Namespaces::new();
        ns.insert(
            "eip155".to_string(),
            Namespace {
                chains: vec!["eip155:1".to_string()],
                methods: vec!["personal_sign".to_string(), "eth_sendTransaction".to_string()],
                events: vec![],
                accounts: vec![format!("eip155:1:{}", WALLET)],
            },
        );
        ns
    }

    fn proposal(id: u64) -> Proposal {
        let mut required = Namespaces::new();
        required.insert(
            "eip155".to_string(),
            Namespace {
                chains: vec!["eip155:1".to_string()],
                methods: vec!["personal_sign".to_string()],
                ..Default::default()
            },
        );
        Proposal {
            id,
            pairing_topic: "pairing".to_string(),
            proposer: PeerMetadata {
                name: "Test Dapp".to_string(),
                url: "https://dapp.example".to_string(),
                ..Default::default()
            },
            required_namespaces: required,
            optional_namespaces: Namespaces::new(),
        }
    }

    fn handler(relay: Arc<dyn RelayTransport>) -> SessionHandler {
        SessionHandler::new(
            SessionConfig::default(),
            Arc::new(MemorySessionStore::new()),
            relay,
        )
    }

    async fn active_session(h: &SessionHandler) -> Session {
        h.on_proposal(proposal(1));
        h.approve_proposal(1, namespaces()).await.unwrap()
    }

    fn sign(text: &str) -> Value {
        json!([text, WALLET])
    }

    #[tokio::test]
    async fn test_proposal_settles_to_active() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let session = active_session(&h).await;

        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.topic.len(), 64);
        assert_eq!(h.session(&session.topic).unwrap().state, SessionState::Active);
        assert!(matches!(relay.sent()[0], RelayMessage::Settle { .. }));
    }

    #[tokio::test]
    async fn test_unsatisfiable_proposal_rejected() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        h.on_proposal(proposal(7));

        let err = h.approve_proposal(7, Namespaces::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedChain(_)));
        assert!(matches!(
            relay.sent()[0],
            RelayMessage::RejectProposal { id: 7, ref error } if error.code == 5100
        ));
    }

    #[tokio::test]
    async fn test_second_request_supersedes_first() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let topic = active_session(&h).await.topic;

        h.on_request(&topic, 1, "personal_sign", sign("first"), None)
            .await
            .unwrap();
        h.on_request(&topic, 2, "personal_sign", sign("second"), None)
            .await
            .unwrap();

        let first = RequestKey::new(&topic, 1);
        assert_eq!(h.request(&first).unwrap().status, RequestStatus::Superseded);
        assert_eq!(h.pending().await.unwrap().id, 2);
        assert!(relay.sent().contains(&RelayMessage::Error {
            topic: topic.clone(),
            id: 1,
            error: WireError::superseded(),
        }));

        // Superseded requests cannot be approved later
        assert!(matches!(
            h.approve_request(&first, json!("0x")).await,
            Err(Error::RequestNotPending(1))
        ));
    }

    /// Records whether request 2 existed when request 1's rejection went out
    struct OrderRecorder {
        handler: OnceLock<Weak<SessionHandler>>,
        seen: std::sync::Mutex<Vec<(u64, Option<RequestStatus>)>>,
    }

    #[async_trait]
    impl RelayTransport for OrderRecorder {
        async fn settle_session(&self, _session: &Session) -> Result<()> {
            Ok(())
        }
        async fn reject_proposal(&self, _id: u64, _error: &WireError) -> Result<()> {
            Ok(())
        }
        async fn respond_result(&self, _topic: &str, _id: u64, _result: &Value) -> Result<()> {
            Ok(())
        }
        async fn respond_error(&self, topic: &str, id: u64, _error: &WireError) -> Result<()> {
            let second = self
                .handler
                .get()
                .and_then(|w| w.upgrade())
                .and_then(|h| h.request(&RequestKey::new(topic, 2)))
                .map(|r| r.status);
            self.seen.lock().unwrap().push((id, second));
            Ok(())
        }
        async fn disconnect(&self, _topic: &str, _error: &WireError) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rejection_sent_before_new_request_pending() {
        let recorder = Arc::new(OrderRecorder {
            handler: OnceLock::new(),
            seen: std::sync::Mutex::new(vec![]),
        });
        let h = Arc::new(handler(recorder.clone()));
        recorder.handler.set(Arc::downgrade(&h)).unwrap();

        let topic = active_session(&h).await.topic;
        h.on_request(&topic, 1, "personal_sign", sign("a"), None)
            .await
            .unwrap();
        h.on_request(&topic, 2, "personal_sign", sign("b"), None)
            .await
            .unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec![(1, None)]);
        assert_eq!(
            h.request(&RequestKey::new(&topic, 2)).unwrap().status,
            RequestStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unsupported_and_invalid_never_pending() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let topic = active_session(&h).await.topic;

        let err = h
            .on_request(&topic, 1, "wallet_addEthereumChain", json!([]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod(_)));

        let err = h
            .on_request(&topic, 2, "personal_sign", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));

        // Valid shape but not granted in the session namespace
        let err = h
            .on_request(&topic, 3, "eth_sign", json!([WALLET, "0x00"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod(_)));

        assert!(h.pending().await.is_none());
        let codes: Vec<i64> = relay
            .sent()
            .iter()
            .filter_map(|m| match m {
                RelayMessage::Error { error, .. } => Some(error.code),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec![5101, -32602, 5101]);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_expired() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let err = h
            .on_request("nope", 1, "personal_sign", sign("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
        assert!(matches!(
            relay.sent()[0],
            RelayMessage::Error { ref error, .. } if error.code == 7001
        ));
    }

    #[tokio::test]
    async fn test_approve_and_reject_resolve_once() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let topic = active_session(&h).await.topic;

        h.on_request(&topic, 10, "personal_sign", sign("a"), None)
            .await
            .unwrap();
        let approved = RequestKey::new(&topic, 10);
        h.approve_request(&approved, json!("0xsig")).await.unwrap();
        assert_eq!(h.request(&approved).unwrap().status, RequestStatus::Approved);
        assert!(h.reject_request(&approved).await.is_err());

        h.on_request(&topic, 11, "personal_sign", sign("b"), None)
            .await
            .unwrap();
        let rejected = RequestKey::new(&topic, 11);
        h.reject_request(&rejected).await.unwrap();
        assert_eq!(h.request(&rejected).unwrap().status, RequestStatus::Rejected);
        assert!(h.pending().await.is_none());
    }

    #[tokio::test]
    async fn test_session_delete_clears_pending_silently() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let topic = active_session(&h).await.topic;

        h.on_request(&topic, 5, "personal_sign", sign("a"), None)
            .await
            .unwrap();
        let sent_before = relay.sent().len();

        h.on_session_delete(&topic).await;
        assert!(h.pending().await.is_none());
        assert!(h.request(&RequestKey::new(&topic, 5)).is_none());
        assert!(h.session(&topic).is_none());
        assert_eq!(relay.sent().len(), sent_before);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_peer() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let topic = active_session(&h).await.topic;

        h.disconnect(&topic).await.unwrap();
        assert!(matches!(
            relay.sent().last(),
            Some(RelayMessage::Disconnect { error, .. }) if error.code == 6000
        ));
        assert!(h.disconnect(&topic).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_expires_requests_and_sessions() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let topic = active_session(&h).await.topic;

        h.on_request(&topic, 3, "personal_sign", sign("a"), None)
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(301);
        let report = h.sweep_expired(later).await;
        assert_eq!(report.expired_requests, vec![RequestKey::new(&topic, 3)]);
        assert!(report.expired_sessions.is_empty());
        assert!(matches!(
            relay.sent().last(),
            Some(RelayMessage::Error { error, .. }) if error.code == 8000
        ));

        let much_later = Utc::now() + chrono::Duration::days(8);
        let report = h.sweep_expired(much_later).await;
        assert_eq!(report.expired_sessions, vec![topic]);
    }

    #[tokio::test]
    async fn test_attach_analysis_only_when_pending() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay);
        let topic = active_session(&h).await.topic;

        h.on_request(&topic, 1, "personal_sign", sign("a"), None)
            .await
            .unwrap();
        let key = RequestKey::new(&topic, 1);
        h.attach_analysis(&key, vec![]).unwrap();
        assert!(h.request(&key).unwrap().analysis.is_some());
        assert!(h.attach_analysis(&RequestKey::new(&topic, 99), vec![]).is_err());
    }

    #[tokio::test]
    async fn test_same_id_on_two_sessions() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let first = active_session(&h).await.topic;
        h.on_proposal(proposal(2));
        let second = h.approve_proposal(2, namespaces()).await.unwrap().topic;
        assert_ne!(first, second);

        h.on_request(&first, 1, "personal_sign", sign("a"), None)
            .await
            .unwrap();
        h.on_request(&second, 1, "personal_sign", sign("b"), None)
            .await
            .unwrap();

        let pending = h.pending().await.unwrap();
        assert_eq!(pending.key(), RequestKey::new(&second, 1));
        assert_eq!(
            h.request(&RequestKey::new(&first, 1)).unwrap().status,
            RequestStatus::Superseded
        );
        assert!(!relay.sent().iter().any(|m| matches!(
            m,
            RelayMessage::Error { topic, .. } if *topic == second
        )));
    }

    #[tokio::test]
    async fn test_reused_id_gets_invalid_params() {
        let relay = Arc::new(MemoryRelay::new());
        let h = handler(relay.clone());
        let topic = active_session(&h).await.topic;

        let key = RequestKey::new(&topic, 4);
        h.on_request(&topic, 4, "personal_sign", sign("a"), None)
            .await
            .unwrap();

        // Redelivery while pending stays quiet
        let err = h
            .on_request(&topic, 4, "personal_sign", sign("a"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
        assert_eq!(h.pending().await.unwrap().key(), key);
        let sent_before = relay.sent().len();

        h.reject_request(&key).await.unwrap();
        let err = h
            .on_request(&topic, 4, "personal_sign", sign("again"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
        assert!(h.pending().await.is_none());
        assert!(matches!(
            relay.sent().last(),
            Some(RelayMessage::Error { id: 4, error, .. }) if error.code == WireError::INVALID_PARAMS
        ));
        assert_eq!(relay.sent().len(), sent_before + 2);
    }
}
