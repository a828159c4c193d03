//! Signing pipeline
//!
//! Review is a pure decision over the request (decode, risk, policy) and
//! never touches key material. Approval requires a consent token from the UI
//! and runs unlock, sign and optional broadcast strictly in sequence.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::{self, BroadcastEngine, BroadcastJob, EvmRpcEndpoint};
use crate::chain::{Chain, WalletId};
use crate::config::{Config, UrgencyMode};
use crate::decoder::{batch_risk, DecodedTransaction, RiskAnalyzer, RiskLevel, WalletContext};
use crate::error::{Error, Result};
use crate::evm::Word;
use crate::policy::{build_capped_approval, build_capped_permit, PolicyDecision, PolicyEngine};
use crate::request::RequestKind;
use crate::session::{RequestKey, SessionHandler, WireError};
use crate::signer::{SignedArtifact, TransactionSigner};
use crate::vault::{UnlockOptions, VaultManager};

/// Display labels for addresses and program ids
///
/// Labels are cosmetic; they are never consulted for a block decision.
pub trait LabelProvider: Send + Sync {
    fn label(&self, chain: Chain, address: &str) -> Option<String>;
}

/// Provider with no labels
pub struct NoLabels;

impl LabelProvider for NoLabels {
    fn label(&self, _chain: Chain, _address: &str) -> Option<String> {
        None
    }
}

/// What the UI may offer for a reviewed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    /// Drainer detected; the only way out
    Dismiss,
    UseCappedAllowance,
}

/// Everything the UI needs to ask for consent
#[derive(Debug, Clone)]
pub struct Review {
    pub id: Uuid,
    pub request: RequestKind,
    pub decoded: Vec<DecodedTransaction>,
    pub risk: RiskLevel,
    pub policy: PolicyDecision,
    pub actions: Vec<ReviewAction>,
    pub labels: BTreeMap<String, String>,
}

impl Review {
    pub fn is_blocked(&self) -> bool {
        self.decoded.iter().any(|d| d.is_blocked())
    }

    /// The error that stops this request from being signed, if any
    pub fn blocking_error(&self) -> Option<Error> {
        self.decoded
            .iter()
            .find_map(|d| d.blocked_error())
            .or_else(|| self.policy.error())
    }

    pub fn allows(&self, action: ReviewAction) -> bool {
        self.actions.contains(&action)
    }
}

/// Explicit user consent to sign a reviewed request
#[derive(Debug)]
pub struct Consent {
    _private: (),
}

impl Consent {
    pub fn granted_by_user() -> Self {
        Self { _private: () }
    }
}

/// Result of an approved request
pub struct SignOutcome {
    pub artifacts: Vec<SignedArtifact>,
    /// Running rebroadcast for send methods
    pub job: Option<BroadcastJob>,
    /// JSON-RPC result to return to the requester
    pub result: Value,
}

pub struct SigningPipeline {
    vault: Arc<VaultManager>,
    analyzer: Arc<RiskAnalyzer>,
    policy: PolicyEngine,
    signer: TransactionSigner,
    context: WalletContext,
    labels: Arc<dyn LabelProvider>,
    solana_broadcast: Option<Arc<BroadcastEngine>>,
    evm_broadcast: Option<Arc<BroadcastEngine>>,
    evm_rpc: Option<Arc<EvmRpcEndpoint>>,
    evm_chain_id: u64,
    mode: UrgencyMode,
}

impl SigningPipeline {
    pub fn new(
        vault: Arc<VaultManager>,
        analyzer: Arc<RiskAnalyzer>,
        policy: PolicyEngine,
        wallet: WalletId,
        context: WalletContext,
        evm_chain_id: u64,
    ) -> Self {
        let signer = TransactionSigner::new(
            vault.clone(),
            analyzer.clone(),
            wallet,
            context,
            evm_chain_id,
        );
        Self {
            vault,
            analyzer,
            policy,
            signer,
            context,
            labels: Arc::new(NoLabels),
            solana_broadcast: None,
            evm_broadcast: None,
            evm_rpc: None,
            evm_chain_id,
            mode: UrgencyMode::Standard,
        }
    }

    /// Pipeline with broadcast engines for both chain families
    pub fn from_config(
        config: &Config,
        vault: Arc<VaultManager>,
        wallet: WalletId,
        context: WalletContext,
    ) -> Result<Self> {
        let analyzer = Arc::new(RiskAnalyzer::new(&config.decoder, &config.evm));
        let (evm_engine, evm_rpc) = broadcast::evm_engine(&config.broadcast, &config.evm)?;

        Ok(Self::new(
            vault,
            analyzer,
            PolicyEngine::new(&config.policy),
            wallet,
            context,
            config.evm.chain_id,
        )
        .with_solana_broadcast(Arc::new(broadcast::solana_engine(&config.broadcast)?))
        .with_evm_broadcast(Arc::new(evm_engine), evm_rpc)
        .with_mode(config.broadcast.default_mode))
    }

    pub fn with_labels(mut self, labels: Arc<dyn LabelProvider>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_solana_broadcast(mut self, engine: Arc<BroadcastEngine>) -> Self {
        self.solana_broadcast = Some(engine);
        self
    }

    pub fn with_evm_broadcast(
        mut self,
        engine: Arc<BroadcastEngine>,
        rpc: Arc<EvmRpcEndpoint>,
    ) -> Self {
        self.evm_broadcast = Some(engine);
        self.evm_rpc = Some(rpc);
        self
    }

    pub fn with_mode(mut self, mode: UrgencyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn context(&self) -> &WalletContext {
        &self.context
    }

    /// Decode and evaluate a request
    pub fn review(&self, request: &RequestKind) -> Result<Review> {
        let decoded = self.analyzer.analyze(request, &self.context)?;
        let risk = batch_risk(&decoded);

        let policy = if request.chain() == Some(Chain::Evm) {
            let intents: Vec<_> = decoded.iter().flat_map(|d| d.approvals.clone()).collect();
            self.policy.evaluate_all(&intents)
        } else {
            PolicyDecision::Allow
        };

        let blocked = decoded.iter().any(|d| d.is_blocked());
        let actions = match (&policy, blocked) {
            (_, true) => vec![ReviewAction::Dismiss],
            (PolicyDecision::Block { alternative: Some(_), .. }, false) => {
                vec![ReviewAction::UseCappedAllowance, ReviewAction::Reject]
            }
            (PolicyDecision::Block { alternative: None, .. }, false) => vec![ReviewAction::Reject],
            (PolicyDecision::Allow, false) => vec![ReviewAction::Approve, ReviewAction::Reject],
        };

        let labels = self.collect_labels(&decoded);
        let review = Review {
            id: Uuid::new_v4(),
            request: request.clone(),
            decoded,
            risk,
            policy,
            actions,
            labels,
        };

        info!(
            "Review {} for {}: risk {}, actions {:?}",
            review.id,
            request.method(),
            review.risk,
            review.actions
        );
        Ok(review)
    }

    fn collect_labels(&self, decoded: &[DecodedTransaction]) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for tx in decoded {
            let addresses = tx
                .program_ids
                .iter()
                .chain(tx.approvals.iter().flat_map(|a| [&a.token, &a.spender]));
            for address in addresses {
                if let Some(label) = self.labels.label(tx.chain, address) {
                    labels.insert(address.clone(), label);
                }
            }
        }
        labels
    }

    /// Same approval with a finite amount, reviewed from scratch
    pub fn resubmit_capped(&self, review: &Review, amount: Word) -> Result<Review> {
        let offered = matches!(
            review.policy,
            PolicyDecision::Block { alternative: Some(_), .. }
        );
        if !offered || review.is_blocked() {
            return Err(Error::ValidationFailed(
                "no capped alternative for this request".to_string(),
            ));
        }

        let capped = match &review.request {
            RequestKind::EthSignTransaction(tx) => {
                RequestKind::EthSignTransaction(build_capped_approval(tx, amount)?)
            }
            RequestKind::EthSendTransaction(tx) => {
                RequestKind::EthSendTransaction(build_capped_approval(tx, amount)?)
            }
            RequestKind::EthSignTypedData { address, data } => RequestKind::EthSignTypedData {
                address: *address,
                data: build_capped_permit(data, amount)?,
            },
            other => {
                return Err(Error::ValidationFailed(format!(
                    "{} cannot be capped",
                    other.method()
                )))
            }
        };

        info!("Resubmitting review {} with capped amount {}", review.id, amount);
        self.review(&capped)
    }

    /// Unlock, sign, and broadcast send methods
    pub async fn approve(
        &self,
        review: &Review,
        _consent: Consent,
        unlock: &UnlockOptions,
    ) -> Result<SignOutcome> {
        if let Some(err) = review.blocking_error() {
            warn!("Review {} cannot be approved: {}", review.id, err);
            return Err(err);
        }

        if !self.vault.ensure_unlocked(unlock).await? {
            return Err(Error::VaultLocked);
        }

        let request = self.prepare(&review.request).await?;
        let artifacts = self.signer.sign(&request, &review.decoded).await?;

        let job = if request.is_send() {
            Some(self.broadcast(&request, &artifacts).await?)
        } else {
            None
        };

        let result = wire_result(&request, &artifacts, job.as_ref())?;
        Ok(SignOutcome {
            artifacts,
            job,
            result,
        })
    }

    /// Fill EVM fields the requester left to the wallet
    async fn prepare(&self, request: &RequestKind) -> Result<RequestKind> {
        let rpc = match &self.evm_rpc {
            Some(rpc) => rpc,
            None => return Ok(request.clone()),
        };
        Ok(match request {
            RequestKind::EthSignTransaction(tx) => RequestKind::EthSignTransaction(
                rpc.fill_transaction(tx, self.context.evm, self.evm_chain_id)
                    .await?,
            ),
            RequestKind::EthSendTransaction(tx) => RequestKind::EthSendTransaction(
                rpc.fill_transaction(tx, self.context.evm, self.evm_chain_id)
                    .await?,
            ),
            other => other.clone(),
        })
    }

    async fn broadcast(
        &self,
        request: &RequestKind,
        artifacts: &[SignedArtifact],
    ) -> Result<BroadcastJob> {
        let engine = match request.chain() {
            Some(Chain::Solana) => self.solana_broadcast.as_ref(),
            Some(Chain::Evm) => self.evm_broadcast.as_ref(),
            None => None,
        }
        .ok_or_else(|| Error::Config(format!("no broadcast endpoints for {}", request.method())))?;

        let artifact = artifacts
            .first()
            .ok_or_else(|| Error::Internal("send produced no artifact".to_string()))?;
        engine.submit(artifact.raw.clone(), self.mode).await
    }

    /// Review a pending session request and store the analysis on it
    pub async fn review_session(&self, sessions: &SessionHandler, key: &RequestKey) -> Result<Review> {
        let request = sessions
            .request(key)
            .ok_or(Error::RequestNotPending(key.id))?;
        match self.review(&request.kind) {
            Ok(review) => {
                sessions.attach_analysis(key, review.decoded.clone())?;
                Ok(review)
            }
            Err(e) => {
                sessions.reject_with(key, WireError::from_error(&e)).await?;
                Err(e)
            }
        }
    }

    /// Approve a reviewed session request and answer the peer
    pub async fn complete_session(
        &self,
        sessions: &SessionHandler,
        key: &RequestKey,
        review: &Review,
        consent: Consent,
        unlock: &UnlockOptions,
    ) -> Result<SignOutcome> {
        match self.approve(review, consent, unlock).await {
            Ok(outcome) => {
                sessions.approve_request(key, outcome.result.clone()).await?;
                Ok(outcome)
            }
            Err(Error::VaultLocked) => Err(Error::VaultLocked),
            Err(e) => {
                sessions.reject_with(key, WireError::from_error(&e)).await?;
                Err(e)
            }
        }
    }
}

/// JSON-RPC result for a signed request
pub fn wire_result(
    request: &RequestKind,
    artifacts: &[SignedArtifact],
    job: Option<&BroadcastJob>,
) -> Result<Value> {
    let first = artifacts
        .first()
        .ok_or_else(|| Error::Internal("no signed artifact".to_string()))?;

    Ok(match request {
        RequestKind::SolanaSignMessage { .. } => json!({ "signature": first.signature }),
        RequestKind::SolanaSignTransaction(_) => json!({
            "signature": first.signature,
            "transaction": STANDARD.encode(&first.raw),
        }),
        RequestKind::SolanaSignAllTransactions(_) => json!({
            "transactions": artifacts.iter().map(|a| STANDARD.encode(&a.raw)).collect::<Vec<_>>(),
        }),
        RequestKind::SolanaSignAndSendTransaction(_) => json!({
            "signature": job.map(|j| j.signature.as_str()).unwrap_or(first.signature.as_str()),
        }),
        RequestKind::PersonalSign { .. }
        | RequestKind::EthSign { .. }
        | RequestKind::EthSignTypedData { .. } => json!(first.signature),
        RequestKind::EthSignTransaction(_) => json!(format!("0x{}", hex::encode(&first.raw))),
        RequestKind::EthSendTransaction(_) => {
            json!(job.map(|j| j.signature.as_str()).unwrap_or(first.signature.as_str()))
        }
        RequestKind::Unsupported(method) => return Err(Error::UnsupportedMethod(method.clone())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecoderConfig, EvmConfig, PolicyConfig, SessionConfig, VaultConfig};
    use crate::decoder::evm::APPROVE;
    use crate::evm::{address_to_word, parse_address, EvmTransaction};
    use crate::request::SolanaTx;
    use crate::session::{MemoryRelay, MemorySessionStore, Namespace, Namespaces, PeerMetadata, Proposal, RelayMessage};
    use crate::vault::MemorySecureStore;
    use solana_sdk::message::{Message, VersionedMessage};
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Signature;
    use solana_sdk::signer::Signer;
    use solana_sdk::transaction::VersionedTransaction;
    use spl_token::instruction::AuthorityType;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const TOKEN: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const SPENDER: &str = "0x1111111254EEB25477B68fb85Ed929f73A960582";

    struct FixedLabels;

    impl LabelProvider for FixedLabels {
        fn label(&self, _chain: Chain, address: &str) -> Option<String> {
            (address == SPENDER).then(|| "Aggregator".to_string())
        }
    }

    async fn pipeline() -> (Arc<VaultManager>, SigningPipeline) {
        let config = VaultConfig {
            vault_id: "pipeline".to_string(),
            kdf_iterations: 1_000,
            ..VaultConfig::default()
        };
        let vault = Arc::new(VaultManager::new(&config, Arc::new(MemorySecureStore::new())));
        vault.create("pw", PHRASE).await.unwrap();

        let solana = vault.solana_keypair(WalletId(0)).await.unwrap().pubkey();
        let evm = vault.evm_key(WalletId(0)).await.unwrap().address;

        let pipeline = SigningPipeline::new(
            vault.clone(),
            Arc::new(RiskAnalyzer::new(&DecoderConfig::default(), &EvmConfig::default())),
            PolicyEngine::new(&PolicyConfig::default()),
            WalletId(0),
            WalletContext { solana, evm },
            1,
        )
        .with_labels(Arc::new(FixedLabels));
        (vault, pipeline)
    }

    fn approval(owner: crate::evm::Address, amount: Word) -> RequestKind {
        let mut data = APPROVE.to_vec();
        data.extend_from_slice(&address_to_word(&parse_address(SPENDER).unwrap()).0);
        data.extend_from_slice(&amount.0);
        RequestKind::EthSignTransaction(EvmTransaction {
            from: Some(owner),
            to: Some(parse_address(TOKEN).unwrap()),
            data,
            gas: Some(60_000),
            max_fee_per_gas: Some(30_000_000_000),
            max_priority_fee_per_gas: Some(1_000_000_000),
            nonce: Some(3),
            chain_id: Some(1),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_drainer_is_dismiss_only() {
        let (vault, pipeline) = pipeline().await;
        let wallet = pipeline.context().solana;
        let ix = spl_token::instruction::set_authority(
            &spl_token::id(),
            &Pubkey::new_unique(),
            Some(&Pubkey::new_unique()),
            AuthorityType::AccountOwner,
            &wallet,
            &[],
        )
        .unwrap();
        let message = Message::new(&[ix], Some(&wallet));
        let tx = VersionedTransaction {
            signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
            message: VersionedMessage::Legacy(message),
        };
        let request = RequestKind::SolanaSignTransaction(SolanaTx {
            bytes: bincode::serialize(&tx).unwrap(),
            tx,
        });

        let review = pipeline.review(&request).unwrap();
        assert_eq!(review.risk, RiskLevel::Blocked);
        assert_eq!(review.actions, vec![ReviewAction::Dismiss]);

        // Blocked before any unlock work
        vault.lock().await;
        let runs = vault.kdf_runs();
        let result = pipeline
            .approve(&review, Consent::granted_by_user(), &UnlockOptions::default())
            .await;
        assert!(matches!(result, Err(Error::Blocked(_))));
        assert_eq!(vault.kdf_runs(), runs);
    }

    #[tokio::test]
    async fn test_unlimited_approval_capped_resubmission() {
        let (_vault, pipeline) = pipeline().await;
        let owner = pipeline.context().evm;

        let review = pipeline.review(&approval(owner, Word::MAX)).unwrap();
        assert!(matches!(
            review.blocking_error(),
            Some(Error::PolicyBlockedUnlimited(_))
        ));
        assert!(review.allows(ReviewAction::UseCappedAllowance));
        assert_eq!(review.labels.get(SPENDER).map(String::as_str), Some("Aggregator"));

        let denied = pipeline
            .approve(&review, Consent::granted_by_user(), &UnlockOptions::default())
            .await;
        assert!(matches!(denied, Err(Error::PolicyBlockedUnlimited(_))));

        let capped = pipeline
            .resubmit_capped(&review, Word::from_u128(1_000_000))
            .unwrap();
        assert_ne!(capped.id, review.id);
        assert!(capped.policy.is_allowed());
        assert!(!capped.decoded[0].approvals[0].is_unlimited);
        assert!(capped.allows(ReviewAction::Approve));

        let outcome = pipeline
            .approve(&capped, Consent::granted_by_user(), &UnlockOptions::default())
            .await
            .unwrap();
        assert!(outcome.job.is_none());
        assert!(outcome.result.as_str().unwrap().starts_with("0x02"));
    }

    fn permit(owner: &crate::evm::Address, value: &str) -> RequestKind {
        let data = crate::evm::TypedData::from_value(&json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "version", "type": "string"},
                    {"name": "chainId", "type": "uint256"},
                    {"name": "verifyingContract", "type": "address"}
                ],
                "Permit": [
                    {"name": "owner", "type": "address"},
                    {"name": "spender", "type": "address"},
                    {"name": "value", "type": "uint256"},
                    {"name": "nonce", "type": "uint256"},
                    {"name": "deadline", "type": "uint256"}
                ]
            },
            "primaryType": "Permit",
            "domain": {"name": "USD Coin", "version": "2", "chainId": 1, "verifyingContract": TOKEN},
            "message": {
                "owner": crate::evm::checksum_address(owner),
                "spender": SPENDER,
                "value": value,
                "nonce": 0,
                "deadline": "1900000000"
            }
        }))
        .unwrap();
        RequestKind::EthSignTypedData {
            address: *owner,
            data,
        }
    }

    #[tokio::test]
    async fn test_unlimited_permit_capped_resubmission() {
        let (_vault, pipeline) = pipeline().await;
        let owner = pipeline.context().evm;

        let review = pipeline
            .review(&permit(&owner, &Word::MAX.to_decimal()))
            .unwrap();
        assert!(matches!(
            review.blocking_error(),
            Some(Error::PolicyBlockedUnlimited(_))
        ));
        assert_eq!(
            review.actions,
            vec![ReviewAction::UseCappedAllowance, ReviewAction::Reject]
        );

        let capped = pipeline
            .resubmit_capped(&review, Word::from_u128(250_000))
            .unwrap();
        assert_eq!(capped.decoded[0].approvals[0].amount, Word::from_u128(250_000));
        assert!(capped.allows(ReviewAction::Approve));

        let outcome = pipeline
            .approve(&capped, Consent::granted_by_user(), &UnlockOptions::default())
            .await
            .unwrap();
        // 65-byte r || s || v
        assert_eq!(outcome.result.as_str().unwrap().len(), 2 + 130);
    }

    #[tokio::test]
    async fn test_one_drainer_blocks_whole_batch() {
        let (vault, pipeline) = pipeline().await;
        let wallet = pipeline.context().solana;

        let solana_tx = |ix: solana_sdk::instruction::Instruction| {
            let message = Message::new(&[ix], Some(&wallet));
            let tx = VersionedTransaction {
                signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
                message: VersionedMessage::Legacy(message),
            };
            SolanaTx {
                bytes: bincode::serialize(&tx).unwrap(),
                tx,
            }
        };
        let clean = || {
            solana_tx(solana_sdk::system_instruction::transfer(
                &wallet,
                &Pubkey::new_unique(),
                1_000,
            ))
        };
        let hijack = solana_tx(
            spl_token::instruction::set_authority(
                &spl_token::id(),
                &Pubkey::new_unique(),
                Some(&Pubkey::new_unique()),
                AuthorityType::AccountOwner,
                &wallet,
                &[],
            )
            .unwrap(),
        );

        let request = RequestKind::SolanaSignAllTransactions(vec![clean(), hijack, clean()]);
        let review = pipeline.review(&request).unwrap();
        assert_eq!(review.decoded.len(), 3);
        assert!(!review.decoded[0].is_blocked());
        assert!(review.decoded[1].is_blocked());
        assert_eq!(review.risk, RiskLevel::Blocked);
        assert_eq!(review.actions, vec![ReviewAction::Dismiss]);

        vault.lock().await;
        let runs = vault.kdf_runs();
        let result = pipeline
            .approve(&review, Consent::granted_by_user(), &UnlockOptions::default())
            .await;
        assert!(matches!(result, Err(Error::Blocked(_))));
        assert_eq!(vault.kdf_runs(), runs);
        assert!(!vault.unlock_with_cached_key().await);
    }

    #[tokio::test]
    async fn test_cap_requires_blocked_review() {
        let (_vault, pipeline) = pipeline().await;
        let owner = pipeline.context().evm;
        let review = pipeline.review(&approval(owner, Word::from_u128(5))).unwrap();
        assert!(pipeline.resubmit_capped(&review, Word::from_u128(1)).is_err());
    }

    #[tokio::test]
    async fn test_locked_vault_without_biometric() {
        let (vault, pipeline) = pipeline().await;
        let request = RequestKind::PersonalSign {
            message: b"hello".to_vec(),
            address: pipeline.context().evm,
        };
        let review = pipeline.review(&request).unwrap();
        vault.lock().await;

        let result = pipeline
            .approve(&review, Consent::granted_by_user(), &UnlockOptions::default())
            .await;
        assert!(matches!(result, Err(Error::VaultLocked)));
    }

    #[tokio::test]
    async fn test_send_without_engine_is_config_error() {
        let (_vault, pipeline) = pipeline().await;
        let wallet = pipeline.context().solana;
        let ix = solana_sdk::system_instruction::transfer(&wallet, &Pubkey::new_unique(), 10);
        let message = Message::new(&[ix], Some(&wallet));
        let tx = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(message),
        };
        let request = RequestKind::SolanaSignAndSendTransaction(SolanaTx {
            bytes: bincode::serialize(&tx).unwrap(),
            tx,
        });

        let review = pipeline.review(&request).unwrap();
        let result = pipeline
            .approve(&review, Consent::granted_by_user(), &UnlockOptions::default())
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let (_vault, pipeline) = pipeline().await;
        let relay = Arc::new(MemoryRelay::new());
        let sessions = SessionHandler::new(
            SessionConfig::default(),
            Arc::new(MemorySessionStore::new()),
            relay.clone(),
        );

        let wallet = crate::evm::checksum_address(&pipeline.context().evm);
        let mut namespaces = Namespaces::new();
        namespaces.insert(
            "eip155".to_string(),
            Namespace {
                chains: vec!["eip155:1".to_string()],
                methods: vec!["personal_sign".to_string()],
                events: vec![],
                accounts: vec![format!("eip155:1:{}", wallet)],
            },
        );
        sessions.on_proposal(Proposal {
            id: 1,
            pairing_topic: "pairing".to_string(),
            proposer: PeerMetadata::default(),
            required_namespaces: Namespaces::new(),
            optional_namespaces: Namespaces::new(),
        });
        let session = sessions.approve_proposal(1, namespaces).await.unwrap();

        sessions
            .on_request(
                &session.topic,
                7,
                "personal_sign",
                json!(["0x68656c6c6f", wallet]),
                Some("eip155:1".to_string()),
            )
            .await
            .unwrap();

        let key = RequestKey::new(&session.topic, 7);
        let review = pipeline.review_session(&sessions, &key).await.unwrap();
        assert!(sessions.request(&key).unwrap().analysis.is_some());

        let outcome = pipeline
            .complete_session(
                &sessions,
                &key,
                &review,
                Consent::granted_by_user(),
                &UnlockOptions::default(),
            )
            .await
            .unwrap();

        let answered = relay.sent().into_iter().any(|m| {
            matches!(m, RelayMessage::Result { id: 7, ref result, .. } if *result == outcome.result)
        });
        assert!(answered);
    }
}
