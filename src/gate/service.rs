use crate::config::AppConfig;
use crate::error::AppResult;
use crate::gate::challenge::{AuthorizationParams, Challenge, ChallengeIssuer, IssueError, JoinRequest};
use crate::gate::keypair::KeyPairProvider;
use crate::gate::resolver::{ApprovalDecision, GateError, ResponseChannel, ResponseResolver};
use crate::gate::store::{ChatId, CorrelationStore, InMemoryCorrelationStore};
use crate::gate::verify::{DiscourseClient, Verifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Entry point used by the chat and web surfaces.
pub struct AuthGate {
    store: Arc<dyn CorrelationStore>,
    issuer: ChallengeIssuer,
    resolver: ResponseResolver,
}

impl AuthGate {
    pub fn new(
        keys: KeyPairProvider,
        store: Arc<dyn CorrelationStore>,
        verifier: Arc<dyn Verifier>,
        params: AuthorizationParams,
    ) -> Self {
        let issuer = ChallengeIssuer::new(keys.clone(), store.clone(), params);
        let resolver = ResponseResolver::new(keys, store.clone(), verifier);
        Self {
            store,
            issuer,
            resolver,
        }
    }

    /// Wire the in-memory store and the Discourse client from configuration.
    pub fn from_config(config: &AppConfig, keys: KeyPairProvider) -> AppResult<Self> {
        let store = Arc::new(InMemoryCorrelationStore::new(config.gate.nonce_ttl()));
        let verifier = Arc::new(DiscourseClient::new(&config.discourse)?);
        Ok(Self::new(
            keys,
            store,
            verifier,
            AuthorizationParams::from(&config.discourse),
        ))
    }

    pub fn store(&self) -> &Arc<dyn CorrelationStore> {
        &self.store
    }

    pub async fn issue(&self, request: &JoinRequest) -> Result<Challenge, IssueError> {
        self.issuer.issue(request).await
    }

    pub async fn resolve(
        &self,
        encrypted: &str,
        channel: ResponseChannel,
    ) -> Result<ApprovalDecision, GateError> {
        self.resolver.resolve(encrypted, channel).await
    }

    /// How long an issued challenge stays valid.
    pub fn challenge_ttl(&self) -> Duration {
        self.store.ttl()
    }

    /// Whether a private chat is waiting for a pasted response.
    pub async fn has_pending_channel(&self, channel_id: ChatId) -> bool {
        self.store.lookup_by_channel(channel_id).await.is_some()
    }

    /// Periodically evict expired challenges. Lookups never depend on it.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.sweep_expired().await;
                if evicted > 0 {
                    debug!("Swept {} expired challenge entries", evicted);
                }
            }
        })
    }
}
