use crate::config::DiscourseConfig;
use crate::gate::keypair::KeyPairProvider;
use crate::gate::store::{ChatId, CorrelationStore, PendingRequest, UserId};
use crate::gate::short_nonce;
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::Url;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Bytes of OS randomness per nonce (128 bits).
const NONCE_BYTES: usize = 16;

/// A join request as delivered by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub user_id: UserId,
    pub user_name: String,
    /// Group being joined
    pub group_id: ChatId,
    /// Private chat with the requester
    pub channel_id: ChatId,
}

/// Authorization link handed to the requester.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub authorization_url: String,
    pub nonce: String,
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Invalid site URL: {0}")]
    InvalidUrl(String),

    #[error("Generated nonce is already registered")]
    NonceCollision,

    #[error("Another challenge for this requester was registered concurrently")]
    ChannelBusy,
}

/// Fixed part of every `/user-api-key/new` request.
#[derive(Debug, Clone)]
pub struct AuthorizationParams {
    pub site_url: String,
    pub application_name: String,
    pub scopes: String,
    pub client_id: String,
    pub auth_redirect: Option<String>,
    pub push_url: Option<String>,
}

impl From<&DiscourseConfig> for AuthorizationParams {
    fn from(config: &DiscourseConfig) -> Self {
        Self {
            site_url: config.site_url.clone(),
            application_name: config.application_name.clone(),
            scopes: config.scopes.clone(),
            client_id: config.client_id.clone(),
            auth_redirect: config.auth_redirect.clone(),
            push_url: config.push_url.clone(),
        }
    }
}

impl AuthorizationParams {
    fn wants_push(&self) -> bool {
        self.scopes
            .split(',')
            .map(str::trim)
            .any(|s| s == "push" || s == "notifications")
    }
}

/// Hex-encoded nonce from the OS RNG.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds challenges and registers them in the correlation store.
pub struct ChallengeIssuer {
    keys: KeyPairProvider,
    store: Arc<dyn CorrelationStore>,
    params: AuthorizationParams,
}

impl ChallengeIssuer {
    pub fn new(
        keys: KeyPairProvider,
        store: Arc<dyn CorrelationStore>,
        params: AuthorizationParams,
    ) -> Self {
        Self {
            keys,
            store,
            params,
        }
    }

    /// Authorization URL for `nonce` against the forum's key-issuance endpoint.
    pub fn authorization_url(&self, nonce: &str) -> Result<String, IssueError> {
        let endpoint = format!(
            "{}/user-api-key/new",
            self.params.site_url.trim_end_matches('/')
        );

        let mut query: Vec<(&str, &str)> = vec![
            ("application_name", self.params.application_name.as_str()),
            ("scopes", self.params.scopes.as_str()),
            ("client_id", self.params.client_id.as_str()),
            ("public_key", self.keys.get().public_key_pem()),
        ];
        if let Some(push_url) = self.params.push_url.as_deref().filter(|_| self.params.wants_push()) {
            query.push(("push_url", push_url));
        }
        if let Some(redirect) = self.params.auth_redirect.as_deref() {
            query.push(("auth_redirect", redirect));
        }
        query.push(("nonce", nonce));

        Url::parse_with_params(&endpoint, &query)
            .map(String::from)
            .map_err(|e| IssueError::InvalidUrl(e.to_string()))
    }

    /// Issue a challenge for `request` and register it under both indices.
    ///
    /// A requester has at most one live challenge: an older one reachable
    /// through the same private channel is withdrawn first.
    pub async fn issue(&self, request: &JoinRequest) -> Result<Challenge, IssueError> {
        let nonce = generate_nonce();
        let authorization_url = self.authorization_url(&nonce)?;

        if let Some(previous) = self.store.lookup_by_channel(request.channel_id).await {
            info!(
                "Withdrawing challenge {} for user {} in favour of a new one",
                short_nonce(&previous.nonce),
                request.user_id
            );
            self.store.remove_by_nonce(&previous.nonce).await;
            self.store
                .remove_by_channel(request.channel_id, &previous.nonce)
                .await;
        }

        let pending = PendingRequest {
            nonce: nonce.clone(),
            user_id: request.user_id,
            user_name: request.user_name.clone(),
            chat_channel_id: request.channel_id,
            group_id: request.group_id,
        };

        self.store
            .register_by_nonce(&nonce, pending.clone())
            .await
            .map_err(|_| IssueError::NonceCollision)?;

        if self
            .store
            .register_by_channel(request.channel_id, pending)
            .await
            .is_err()
        {
            warn!(
                "Channel {} got a concurrent challenge; rolling back {}",
                request.channel_id,
                short_nonce(&nonce)
            );
            self.store.remove_by_nonce(&nonce).await;
            return Err(IssueError::ChannelBusy);
        }

        info!(
            "Issued challenge {} for user {} joining {}",
            short_nonce(&nonce),
            request.user_id,
            request.group_id
        );

        Ok(Challenge {
            authorization_url,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::keypair::testing::provider;
    use crate::gate::store::InMemoryCorrelationStore;
    use std::collections::HashMap;
    use std::time::Duration;

    fn params() -> AuthorizationParams {
        AuthorizationParams {
            site_url: "https://forum.example.org/".to_string(),
            application_name: "Group Gate".to_string(),
            scopes: "read".to_string(),
            client_id: "gate_client".to_string(),
            auth_redirect: Some("https://gate.example.org/auth".to_string()),
            push_url: Some("https://gate.example.org/push".to_string()),
        }
    }

    fn issuer(params: AuthorizationParams) -> (ChallengeIssuer, Arc<InMemoryCorrelationStore>) {
        let store = Arc::new(InMemoryCorrelationStore::new(Duration::from_secs(600)));
        (ChallengeIssuer::new(provider(), store.clone(), params), store)
    }

    fn join_request() -> JoinRequest {
        JoinRequest {
            user_id: 42,
            user_name: "alice".to_string(),
            group_id: 7,
            channel_id: 100,
        }
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn test_nonce_has_128_bits_of_hex() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(nonce, generate_nonce());
    }

    #[test]
    fn test_authorization_url_carries_all_parameters() {
        let (issuer, _) = issuer(params());
        let url = issuer.authorization_url("abc123").unwrap();
        assert!(url.starts_with("https://forum.example.org/user-api-key/new?"));

        let query = query_of(&url);
        assert_eq!(query["application_name"], "Group Gate");
        assert_eq!(query["scopes"], "read");
        assert_eq!(query["client_id"], "gate_client");
        assert_eq!(query["auth_redirect"], "https://gate.example.org/auth");
        assert_eq!(query["nonce"], "abc123");
        assert_eq!(query["public_key"], provider().get().public_key_pem());
        // push_url is only meaningful with a push scope
        assert!(!query.contains_key("push_url"));
    }

    #[test]
    fn test_optional_parameters() {
        let (issuer, _) = issuer(AuthorizationParams {
            auth_redirect: None,
            scopes: "read,push".to_string(),
            ..params()
        });
        let query = query_of(&issuer.authorization_url("abc123").unwrap());
        assert!(!query.contains_key("auth_redirect"));
        assert_eq!(query["push_url"], "https://gate.example.org/push");
    }

    #[tokio::test]
    async fn test_issue_registers_both_indices() {
        let (issuer, store) = issuer(params());
        let challenge = issuer.issue(&join_request()).await.unwrap();

        let by_nonce = store.lookup_by_nonce(&challenge.nonce).await.unwrap();
        let by_channel = store.lookup_by_channel(100).await.unwrap();
        assert_eq!(by_nonce, by_channel);
        assert_eq!(by_nonce.user_id, 42);
        assert_eq!(by_nonce.group_id, 7);
        assert_eq!(query_of(&challenge.authorization_url)["nonce"], challenge.nonce);
    }

    #[tokio::test]
    async fn test_reissue_withdraws_previous_challenge() {
        let (issuer, store) = issuer(params());
        let first = issuer.issue(&join_request()).await.unwrap();
        let second = issuer.issue(&join_request()).await.unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert!(store.lookup_by_nonce(&first.nonce).await.is_none());
        assert_eq!(
            store.lookup_by_channel(100).await.unwrap().nonce,
            second.nonce
        );
    }
}
