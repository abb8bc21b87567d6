//! Remote check that a decrypted User API key is a live credential.

use crate::config::DiscourseConfig;
use crate::error::AppResult;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const USER_API_KEY: &str = "user-api-key";
const USER_API_CLIENT_ID: &str = "user-api-client-id";

/// Result of asking the forum whether a key works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    /// The forum answered and refused the key
    Rejected { status: Option<u16>, reason: String },
    /// The forum could not be reached
    Unreachable(String),
}

/// Seam for the remote verification call.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, secret: &str) -> VerificationOutcome;

    /// Forum username owning the key, when it can be looked up.
    async fn current_username(&self, _secret: &str) -> Option<String> {
        None
    }
}

/// Error body returned by Discourse for refused requests
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    current_user: CurrentUser,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    username: String,
}

/// Discourse User API client
pub struct DiscourseClient {
    http: Client,
    check_url: String,
    session_url: String,
    client_id: String,
    strict: bool,
}

impl std::fmt::Debug for DiscourseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscourseClient")
            .field("check_url", &self.check_url)
            .field("client_id", &self.client_id)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl DiscourseClient {
    pub fn new(config: &DiscourseConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            check_url: config.endpoint(&format!("t/{}.json", config.check_topic_id)),
            session_url: config.endpoint("session/current.json"),
            client_id: config.client_id.clone(),
            strict: config.strict_verification,
        })
    }

    fn auth_headers(&self, secret: &str) -> Option<HeaderMap> {
        let mut key = HeaderValue::from_str(secret).ok()?;
        key.set_sensitive(true);
        let client_id = HeaderValue::from_str(&self.client_id).ok()?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_API_KEY, key);
        headers.insert(USER_API_CLIENT_ID, client_id);
        Some(headers)
    }
}

#[async_trait]
impl Verifier for DiscourseClient {
    async fn verify(&self, secret: &str) -> VerificationOutcome {
        let Some(headers) = self.auth_headers(secret) else {
            return VerificationOutcome::Rejected {
                status: None,
                reason: "key contains characters that cannot be sent".to_string(),
            };
        };

        let response = match self.http.get(&self.check_url).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Verification request to {} failed: {}", self.check_url, e);
                return VerificationOutcome::Unreachable(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!("Key verified against {}", self.check_url);
            return VerificationOutcome::Verified;
        }
        if !self.strict {
            debug!("Forum answered {} for key check; accepted in lenient mode", status);
            return VerificationOutcome::Verified;
        }

        let body = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.errors.into_iter().next().or(b.error_type))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_string());

        warn!("Forum rejected key check with status {}: {}", status, reason);
        VerificationOutcome::Rejected {
            status: Some(status.as_u16()),
            reason,
        }
    }

    async fn current_username(&self, secret: &str) -> Option<String> {
        let headers = self.auth_headers(secret)?;
        let response = self
            .http
            .get(&self.session_url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| debug!("Session lookup failed: {}", e))
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        response
            .json::<SessionResponse>()
            .await
            .ok()
            .map(|s| s.current_user.username)
    }
}
