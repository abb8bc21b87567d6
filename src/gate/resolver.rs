use crate::gate::keypair::KeyPairProvider;
use crate::gate::payload::{ApiIdentifier, DecryptedPayload};
use crate::gate::short_nonce;
use crate::gate::store::{ChatId, CorrelationStore, PendingRequest, UserId};
use crate::gate::verify::{VerificationOutcome, Verifier};
use axum::http::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a response did not lead to an approval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Payload could not be decrypted")]
    DecryptionFailed,

    #[error("Decrypted payload is malformed")]
    MalformedPayload,

    #[error("Payload nonce does not belong to the request pending in this chat")]
    NonceMismatch,

    #[error("Nonce expired or unknown")]
    ExpiredOrUnknownNonce,

    #[error("Forum verification failed: {0}")]
    VerificationFailed(String),
}

impl GateError {
    /// Explanation safe to show to the requester.
    pub fn user_message(&self) -> String {
        match self {
            // Must not reveal which of the two steps failed
            Self::DecryptionFailed | Self::MalformedPayload => {
                "That doesn't look like the key the forum gave you. Please copy the whole text and send it again.".to_string()
            }
            Self::NonceMismatch => {
                "This key was issued for a different verification link. Please use the most recent link I sent you.".to_string()
            }
            Self::ExpiredOrUnknownNonce => {
                "This verification link has expired or was already used. Please request to join the group again.".to_string()
            }
            Self::VerificationFailed(reason) => {
                format!("The forum did not accept this key ({}). Please try again.", reason)
            }
        }
    }

    /// Whether the same challenge can still succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ExpiredOrUnknownNonce)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DecryptionFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MalformedPayload => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NonceMismatch => StatusCode::FORBIDDEN,
            Self::ExpiredOrUnknownNonce => StatusCode::FORBIDDEN,
            Self::VerificationFailed(_) => StatusCode::FORBIDDEN,
        }
    }
}

/// Transport a response arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseChannel {
    /// Pasted into the private chat with this id
    Chat(ChatId),
    /// Delivered by the forum's browser redirect
    Redirect,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub group_id: ChatId,
    pub user_id: UserId,
    pub user_name: String,
    pub chat_channel_id: ChatId,
    pub nonce: String,
    pub forum_username: Option<String>,
    pub push_enabled: bool,
    pub api_identifier: ApiIdentifier,
}

/// Turns an encrypted forum response into an approval decision.
pub struct ResponseResolver {
    keys: KeyPairProvider,
    store: Arc<dyn CorrelationStore>,
    verifier: Arc<dyn Verifier>,
}

impl ResponseResolver {
    pub fn new(
        keys: KeyPairProvider,
        store: Arc<dyn CorrelationStore>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            keys,
            store,
            verifier,
        }
    }

    /// Decrypt, correlate and verify a response.
    ///
    /// The pending request is consumed only on success; on any error it stays
    /// in the store until its TTL runs out so the user can retry.
    pub async fn resolve(
        &self,
        encrypted: &str,
        channel: ResponseChannel,
    ) -> Result<ApprovalDecision, GateError> {
        let plaintext = self.keys.get().decrypt(encrypted).map_err(|e| {
            warn!("Failed to decrypt payload from {:?}: {}", channel, e);
            GateError::DecryptionFailed
        })?;

        let payload = DecryptedPayload::from_slice(&plaintext).map_err(|e| {
            warn!("Decrypted payload is not a User API key response: {}", e);
            GateError::MalformedPayload
        })?;

        let pending = self.correlate(&payload.nonce, channel).await?;
        debug!(
            "Payload {} correlated to user {} for group {}",
            short_nonce(&payload.nonce),
            pending.user_id,
            pending.group_id
        );

        match self.verifier.verify(&payload.secret).await {
            VerificationOutcome::Verified => {}
            VerificationOutcome::Rejected { reason, .. } => {
                return Err(GateError::VerificationFailed(reason));
            }
            VerificationOutcome::Unreachable(reason) => {
                return Err(GateError::VerificationFailed(format!(
                    "forum unreachable: {}",
                    reason
                )));
            }
        }

        // Only one concurrent resolver gets the entry back.
        let Some(claimed) = self.store.remove_by_nonce(&payload.nonce).await else {
            info!(
                "Nonce {} was consumed or expired during verification",
                short_nonce(&payload.nonce)
            );
            return Err(GateError::ExpiredOrUnknownNonce);
        };
        self.store
            .remove_by_channel(claimed.chat_channel_id, &claimed.nonce)
            .await;

        let forum_username = self.verifier.current_username(&payload.secret).await;
        info!(
            "User {} verified as forum user {:?}; approving join to {}",
            claimed.user_id, forum_username, claimed.group_id
        );

        Ok(ApprovalDecision {
            approved: true,
            group_id: claimed.group_id,
            user_id: claimed.user_id,
            user_name: claimed.user_name,
            chat_channel_id: claimed.chat_channel_id,
            nonce: claimed.nonce,
            forum_username,
            push_enabled: payload.push_enabled,
            api_identifier: payload.api_identifier.clone(),
        })
    }

    async fn correlate(
        &self,
        nonce: &str,
        channel: ResponseChannel,
    ) -> Result<PendingRequest, GateError> {
        match channel {
            ResponseChannel::Redirect => self
                .store
                .lookup_by_nonce(nonce)
                .await
                .ok_or(GateError::ExpiredOrUnknownNonce),
            ResponseChannel::Chat(channel_id) => {
                let by_channel = self
                    .store
                    .lookup_by_channel(channel_id)
                    .await
                    .ok_or(GateError::ExpiredOrUnknownNonce)?;
                let by_nonce = self
                    .store
                    .lookup_by_nonce(nonce)
                    .await
                    .ok_or(GateError::ExpiredOrUnknownNonce)?;
                if by_channel != by_nonce {
                    warn!(
                        "Chat {} holds {} but payload carries {}",
                        channel_id,
                        short_nonce(&by_channel.nonce),
                        short_nonce(nonce)
                    );
                    return Err(GateError::NonceMismatch);
                }
                Ok(by_nonce)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Verifier returning a preset outcome and counting calls.
    #[derive(Debug)]
    pub struct ScriptedVerifier {
        outcome: Mutex<VerificationOutcome>,
        pub calls: AtomicUsize,
    }

    impl ScriptedVerifier {
        pub fn new(outcome: VerificationOutcome) -> Self {
            Self {
                outcome: Mutex::new(outcome),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn set(&self, outcome: VerificationOutcome) {
            *self.outcome.lock().unwrap() = outcome;
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        async fn verify(&self, _secret: &str) -> VerificationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.outcome.lock().unwrap().clone()
        }
    }
}
