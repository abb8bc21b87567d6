//! Forum-backed admission gate for chat groups.
//!
//! A join request is turned into a Discourse User API key authorization link.
//! The forum answers with the issued key encrypted to our public key, either
//! pasted back into the private chat or delivered through a browser redirect.
//! The gate decrypts it, matches it to the pending request and checks the key
//! against the forum before deciding to approve.
//!
//! ## Flow
//!
//! - One RSA key pair is generated per process and never persisted
//! - Every challenge gets a fresh 128-bit nonce, registered under the nonce
//!   and under the requester's private chat
//! - Pending requests expire after a fixed TTL and are consumed exactly once
//!
//! ## Usage
//!
//! ```ignore
//! let keys = KeyPairProvider::generate()?;
//! let gate = AuthGate::from_config(config, keys)?;
//!
//! let challenge = gate.issue(&join_request).await?;
//! // ... send challenge.authorization_url to the requester ...
//!
//! let decision = gate.resolve(&payload, ResponseChannel::Chat(chat_id)).await?;
//! ```

pub mod challenge;
pub mod keypair;
pub mod payload;
pub mod resolver;
pub mod service;
pub mod store;
pub mod verify;

pub use challenge::{AuthorizationParams, Challenge, ChallengeIssuer, IssueError, JoinRequest};
pub use keypair::{CryptoError, KeyPair, KeyPairProvider};
pub use payload::{ApiIdentifier, DecryptedPayload};
pub use resolver::{ApprovalDecision, GateError, ResponseChannel, ResponseResolver};
pub use service::AuthGate;
pub use store::{
    ChatId, Clock, CorrelationStore, InMemoryCorrelationStore, ManualClock, PendingRequest,
    SystemClock, UserId,
};
pub use verify::{DiscourseClient, VerificationOutcome, Verifier};

/// Leading part of a nonce, for log lines.
pub(crate) fn short_nonce(nonce: &str) -> String {
    nonce.chars().take(8).collect()
}
