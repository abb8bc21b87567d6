use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// API version reported by the forum; older sites send it as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiIdentifier {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for ApiIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Plaintext of the encrypted User API key response.
#[derive(Clone, Deserialize)]
pub struct DecryptedPayload {
    /// The issued User API key
    #[serde(rename = "key")]
    pub secret: String,
    pub nonce: String,
    #[serde(rename = "push", default)]
    pub push_enabled: bool,
    #[serde(rename = "api")]
    pub api_identifier: ApiIdentifier,
}

impl DecryptedPayload {
    pub fn from_slice(plaintext: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(plaintext)
    }
}

impl Drop for DecryptedPayload {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for DecryptedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedPayload")
            .field("secret", &"<redacted>")
            .field("nonce", &self.nonce)
            .field("push_enabled", &self.push_enabled)
            .field("api_identifier", &self.api_identifier)
            .finish()
    }
}
