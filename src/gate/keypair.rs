//! Process-lifetime RSA key pair for the User API key handshake.
//!
//! The forum encrypts the issued key with the public half (PKCS#1 v1.5) and
//! we decrypt it with the private half. The pair lives only in memory; the
//! private key is zeroized on drop by `rsa` itself.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rsa::pkcs1::{EncodeRsaPublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Modulus size agreed with Discourse.
pub const KEY_BITS: usize = 2048;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key pair generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Decryption failed - invalid ciphertext or wrong key")]
    DecryptionFailed,
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// RSA key pair with its public half pre-serialized as PKCS#1 PEM.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    public_pem: String,
}

impl KeyPair {
    /// Generate a new 2048-bit key pair from the OS RNG.
    pub fn generate() -> CryptoResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        let public_pem = public
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        Ok(Self {
            private,
            public,
            public_pem,
        })
    }

    /// Public key in PKCS#1 PEM form, as sent in the authorization URL.
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Decode and decrypt a payload produced by the forum.
    pub fn decrypt(&self, encoded: &str) -> CryptoResult<Vec<u8>> {
        let ciphertext = BASE64.decode(normalize_payload(encoded))?;
        self.private
            .decrypt(Pkcs1v15Encrypt, &ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_pem", &self.public_pem)
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Undo what chat clients and query decoding do to a base64 blob.
///
/// The forum wraps its base64 output at 60 columns, and an unescaped `+`
/// in a redirect query arrives as a space.
pub fn normalize_payload(encoded: &str) -> String {
    encoded
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .map(|c| if c == ' ' { '+' } else { c })
        .collect()
}

/// Whether `text` could be a sealed payload: base64 of at least one RSA block.
pub fn looks_like_ciphertext(text: &str) -> bool {
    BASE64
        .decode(normalize_payload(text))
        .is_ok_and(|bytes| bytes.len() >= KEY_BITS / 8)
}

/// Shared handle to the single key pair of this process.
///
/// Cloning is cheap; every clone returns the same pair from [`get`](Self::get).
#[derive(Clone, Debug)]
pub struct KeyPairProvider {
    inner: Arc<KeyPair>,
}

impl KeyPairProvider {
    /// Generate the process key pair. Failure here must abort startup.
    pub fn generate() -> CryptoResult<Self> {
        let keypair = KeyPair::generate()?;
        info!("Generated {}-bit RSA key pair for User API key requests", KEY_BITS);
        Ok(Self {
            inner: Arc::new(keypair),
        })
    }

    pub fn get(&self) -> &KeyPair {
        &self.inner
    }
}
