use crate::gate::CryptoError;
use thiserror::Error;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),
}

impl AppError {
    pub fn telegram<S: Into<String>>(msg: S) -> Self {
        Self::Telegram(msg.into())
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_source() {
        let err = AppError::telegram("Bad Request: chat not found");
        assert_eq!(err.to_string(), "Telegram API error: Bad Request: chat not found");

        let err = AppError::from(CryptoError::KeyGeneration("entropy".to_string()));
        assert!(matches!(err, AppError::Crypto(_)));
        assert_eq!(
            err.to_string(),
            "Cryptographic error: Key pair generation failed: entropy"
        );
    }
}
