//! Error types for LedgerLink

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Vault could not encrypt a value. Carries the backend's reason,
    /// never the plaintext.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Vault could not decrypt a value. Carries the backend's reason,
    /// never the ciphertext or plaintext.
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Institution id is not present in the aggregator's directory.
    #[error("Unknown institution: {0}")]
    InvalidInstitution(String),

    /// Caller does not own the requested resource.
    #[error("Not authorized to access this resource")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection passed its 90-day consent lifetime. Terminal state;
    /// the user must link the bank again.
    #[error("Bank connection {0} has expired and must be re-linked")]
    ConnectionExpired(i64),

    /// Aggregator-side failure (non-2xx or malformed response).
    #[error("Aggregator error: {0}")]
    Upstream(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;
