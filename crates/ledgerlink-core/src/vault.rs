//! Credential vault for provider secrets
//!
//! Linkage tokens and provider account ids never touch the database in
//! plaintext. The vault wraps them with a key-management service (envelope
//! encryption) before storage and unwraps them on demand.
//!
//! - `Vault` trait: encrypt/decrypt interface
//! - `VaultClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `KmsVault` (HTTP KMS), `MemoryVault` (tests/dev)
//!
//! Environment variables:
//! - `LEDGERLINK_KMS_HOST`: KMS base URL (required for the KMS backend)
//! - `LEDGERLINK_KMS_KEY`: key identifier to wrap with (default: ledgerlink-primary)

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Trait defining the vault interface
///
/// Implementations must never log plaintext or include it in errors.
#[async_trait]
pub trait Vault: Send + Sync {
    /// Encrypt a plaintext secret into an opaque ciphertext string
    async fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypt a ciphertext produced by `encrypt`
    async fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Concrete vault enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum VaultClient {
    /// Production backend: external key-management service
    Kms(KmsVault),
    /// Reversible in-process backend for development and tests
    Memory(MemoryVault),
}

impl VaultClient {
    /// Create a vault client from environment variables.
    /// Returns None when no KMS host is configured.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("LEDGERLINK_KMS_HOST").ok()?;
        let key_id = std::env::var("LEDGERLINK_KMS_KEY")
            .unwrap_or_else(|_| "ledgerlink-primary".to_string());
        Some(VaultClient::Kms(KmsVault::new(&host, &key_id)))
    }

    /// Create an in-memory vault for testing
    pub fn memory() -> Self {
        VaultClient::Memory(MemoryVault::new())
    }
}

#[async_trait]
impl Vault for VaultClient {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        match self {
            VaultClient::Kms(v) => v.encrypt(plaintext).await,
            VaultClient::Memory(v) => v.encrypt(plaintext).await,
        }
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        match self {
            VaultClient::Kms(v) => v.decrypt(ciphertext).await,
            VaultClient::Memory(v) => v.decrypt(ciphertext).await,
        }
    }
}

#[derive(Serialize)]
struct KmsRequest<'a> {
    payload: &'a str,
}

#[derive(Deserialize)]
struct KmsResponse {
    payload: String,
}

/// HTTP key-management service backend
#[derive(Clone)]
pub struct KmsVault {
    client: reqwest::Client,
    host: String,
    key_id: String,
}

impl KmsVault {
    pub fn new(host: &str, key_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
        }
    }

    async fn call(&self, operation: &str, payload: &str) -> Result<String> {
        let url = format!("{}/v1/keys/{}:{}", self.host, self.key_id, operation);
        let response = self
            .client
            .post(&url)
            .json(&KmsRequest { payload })
            .send()
            .await
            .map_err(|e| Error::Encryption(format!("KMS unreachable: {}", e)))?;

        if !response.status().is_success() {
            // Status only; KMS error bodies can echo the payload
            return Err(Error::Encryption(format!(
                "KMS {} returned {}",
                operation,
                response.status()
            )));
        }

        let body: KmsResponse = response
            .json()
            .await
            .map_err(|e| Error::Encryption(format!("KMS response malformed: {}", e)))?;
        Ok(body.payload)
    }
}

#[async_trait]
impl Vault for KmsVault {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(plaintext);
        self.call("encrypt", &encoded).await
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let encoded = self
            .call("decrypt", ciphertext)
            .await
            .map_err(|e| match e {
                Error::Encryption(msg) => Error::Decryption(msg),
                other => other,
            })?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .map_err(|_| Error::Decryption("invalid base64 from KMS".to_string()))?;
        String::from_utf8(bytes).map_err(|_| Error::Decryption("invalid UTF-8 from KMS".to_string()))
    }
}

/// Reversible in-process vault. Ciphertexts are versioned so stored values
/// remain distinguishable from plaintext.
#[derive(Clone, Default)]
pub struct MemoryVault;

const MEMORY_PREFIX: &str = "v1:";

impl MemoryVault {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(plaintext);
        Ok(format!("{}{}", MEMORY_PREFIX, encoded))
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let encoded = ciphertext
            .strip_prefix(MEMORY_PREFIX)
            .ok_or_else(|| Error::Decryption("unrecognized ciphertext format".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| Error::Decryption("invalid ciphertext".to_string()))?;
        String::from_utf8(bytes).map_err(|_| Error::Decryption("invalid ciphertext".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_vault_round_trip() {
        let vault = VaultClient::memory();
        let ciphertext = vault.encrypt("req-12345").await.unwrap();
        assert_ne!(ciphertext, "req-12345");
        assert!(ciphertext.starts_with("v1:"));
        assert_eq!(vault.decrypt(&ciphertext).await.unwrap(), "req-12345");
    }

    #[tokio::test]
    async fn test_memory_vault_rejects_garbage() {
        let vault = VaultClient::memory();
        assert!(matches!(
            vault.decrypt("not-a-ciphertext").await,
            Err(Error::Decryption(_))
        ));
        assert!(matches!(
            vault.decrypt("v1:!!!").await,
            Err(Error::Decryption(_))
        ));
    }
}
