//! Bank connection lifecycle
//!
//! A connection covers one consent grant at one institution. It is created
//! `pending`, moves to `linked` once the user finishes the institution's
//! authorization flow (or `error` if they reject it), and becomes `expired`
//! 90 days after creation. Expiry is terminal: syncing an expired connection
//! fails and the user must link the bank again.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::{AggregatorApi, AggregatorClient};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{AccountType, BankConnection, ConnectionStatus};
use crate::vault::{Vault, VaultClient};

/// Consent lifetime granted by institutions
pub const CONSENT_DAYS: i64 = 90;

/// How long the user has to finish the authorization flow, in seconds.
/// Informational; the requisition itself outlives this.
const AUTH_WINDOW_SECS: i64 = 300;

/// Result of initiating a connection
#[derive(Debug, Clone, Serialize)]
pub struct InitiatedConnection {
    pub connection_id: i64,
    /// Institution-hosted URL to send the user to
    pub auth_url: String,
    /// Seconds the user has to complete authorization
    pub expires_in: i64,
}

/// Manages connection state against the aggregator
pub struct ConnectionManager<'a> {
    db: &'a Database,
    aggregator: &'a AggregatorClient,
    vault: &'a VaultClient,
    redirect_url: String,
}

impl<'a> ConnectionManager<'a> {
    pub fn new(
        db: &'a Database,
        aggregator: &'a AggregatorClient,
        vault: &'a VaultClient,
        redirect_url: &str,
    ) -> Self {
        Self {
            db,
            aggregator,
            vault,
            redirect_url: redirect_url.to_string(),
        }
    }

    /// Start linking a bank.
    ///
    /// Validates the institution against the live directory before anything
    /// is written, then creates a requisition and stores the connection as
    /// pending with the requisition id vault-encrypted.
    pub async fn initiate(
        &self,
        user_id: &str,
        institution_id: &str,
        account_type: AccountType,
    ) -> Result<InitiatedConnection> {
        let institution = self.aggregator.get_institution(institution_id).await?;

        let reference = generate_reference();
        let requisition = self
            .aggregator
            .create_requisition(institution_id, &reference, &self.redirect_url)
            .await?;

        let linkage_token_enc = self.vault.encrypt(&requisition.id).await?;
        let expires_at = Utc::now() + Duration::days(CONSENT_DAYS);

        let connection_id = self.db.insert_connection(
            user_id,
            institution_id,
            &institution.name,
            account_type,
            &reference,
            &linkage_token_enc,
            expires_at,
        )?;

        info!(connection_id, institution_id, "Connection initiated");

        Ok(InitiatedConnection {
            connection_id,
            auth_url: requisition.link,
            expires_in: AUTH_WINDOW_SECS,
        })
    }

    /// Handle the aggregator's redirect after the user finished (or
    /// abandoned) the authorization flow. The reference is resolved through
    /// its unique index.
    pub async fn handle_callback(&self, reference: &str) -> Result<BankConnection> {
        let connection = self
            .db
            .get_connection_by_reference(reference)?
            .ok_or_else(|| Error::NotFound("unknown callback reference".to_string()))?;

        ensure_not_expired(self.db, &connection)?;

        self.reconcile(&connection).await
    }

    /// Re-check a connection's authorization state against the aggregator
    /// and update accounts/status accordingly.
    pub async fn reconcile(&self, connection: &BankConnection) -> Result<BankConnection> {
        let requisition_id = self.linkage_token(connection).await?;
        let requisition = self.aggregator.get_requisition(&requisition_id).await?;

        if requisition.is_linked() {
            self.discover_accounts(connection, &requisition.accounts)
                .await?;
            self.db
                .update_connection_status(connection.id, ConnectionStatus::Linked, None)?;
            info!(
                connection_id = connection.id,
                accounts = requisition.accounts.len(),
                "Connection linked"
            );
        } else if requisition.is_rejected() {
            self.db.update_connection_status(
                connection.id,
                ConnectionStatus::Error,
                Some("authorization was rejected or abandoned"),
            )?;
        }
        // Otherwise still pending; leave it alone

        self.db
            .get_connection(connection.id)?
            .ok_or_else(|| Error::NotFound(format!("connection {}", connection.id)))
    }

    /// Force the next sync to walk the full history window. Also re-checks
    /// authorization state, so a connection stuck in `error` after a retried
    /// flow can recover.
    pub async fn refresh(&self, connection_id: i64, user_id: &str) -> Result<BankConnection> {
        let connection = self.db.get_owned_connection(connection_id, user_id)?;
        ensure_not_expired(self.db, &connection)?;

        let connection = self.reconcile(&connection).await?;
        self.db.clear_account_watermarks(connection.id)?;
        Ok(connection)
    }

    /// Remove a connection and all its data. Upstream consent revocation is
    /// best-effort: local deletion proceeds even when the provider call fails.
    pub async fn delete(&self, connection_id: i64, user_id: &str) -> Result<()> {
        let connection = self.db.get_owned_connection(connection_id, user_id)?;

        match self.linkage_token(&connection).await {
            Ok(requisition_id) => {
                if let Err(e) = self.aggregator.delete_requisition(&requisition_id).await {
                    warn!(connection_id, error = %e, "Upstream consent revocation failed");
                }
            }
            Err(e) => {
                warn!(connection_id, error = %e, "Could not recover linkage token for revocation");
            }
        }

        self.db.delete_connection(connection_id)?;
        info!(connection_id, "Connection deleted");
        Ok(())
    }

    /// Decrypt the stored requisition id
    pub(crate) async fn linkage_token(&self, connection: &BankConnection) -> Result<String> {
        let ciphertext = connection
            .linkage_token_enc
            .as_deref()
            .ok_or_else(|| Error::InvalidData("connection has no linkage token".to_string()))?;
        self.vault.decrypt(ciphertext).await
    }

    /// Fetch details for each provider account and store them, external ids
    /// encrypted. Accounts already present (matched on ciphertext-decrypted
    /// id) are not duplicated.
    async fn discover_accounts(
        &self,
        connection: &BankConnection,
        provider_accounts: &[String],
    ) -> Result<()> {
        let existing = self.db.list_accounts_for_connection(connection.id)?;
        let mut known = Vec::with_capacity(existing.len());
        for account in &existing {
            known.push(self.vault.decrypt(&account.external_id_enc).await?);
        }

        for provider_id in provider_accounts {
            if known.iter().any(|k| k == provider_id) {
                continue;
            }
            let detail = self.aggregator.get_account_detail(provider_id).await?;
            let external_id_enc = self.vault.encrypt(provider_id).await?;
            self.db.insert_account(
                connection.id,
                &connection.user_id,
                &external_id_enc,
                detail.iban.as_deref(),
                detail.name.as_deref(),
                &detail.currency,
            )?;
        }
        Ok(())
    }
}

/// Fail with `ConnectionExpired` when the consent window has lapsed,
/// marking the row expired if the sweep has not caught it yet.
pub fn ensure_not_expired(db: &Database, connection: &BankConnection) -> Result<()> {
    if connection.status == ConnectionStatus::Expired {
        return Err(Error::ConnectionExpired(connection.id));
    }
    if connection.expires_at <= Utc::now() {
        db.update_connection_status(connection.id, ConnectionStatus::Expired, None)?;
        return Err(Error::ConnectionExpired(connection.id));
    }
    Ok(())
}

/// Whether the connection's consent lapses within the given number of days
pub fn expires_within(connection: &BankConnection, days: i64, now: DateTime<Utc>) -> bool {
    connection.expires_at <= now + Duration::days(days)
}

/// Random 32-char hex reference for callback correlation
fn generate_reference() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}
