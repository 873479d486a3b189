//! Transaction sync pipeline
//!
//! Pulls booked transactions and balances from the aggregator into local
//! storage. Each account sync makes exactly one transaction fetch and one
//! balance fetch; dedup happens on upsert, keyed by (account, external id),
//! so re-delivered transactions refresh in place and syncing is idempotent.
//!
//! The sync window starts at the account's watermark (or 90 days back for a
//! first sync) and ends now. The watermark only advances after the window
//! has been fully processed, so a failed sync re-covers the same range.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::aggregator::{AggregatorApi, AggregatorClient, Balance, RawTransaction};
use crate::ai::ClassifierClient;
use crate::categorize::CategorizationEngine;
use crate::connections::ensure_not_expired;
use crate::db::{Database, TransactionUpsert};
use crate::error::{Error, Result};
use crate::models::{BankAccount, ConnectionStatus, Direction, NewTransaction};
use crate::vault::{Vault, VaultClient};

/// History window for an account's first sync
pub const INITIAL_WINDOW_DAYS: i64 = 90;

/// Outcome of syncing one account
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub account_id: i64,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub categorized: usize,
}

/// Per-account result of a multi-account sync. Failures are reported, not
/// propagated, so one broken account does not block the rest.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub connection_id: i64,
    /// None when the failure happened before any account was reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Clean a provider counterparty name for grouping: drop `*ref` / `#ref`
/// noise tokens and collapse whitespace. Case is preserved.
pub fn normalize_merchant(raw: &str) -> String {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let noise = NOISE.get_or_init(|| Regex::new(r"[*#]\S*").expect("static pattern"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("static pattern"));

    let cleaned = noise.replace_all(raw, " ");
    spaces.replace_all(cleaned.trim(), " ").trim().to_string()
}

/// Deterministic external id for providers that omit transaction ids.
/// Hashed over the fields that identify a transaction on a statement.
fn generate_external_id(tx: &RawTransaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tx.booking_date.as_bytes());
    hasher.update(tx.transaction_amount.amount.as_bytes());
    hasher.update(tx.transaction_amount.currency.as_bytes());
    hasher.update(
        tx.counterparty()
            .or(tx.remittance.as_deref())
            .unwrap_or("")
            .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

fn pick_balances(balances: &[Balance]) -> (Option<f64>, Option<f64>) {
    let booked = balances
        .iter()
        .find(|b| b.balance_type == "closingBooked")
        .or_else(|| balances.first())
        .and_then(|b| b.balance_amount.value());
    let available = balances
        .iter()
        .find(|b| b.balance_type == "interimAvailable")
        .and_then(|b| b.balance_amount.value());
    (booked, available)
}

/// Pulls account data from the aggregator into the database
pub struct TransactionIngestor<'a> {
    db: &'a Database,
    aggregator: &'a AggregatorClient,
    vault: &'a VaultClient,
    classifier: Option<&'a ClassifierClient>,
}

impl<'a> TransactionIngestor<'a> {
    pub fn new(
        db: &'a Database,
        aggregator: &'a AggregatorClient,
        vault: &'a VaultClient,
        classifier: Option<&'a ClassifierClient>,
    ) -> Self {
        Self {
            db,
            aggregator,
            vault,
            classifier,
        }
    }

    /// Sync one account, verifying ownership and consent validity first
    pub async fn sync_account(&self, account_id: i64, user_id: &str) -> Result<SyncOutcome> {
        let account = self.db.get_owned_account(account_id, user_id)?;
        let connection = self
            .db
            .get_connection(account.connection_id)?
            .ok_or_else(|| Error::NotFound(format!("connection {}", account.connection_id)))?;
        ensure_not_expired(self.db, &connection)?;

        let outcome = self.sync_account_inner(&account).await?;
        self.db
            .touch_connection_synced(connection.id, Utc::now())?;
        Ok(outcome)
    }

    /// Sync every account under a connection. Per-account failures land in
    /// the report instead of aborting the rest.
    pub async fn sync_connection(&self, connection_id: i64, user_id: &str) -> Result<Vec<SyncReport>> {
        let connection = self.db.get_owned_connection(connection_id, user_id)?;
        ensure_not_expired(self.db, &connection)?;

        let accounts = self.db.list_accounts_for_connection(connection.id)?;
        let mut reports = Vec::with_capacity(accounts.len());
        let mut any_ok = false;

        for account in &accounts {
            if !account.is_active {
                continue;
            }
            match self.sync_account_inner(account).await {
                Ok(outcome) => {
                    any_ok = true;
                    reports.push(SyncReport {
                        connection_id: connection.id,
                        account_id: Some(account.id),
                        outcome: Some(outcome),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(account_id = account.id, error = %e, "Account sync failed");
                    reports.push(SyncReport {
                        connection_id: connection.id,
                        account_id: Some(account.id),
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if any_ok {
            self.db
                .touch_connection_synced(connection.id, Utc::now())?;
        }
        Ok(reports)
    }

    /// Sync every linked connection a user has. Connections past their
    /// consent window are swept to expired first and skipped; broken ones
    /// are reported per-account and do not block the rest.
    pub async fn sync_all(&self, user_id: &str) -> Result<Vec<SyncReport>> {
        self.db.expire_due_connections(Utc::now())?;
        let connections = self.db.list_connections(user_id)?;
        let mut reports = Vec::new();

        for connection in &connections {
            if connection.status != ConnectionStatus::Linked {
                continue;
            }
            match self.sync_connection(connection.id, user_id).await {
                Ok(mut r) => reports.append(&mut r),
                Err(e) => {
                    warn!(connection_id = connection.id, error = %e, "Connection sync failed");
                    reports.push(SyncReport {
                        connection_id: connection.id,
                        account_id: None,
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(reports)
    }

    async fn sync_account_inner(&self, account: &BankAccount) -> Result<SyncOutcome> {
        // Capture the window end before fetching; the watermark moves here
        // only once the whole window is stored.
        let now = Utc::now();
        let from = account
            .last_synced_at
            .map(|w| w.date_naive())
            .unwrap_or_else(|| (now - Duration::days(INITIAL_WINDOW_DAYS)).date_naive());
        let to = now.date_naive();

        let external_id = self.vault.decrypt(&account.external_id_enc).await?;

        // One transaction fetch, one balance fetch
        let raw_transactions = self
            .aggregator
            .get_transactions(&external_id, from, to)
            .await?;
        let balances = self.aggregator.get_balances(&external_id).await?;

        let mut inserted = 0;
        let mut updated = 0;
        let mut to_categorize = Vec::new();

        for raw in &raw_transactions {
            let new_tx = match self.convert(account, raw) {
                Some(tx) => tx,
                None => {
                    warn!(account_id = account.id, "Skipping malformed provider transaction");
                    continue;
                }
            };

            match self.db.upsert_transaction(&new_tx)? {
                TransactionUpsert::Inserted(id) => {
                    inserted += 1;
                    to_categorize.push(id);
                }
                TransactionUpsert::Updated(id) => {
                    updated += 1;
                    // Re-delivered rows that never got a category still need one
                    if let Some(tx) = self.db.get_transaction(id)? {
                        if tx.category.is_none() {
                            to_categorize.push(id);
                        }
                    }
                }
            }
        }

        let engine = CategorizationEngine::new(self.db, self.classifier);
        let mut categorized = 0;
        for id in &to_categorize {
            if let Some(tx) = self.db.get_transaction(*id)? {
                engine.auto_categorize(&tx).await?;
                categorized += 1;
            }
        }

        let (balance, available) = pick_balances(&balances);
        self.db
            .update_account_balance(account.id, balance, available)?;
        self.db.update_account_watermark(account.id, now)?;

        info!(
            account_id = account.id,
            fetched = raw_transactions.len(),
            inserted,
            updated,
            "Account synced"
        );

        Ok(SyncOutcome {
            account_id: account.id,
            fetched: raw_transactions.len(),
            inserted,
            updated,
            categorized,
        })
    }

    /// Map a provider transaction to storage form. Returns None when the
    /// amount or date cannot be parsed.
    fn convert(&self, account: &BankAccount, raw: &RawTransaction) -> Option<NewTransaction> {
        let signed_amount = raw.transaction_amount.value()?;
        let date = NaiveDate::parse_from_str(&raw.booking_date, "%Y-%m-%d").ok()?;

        let direction = if signed_amount < 0.0 {
            Direction::Debit
        } else {
            Direction::Credit
        };

        let description = raw
            .remittance
            .clone()
            .or_else(|| raw.counterparty().map(|s| s.to_string()))
            .unwrap_or_default();

        let merchant = raw
            .counterparty()
            .map(normalize_merchant)
            .filter(|m| !m.is_empty());

        let external_id = raw
            .transaction_id
            .clone()
            .unwrap_or_else(|| generate_external_id(raw));

        Some(NewTransaction {
            account_id: account.id,
            user_id: account.user_id.clone(),
            external_id,
            date,
            amount: signed_amount.abs(),
            currency: raw.transaction_amount.currency.clone(),
            direction,
            description,
            merchant,
            metadata: serde_json::to_string(raw).ok(),
        })
    }
}
