//! HTTP aggregator backend
//!
//! Handles the provider's token lifecycle transparently: a cached access
//! token is reused until shortly before expiry, and refresh is serialized
//! behind an async mutex so concurrent callers trigger at most one token
//! request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Institution;

use super::types::{AccountDetail, Balance, RawTransaction, Requisition, TokenGrant};
use super::AggregatorApi;

/// Refresh this long before the token actually expires
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

struct CachedToken {
    access: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_usable(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_SKEW < self.expires_at
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    secret_id: &'a str,
    secret_key: &'a str,
}

#[derive(Serialize)]
struct RequisitionRequest<'a> {
    institution_id: &'a str,
    reference: &'a str,
    redirect: &'a str,
}

/// Production aggregator backend
#[derive(Clone)]
pub struct HttpAggregator {
    client: Client,
    host: String,
    secret_id: String,
    secret_key: String,
    // Lock held across refresh so concurrent callers single-flight
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl HttpAggregator {
    pub fn new(host: &str, secret_id: &str, secret_key: &str) -> Self {
        Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    /// Get a usable access token, refreshing if needed
    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.is_usable() {
                return Ok(cached.access.clone());
            }
        }

        debug!("Refreshing aggregator access token");
        let url = format!("{}/api/v2/token/new/", self.host);
        let response = self
            .client
            .post(&url)
            .json(&TokenRequest {
                secret_id: &self.secret_id,
                secret_key: &self.secret_key,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "token request returned {}",
                response.status()
            )));
        }

        let grant: TokenGrant = response.json().await?;
        let access = grant.access.clone();
        *guard = Some(CachedToken {
            access: grant.access,
            expires_at: Instant::now() + Duration::from_secs(grant.access_expires.max(0) as u64),
        });
        Ok(access)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}{}", self.host, path))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(response)
    }

    fn upstream_error(status: StatusCode, context: &str) -> Error {
        Error::Upstream(format!("{} returned {}", context, status))
    }
}

#[async_trait]
impl AggregatorApi for HttpAggregator {
    async fn list_institutions(&self, country: &str) -> Result<Vec<Institution>> {
        let response = self
            .get(&format!("/api/v2/institutions/?country={}", country))
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response.status(), "institutions"));
        }
        Ok(response.json().await?)
    }

    async fn get_institution(&self, id: &str) -> Result<Institution> {
        let response = self.get(&format!("/api/v2/institutions/{}/", id)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::InvalidInstitution(id.to_string())),
            status if !status.is_success() => Err(Self::upstream_error(status, "institution")),
            _ => Ok(response.json().await?),
        }
    }

    async fn create_requisition(
        &self,
        institution_id: &str,
        reference: &str,
        redirect_url: &str,
    ) -> Result<Requisition> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/api/v2/requisitions/", self.host))
            .bearer_auth(token)
            .json(&RequisitionRequest {
                institution_id,
                reference,
                redirect: redirect_url,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(response.status(), "requisition create"));
        }
        Ok(response.json().await?)
    }

    async fn get_requisition(&self, id: &str) -> Result<Requisition> {
        let response = self.get(&format!("/api/v2/requisitions/{}/", id)).await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response.status(), "requisition"));
        }
        Ok(response.json().await?)
    }

    async fn delete_requisition(&self, id: &str) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .delete(format!("{}/api/v2/requisitions/{}/", self.host, id))
            .bearer_auth(token)
            .send()
            .await?;
        // Already-gone is fine; revocation is best-effort on delete paths
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(Self::upstream_error(response.status(), "requisition delete"));
        }
        Ok(())
    }

    async fn get_account_detail(&self, account_id: &str) -> Result<AccountDetail> {
        let response = self
            .get(&format!("/api/v2/accounts/{}/details/", account_id))
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response.status(), "account details"));
        }
        // Details come wrapped: {"account": {...}}
        let body: Value = response.json().await?;
        let account = body
            .get("account")
            .cloned()
            .ok_or_else(|| Error::Upstream("account details missing body".to_string()))?;
        Ok(serde_json::from_value(account)?)
    }

    async fn get_balances(&self, account_id: &str) -> Result<Vec<Balance>> {
        let response = self
            .get(&format!("/api/v2/accounts/{}/balances/", account_id))
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response.status(), "balances"));
        }
        let body: Value = response.json().await?;
        let balances = body
            .get("balances")
            .cloned()
            .ok_or_else(|| Error::Upstream("balances missing body".to_string()))?;
        Ok(serde_json::from_value(balances)?)
    }

    async fn get_transactions(
        &self,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawTransaction>> {
        let response = self
            .get(&format!(
                "/api/v2/accounts/{}/transactions/?date_from={}&date_to={}",
                account_id, from, to
            ))
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response.status(), "transactions"));
        }
        // Body shape: {"transactions": {"booked": [...], "pending": [...]}}
        let body: Value = response.json().await?;
        let booked = body
            .pointer("/transactions/booked")
            .cloned()
            .ok_or_else(|| Error::Upstream("transactions missing body".to_string()))?;
        Ok(serde_json::from_value(booked)?)
    }
}
