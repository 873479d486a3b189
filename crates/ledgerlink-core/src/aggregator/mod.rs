//! Open-banking aggregator client
//!
//! All traffic to banks goes through a single aggregator provider. This
//! module wraps its API behind a trait so the rest of the system never sees
//! provider specifics.
//!
//! - `AggregatorApi` trait: directory, requisition and account-data operations
//! - `AggregatorClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `HttpAggregator` (production), `MockAggregator` (tests)
//!
//! Environment variables:
//! - `AGGREGATOR_HOST`: provider base URL (required for the HTTP backend)
//! - `AGGREGATOR_SECRET_ID` / `AGGREGATOR_SECRET_KEY`: API credentials

mod http;
mod mock;
mod types;

pub use http::HttpAggregator;
pub use mock::MockAggregator;
pub use types::{AccountDetail, Balance, RawTransaction, Requisition, TokenGrant, WireAmount};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::Institution;

/// Trait defining the aggregator interface
#[async_trait]
pub trait AggregatorApi: Send + Sync {
    /// List institutions available in a country (ISO 3166-1 alpha-2)
    async fn list_institutions(&self, country: &str) -> Result<Vec<Institution>>;

    /// Fetch one institution from the directory.
    /// Returns `InvalidInstitution` when the id is unknown.
    async fn get_institution(&self, id: &str) -> Result<Institution>;

    /// Start an authorization flow. The returned requisition carries the
    /// institution-hosted link to send the user to.
    async fn create_requisition(
        &self,
        institution_id: &str,
        reference: &str,
        redirect_url: &str,
    ) -> Result<Requisition>;

    /// Fetch the current state of a requisition
    async fn get_requisition(&self, id: &str) -> Result<Requisition>;

    /// Revoke a requisition and the consent behind it
    async fn delete_requisition(&self, id: &str) -> Result<()>;

    /// Identification details for one provider account
    async fn get_account_detail(&self, account_id: &str) -> Result<AccountDetail>;

    /// Current balances for one provider account
    async fn get_balances(&self, account_id: &str) -> Result<Vec<Balance>>;

    /// Booked transactions in a date window (inclusive)
    async fn get_transactions(
        &self,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawTransaction>>;
}

/// Concrete aggregator client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum AggregatorClient {
    /// Production HTTP backend
    Http(HttpAggregator),
    /// In-process mock for testing
    Mock(MockAggregator),
}

impl AggregatorClient {
    /// Create an aggregator client from environment variables.
    /// Returns None when credentials are not configured.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("AGGREGATOR_HOST").ok()?;
        let secret_id = std::env::var("AGGREGATOR_SECRET_ID").ok()?;
        let secret_key = std::env::var("AGGREGATOR_SECRET_KEY").ok()?;
        Some(AggregatorClient::Http(HttpAggregator::new(
            &host,
            &secret_id,
            &secret_key,
        )))
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        AggregatorClient::Mock(MockAggregator::new())
    }
}

#[async_trait]
impl AggregatorApi for AggregatorClient {
    async fn list_institutions(&self, country: &str) -> Result<Vec<Institution>> {
        match self {
            AggregatorClient::Http(b) => b.list_institutions(country).await,
            AggregatorClient::Mock(b) => b.list_institutions(country).await,
        }
    }

    async fn get_institution(&self, id: &str) -> Result<Institution> {
        match self {
            AggregatorClient::Http(b) => b.get_institution(id).await,
            AggregatorClient::Mock(b) => b.get_institution(id).await,
        }
    }

    async fn create_requisition(
        &self,
        institution_id: &str,
        reference: &str,
        redirect_url: &str,
    ) -> Result<Requisition> {
        match self {
            AggregatorClient::Http(b) => {
                b.create_requisition(institution_id, reference, redirect_url)
                    .await
            }
            AggregatorClient::Mock(b) => {
                b.create_requisition(institution_id, reference, redirect_url)
                    .await
            }
        }
    }

    async fn get_requisition(&self, id: &str) -> Result<Requisition> {
        match self {
            AggregatorClient::Http(b) => b.get_requisition(id).await,
            AggregatorClient::Mock(b) => b.get_requisition(id).await,
        }
    }

    async fn delete_requisition(&self, id: &str) -> Result<()> {
        match self {
            AggregatorClient::Http(b) => b.delete_requisition(id).await,
            AggregatorClient::Mock(b) => b.delete_requisition(id).await,
        }
    }

    async fn get_account_detail(&self, account_id: &str) -> Result<AccountDetail> {
        match self {
            AggregatorClient::Http(b) => b.get_account_detail(account_id).await,
            AggregatorClient::Mock(b) => b.get_account_detail(account_id).await,
        }
    }

    async fn get_balances(&self, account_id: &str) -> Result<Vec<Balance>> {
        match self {
            AggregatorClient::Http(b) => b.get_balances(account_id).await,
            AggregatorClient::Mock(b) => b.get_balances(account_id).await,
        }
    }

    async fn get_transactions(
        &self,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawTransaction>> {
        match self {
            AggregatorClient::Http(b) => b.get_transactions(account_id, from, to).await,
            AggregatorClient::Mock(b) => b.get_transactions(account_id, from, to).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_mock_directory() {
        let client = AggregatorClient::mock();
        let institutions = client.list_institutions("DE").await.unwrap();
        assert!(!institutions.is_empty());

        let first = client.get_institution(&institutions[0].id).await.unwrap();
        assert_eq!(first.id, institutions[0].id);

        assert!(matches!(
            client.get_institution("NO_SUCH_BANK").await,
            Err(Error::InvalidInstitution(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_requisition_flow() {
        let client = AggregatorClient::mock();
        let req = client
            .create_requisition("SANDBOX_BANK", "ref-1", "https://app.example/callback")
            .await
            .unwrap();
        assert_eq!(req.status, "CR");
        assert!(req.link.contains("ref-1") || !req.link.is_empty());

        let fetched = client.get_requisition(&req.id).await.unwrap();
        assert_eq!(fetched.reference, "ref-1");

        client.delete_requisition(&req.id).await.unwrap();
        assert!(client.get_requisition(&req.id).await.is_err());
    }
}
