//! Transaction classification service client
//!
//! The classifier is an external oracle: it receives a transaction plus a
//! handful of the user's previously categorized transactions as examples and
//! returns a category with a confidence score. Whether that score clears the
//! acceptance gate is the categorization engine's decision, not this module's.
//!
//! - `ClassifierBackend` trait: the classify operation
//! - `ClassifierClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `HttpClassifier`, `MockClassifier`
//!
//! Environment variables:
//! - `CLASSIFIER_HOST`: classification service base URL

mod http;
mod mock;

pub use http::HttpClassifier;
pub use mock::MockClassifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A previously categorized transaction offered to the classifier as context
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationExample {
    pub merchant: Option<String>,
    pub description: String,
    pub amount: f64,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
}

/// The transaction to classify
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationRequest {
    pub description: String,
    pub merchant: Option<String>,
    pub amount: f64,
    pub direction: String,
    /// Up to a handful of similar, already-categorized transactions
    pub examples: Vec<ClassificationExample>,
}

/// Classifier verdict
#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub confidence: f64,
}

/// Trait defining the classifier interface
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    /// Classify one transaction
    async fn classify(&self, request: &ClassificationRequest) -> Result<Classification>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;
}

/// Concrete classifier client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum ClassifierClient {
    /// HTTP classification service
    Http(HttpClassifier),
    /// Mock backend for testing
    Mock(MockClassifier),
}

impl ClassifierClient {
    /// Create a classifier client from environment variables.
    /// Returns None when no service is configured; categorization then runs
    /// on the rule table alone.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("CLASSIFIER_HOST").ok()?;
        Some(ClassifierClient::Http(HttpClassifier::new(&host)))
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        ClassifierClient::Mock(MockClassifier::new())
    }
}

#[async_trait]
impl ClassifierBackend for ClassifierClient {
    async fn classify(&self, request: &ClassificationRequest) -> Result<Classification> {
        match self {
            ClassifierClient::Http(b) => b.classify(request).await,
            ClassifierClient::Mock(b) => b.classify(request).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            ClassifierClient::Http(b) => b.health_check().await,
            ClassifierClient::Mock(b) => b.health_check().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_classifier_programmable() {
        let client = ClassifierClient::mock();
        if let ClassifierClient::Mock(m) = &client {
            m.set_response("netflix", "entertainment", Some("streaming"), 0.93);
        }

        let request = ClassificationRequest {
            description: "CARD PAYMENT NETFLIX".to_string(),
            merchant: Some("Netflix".to_string()),
            amount: 9.99,
            direction: "debit".to_string(),
            examples: vec![],
        };
        let result = client.classify(&request).await.unwrap();
        assert_eq!(result.category, "entertainment");
        assert_eq!(result.confidence, 0.93);
    }
}
