//! LedgerLink Core Library
//!
//! Shared functionality for the LedgerLink account aggregation service:
//! - Encrypted SQLite storage and migrations
//! - Aggregator API client for open-banking account linking
//! - Consent lifecycle management and authorization callbacks
//! - Transaction sync with watermarks and deduplication
//! - ML-backed categorization with a rule-table fallback
//! - Recurring payment detection and spending insights
//! - Envelope encryption of provider secrets via a KMS vault

pub mod aggregator;
pub mod ai;
pub mod categorize;
pub mod connections;
pub mod db;
pub mod detect;
pub mod error;
pub mod insights;
pub mod models;
pub mod sync;
pub mod vault;

pub use aggregator::{AggregatorApi, AggregatorClient, MockAggregator};
pub use ai::{Classification, ClassifierBackend, ClassifierClient, MockClassifier};
pub use categorize::{CategorizationEngine, CategoryUpdate};
pub use connections::{ConnectionManager, InitiatedConnection};
pub use db::{Database, TransactionFilter, TransactionUpsert};
pub use detect::{DetectionConfig, DetectionResults, SubscriptionDetector};
pub use error::{Error, Result};
pub use insights::{spending_insights, SpendingInsights};
pub use sync::{SyncOutcome, SyncReport, TransactionIngestor};
pub use vault::{Vault, VaultClient};
