//! Domain models for LedgerLink

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a bank connection's consent.
///
/// `pending` moves to `linked` or `error` after the user finishes (or
/// abandons) the institution's authorization flow. Any state can move to
/// `expired` once the 90-day consent window lapses; `expired` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Linked,
    Expired,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Linked => "linked",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "linked" => Ok(Self::Linked),
            "expired" => Ok(Self::Expired),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown connection status: {}", s)),
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Checking,
    Savings,
    Credit,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Savings => "savings",
            Self::Credit => "credit",
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "checking" => Ok(Self::Checking),
            "savings" => Ok(Self::Savings),
            "credit" => Ok(Self::Credit),
            _ => Err(format!("Unknown account type: {}", s)),
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Money movement direction. Amounts are stored as positive magnitudes;
/// the direction carries the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who assigned a transaction's category. User assignments are
/// authoritative and are never overwritten by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorizedBy {
    /// Rule table or bulk relabel
    Auto,
    /// Classification service, accepted above the confidence gate
    Ml,
    /// Manual correction by the account owner
    User,
}

impl CategorizedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ml => "ml",
            Self::User => "user",
        }
    }
}

impl std::str::FromStr for CategorizedBy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ml" => Ok(Self::Ml),
            "user" => Ok(Self::User),
            _ => Err(format!("Unknown categorization source: {}", s)),
        }
    }
}

impl std::fmt::Display for CategorizedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing cadence of a detected subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Days until the next expected charge.
    pub fn period_days(&self) -> i64 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Monthly => 30,
            Self::Yearly => 365,
        }
    }

    /// Multiplier used to express one charge as a monthly cost.
    pub fn monthly_multiplier(&self) -> f64 {
        match self {
            Self::Daily => 30.0,
            Self::Weekly => 4.33,
            Self::Monthly => 1.0,
            Self::Yearly => 1.0 / 12.0,
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" | "annual" => Ok(Self::Yearly),
            _ => Err(format!("Unknown frequency: {}", s)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(format!("Unknown subscription status: {}", s)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's link to one bank, covering one consent grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConnection {
    pub id: i64,
    pub user_id: String,
    pub institution_id: String,
    pub institution_name: String,
    pub account_type: AccountType,
    pub status: ConnectionStatus,
    /// Opaque value the aggregator echoes back on redirect. Unique;
    /// indexed so callbacks resolve without scanning.
    #[serde(skip_serializing)]
    pub reference: String,
    /// Vault-encrypted requisition id. Never serialized.
    #[serde(skip_serializing)]
    pub linkage_token_enc: Option<String>,
    /// Human-readable failure reason when status is `error`
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Consent end. 90 days after creation.
    pub expires_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// One bank account discovered under a linked connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: i64,
    pub connection_id: i64,
    pub user_id: String,
    /// Vault-encrypted provider account id. Never serialized.
    #[serde(skip_serializing)]
    pub external_id_enc: String,
    pub iban: Option<String>,
    pub name: Option<String>,
    pub currency: String,
    pub balance: Option<f64>,
    pub available_balance: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Watermark: end of the last successfully synced window.
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// A bank transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub user_id: String,
    /// Provider transaction id, or a deterministic hash when absent
    pub external_id: String,
    pub date: NaiveDate,
    /// Positive magnitude; see `direction` for sign
    pub amount: f64,
    pub currency: String,
    pub direction: Direction,
    pub description: String,
    /// Cleaned counterparty name used for grouping and detection
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub confidence: Option<f64>,
    pub categorized_by: Option<CategorizedBy>,
    pub is_business: bool,
    pub is_recurring: bool,
    pub subscription_id: Option<i64>,
    /// Raw provider fields kept for audit, as JSON
    pub metadata: Option<String>,
    /// Opaque id of a linked invoice/receipt document
    pub invoice_doc_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Transaction data as produced by the sync pipeline, before insert.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub user_id: String,
    pub external_id: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub currency: String,
    pub direction: Direction,
    pub description: String,
    pub merchant: Option<String>,
    pub metadata: Option<String>,
}

/// A detected recurring payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: String,
    pub merchant: String,
    pub amount: f64,
    pub currency: String,
    pub frequency: Frequency,
    pub category: Option<String>,
    pub next_expected: Option<NaiveDate>,
    pub confidence: f64,
    pub last_charged: Option<NaiveDate>,
    pub transaction_count: i64,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user correction to a transaction's category, kept append-only as
/// training signal for the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFeedback {
    pub id: i64,
    pub user_id: String,
    pub transaction_id: i64,
    pub merchant: Option<String>,
    pub description: String,
    pub amount: f64,
    pub old_category: Option<String>,
    pub new_category: String,
    pub new_subcategory: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An institution in the aggregator's directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bic: Option<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub logo: Option<String>,
    /// Days of history the institution exposes
    #[serde(default)]
    pub transaction_total_days: Option<String>,
}
