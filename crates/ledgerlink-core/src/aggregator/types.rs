//! Wire types for the open-banking aggregator API

use serde::{Deserialize, Serialize};

/// Access token grant
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access: String,
    /// Seconds until the access token expires
    pub access_expires: i64,
}

/// A requisition: one authorization flow at one institution.
///
/// Created before redirecting the user; its id is the linkage token kept
/// (encrypted) for the life of the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requisition {
    pub id: String,
    /// CR (created), LN (linked), EX (expired), RJ (rejected)
    pub status: String,
    /// Institution-hosted authorization URL to send the user to
    pub link: String,
    /// Opaque value echoed back on the redirect
    pub reference: String,
    /// Provider account ids, populated once linked
    #[serde(default)]
    pub accounts: Vec<String>,
}

impl Requisition {
    pub fn is_linked(&self) -> bool {
        self.status == "LN"
    }

    pub fn is_rejected(&self) -> bool {
        self.status == "RJ" || self.status == "EX"
    }
}

/// Account identification details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDetail {
    #[serde(default)]
    pub iban: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "ownerName")]
    pub owner_name: Option<String>,
}

/// An amount on the wire: decimal string plus currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAmount {
    pub amount: String,
    pub currency: String,
}

impl WireAmount {
    /// Parse the decimal string. Negative means money out.
    pub fn value(&self) -> Option<f64> {
        self.amount.trim().parse().ok()
    }
}

/// One balance figure for an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    #[serde(rename = "balanceAmount")]
    pub balance_amount: WireAmount,
    /// e.g. "closingBooked", "interimAvailable"
    #[serde(rename = "balanceType")]
    pub balance_type: String,
}

/// A transaction as delivered by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Stable provider id. Some institutions omit it.
    #[serde(default, rename = "transactionId")]
    pub transaction_id: Option<String>,
    #[serde(rename = "bookingDate")]
    pub booking_date: String,
    #[serde(default, rename = "valueDate")]
    pub value_date: Option<String>,
    #[serde(rename = "transactionAmount")]
    pub transaction_amount: WireAmount,
    #[serde(default, rename = "creditorName")]
    pub creditor_name: Option<String>,
    #[serde(default, rename = "debtorName")]
    pub debtor_name: Option<String>,
    #[serde(default, rename = "remittanceInformationUnstructured")]
    pub remittance: Option<String>,
}

impl RawTransaction {
    /// Counterparty as named by the provider: creditor for money out,
    /// debtor for money in.
    pub fn counterparty(&self) -> Option<&str> {
        let outgoing = self
            .transaction_amount
            .value()
            .map(|v| v < 0.0)
            .unwrap_or(true);
        if outgoing {
            self.creditor_name.as_deref().or(self.debtor_name.as_deref())
        } else {
            self.debtor_name.as_deref().or(self.creditor_name.as_deref())
        }
    }
}
