//! Mock aggregator backend for testing
//!
//! Holds everything in process memory and is fully programmable from tests:
//! seed institutions and accounts, drive requisition status transitions, and
//! count upstream calls to assert the sync pipeline's fetch behavior.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::models::Institution;

use super::types::{AccountDetail, Balance, RawTransaction, Requisition, WireAmount};
use super::AggregatorApi;

#[derive(Default)]
struct MockState {
    institutions: Vec<Institution>,
    requisitions: HashMap<String, Requisition>,
    accounts: HashMap<String, MockAccount>,
    requisition_counter: u64,
    requisitions_created: u64,
    transaction_fetches: u64,
    balance_fetches: u64,
}

struct MockAccount {
    detail: AccountDetail,
    balances: Vec<Balance>,
    transactions: Vec<RawTransaction>,
}

/// In-process aggregator for tests
#[derive(Clone)]
pub struct MockAggregator {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAggregator {
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.institutions = vec![
            Institution {
                id: "SANDBOX_BANK".to_string(),
                name: "Sandbox Bank".to_string(),
                bic: Some("SANDDE00".to_string()),
                countries: vec!["DE".to_string()],
                logo: None,
                transaction_total_days: Some("90".to_string()),
            },
            Institution {
                id: "TEST_CREDIT".to_string(),
                name: "Test Credit Union".to_string(),
                bic: None,
                countries: vec!["DE".to_string(), "NL".to_string()],
                logo: None,
                transaction_total_days: Some("180".to_string()),
            },
        ];
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Seed a provider account with details, a balance and transactions
    pub fn add_account(
        &self,
        account_id: &str,
        iban: Option<&str>,
        currency: &str,
        balance: f64,
        transactions: Vec<RawTransaction>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(
            account_id.to_string(),
            MockAccount {
                detail: AccountDetail {
                    iban: iban.map(|s| s.to_string()),
                    currency: currency.to_string(),
                    name: Some("Main Account".to_string()),
                    owner_name: None,
                },
                balances: vec![Balance {
                    balance_amount: WireAmount {
                        amount: format!("{:.2}", balance),
                        currency: currency.to_string(),
                    },
                    balance_type: "closingBooked".to_string(),
                }],
                transactions,
            },
        );
    }

    /// Append a transaction to a seeded account
    pub fn push_transaction(&self, account_id: &str, tx: RawTransaction) {
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(account_id) {
            account.transactions.push(tx);
        }
    }

    /// Move a requisition to linked and attach provider accounts
    pub fn finish_authorization(&self, requisition_id: &str, account_ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        if let Some(req) = state.requisitions.get_mut(requisition_id) {
            req.status = "LN".to_string();
            req.accounts = account_ids.iter().map(|s| s.to_string()).collect();
        }
    }

    /// Move a requisition to rejected
    pub fn reject_authorization(&self, requisition_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(req) = state.requisitions.get_mut(requisition_id) {
            req.status = "RJ".to_string();
        }
    }

    /// Number of requisitions created
    pub fn requisitions_created(&self) -> u64 {
        self.state.lock().unwrap().requisitions_created
    }

    /// Number of transaction fetches observed
    pub fn transaction_fetches(&self) -> u64 {
        self.state.lock().unwrap().transaction_fetches
    }

    /// Number of balance fetches observed
    pub fn balance_fetches(&self) -> u64 {
        self.state.lock().unwrap().balance_fetches
    }

    /// Build a raw debit transaction, amounts on the wire being negative
    /// for money out
    pub fn raw_debit(id: Option<&str>, date: &str, amount: f64, counterparty: &str) -> RawTransaction {
        RawTransaction {
            transaction_id: id.map(|s| s.to_string()),
            booking_date: date.to_string(),
            value_date: None,
            transaction_amount: WireAmount {
                amount: format!("{:.2}", -amount.abs()),
                currency: "EUR".to_string(),
            },
            creditor_name: Some(counterparty.to_string()),
            debtor_name: None,
            remittance: Some(format!("CARD PAYMENT {}", counterparty.to_uppercase())),
        }
    }
}

#[async_trait]
impl AggregatorApi for MockAggregator {
    async fn list_institutions(&self, country: &str) -> Result<Vec<Institution>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .institutions
            .iter()
            .filter(|i| i.countries.iter().any(|c| c == country))
            .cloned()
            .collect())
    }

    async fn get_institution(&self, id: &str) -> Result<Institution> {
        let state = self.state.lock().unwrap();
        state
            .institutions
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| Error::InvalidInstitution(id.to_string()))
    }

    async fn create_requisition(
        &self,
        institution_id: &str,
        reference: &str,
        redirect_url: &str,
    ) -> Result<Requisition> {
        let mut state = self.state.lock().unwrap();
        if !state.institutions.iter().any(|i| i.id == institution_id) {
            return Err(Error::InvalidInstitution(institution_id.to_string()));
        }
        state.requisition_counter += 1;
        state.requisitions_created += 1;
        let id = format!("req-{}", state.requisition_counter);
        let requisition = Requisition {
            id: id.clone(),
            status: "CR".to_string(),
            link: format!(
                "https://auth.example/{}/start?redirect={}",
                institution_id, redirect_url
            ),
            reference: reference.to_string(),
            accounts: Vec::new(),
        };
        state.requisitions.insert(id, requisition.clone());
        Ok(requisition)
    }

    async fn get_requisition(&self, id: &str) -> Result<Requisition> {
        let state = self.state.lock().unwrap();
        state
            .requisitions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Upstream(format!("requisition {} not found", id)))
    }

    async fn delete_requisition(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.requisitions.remove(id);
        Ok(())
    }

    async fn get_account_detail(&self, account_id: &str) -> Result<AccountDetail> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(account_id)
            .map(|a| a.detail.clone())
            .ok_or_else(|| Error::Upstream(format!("account {} not found", account_id)))
    }

    async fn get_balances(&self, account_id: &str) -> Result<Vec<Balance>> {
        let mut state = self.state.lock().unwrap();
        state.balance_fetches += 1;
        state
            .accounts
            .get(account_id)
            .map(|a| a.balances.clone())
            .ok_or_else(|| Error::Upstream(format!("account {} not found", account_id)))
    }

    async fn get_transactions(
        &self,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawTransaction>> {
        let mut state = self.state.lock().unwrap();
        state.transaction_fetches += 1;
        let account = state
            .accounts
            .get(account_id)
            .ok_or_else(|| Error::Upstream(format!("account {} not found", account_id)))?;

        Ok(account
            .transactions
            .iter()
            .filter(|tx| {
                NaiveDate::parse_from_str(&tx.booking_date, "%Y-%m-%d")
                    .map(|d| d >= from && d <= to)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
