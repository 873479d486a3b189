//! Bank account handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;

use crate::{AppError, AppState, AuthUser};
use ledgerlink_core::models::BankAccount;
use ledgerlink_core::{SyncOutcome, TransactionIngestor};

/// GET /api/accounts - List the user's accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Vec<BankAccount>>, AppError> {
    let accounts = state.db.list_accounts(&user_id)?;
    Ok(Json(accounts))
}

/// GET /api/accounts/:id - Get one account
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<BankAccount>, AppError> {
    let account = state.db.get_owned_account(id, &user_id)?;
    Ok(Json(account))
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub account_id: i64,
    pub currency: String,
    pub balance: Option<f64>,
    pub available_balance: Option<f64>,
    pub as_of: Option<chrono::DateTime<chrono::Utc>>,
}

/// GET /api/accounts/:id/balance - Last synced balances
pub async fn get_account_balance(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account = state.db.get_owned_account(id, &user_id)?;
    Ok(Json(BalanceResponse {
        account_id: account.id,
        currency: account.currency,
        balance: account.balance,
        available_balance: account.available_balance,
        as_of: account.last_synced_at,
    }))
}

/// POST /api/accounts/:id/sync - Pull new transactions for one account
pub async fn sync_account(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<SyncOutcome>, AppError> {
    let ingestor = TransactionIngestor::new(
        &state.db,
        &state.aggregator,
        &state.vault,
        state.classifier.as_ref(),
    );
    let outcome = ingestor.sync_account(id, &user_id).await?;
    Ok(Json(outcome))
}
