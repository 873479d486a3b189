//! Transaction handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState, AuthUser, MAX_PAGE_LIMIT};
use ledgerlink_core::db::TransactionFilter;
use ledgerlink_core::models::Transaction;
use ledgerlink_core::{CategorizationEngine, CategoryUpdate, SyncReport, TransactionIngestor};

/// Query parameters for listing transactions
#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub account_id: Option<i64>,
    pub category: Option<String>,
    /// Exact merchant match, case-insensitive
    pub merchant: Option<String>,
    /// Filter by business flag
    pub business: Option<bool>,
    /// Minimum amount magnitude
    pub min_amount: Option<f64>,
    /// Search query (filters by description or merchant)
    pub search: Option<String>,
    /// Start date (YYYY-MM-DD)
    pub from: Option<String>,
    /// End date (YYYY-MM-DD)
    pub to: Option<String>,
}

fn default_limit() -> i64 {
    100
}

fn parse_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AppError::bad_request("dates must be YYYY-MM-DD"))
}

/// GET /api/transactions - List transactions with filters
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Query(params): Query<TransactionQuery>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let filter = TransactionFilter {
        account_id: params.account_id,
        category: params.category,
        merchant: params.merchant,
        business: params.business,
        min_amount: params.min_amount,
        from: params.from.as_deref().map(parse_date).transpose()?,
        to: params.to.as_deref().map(parse_date).transpose()?,
        search: params.search,
        limit: Some(params.limit.clamp(1, MAX_PAGE_LIMIT)),
        offset: Some(params.offset.max(0)),
    };

    let transactions = state.db.list_transactions(&user_id, &filter)?;
    Ok(Json(transactions))
}

/// GET /api/transactions/:id - Get one transaction
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>, AppError> {
    let tx = state.db.get_owned_transaction(id, &user_id)?;
    Ok(Json(tx))
}

/// Request body for a category correction
#[derive(Debug, Deserialize)]
pub struct CategorizeRequest {
    pub category: String,
    pub subcategory: Option<String>,
    /// Also relabel similar machine-categorized transactions
    #[serde(default)]
    pub apply_to_similar: bool,
}

#[derive(Serialize)]
pub struct CategorizeResponse {
    pub transaction: Transaction,
    /// Other transactions relabeled as a side effect
    pub relabeled: usize,
}

/// POST /api/transactions/:id/categorize - Record a user correction
pub async fn categorize_transaction(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<CategorizeRequest>,
) -> Result<Json<CategorizeResponse>, AppError> {
    if body.category.trim().is_empty() {
        return Err(AppError::bad_request("category must not be empty"));
    }

    let engine = CategorizationEngine::new(&state.db, state.classifier.as_ref());
    let (transaction, relabeled) = engine
        .apply_user_correction(
            &user_id,
            id,
            body.category.trim(),
            body.subcategory.as_deref(),
            body.apply_to_similar,
        )
        .await?;

    Ok(Json(CategorizeResponse {
        transaction,
        relabeled,
    }))
}

/// Request body for bulk categorization
#[derive(Debug, Deserialize)]
pub struct BulkCategorizeRequest {
    pub updates: Vec<CategoryUpdate>,
    #[serde(default)]
    pub apply_to_similar: bool,
}

#[derive(Serialize)]
pub struct BulkCategorizeResponse {
    pub updated: usize,
    pub relabeled: usize,
}

/// POST /api/transactions/bulk-categorize - Correct many at once
pub async fn bulk_categorize(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(body): Json<BulkCategorizeRequest>,
) -> Result<Json<BulkCategorizeResponse>, AppError> {
    if body.updates.is_empty() {
        return Err(AppError::bad_request("updates must not be empty"));
    }

    let engine = CategorizationEngine::new(&state.db, state.classifier.as_ref());
    let relabeled = engine
        .bulk_categorize(&user_id, &body.updates, body.apply_to_similar)
        .await?;

    Ok(Json(BulkCategorizeResponse {
        updated: body.updates.len(),
        relabeled,
    }))
}

/// Request body for linking an invoice document
#[derive(Debug, Deserialize)]
pub struct AttachInvoiceRequest {
    /// Opaque document id from the document store
    pub doc_id: String,
}

/// POST /api/transactions/:id/invoice - Link an invoice/receipt document
pub async fn attach_invoice(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<AttachInvoiceRequest>,
) -> Result<Json<Transaction>, AppError> {
    if body.doc_id.trim().is_empty() {
        return Err(AppError::bad_request("doc_id must not be empty"));
    }

    let tx = state.db.get_owned_transaction(id, &user_id)?;
    state.db.set_transaction_invoice(tx.id, body.doc_id.trim())?;
    let tx = state.db.get_owned_transaction(id, &user_id)?;
    Ok(Json(tx))
}

/// POST /api/transactions/sync-all - Sync every linked connection
pub async fn sync_all(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Vec<SyncReport>>, AppError> {
    let ingestor = TransactionIngestor::new(
        &state.db,
        &state.aggregator,
        &state.vault,
        state.classifier.as_ref(),
    );
    let reports = ingestor.sync_all(&user_id).await?;
    Ok(Json(reports))
}
