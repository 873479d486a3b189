//! Bank connection handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState, AuthUser, SuccessResponse};
use ledgerlink_core::connections::expires_within;
use ledgerlink_core::models::{AccountType, BankConnection};
use ledgerlink_core::{ConnectionManager, InitiatedConnection};

/// Consent windows lapsing within this many days get a renewal hint
const RENEWAL_HINT_DAYS: i64 = 14;

fn connection_manager(state: &AppState) -> ConnectionManager<'_> {
    ConnectionManager::new(
        &state.db,
        &state.aggregator,
        &state.vault,
        &state.config.redirect_url,
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub institution_id: String,
    pub account_type: AccountType,
}

/// POST /api/connections - Start linking a bank
pub async fn create_connection(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(body): Json<CreateConnectionRequest>,
) -> Result<Json<InitiatedConnection>, AppError> {
    let initiated = connection_manager(&state)
        .initiate(&user_id, &body.institution_id, body.account_type)
        .await?;
    Ok(Json(initiated))
}

#[derive(Debug, Serialize)]
pub struct ConnectionEntry {
    #[serde(flatten)]
    pub connection: BankConnection,
    /// Consent lapses soon; the client should prompt for re-authorization
    pub renewal_due: bool,
}

/// GET /api/connections - List the user's connections
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Vec<ConnectionEntry>>, AppError> {
    // Sweep lapsed consents so the listing never shows a stale "linked"
    let now = chrono::Utc::now();
    state.db.expire_due_connections(now)?;
    let entries = state
        .db
        .list_connections(&user_id)?
        .into_iter()
        .map(|connection| ConnectionEntry {
            renewal_due: expires_within(&connection, RENEWAL_HINT_DAYS, now),
            connection,
        })
        .collect();
    Ok(Json(entries))
}

/// GET /api/connections/:id - Get one connection
pub async fn get_connection(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<BankConnection>, AppError> {
    state.db.expire_due_connections(chrono::Utc::now())?;
    let connection = state.db.get_owned_connection(id, &user_id)?;
    Ok(Json(connection))
}

/// POST /api/connections/:id/refresh - Re-check authorization status
pub async fn refresh_connection(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<BankConnection>, AppError> {
    let connection = connection_manager(&state).refresh(id, &user_id).await?;
    Ok(Json(connection))
}

/// DELETE /api/connections/:id - Revoke consent and delete all data
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    connection_manager(&state).delete(id, &user_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    /// Opaque reference the aggregator echoes back
    #[serde(rename = "ref")]
    pub reference: String,
}

/// GET /api/callback?ref= - Authorization redirect landing.
///
/// Unauthenticated: the browser arrives here straight from the bank. The
/// reference is the only thing trusted, and it resolves through an indexed
/// point lookup.
pub async fn connection_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackQuery>,
) -> Result<Json<BankConnection>, AppError> {
    let connection = connection_manager(&state)
        .handle_callback(&params.reference)
        .await?;
    Ok(Json(connection))
}
