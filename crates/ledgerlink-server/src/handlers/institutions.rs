//! Institution directory handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, AuthUser};
use ledgerlink_core::models::Institution;
use ledgerlink_core::AggregatorApi;

#[derive(Debug, Deserialize)]
pub struct InstitutionQuery {
    /// ISO 3166-1 alpha-2 country code
    pub country: String,
}

/// GET /api/institutions?country= - List institutions available in a country
pub async fn list_institutions(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(_user_id)): Extension<AuthUser>,
    Query(params): Query<InstitutionQuery>,
) -> Result<Json<Vec<Institution>>, AppError> {
    let country = params.country.trim().to_uppercase();
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::bad_request("country must be a two-letter code"));
    }

    let institutions = state.aggregator.list_institutions(&country).await?;
    Ok(Json(institutions))
}
