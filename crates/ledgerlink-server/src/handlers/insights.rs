//! Spending insight handlers

use std::sync::Arc;

use axum::{extract::State, Extension, Json};

use crate::{AppError, AppState, AuthUser};
use ledgerlink_core::SpendingInsights;

/// GET /api/insights/spending - 30-day spending rollup
pub async fn spending_insights(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<SpendingInsights>, AppError> {
    let insights = ledgerlink_core::insights::spending_insights(&state.db, &user_id)?;
    Ok(Json(insights))
}
