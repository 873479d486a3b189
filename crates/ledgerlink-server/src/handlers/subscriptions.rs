//! Subscription handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState, AuthUser};
use ledgerlink_core::detect::{monthly_cost, Recommendation, SubscriptionDetector};
use ledgerlink_core::models::{Subscription, SubscriptionStatus};
use ledgerlink_core::DetectionResults;

/// Query params for listing subscriptions
#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    /// Filter by status (active, inactive)
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct SubscriptionEntry {
    #[serde(flatten)]
    pub subscription: Subscription,
    /// Monthly-equivalent cost
    pub monthly_cost: f64,
}

#[derive(Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionEntry>,
    /// Monthly-equivalent total over the listed subscriptions
    pub total_monthly_cost: f64,
    pub recommendations: Vec<Recommendation>,
}

/// GET /api/subscriptions - List detected subscriptions with cost rollup
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<SubscriptionsResponse>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<SubscriptionStatus>()
                .map_err(|_| AppError::bad_request("status must be active or inactive"))
        })
        .transpose()?;

    let subscriptions = state.db.list_subscriptions(&user_id, status)?;
    let total_monthly_cost = subscriptions.iter().map(monthly_cost).sum();

    let detector = SubscriptionDetector::new(&state.db);
    let recommendations = detector.recommendations(&user_id)?;

    let subscriptions = subscriptions
        .into_iter()
        .map(|subscription| {
            let monthly_cost = monthly_cost(&subscription);
            SubscriptionEntry {
                subscription,
                monthly_cost,
            }
        })
        .collect();

    Ok(Json(SubscriptionsResponse {
        subscriptions,
        total_monthly_cost,
        recommendations,
    }))
}

/// POST /api/subscriptions/detect - Run a detection pass over synced history
pub async fn detect_subscriptions(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<DetectionResults>, AppError> {
    let detector = SubscriptionDetector::new(&state.db);
    let results = detector.detect(&user_id)?;
    Ok(Json(results))
}
