//! LedgerLink Web Server
//!
//! Axum-based REST API for the LedgerLink account aggregation service.
//!
//! Security posture:
//! - Bearer JWT authentication against the identity service's JWKS
//!   (secure by default, use --no-auth for local dev)
//! - The aggregator callback is the only unauthenticated route and trusts
//!   nothing but the opaque reference it carries
//! - Restrictive CORS policy and standard security headers
//! - Sanitized error responses; full errors go to the log only

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use ledgerlink_core::ai::ClassifierClient;
use ledgerlink_core::db::Database;
use ledgerlink_core::vault::VaultClient;
use ledgerlink_core::AggregatorClient;
use ledgerlink_core::ClassifierBackend;

mod handlers;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Dev-mode header carrying the acting user id when auth is disabled
const DEV_USER_HEADER: &str = "x-user-id";

/// Identity-service JWT validation configuration
#[derive(Clone, Default)]
pub struct JwtConfig {
    /// JWKS endpoint of the identity service
    pub jwks_url: Option<String>,
    /// Expected audience claim
    pub audience: Option<String>,
    /// Expected issuer claim
    pub issuer: Option<String>,
}

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// JWT validation config, required when auth is on
    pub jwt: JwtConfig,
    /// Redirect URL handed to the aggregator for authorization flows
    pub redirect_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            jwt: JwtConfig::default(),
            redirect_url: "http://localhost:3000/api/callback".to_string(),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub aggregator: AggregatorClient,
    pub vault: VaultClient,
    pub classifier: Option<ClassifierClient>,
    pub config: ServerConfig,
}

/// Authenticated user id, inserted into request extensions by the auth
/// middleware and pulled out by handlers.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Authentication middleware.
///
/// Validates the Bearer JWT against the identity service's JWKS and stores
/// the subject claim as the acting user. When auth is disabled (local dev),
/// the `x-user-id` header names the user instead.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        let user_id = request
            .headers()
            .get(DEV_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("local-dev")
            .to_string();
        request.extensions_mut().insert(AuthUser(user_id));
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "));

    if let Some(token) = token {
        match validate_jwt(token, &state.config.jwt).await {
            Ok(user_id) => {
                info!(user = %user_id, path = %request.uri().path(), "Authenticated");
                request.extensions_mut().insert(AuthUser(user_id));
                return next.run(request).await;
            }
            Err(e) => {
                warn!(error = %e, path = %request.uri().path(), "Invalid JWT");
            }
        }
    } else {
        warn!(path = %request.uri().path(), "Unauthorized request - no bearer token");
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

/// Validate a bearer JWT and return its subject.
///
/// Fetches public keys from the identity service and validates signature,
/// expiration, audience and issuer.
async fn validate_jwt(token: &str, config: &JwtConfig) -> Result<String, String> {
    use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};

    let jwks_url = config.jwks_url.as_ref().ok_or("JWKS URL not configured")?;

    let header = decode_header(token).map_err(|e| format!("Invalid JWT header: {}", e))?;
    let kid = header.kid.ok_or("JWT missing key ID (kid)")?;

    let keys = fetch_public_keys(jwks_url)
        .await
        .map_err(|e| format!("Failed to fetch identity keys: {}", e))?;

    let jwk = keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(&kid))
        .ok_or_else(|| format!("No matching key found for kid: {}", kid))?;

    let decoding_key = DecodingKey::from_jwk(jwk).map_err(|e| format!("Invalid JWK: {}", e))?;

    let mut validation = Validation::new(Algorithm::RS256);
    if let Some(aud) = &config.audience {
        validation.set_audience(&[aud]);
    }
    if let Some(iss) = &config.issuer {
        validation.set_issuer(&[iss]);
    }

    #[derive(serde::Deserialize)]
    struct Claims {
        sub: String,
    }

    let token_data = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| format!("JWT validation failed: {}", e))?;

    Ok(token_data.claims.sub)
}

/// Fetch the identity service's public keys from its JWKS endpoint
async fn fetch_public_keys(url: &str) -> Result<Vec<jsonwebtoken::jwk::Jwk>, String> {
    #[derive(serde::Deserialize)]
    struct JwkSet {
        keys: Vec<jsonwebtoken::jwk::Jwk>,
    }

    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| format!("HTTP request failed: {}", e))?;

    if !response.status().is_success() {
        return Err(format!("HTTP error: {}", response.status()));
    }

    let jwk_set: JwkSet = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse JWK set: {}", e))?;

    Ok(jwk_set.keys)
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
pub fn create_router(
    db: Database,
    aggregator: AggregatorClient,
    vault: VaultClient,
    classifier: Option<ClassifierClient>,
    config: ServerConfig,
) -> Router {
    let state = Arc::new(AppState {
        db,
        aggregator,
        vault,
        classifier,
        config: config.clone(),
    });

    let protected = Router::new()
        // Institutions
        .route(
            "/institutions",
            axum::routing::get(handlers::list_institutions),
        )
        // Connections
        .route(
            "/connections",
            axum::routing::get(handlers::list_connections).post(handlers::create_connection),
        )
        .route(
            "/connections/:id",
            axum::routing::get(handlers::get_connection).delete(handlers::delete_connection),
        )
        .route(
            "/connections/:id/refresh",
            axum::routing::post(handlers::refresh_connection),
        )
        // Accounts
        .route("/accounts", axum::routing::get(handlers::list_accounts))
        .route("/accounts/:id", axum::routing::get(handlers::get_account))
        .route(
            "/accounts/:id/balance",
            axum::routing::get(handlers::get_account_balance),
        )
        .route(
            "/accounts/:id/sync",
            axum::routing::post(handlers::sync_account),
        )
        // Transactions
        .route(
            "/transactions",
            axum::routing::get(handlers::list_transactions),
        )
        .route(
            "/transactions/sync-all",
            axum::routing::post(handlers::sync_all),
        )
        .route(
            "/transactions/bulk-categorize",
            axum::routing::post(handlers::bulk_categorize),
        )
        .route(
            "/transactions/:id",
            axum::routing::get(handlers::get_transaction),
        )
        .route(
            "/transactions/:id/categorize",
            axum::routing::post(handlers::categorize_transaction),
        )
        .route(
            "/transactions/:id/invoice",
            axum::routing::post(handlers::attach_invoice),
        )
        // Subscriptions
        .route(
            "/subscriptions",
            axum::routing::get(handlers::list_subscriptions),
        )
        .route(
            "/subscriptions/detect",
            axum::routing::post(handlers::detect_subscriptions),
        )
        // Insights
        .route(
            "/insights/spending",
            axum::routing::get(handlers::spending_insights),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // The authorization callback arrives from the user's browser after the
    // bank redirect; it carries no session, only the opaque reference.
    let public = Router::new().route(
        "/callback",
        axum::routing::get(handlers::connection_callback),
    );

    let api_routes = protected.merge(public);

    // Build CORS layer
    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
}

/// Start the server
pub async fn serve(
    db: Database,
    aggregator: AggregatorClient,
    vault: VaultClient,
    classifier: Option<ClassifierClient>,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("Authentication disabled - do not expose to network!");
    }

    match &classifier {
        Some(client) => {
            if client.health_check().await {
                info!("Classifier service connected");
            } else {
                warn!("Classifier configured but not responding; rule-table fallback only");
            }
        }
        None => {
            info!("Classifier not configured (set CLASSIFIER_HOST to enable); rule-table fallback only");
        }
    }

    let app = create_router(db, aggregator, vault, classifier, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<String>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl From<ledgerlink_core::Error> for AppError {
    fn from(err: ledgerlink_core::Error) -> Self {
        use ledgerlink_core::Error;

        match err {
            Error::InvalidInstitution(id) => Self {
                status: StatusCode::BAD_REQUEST,
                message: format!("unknown institution: {}", id),
                internal: None,
            },
            Error::InvalidData(msg) => Self {
                status: StatusCode::BAD_REQUEST,
                message: msg,
                internal: None,
            },
            // Ownership failures read as not-found so resource existence
            // never leaks across users
            Error::Unauthorized => Self {
                status: StatusCode::NOT_FOUND,
                message: "not found".to_string(),
                internal: None,
            },
            Error::NotFound(what) => Self {
                status: StatusCode::NOT_FOUND,
                message: format!("{} not found", what),
                internal: None,
            },
            Error::ConnectionExpired(id) => Self {
                status: StatusCode::GONE,
                message: "connection consent has expired; reconnect the bank".to_string(),
                internal: Some(format!("connection {} expired", id)),
            },
            Error::Upstream(msg) => Self {
                status: StatusCode::BAD_GATEWAY,
                message: "upstream provider error".to_string(),
                internal: Some(msg),
            },
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "An internal error occurred".to_string(),
                internal: Some(other.to_string()),
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred".to_string(),
            internal: Some(format!("{:#}", err)),
        }
    }
}

#[cfg(test)]
mod tests;
