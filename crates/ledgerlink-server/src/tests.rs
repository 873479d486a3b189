//! Server API tests
//!
//! Run against the full router with the mock aggregator, the in-process
//! vault and no classifier (rule-table categorization only). Auth is
//! disabled; the acting user comes from the `x-user-id` header.

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use ledgerlink_core::aggregator::MockAggregator;
use ledgerlink_core::db::Database;
use ledgerlink_core::AggregatorClient;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    db: Database,
    aggregator: MockAggregator,
}

fn setup_test_app() -> TestApp {
    let db = Database::in_memory().unwrap();
    let aggregator = MockAggregator::new();
    let config = ServerConfig {
        require_auth: false,
        ..Default::default()
    };
    let app = create_router(
        db.clone(),
        AggregatorClient::Mock(aggregator.clone()),
        VaultClient::memory(),
        None,
        config,
    );
    TestApp {
        app,
        db,
        aggregator,
    }
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, user: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-user-id", user)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn days_ago(n: i64) -> String {
    (Utc::now() - Duration::days(n))
        .date_naive()
        .format("%Y-%m-%d")
        .to_string()
}

/// Drive a full link flow for `user`: initiate, authorize upstream, land the
/// callback. Returns the connection id.
async fn link_connection(t: &TestApp, user: &str, account_ids: &[&str]) -> i64 {
    let response = t
        .app
        .clone()
        .oneshot(post(
            "/api/connections",
            user,
            serde_json::json!({
                "institution_id": "SANDBOX_BANK",
                "account_type": "checking"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let connection_id = json["connection_id"].as_i64().unwrap();

    // The reference never appears in API responses; fish it out of storage
    // the way the aggregator would echo it back.
    let reference = t
        .db
        .get_connection(connection_id)
        .unwrap()
        .unwrap()
        .reference;

    let requisition_id = format!("req-{}", t.aggregator.requisitions_created());
    t.aggregator
        .finish_authorization(&requisition_id, account_ids);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/callback?ref={}", reference))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "linked");

    connection_id
}

// ========== Auth ==========

#[tokio::test]
async fn test_auth_required_without_token() {
    let db = Database::in_memory().unwrap();
    let app = create_router(
        db,
        AggregatorClient::mock(),
        VaultClient::memory(),
        None,
        ServerConfig::default(),
    );

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/connections")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_is_public() {
    let db = Database::in_memory().unwrap();
    let app = create_router(
        db,
        AggregatorClient::mock(),
        VaultClient::memory(),
        None,
        ServerConfig::default(),
    );

    // No token; unknown reference still reaches the handler and 404s
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/callback?ref=does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Institutions ==========

#[tokio::test]
async fn test_list_institutions() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(get("/api/institutions?country=de", "u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let institutions = json.as_array().unwrap();
    assert!(institutions.iter().any(|i| i["id"] == "SANDBOX_BANK"));
}

#[tokio::test]
async fn test_list_institutions_bad_country() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(get("/api/institutions?country=germany", "u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== Connections ==========

#[tokio::test]
async fn test_create_connection_returns_auth_url() {
    let t = setup_test_app();

    let response = t
        .app
        .clone()
        .oneshot(post(
            "/api/connections",
            "u1",
            serde_json::json!({
                "institution_id": "SANDBOX_BANK",
                "account_type": "checking"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert!(json["auth_url"].as_str().unwrap().starts_with("https://"));
    assert_eq!(json["expires_in"], 300);

    // Pending until the callback lands
    let response = t
        .app
        .oneshot(get(
            &format!("/api/connections/{}", json["connection_id"]),
            "u1",
        ))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "pending");
    // Secrets never serialize
    assert!(json.get("reference").is_none());
    assert!(json.get("linkage_token_enc").is_none());
}

#[tokio::test]
async fn test_create_connection_unknown_institution() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(post(
            "/api/connections",
            "u1",
            serde_json::json!({
                "institution_id": "NO_SUCH_BANK",
                "account_type": "checking"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_link_flow_discovers_accounts() {
    let t = setup_test_app();
    t.aggregator
        .add_account("acct-1", Some("DE02100100100006820101"), "EUR", 1250.0, vec![]);

    link_connection(&t, "u1", &["acct-1"]).await;

    let response = t.app.oneshot(get("/api/accounts", "u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let accounts = json.as_array().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["iban"], "DE02100100100006820101");
    assert!(accounts[0].get("external_id_enc").is_none());
}

#[tokio::test]
async fn test_connection_ownership_hidden_across_users() {
    let t = setup_test_app();
    t.aggregator.add_account("acct-1", None, "EUR", 0.0, vec![]);
    let connection_id = link_connection(&t, "u1", &["acct-1"]).await;

    let response = t
        .app
        .oneshot(get(&format!("/api/connections/{}", connection_id), "u2"))
        .await
        .unwrap();
    // Reads as missing, not forbidden
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_connections_reports_lapsed_consent() {
    let t = setup_test_app();
    t.aggregator.add_account("acct-1", None, "EUR", 0.0, vec![]);
    let connection_id = link_connection(&t, "u1", &["acct-1"]).await;

    // Fresh 90-day consent needs no renewal yet
    let response = t
        .app
        .clone()
        .oneshot(get("/api/connections", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let listed = json.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["status"], "linked");
    assert_eq!(listed[0]["renewal_due"], false);

    // Consent lapses while the row still says linked; the listing must not
    // keep reporting a live link.
    t.db.conn()
        .unwrap()
        .execute(
            "UPDATE bank_connections SET expires_at = datetime('now', '-1 day') WHERE id = ?",
            [connection_id],
        )
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(get("/api/connections", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let listed = json.as_array().unwrap();
    assert_eq!(listed[0]["status"], "expired");
    assert_eq!(listed[0]["renewal_due"], true);

    let response = t
        .app
        .oneshot(get(&format!("/api/connections/{}", connection_id), "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "expired");
}

// ========== Sync and transactions ==========

async fn linked_account_with_history(t: &TestApp) -> (i64, i64) {
    t.aggregator.add_account(
        "acct-1",
        None,
        "EUR",
        820.55,
        vec![
            MockAggregator::raw_debit(Some("tx-1"), &days_ago(10), 9.99, "Netflix"),
            MockAggregator::raw_debit(Some("tx-2"), &days_ago(4), 54.20, "REWE Markt"),
        ],
    );
    let connection_id = link_connection(t, "u1", &["acct-1"]).await;
    let accounts = t.db.list_accounts("u1").unwrap();
    (connection_id, accounts[0].id)
}

#[tokio::test]
async fn test_sync_account_ingests_and_categorizes() {
    let t = setup_test_app();
    let (_connection_id, account_id) = linked_account_with_history(&t).await;

    let response = t
        .app
        .clone()
        .oneshot(post(
            &format!("/api/accounts/{}/sync", account_id),
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["fetched"], 2);
    assert_eq!(json["inserted"], 2);

    let response = t
        .app
        .clone()
        .oneshot(get("/api/transactions?merchant=netflix", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let txs = json.as_array().unwrap();
    assert_eq!(txs.len(), 1);
    // Rule table picked a category without a classifier
    assert_eq!(txs[0]["category"], "entertainment");
    assert_eq!(txs[0]["direction"], "debit");

    let response = t
        .app
        .oneshot(get(&format!("/api/accounts/{}/balance", account_id), "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["balance"], 820.55);
}

#[tokio::test]
async fn test_sync_expired_connection_gone() {
    let t = setup_test_app();
    let (connection_id, account_id) = linked_account_with_history(&t).await;

    t.db.conn()
        .unwrap()
        .execute(
            "UPDATE bank_connections SET expires_at = datetime('now', '-1 day') WHERE id = ?",
            [connection_id],
        )
        .unwrap();

    let response = t
        .app
        .oneshot(post(
            &format!("/api/accounts/{}/sync", account_id),
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_transaction_filters() {
    let t = setup_test_app();
    let (_connection_id, account_id) = linked_account_with_history(&t).await;
    t.app
        .clone()
        .oneshot(post(
            &format!("/api/accounts/{}/sync", account_id),
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(get("/api/transactions?min_amount=20", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let response = t
        .app
        .clone()
        .oneshot(get("/api/transactions?from=not-a-date", "u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Another user sees nothing
    let response = t
        .app
        .oneshot(get("/api/transactions", "u2"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_categorize_and_invoice() {
    let t = setup_test_app();
    let (_connection_id, account_id) = linked_account_with_history(&t).await;
    t.app
        .clone()
        .oneshot(post(
            &format!("/api/accounts/{}/sync", account_id),
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(get("/api/transactions?merchant=netflix", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let tx_id = json.as_array().unwrap()[0]["id"].as_i64().unwrap();

    let response = t
        .app
        .clone()
        .oneshot(post(
            &format!("/api/transactions/{}/categorize", tx_id),
            "u1",
            serde_json::json!({
                "category": "subscriptions",
                "subcategory": "streaming"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["transaction"]["category"], "subscriptions");
    assert_eq!(json["transaction"]["categorized_by"], "user");
    assert_eq!(json["transaction"]["confidence"], 1.0);

    let response = t
        .app
        .oneshot(post(
            &format!("/api/transactions/{}/invoice", tx_id),
            "u1",
            serde_json::json!({ "doc_id": "doc-abc-123" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["invoice_doc_id"], "doc-abc-123");
}

#[tokio::test]
async fn test_bulk_categorize_relabels_similar() {
    let t = setup_test_app();
    t.aggregator.add_account(
        "acct-1",
        None,
        "EUR",
        100.0,
        vec![
            MockAggregator::raw_debit(Some("tx-1"), &days_ago(40), 12.5, "Acme Tools"),
            MockAggregator::raw_debit(Some("tx-2"), &days_ago(20), 12.5, "Acme Tools"),
            MockAggregator::raw_debit(Some("tx-3"), &days_ago(5), 12.5, "Acme Tools"),
        ],
    );
    link_connection(&t, "u1", &["acct-1"]).await;
    let account_id = t.db.list_accounts("u1").unwrap()[0].id;
    t.app
        .clone()
        .oneshot(post(
            &format!("/api/accounts/{}/sync", account_id),
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(get("/api/transactions?merchant=Acme%20Tools", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let first_id = json.as_array().unwrap()[0]["id"].as_i64().unwrap();

    let response = t
        .app
        .clone()
        .oneshot(post(
            "/api/transactions/bulk-categorize",
            "u1",
            serde_json::json!({
                "updates": [
                    { "transaction_id": first_id, "category": "business", "subcategory": "equipment" }
                ],
                "apply_to_similar": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["updated"], 1);
    assert_eq!(json["relabeled"], 2);

    // All three carry the corrected category now
    let response = t
        .app
        .oneshot(get("/api/transactions?category=business", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_delete_connection_removes_everything() {
    let t = setup_test_app();
    let (connection_id, account_id) = linked_account_with_history(&t).await;
    t.app
        .clone()
        .oneshot(post(
            &format!("/api/accounts/{}/sync", account_id),
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/connections/{}", connection_id))
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .app
        .clone()
        .oneshot(get("/api/accounts", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());

    let response = t
        .app
        .oneshot(get("/api/transactions", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

// ========== Subscriptions and insights ==========

#[tokio::test]
async fn test_detect_and_list_subscriptions() {
    let t = setup_test_app();
    let charges: Vec<_> = [152, 122, 93, 61, 30, 1]
        .iter()
        .enumerate()
        .map(|(i, days)| {
            MockAggregator::raw_debit(Some(&format!("tx-{}", i)), &days_ago(*days), 9.99, "Netflix")
        })
        .collect();
    t.aggregator.add_account("acct-1", None, "EUR", 50.0, charges);
    link_connection(&t, "u1", &["acct-1"]).await;
    let account_id = t.db.list_accounts("u1").unwrap()[0].id;
    t.app
        .clone()
        .oneshot(post(
            &format!("/api/accounts/{}/sync", account_id),
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(post(
            "/api/subscriptions/detect",
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["subscriptions_found"], 1);

    let response = t
        .app
        .oneshot(get("/api/subscriptions?status=active", "u1"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let subs = json["subscriptions"].as_array().unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0]["merchant"], "Netflix");
    assert_eq!(subs[0]["frequency"], "monthly");
    assert!(subs[0]["confidence"].as_f64().unwrap() > 0.8);
    assert!((json["total_monthly_cost"].as_f64().unwrap() - 9.99).abs() < 1e-9);
}

#[tokio::test]
async fn test_spending_insights_rollup() {
    let t = setup_test_app();
    let (_connection_id, account_id) = linked_account_with_history(&t).await;
    t.app
        .clone()
        .oneshot(post(
            &format!("/api/accounts/{}/sync", account_id),
            "u1",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let response = t
        .app
        .oneshot(get("/api/insights/spending", "u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert!((json["total_spent"].as_f64().unwrap() - 64.19).abs() < 1e-9);
    assert!(!json["by_category"].as_array().unwrap().is_empty());
    assert_eq!(json["top_merchants"][0]["merchant"], "REWE Markt");
}
