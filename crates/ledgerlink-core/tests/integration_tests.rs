//! Integration tests for ledgerlink-core
//!
//! These tests exercise the full link → sync → detect workflow against the
//! mock aggregator, the way the server wires the pieces together.

use chrono::{Duration, Utc};
use ledgerlink_core::db::{Database, TransactionFilter};
use ledgerlink_core::models::{AccountType, ConnectionStatus, Frequency, SubscriptionStatus};
use ledgerlink_core::{
    spending_insights, AggregatorClient, ConnectionManager, MockAggregator, SubscriptionDetector,
    TransactionIngestor, VaultClient,
};

const USER: &str = "integration-user";
const REDIRECT: &str = "http://localhost:3000/api/callback";

fn days_ago(n: i64) -> String {
    (Utc::now() - Duration::days(n)).date_naive().to_string()
}

/// Mock bank with one account: a monthly Netflix charge plus a grocery run.
fn seeded_aggregator() -> MockAggregator {
    let mock = MockAggregator::new();
    mock.add_account(
        "acct-1",
        Some("DE89370400440532013000"),
        "EUR",
        820.55,
        vec![
            MockAggregator::raw_debit(Some("tx-n1"), &days_ago(85), 9.99, "Netflix"),
            MockAggregator::raw_debit(Some("tx-n2"), &days_ago(55), 9.99, "Netflix"),
            MockAggregator::raw_debit(Some("tx-n3"), &days_ago(25), 9.99, "Netflix"),
            MockAggregator::raw_debit(Some("tx-g1"), &days_ago(4), 54.20, "REWE Markt"),
        ],
    );
    mock
}

/// Run the authorization round trip, returning the linked connection id
async fn link(db: &Database, mock: &MockAggregator, manager: &ConnectionManager<'_>) -> i64 {
    let initiated = manager
        .initiate(USER, "SANDBOX_BANK", AccountType::Checking)
        .await
        .unwrap();
    assert!(initiated.auth_url.starts_with("https://"));

    let requisition_id = format!("req-{}", mock.requisitions_created());
    mock.finish_authorization(&requisition_id, &["acct-1"]);

    let reference = db
        .get_connection(initiated.connection_id)
        .unwrap()
        .unwrap()
        .reference;
    let connection = manager.handle_callback(&reference).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Linked);
    connection.id
}

#[tokio::test]
async fn test_link_sync_detect_workflow() {
    let db = Database::in_memory().unwrap();
    let mock = seeded_aggregator();
    let aggregator = AggregatorClient::Mock(mock.clone());
    let vault = VaultClient::memory();

    let manager = ConnectionManager::new(&db, &aggregator, &vault, REDIRECT);
    link(&db, &mock, &manager).await;

    // Sync pulls transactions and balances for the discovered account
    let ingestor = TransactionIngestor::new(&db, &aggregator, &vault, None);
    let reports = ingestor.sync_all(USER).await.unwrap();
    assert_eq!(reports.len(), 1);
    let outcome = reports[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.fetched, 4);
    assert_eq!(outcome.inserted, 4);

    let accounts = db.list_accounts(USER).unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].balance, Some(820.55));
    assert!(accounts[0].last_synced_at.is_some());

    let transactions = db
        .list_transactions(USER, &TransactionFilter::default())
        .unwrap();
    assert_eq!(transactions.len(), 4);
    // Rule table categorization ran during ingestion
    let netflix = transactions
        .iter()
        .find(|t| t.merchant.as_deref() == Some("Netflix"))
        .unwrap();
    assert_eq!(netflix.category.as_deref(), Some("entertainment"));

    // Detection finds the monthly pattern
    let detector = SubscriptionDetector::new(&db);
    let results = detector.detect(USER).unwrap();
    assert_eq!(results.subscriptions_found, 1);

    let subscriptions = db.list_subscriptions(USER, None).unwrap();
    assert_eq!(subscriptions.len(), 1);
    let sub = &subscriptions[0];
    assert_eq!(sub.merchant, "Netflix");
    assert_eq!(sub.frequency, Frequency::Monthly);
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert!(sub.confidence > 0.8);

    // 30-day insight window sees one Netflix charge and the grocery run
    let insights = spending_insights(&db, USER).unwrap();
    assert!((insights.total_spent - 64.19).abs() < 0.01);
    assert_eq!(insights.top_merchants[0].merchant, "REWE Markt");
}

#[tokio::test]
async fn test_second_sync_is_incremental() {
    let db = Database::in_memory().unwrap();
    let mock = seeded_aggregator();
    let aggregator = AggregatorClient::Mock(mock.clone());
    let vault = VaultClient::memory();

    let manager = ConnectionManager::new(&db, &aggregator, &vault, REDIRECT);
    link(&db, &mock, &manager).await;

    let ingestor = TransactionIngestor::new(&db, &aggregator, &vault, None);
    ingestor.sync_all(USER).await.unwrap();

    // New charge lands at the bank between syncs
    mock.push_transaction(
        "acct-1",
        MockAggregator::raw_debit(Some("tx-new"), &days_ago(0), 12.50, "Backerei Schmidt"),
    );

    let reports = ingestor.sync_all(USER).await.unwrap();
    let outcome = reports[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.updated, 0);

    let transactions = db
        .list_transactions(USER, &TransactionFilter::default())
        .unwrap();
    assert_eq!(transactions.len(), 5);
}
