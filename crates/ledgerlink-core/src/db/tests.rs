//! Database tests

use super::*;
use crate::error::Error;
use crate::models::*;

use chrono::{Duration, NaiveDate, Utc};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn seed_connection(db: &Database, user_id: &str) -> i64 {
    db.insert_connection(
        user_id,
        "SANDBOX_BANK",
        "Sandbox Bank",
        AccountType::Checking,
        &format!("ref-{}-{}", user_id, rand::random::<u32>()),
        "v1:enc-token",
        Utc::now() + Duration::days(90),
    )
    .unwrap()
}

fn seed_account(db: &Database, connection_id: i64, user_id: &str) -> i64 {
    db.insert_account(
        connection_id,
        user_id,
        "v1:enc-acct",
        Some("DE89370400440532013000"),
        Some("Main Account"),
        "EUR",
    )
    .unwrap()
}

fn new_tx(account_id: i64, user_id: &str, external_id: &str, day: &str, amount: f64) -> NewTransaction {
    NewTransaction {
        account_id,
        user_id: user_id.to_string(),
        external_id: external_id.to_string(),
        date: date(day),
        amount,
        currency: "EUR".to_string(),
        direction: Direction::Debit,
        description: "CARD PAYMENT".to_string(),
        merchant: Some("Netflix".to_string()),
        metadata: None,
    }
}

#[test]
fn test_in_memory_db() {
    let db = Database::in_memory().unwrap();
    let connections = db.list_connections("u1").unwrap();
    assert!(connections.is_empty());
}

#[test]
fn test_connection_lifecycle() {
    let db = Database::in_memory().unwrap();
    let id = seed_connection(&db, "u1");

    let conn = db.get_connection(id).unwrap().unwrap();
    assert_eq!(conn.status, ConnectionStatus::Pending);
    assert_eq!(conn.institution_id, "SANDBOX_BANK");

    let by_ref = db.get_connection_by_reference(&conn.reference).unwrap().unwrap();
    assert_eq!(by_ref.id, id);

    db.update_connection_status(id, ConnectionStatus::Linked, None)
        .unwrap();
    let conn = db.get_connection(id).unwrap().unwrap();
    assert_eq!(conn.status, ConnectionStatus::Linked);
    assert!(conn.error.is_none());

    db.update_connection_status(id, ConnectionStatus::Error, Some("consent rejected"))
        .unwrap();
    let conn = db.get_connection(id).unwrap().unwrap();
    assert_eq!(conn.status, ConnectionStatus::Error);
    assert_eq!(conn.error.as_deref(), Some("consent rejected"));
}

#[test]
fn test_connection_ownership() {
    let db = Database::in_memory().unwrap();
    let id = seed_connection(&db, "u1");

    assert!(db.get_owned_connection(id, "u1").is_ok());
    assert!(matches!(
        db.get_owned_connection(id, "u2"),
        Err(Error::Unauthorized)
    ));
    assert!(matches!(
        db.get_owned_connection(9999, "u1"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_expire_due_connections() {
    let db = Database::in_memory().unwrap();
    let expired_id = db
        .insert_connection(
            "u1",
            "SANDBOX_BANK",
            "Sandbox Bank",
            AccountType::Checking,
            "ref-expired",
            "v1:enc",
            Utc::now() - Duration::days(1),
        )
        .unwrap();
    let live_id = seed_connection(&db, "u1");

    let count = db.expire_due_connections(Utc::now()).unwrap();
    assert_eq!(count, 1);

    let expired = db.get_connection(expired_id).unwrap().unwrap();
    assert_eq!(expired.status, ConnectionStatus::Expired);
    let live = db.get_connection(live_id).unwrap().unwrap();
    assert_eq!(live.status, ConnectionStatus::Pending);

    // Sweep is idempotent
    let count = db.expire_due_connections(Utc::now()).unwrap();
    assert_eq!(count, 0);
}

#[test]
fn test_upsert_transaction_dedup() {
    let db = Database::in_memory().unwrap();
    let conn_id = seed_connection(&db, "u1");
    let account_id = seed_account(&db, conn_id, "u1");

    let tx = new_tx(account_id, "u1", "ext-1", "2026-08-01", 9.99);
    let first = db.upsert_transaction(&tx).unwrap();
    assert!(matches!(first, TransactionUpsert::Inserted(_)));

    let second = db.upsert_transaction(&tx).unwrap();
    assert!(matches!(second, TransactionUpsert::Updated(_)));
    assert_eq!(first.id(), second.id());

    let listed = db
        .list_transactions("u1", &TransactionFilter::default())
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[test]
fn test_resync_preserves_user_category() {
    let db = Database::in_memory().unwrap();
    let conn_id = seed_connection(&db, "u1");
    let account_id = seed_account(&db, conn_id, "u1");

    let tx = new_tx(account_id, "u1", "ext-1", "2026-08-01", 9.99);
    let id = db.upsert_transaction(&tx).unwrap().id();

    db.update_categorization(id, "entertainment", Some("streaming"), 1.0, CategorizedBy::User)
        .unwrap();

    // Provider re-delivers the same transaction with an updated description
    let mut resynced = tx.clone();
    resynced.description = "CARD PAYMENT NETFLIX.COM".to_string();
    db.upsert_transaction(&resynced).unwrap();

    let stored = db.get_transaction(id).unwrap().unwrap();
    assert_eq!(stored.description, "CARD PAYMENT NETFLIX.COM");
    assert_eq!(stored.category.as_deref(), Some("entertainment"));
    assert_eq!(stored.categorized_by, Some(CategorizedBy::User));
}

#[test]
fn test_transaction_filters() {
    let db = Database::in_memory().unwrap();
    let conn_id = seed_connection(&db, "u1");
    let account_id = seed_account(&db, conn_id, "u1");

    for (i, day) in ["2026-06-01", "2026-07-01", "2026-08-01"].iter().enumerate() {
        db.upsert_transaction(&new_tx(account_id, "u1", &format!("ext-{}", i), day, 10.0))
            .unwrap();
    }

    let filter = TransactionFilter {
        from: Some(date("2026-07-01")),
        ..Default::default()
    };
    let result = db.list_transactions("u1", &filter).unwrap();
    assert_eq!(result.len(), 2);
    // Newest first
    assert_eq!(result[0].date, date("2026-08-01"));

    let filter = TransactionFilter {
        search: Some("netflix".to_string()),
        ..Default::default()
    };
    assert_eq!(db.list_transactions("u1", &filter).unwrap().len(), 3);

    // Other users see nothing
    assert!(db
        .list_transactions("u2", &TransactionFilter::default())
        .unwrap()
        .is_empty());
}

#[test]
fn test_relabel_skips_user_categorized() {
    let db = Database::in_memory().unwrap();
    let conn_id = seed_connection(&db, "u1");
    let account_id = seed_account(&db, conn_id, "u1");

    let a = db
        .upsert_transaction(&new_tx(account_id, "u1", "a", "2026-08-01", 9.99))
        .unwrap()
        .id();
    let b = db
        .upsert_transaction(&new_tx(account_id, "u1", "b", "2026-08-02", 9.99))
        .unwrap()
        .id();
    let c = db
        .upsert_transaction(&new_tx(account_id, "u1", "c", "2026-08-03", 9.99))
        .unwrap()
        .id();

    db.update_categorization(b, "shopping", None, 1.0, CategorizedBy::User)
        .unwrap();

    let changed = db
        .relabel_merchant_transactions("u1", "Netflix", "entertainment", Some("streaming"), a)
        .unwrap();
    assert_eq!(changed, 1);

    let b_tx = db.get_transaction(b).unwrap().unwrap();
    assert_eq!(b_tx.category.as_deref(), Some("shopping"));

    let c_tx = db.get_transaction(c).unwrap().unwrap();
    assert_eq!(c_tx.category.as_deref(), Some("entertainment"));
    assert_eq!(c_tx.categorized_by, Some(CategorizedBy::Auto));
    assert_eq!(c_tx.confidence, Some(0.85));
}

#[test]
fn test_subscription_upsert_and_deactivate() {
    let db = Database::in_memory().unwrap();

    let id = db
        .upsert_subscription(
            "u1",
            "Netflix",
            9.99,
            "EUR",
            Frequency::Monthly,
            Some("entertainment"),
            Some(date("2026-09-01")),
            0.9,
            Some(date("2026-08-01")),
            6,
        )
        .unwrap();

    // Re-detection refreshes in place
    let id2 = db
        .upsert_subscription(
            "u1",
            "Netflix",
            12.99,
            "EUR",
            Frequency::Monthly,
            Some("entertainment"),
            Some(date("2026-10-01")),
            0.92,
            Some(date("2026-09-01")),
            7,
        )
        .unwrap();
    assert_eq!(id, id2);

    let subs = db.list_subscriptions("u1", None).unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].amount, 12.99);
    assert_eq!(subs[0].transaction_count, 7);

    let other = db
        .upsert_subscription(
            "u1",
            "Spotify",
            10.99,
            "EUR",
            Frequency::Monthly,
            None,
            None,
            0.85,
            None,
            4,
        )
        .unwrap();

    // Only Netflix re-detected this pass
    let demoted = db.deactivate_missing_subscriptions("u1", &[id]).unwrap();
    assert_eq!(demoted, 1);
    let spotify = db.get_subscription(other).unwrap().unwrap();
    assert_eq!(spotify.status, SubscriptionStatus::Inactive);
    let netflix = db.get_subscription(id).unwrap().unwrap();
    assert_eq!(netflix.status, SubscriptionStatus::Active);
}

#[test]
fn test_category_feedback_append_only() {
    let db = Database::in_memory().unwrap();
    let conn_id = seed_connection(&db, "u1");
    let account_id = seed_account(&db, conn_id, "u1");
    let tx_id = db
        .upsert_transaction(&new_tx(account_id, "u1", "a", "2026-08-01", 9.99))
        .unwrap()
        .id();

    db.insert_category_feedback(
        "u1",
        tx_id,
        Some("Netflix"),
        "CARD PAYMENT",
        9.99,
        None,
        "entertainment",
        Some("streaming"),
    )
    .unwrap();
    db.insert_category_feedback(
        "u1",
        tx_id,
        Some("Netflix"),
        "CARD PAYMENT",
        9.99,
        Some("entertainment"),
        "shopping",
        None,
    )
    .unwrap();

    let feedback = db.list_category_feedback("u1", 10).unwrap();
    assert_eq!(feedback.len(), 2);
    // Newest first
    assert_eq!(feedback[0].new_category, "shopping");
    assert_eq!(feedback[0].old_category.as_deref(), Some("entertainment"));
}

#[test]
fn test_delete_connection_cascades() {
    let db = Database::in_memory().unwrap();
    let conn_id = seed_connection(&db, "u1");
    let account_id = seed_account(&db, conn_id, "u1");
    let tx_id = db
        .upsert_transaction(&new_tx(account_id, "u1", "a", "2026-08-01", 9.99))
        .unwrap()
        .id();
    db.insert_category_feedback("u1", tx_id, None, "CARD PAYMENT", 9.99, None, "other", None)
        .unwrap();

    db.delete_connection(conn_id).unwrap();

    assert!(db.get_connection(conn_id).unwrap().is_none());
    assert!(db.get_account(account_id).unwrap().is_none());
    assert!(db.get_transaction(tx_id).unwrap().is_none());
    assert!(db.list_category_feedback("u1", 10).unwrap().is_empty());
}

#[test]
fn test_category_totals() {
    let db = Database::in_memory().unwrap();
    let conn_id = seed_connection(&db, "u1");
    let account_id = seed_account(&db, conn_id, "u1");

    let a = db
        .upsert_transaction(&new_tx(account_id, "u1", "a", "2026-08-01", 50.0))
        .unwrap()
        .id();
    let b = db
        .upsert_transaction(&new_tx(account_id, "u1", "b", "2026-08-02", 30.0))
        .unwrap()
        .id();
    db.upsert_transaction(&new_tx(account_id, "u1", "c", "2026-08-03", 20.0))
        .unwrap();

    db.update_categorization(a, "groceries", None, 0.9, CategorizedBy::Ml)
        .unwrap();
    db.update_categorization(b, "groceries", None, 0.9, CategorizedBy::Ml)
        .unwrap();

    let totals = db
        .category_totals("u1", date("2026-08-01"), date("2026-08-31"))
        .unwrap();
    assert_eq!(totals[0], ("groceries".to_string(), 80.0));
    assert_eq!(totals[1], ("uncategorized".to_string(), 20.0));
}
