//! Spending insights
//!
//! Rolls up the last 30 days of debit activity into per-category totals and
//! a top-merchants list. Credits are excluded so salary deposits never skew
//! the picture.

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::error::Result;

const WINDOW_DAYS: i64 = 30;
const TOP_MERCHANTS: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct CategorySpend {
    pub category: String,
    pub total: f64,
    /// Share of window spend, 0..1
    pub share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MerchantSpend {
    pub merchant: String,
    pub total: f64,
    pub transaction_count: i64,
}

/// 30-day spending rollup for one user
#[derive(Debug, Clone, Serialize)]
pub struct SpendingInsights {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total_spent: f64,
    pub by_category: Vec<CategorySpend>,
    pub top_merchants: Vec<MerchantSpend>,
}

pub fn spending_insights(db: &Database, user_id: &str) -> Result<SpendingInsights> {
    let to = Utc::now().date_naive();
    let from = to - Duration::days(WINDOW_DAYS);

    let category_totals = db.category_totals(user_id, from, to)?;
    let total_spent: f64 = category_totals.iter().map(|(_, total)| total).sum();

    let by_category = category_totals
        .into_iter()
        .map(|(category, total)| CategorySpend {
            category,
            total,
            share: if total_spent > 0.0 {
                total / total_spent
            } else {
                0.0
            },
        })
        .collect();

    let top_merchants = db
        .merchant_totals(user_id, from, to, TOP_MERCHANTS)?
        .into_iter()
        .map(|(merchant, total, transaction_count)| MerchantSpend {
            merchant,
            total,
            transaction_count,
        })
        .collect();

    Ok(SpendingInsights {
        from,
        to,
        total_spent,
        by_category,
        top_merchants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, CategorizedBy, Direction, NewTransaction};

    fn seed_account(db: &Database, user_id: &str) -> i64 {
        let conn_id = db
            .insert_connection(
                user_id,
                "SANDBOX_BANK",
                "Sandbox Bank",
                AccountType::Checking,
                &format!("ref-{}", rand::random::<u32>()),
                "v1:enc",
                Utc::now() + Duration::days(90),
            )
            .unwrap();
        db.insert_account(conn_id, user_id, "v1:acct", None, None, "EUR")
            .unwrap()
    }

    fn spend(
        db: &Database,
        account_id: i64,
        merchant: &str,
        category: Option<&str>,
        days_ago: i64,
        amount: f64,
        direction: Direction,
    ) {
        let result = db
            .upsert_transaction(&NewTransaction {
                account_id,
                user_id: "u1".to_string(),
                external_id: format!("ext-{}", rand::random::<u64>()),
                date: (Utc::now() - Duration::days(days_ago)).date_naive(),
                amount,
                currency: "EUR".to_string(),
                direction,
                description: merchant.to_string(),
                merchant: Some(merchant.to_string()),
                metadata: None,
            })
            .unwrap();
        if let Some(category) = category {
            db.update_categorization(result.id(), category, None, 0.9, CategorizedBy::Auto)
                .unwrap();
        }
    }

    #[test]
    fn test_rollup_debits_only_inside_window() {
        let db = Database::in_memory().unwrap();
        let account_id = seed_account(&db, "u1");

        spend(&db, account_id, "REWE", Some("groceries"), 5, 60.0, Direction::Debit);
        spend(&db, account_id, "REWE", Some("groceries"), 12, 40.0, Direction::Debit);
        spend(&db, account_id, "Netflix", Some("entertainment"), 3, 9.99, Direction::Debit);
        // Outside the window
        spend(&db, account_id, "REWE", Some("groceries"), 45, 500.0, Direction::Debit);
        // Credits never count toward spend
        spend(&db, account_id, "Employer", None, 2, 3000.0, Direction::Credit);

        let insights = spending_insights(&db, "u1").unwrap();
        assert!((insights.total_spent - 109.99).abs() < 1e-9);

        assert_eq!(insights.by_category[0].category, "groceries");
        assert!((insights.by_category[0].total - 100.0).abs() < 1e-9);
        assert!((insights.by_category[0].share - 100.0 / 109.99).abs() < 1e-9);
        assert_eq!(insights.by_category[1].category, "entertainment");

        assert_eq!(insights.top_merchants[0].merchant, "REWE");
        assert_eq!(insights.top_merchants[0].transaction_count, 2);
    }

    #[test]
    fn test_uncategorized_bucket_and_empty_history() {
        let db = Database::in_memory().unwrap();
        let account_id = seed_account(&db, "u1");

        let empty = spending_insights(&db, "u1").unwrap();
        assert_eq!(empty.total_spent, 0.0);
        assert!(empty.by_category.is_empty());

        spend(&db, account_id, "Kiosk", None, 1, 5.0, Direction::Debit);
        let insights = spending_insights(&db, "u1").unwrap();
        assert_eq!(insights.by_category[0].category, "uncategorized");
        assert_eq!(insights.by_category[0].share, 1.0);
    }
}
