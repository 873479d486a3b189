//! Recurring payment detection
//!
//! Mines the last 180 days of debit history for charge patterns that look
//! like subscriptions: same merchant, steady amount, steady cadence. Detected
//! patterns are upserted by (user, merchant); subscriptions whose pattern
//! disappears in a later pass are demoted to inactive rather than deleted.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;
use crate::models::{Frequency, Subscription, SubscriptionStatus, Transaction};

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Days of history considered
    pub window_days: i64,
    /// Minimum charges from one merchant before a pattern is considered
    pub min_transactions: usize,
    /// Every amount must sit within this fraction of the group mean
    pub amount_tolerance: f64,
    /// A gap counts as regular when within this fraction of the mean gap
    pub gap_tolerance: f64,
    /// Fraction of gaps that must be regular
    pub interval_consistency_min: f64,
    /// Charge count at which the sample-size confidence term saturates
    pub sample_saturation: usize,
    /// Minimum blended confidence to store a subscription
    pub min_confidence: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_days: 180,
            min_transactions: 2,
            amount_tolerance: 0.05,
            gap_tolerance: 0.20,
            interval_consistency_min: 0.80,
            sample_saturation: 12,
            min_confidence: 0.8,
        }
    }
}

/// Results of a detection pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct DetectionResults {
    pub merchants_considered: usize,
    pub subscriptions_found: usize,
    pub subscriptions_deactivated: usize,
}

/// Monthly-equivalent cost of one subscription
pub fn monthly_cost(subscription: &Subscription) -> f64 {
    subscription.amount * subscription.frequency.monthly_multiplier()
}

/// Human-readable suggestions derived from the active subscription set
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub kind: String,
    pub message: String,
}

/// Map a mean day-gap to a billing cadence. Gaps outside every bucket mean
/// the charges are not on a recognizable cycle.
fn frequency_for_gap(mean_gap: f64) -> Option<Frequency> {
    match mean_gap {
        g if (0.5..=1.5).contains(&g) => Some(Frequency::Daily),
        g if (6.0..=8.0).contains(&g) => Some(Frequency::Weekly),
        // Bi-weekly billing reported as weekly cadence
        g if (13.0..=15.0).contains(&g) => Some(Frequency::Weekly),
        g if (28.0..=32.0).contains(&g) => Some(Frequency::Monthly),
        // Quarterly billing reported as monthly cadence
        g if (88.0..=92.0).contains(&g) => Some(Frequency::Monthly),
        g if (360.0..=370.0).contains(&g) => Some(Frequency::Yearly),
        _ => None,
    }
}

struct Pattern {
    frequency: Frequency,
    mean_amount: f64,
    confidence: f64,
    last_charged: NaiveDate,
    next_expected: NaiveDate,
    transaction_ids: Vec<i64>,
    transaction_count: usize,
}

/// Detects recurring charges in synced history
pub struct SubscriptionDetector<'a> {
    db: &'a Database,
    config: DetectionConfig,
}

impl<'a> SubscriptionDetector<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: DetectionConfig::default(),
        }
    }

    pub fn with_config(db: &'a Database, config: DetectionConfig) -> Self {
        Self { db, config }
    }

    /// Run a full detection pass for one user
    pub fn detect(&self, user_id: &str) -> Result<DetectionResults> {
        let since = (Utc::now() - Duration::days(self.config.window_days)).date_naive();
        let transactions = self.db.list_debits_since(user_id, since)?;

        // Group by merchant; BTreeMap keeps detection order stable
        let mut groups: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
        for tx in &transactions {
            if let Some(merchant) = tx.merchant.as_deref() {
                groups.entry(merchant.to_string()).or_default().push(tx);
            }
        }

        let mut results = DetectionResults {
            merchants_considered: groups.len(),
            ..Default::default()
        };
        let mut detected_ids = Vec::new();

        for (merchant, group) in &groups {
            let Some(pattern) = self.qualify(group) else {
                continue;
            };

            let currency = group[0].currency.clone();
            let category = group.iter().find_map(|t| t.category.clone());

            let subscription_id = self.db.upsert_subscription(
                user_id,
                merchant,
                pattern.mean_amount,
                &currency,
                pattern.frequency,
                category.as_deref(),
                Some(pattern.next_expected),
                pattern.confidence,
                Some(pattern.last_charged),
                pattern.transaction_count as i64,
            )?;
            self.db
                .mark_transactions_recurring(&pattern.transaction_ids, subscription_id)?;

            debug!(
                merchant = %merchant,
                frequency = %pattern.frequency,
                confidence = pattern.confidence,
                "Recurring pattern detected"
            );
            detected_ids.push(subscription_id);
            results.subscriptions_found += 1;
        }

        results.subscriptions_deactivated = self
            .db
            .deactivate_missing_subscriptions(user_id, &detected_ids)?;

        info!(
            user_id = %user_id,
            found = results.subscriptions_found,
            deactivated = results.subscriptions_deactivated,
            "Detection pass complete"
        );
        Ok(results)
    }

    /// Decide whether one merchant's charges form a recurring pattern
    fn qualify(&self, group: &[&Transaction]) -> Option<Pattern> {
        if group.len() < self.config.min_transactions {
            return None;
        }

        // list_debits_since returns date-ordered rows
        let dates: Vec<NaiveDate> = group.iter().map(|t| t.date).collect();
        let amounts: Vec<f64> = group.iter().map(|t| t.amount).collect();

        let gaps: Vec<f64> = dates
            .windows(2)
            .map(|w| (w[1] - w[0]).num_days() as f64)
            .collect();
        if gaps.is_empty() {
            return None;
        }

        let mean_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
        let frequency = frequency_for_gap(mean_gap)?;

        // Every amount within tolerance of the mean
        let mean_amount = amounts.iter().sum::<f64>() / amounts.len() as f64;
        if mean_amount <= 0.0 {
            return None;
        }
        let amount_deviations: Vec<f64> = amounts
            .iter()
            .map(|a| (a - mean_amount).abs() / mean_amount)
            .collect();
        if amount_deviations
            .iter()
            .any(|d| *d > self.config.amount_tolerance)
        {
            return None;
        }

        // Enough of the gaps close to the mean gap
        let regular_gaps = gaps
            .iter()
            .filter(|g| (*g - mean_gap).abs() / mean_gap <= self.config.gap_tolerance)
            .count();
        let interval_score = regular_gaps as f64 / gaps.len() as f64;
        if interval_score < self.config.interval_consistency_min {
            return None;
        }

        let amount_score =
            1.0 - amount_deviations.iter().sum::<f64>() / amount_deviations.len() as f64;
        let sample_score =
            (group.len() as f64 / self.config.sample_saturation as f64).min(1.0);
        let confidence = 0.4 * interval_score + 0.4 * amount_score + 0.2 * sample_score;

        if confidence < self.config.min_confidence {
            return None;
        }

        let last_charged = *dates.last()?;
        Some(Pattern {
            frequency,
            mean_amount: (mean_amount * 100.0).round() / 100.0,
            confidence,
            last_charged,
            next_expected: last_charged + Duration::days(frequency.period_days()),
            transaction_ids: group.iter().map(|t| t.id).collect(),
            transaction_count: group.len(),
        })
    }

    /// Aggregate monthly-equivalent cost of the user's active subscriptions
    pub fn total_monthly_cost(&self, user_id: &str) -> Result<f64> {
        let subscriptions = self
            .db
            .list_subscriptions(user_id, Some(SubscriptionStatus::Active))?;
        Ok(subscriptions.iter().map(monthly_cost).sum())
    }

    /// Heuristic savings suggestions over the active subscription set
    pub fn recommendations(&self, user_id: &str) -> Result<Vec<Recommendation>> {
        let subscriptions = self
            .db
            .list_subscriptions(user_id, Some(SubscriptionStatus::Active))?;
        let mut recommendations = Vec::new();

        let total: f64 = subscriptions.iter().map(monthly_cost).sum();
        if total > 100.0 {
            recommendations.push(Recommendation {
                kind: "high_total".to_string(),
                message: format!(
                    "Your subscriptions add up to {:.2}/month. Reviewing the list may surface ones you no longer use.",
                    total
                ),
            });
        }

        let entertainment = subscriptions
            .iter()
            .filter(|s| s.category.as_deref() == Some("entertainment"))
            .count();
        if entertainment >= 4 {
            recommendations.push(Recommendation {
                kind: "entertainment_overlap".to_string(),
                message: format!(
                    "You have {} entertainment subscriptions. Rotating services instead of running them in parallel can cut this down.",
                    entertainment
                ),
            });
        }

        for subscription in &subscriptions {
            if subscription.frequency == Frequency::Monthly && subscription.amount >= 15.0 {
                recommendations.push(Recommendation {
                    kind: "annual_billing".to_string(),
                    message: format!(
                        "{} charges {:.2} monthly; many services discount annual billing.",
                        subscription.merchant, subscription.amount
                    ),
                });
            }
        }

        Ok(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, Direction, NewTransaction};

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

    fn charge(db: &Database, account_id: i64, merchant: &str, days_ago: i64, amount: f64) -> i64 {
        db.upsert_transaction(&NewTransaction {
            account_id,
            user_id: "u1".to_string(),
            external_id: format!("ext-{}", rand::random::<u64>()),
            date: (Utc::now() - Duration::days(days_ago)).date_naive(),
            amount,
            currency: "EUR".to_string(),
            direction: Direction::Debit,
            description: format!("CARD PAYMENT {}", merchant.to_uppercase()),
            merchant: Some(merchant.to_string()),
            metadata: None,
        })
        .unwrap()
        .id()
    }

    #[test]
    fn test_frequency_buckets() {
        assert_eq!(frequency_for_gap(1.0), Some(Frequency::Daily));
        assert_eq!(frequency_for_gap(7.0), Some(Frequency::Weekly));
        assert_eq!(frequency_for_gap(14.0), Some(Frequency::Weekly));
        assert_eq!(frequency_for_gap(30.0), Some(Frequency::Monthly));
        assert_eq!(frequency_for_gap(90.0), Some(Frequency::Monthly));
        assert_eq!(frequency_for_gap(365.0), Some(Frequency::Yearly));
        assert_eq!(frequency_for_gap(20.0), None);
        assert_eq!(frequency_for_gap(45.0), None);
    }

    #[test]
    fn test_detects_monthly_charges() {
        let db = Database::in_memory().unwrap();
        let account_id = seed_account(&db, "u1");

        // Six monthly 9.99 charges, gaps 28-32 days
        let mut tx_ids = Vec::new();
        for days_ago in [152, 122, 93, 61, 30, 1] {
            tx_ids.push(charge(&db, account_id, "Netflix", days_ago, 9.99));
        }

        let detector = SubscriptionDetector::new(&db);
        let results = detector.detect("u1").unwrap();
        assert_eq!(results.subscriptions_found, 1);

        let subs = db.list_subscriptions("u1", None).unwrap();
        assert_eq!(subs.len(), 1);
        let sub = &subs[0];
        assert_eq!(sub.merchant, "Netflix");
        assert_eq!(sub.frequency, Frequency::Monthly);
        assert_eq!(sub.amount, 9.99);
        assert!(sub.confidence > 0.8, "confidence was {}", sub.confidence);
        assert_eq!(sub.transaction_count, 6);
        assert_eq!(
            sub.next_expected,
            Some(sub.last_charged.unwrap() + Duration::days(30))
        );

        // Contributing transactions flagged and back-referenced
        for id in tx_ids {
            let tx = db.get_transaction(id).unwrap().unwrap();
            assert!(tx.is_recurring);
            assert_eq!(tx.subscription_id, Some(sub.id));
        }
    }

    #[test]
    fn test_rejects_high_amount_variance() {
        let db = Database::in_memory().unwrap();
        let account_id = seed_account(&db, "u1");

        // Monthly cadence but amounts vary by >25%
        for (days_ago, amount) in [(150, 40.0), (120, 55.0), (90, 38.0), (60, 52.0), (30, 44.0)] {
            charge(&db, account_id, "Corner Shop", days_ago, amount);
        }

        let detector = SubscriptionDetector::new(&db);
        let results = detector.detect("u1").unwrap();
        assert_eq!(results.subscriptions_found, 0);
        assert!(db.list_subscriptions("u1", None).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_irregular_gaps() {
        let db = Database::in_memory().unwrap();
        let account_id = seed_account(&db, "u1");

        // Same amount but no recognizable cadence
        for days_ago in [170, 140, 95, 60, 10] {
            charge(&db, account_id, "Random Store", days_ago, 19.99);
        }

        let detector = SubscriptionDetector::new(&db);
        let results = detector.detect("u1").unwrap();
        assert_eq!(results.subscriptions_found, 0);
    }

    #[test]
    fn test_weekly_detection_and_monthly_cost() {
        let db = Database::in_memory().unwrap();
        let account_id = seed_account(&db, "u1");

        for days_ago in [35, 28, 21, 14, 7, 0] {
            charge(&db, account_id, "Gym Express", days_ago, 12.0);
        }

        let detector = SubscriptionDetector::new(&db);
        detector.detect("u1").unwrap();

        let subs = db.list_subscriptions("u1", None).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].frequency, Frequency::Weekly);
        assert!((monthly_cost(&subs[0]) - 12.0 * 4.33).abs() < 1e-9);
    }

    #[test]
    fn test_vanished_pattern_demoted_to_inactive() {
        let db = Database::in_memory().unwrap();
        let account_id = seed_account(&db, "u1");

        for days_ago in [152, 122, 93, 61, 30, 1] {
            charge(&db, account_id, "Netflix", days_ago, 9.99);
        }
        let detector = SubscriptionDetector::new(&db);
        detector.detect("u1").unwrap();

        // History ages out of the window; the pattern no longer qualifies
        db.conn()
            .unwrap()
            .execute("DELETE FROM transactions", [])
            .unwrap();
        let results = detector.detect("u1").unwrap();
        assert_eq!(results.subscriptions_found, 0);
        assert_eq!(results.subscriptions_deactivated, 1);

        let subs = db.list_subscriptions("u1", None).unwrap();
        assert_eq!(subs[0].status, SubscriptionStatus::Inactive);

        // Re-detection reactivates the same row
        for days_ago in [60, 30, 1] {
            charge(&db, account_id, "Netflix", days_ago, 9.99);
        }
        detector.detect("u1").unwrap();
        let subs = db.list_subscriptions("u1", None).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_recommendations() {
        let db = Database::in_memory().unwrap();
        let account_id = seed_account(&db, "u1");

        // Four entertainment subscriptions, one pricey monthly one
        for (merchant, amount) in [
            ("Netflix", 17.99),
            ("Spotify", 10.99),
            ("Disney Plus", 9.99),
            ("HBO Max", 9.99),
        ] {
            for days_ago in [120, 90, 60, 30, 0] {
                let id = charge(&db, account_id, merchant, days_ago, amount);
                db.update_categorization(
                    id,
                    "entertainment",
                    Some("streaming"),
                    0.95,
                    crate::models::CategorizedBy::Auto,
                )
                .unwrap();
            }
        }

        let detector = SubscriptionDetector::new(&db);
        let results = detector.detect("u1").unwrap();
        assert_eq!(results.subscriptions_found, 4);

        let recommendations = detector.recommendations("u1").unwrap();
        let kinds: Vec<&str> = recommendations.iter().map(|r| r.kind.as_str()).collect();
        assert!(kinds.contains(&"entertainment_overlap"));
        assert!(kinds.contains(&"annual_billing"));
    }
}
