//! Subscription operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Frequency, Subscription, SubscriptionStatus};

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<Subscription> {
    let frequency_str: String = row.get(5)?;
    let next_expected_str: Option<String> = row.get(7)?;
    let last_charged_str: Option<String> = row.get(9)?;
    let status_str: String = row.get(11)?;
    let created_at_str: String = row.get(12)?;
    let updated_at_str: String = row.get(13)?;

    Ok(Subscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        merchant: row.get(2)?,
        amount: row.get(3)?,
        currency: row.get(4)?,
        frequency: frequency_str.parse().unwrap_or(Frequency::Monthly),
        category: row.get(6)?,
        next_expected: next_expected_str.as_deref().and_then(parse_date),
        confidence: row.get(8)?,
        last_charged: last_charged_str.as_deref().and_then(parse_date),
        transaction_count: row.get(10)?,
        status: status_str.parse().unwrap_or(SubscriptionStatus::Active),
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, merchant, amount, currency, frequency, category, \
     next_expected, confidence, last_charged, transaction_count, status, created_at, updated_at";

impl Database {
    /// Upsert a detected subscription by (user, merchant). A re-detected
    /// subscription is refreshed and reactivated. Returns its id.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_subscription(
        &self,
        user_id: &str,
        merchant: &str,
        amount: f64,
        currency: &str,
        frequency: Frequency,
        category: Option<&str>,
        next_expected: Option<NaiveDate>,
        confidence: f64,
        last_charged: Option<NaiveDate>,
        transaction_count: i64,
    ) -> Result<i64> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM subscriptions WHERE user_id = ? AND merchant = ?",
                params![user_id, merchant],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            conn.execute(
                "UPDATE subscriptions
                 SET amount = ?, currency = ?, frequency = ?, category = ?, next_expected = ?,
                     confidence = ?, last_charged = ?, transaction_count = ?, status = 'active',
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?",
                params![
                    amount,
                    currency,
                    frequency.as_str(),
                    category,
                    next_expected.map(|d| d.to_string()),
                    confidence,
                    last_charged.map(|d| d.to_string()),
                    transaction_count,
                    id,
                ],
            )?;
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO subscriptions
             (user_id, merchant, amount, currency, frequency, category, next_expected, confidence, last_charged, transaction_count, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active')",
            params![
                user_id,
                merchant,
                amount,
                currency,
                frequency.as_str(),
                category,
                next_expected.map(|d| d.to_string()),
                confidence,
                last_charged.map(|d| d.to_string()),
                transaction_count,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a subscription by ID
    pub fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let conn = self.conn()?;
        let sub = conn
            .query_row(
                &format!("SELECT {} FROM subscriptions WHERE id = ?", SUBSCRIPTION_COLUMNS),
                params![id],
                row_to_subscription,
            )
            .ok();
        Ok(sub)
    }

    /// Get a subscription, verifying ownership
    pub fn get_owned_subscription(&self, id: i64, user_id: &str) -> Result<Subscription> {
        let sub = self
            .get_subscription(id)?
            .ok_or_else(|| Error::NotFound(format!("subscription {}", id)))?;
        if sub.user_id != user_id {
            return Err(Error::Unauthorized);
        }
        Ok(sub)
    }

    /// List a user's subscriptions, optionally filtered by status
    pub fn list_subscriptions(
        &self,
        user_id: &str,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<Subscription>> {
        let conn = self.conn()?;

        let subscriptions = if let Some(status) = status {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM subscriptions WHERE user_id = ? AND status = ?
                 ORDER BY amount * CASE frequency
                     WHEN 'daily' THEN 30.0
                     WHEN 'weekly' THEN 4.33
                     WHEN 'yearly' THEN 1.0 / 12.0
                     ELSE 1.0 END DESC",
                SUBSCRIPTION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id, status.as_str()], row_to_subscription)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM subscriptions WHERE user_id = ? ORDER BY status, merchant",
                SUBSCRIPTION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id], row_to_subscription)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        Ok(subscriptions)
    }

    /// Deactivate active subscriptions not re-detected in the latest pass.
    /// Returns the number of subscriptions demoted.
    pub fn deactivate_missing_subscriptions(
        &self,
        user_id: &str,
        detected_ids: &[i64],
    ) -> Result<usize> {
        let conn = self.conn()?;

        if detected_ids.is_empty() {
            let count = conn.execute(
                "UPDATE subscriptions SET status = 'inactive', updated_at = CURRENT_TIMESTAMP
                 WHERE user_id = ? AND status = 'active'",
                params![user_id],
            )?;
            return Ok(count);
        }

        let placeholders: Vec<&str> = detected_ids.iter().map(|_| "?").collect();
        let sql = format!(
            "UPDATE subscriptions SET status = 'inactive', updated_at = CURRENT_TIMESTAMP
             WHERE user_id = ? AND status = 'active' AND id NOT IN ({})",
            placeholders.join(", ")
        );

        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];
        for id in detected_ids {
            params_vec.push(Box::new(*id));
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

        let count = conn.execute(&sql, param_refs.as_slice())?;
        Ok(count)
    }
}
