//! Transaction operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{CategorizedBy, Direction, NewTransaction, Transaction};

/// Result of upserting a synced transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionUpsert {
    /// New row, contains its id
    Inserted(i64),
    /// Row already existed for (account_id, external_id); provider fields
    /// were refreshed, categorization untouched. Contains the existing id.
    Updated(i64),
}

impl TransactionUpsert {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) => *id,
        }
    }
}

/// Optional filters for transaction listings
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub account_id: Option<i64>,
    pub category: Option<String>,
    pub merchant: Option<String>,
    pub business: Option<bool>,
    pub min_amount: Option<f64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .unwrap_or_else(|_| chrono::Utc::now().date_naive())
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let date_str: String = row.get(4)?;
    let direction_str: String = row.get(7)?;
    let categorized_by_str: Option<String> = row.get(13)?;
    let created_at_str: String = row.get(19)?;

    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        user_id: row.get(2)?,
        external_id: row.get(3)?,
        date: parse_date(&date_str),
        amount: row.get(5)?,
        currency: row.get(6)?,
        direction: direction_str.parse().unwrap_or(Direction::Debit),
        description: row.get(8)?,
        merchant: row.get(9)?,
        category: row.get(10)?,
        subcategory: row.get(11)?,
        confidence: row.get(12)?,
        categorized_by: categorized_by_str.and_then(|s| s.parse().ok()),
        is_business: row.get(14)?,
        is_recurring: row.get(15)?,
        subscription_id: row.get(16)?,
        metadata: row.get(17)?,
        invoice_doc_id: row.get(18)?,
        created_at: parse_datetime(&created_at_str),
    })
}

const TRANSACTION_COLUMNS: &str = "id, account_id, user_id, external_id, date, amount, currency, \
     direction, description, merchant, category, subcategory, confidence, categorized_by, \
     is_business, is_recurring, subscription_id, metadata, invoice_doc_id, created_at";

impl Database {
    /// Insert or refresh a synced transaction.
    ///
    /// Keyed on (account_id, external_id). When the row exists, provider
    /// fields are refreshed but category, confidence and categorized_by are
    /// left alone so user corrections survive re-syncs.
    pub fn upsert_transaction(&self, tx: &NewTransaction) -> Result<TransactionUpsert> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM transactions WHERE account_id = ? AND external_id = ?",
                params![tx.account_id, tx.external_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            conn.execute(
                "UPDATE transactions
                 SET date = ?, amount = ?, currency = ?, direction = ?, description = ?,
                     merchant = ?, metadata = ?
                 WHERE id = ?",
                params![
                    tx.date.to_string(),
                    tx.amount,
                    tx.currency,
                    tx.direction.as_str(),
                    tx.description,
                    tx.merchant,
                    tx.metadata,
                    id,
                ],
            )?;
            return Ok(TransactionUpsert::Updated(id));
        }

        conn.execute(
            "INSERT INTO transactions
             (account_id, user_id, external_id, date, amount, currency, direction, description, merchant, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                tx.account_id,
                tx.user_id,
                tx.external_id,
                tx.date.to_string(),
                tx.amount,
                tx.currency,
                tx.direction.as_str(),
                tx.description,
                tx.merchant,
                tx.metadata,
            ],
        )?;

        Ok(TransactionUpsert::Inserted(conn.last_insert_rowid()))
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS),
                params![id],
                row_to_transaction,
            )
            .ok();
        Ok(tx)
    }

    /// Get a transaction, verifying ownership
    pub fn get_owned_transaction(&self, id: i64, user_id: &str) -> Result<Transaction> {
        let tx = self
            .get_transaction(id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", id)))?;
        if tx.user_id != user_id {
            return Err(Error::Unauthorized);
        }
        Ok(tx)
    }

    /// List a user's transactions with optional filters, newest first
    pub fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;

        // Build dynamic WHERE clause
        let mut conditions = vec!["user_id = ?".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];

        if let Some(aid) = filter.account_id {
            conditions.push("account_id = ?".to_string());
            params.push(Box::new(aid));
        }
        if let Some(ref category) = filter.category {
            conditions.push("category = ?".to_string());
            params.push(Box::new(category.clone()));
        }
        if let Some(ref merchant) = filter.merchant {
            conditions.push("merchant = ? COLLATE NOCASE".to_string());
            params.push(Box::new(merchant.clone()));
        }
        if let Some(business) = filter.business {
            conditions.push("is_business = ?".to_string());
            params.push(Box::new(business));
        }
        if let Some(min_amount) = filter.min_amount {
            conditions.push("amount >= ?".to_string());
            params.push(Box::new(min_amount));
        }
        if let Some(from) = filter.from {
            conditions.push("date >= ?".to_string());
            params.push(Box::new(from.to_string()));
        }
        if let Some(to) = filter.to {
            conditions.push("date <= ?".to_string());
            params.push(Box::new(to.to_string()));
        }
        if let Some(ref q) = filter.search {
            if !q.trim().is_empty() {
                conditions.push(
                    "(description LIKE ? COLLATE NOCASE OR merchant LIKE ? COLLATE NOCASE)"
                        .to_string(),
                );
                let pattern = format!("%{}%", q.trim());
                params.push(Box::new(pattern.clone()));
                params.push(Box::new(pattern));
            }
        }

        let limit = filter.limit.unwrap_or(100).clamp(1, 1000);
        let offset = filter.offset.unwrap_or(0).max(0);

        let sql = format!(
            "SELECT {} FROM transactions WHERE {} ORDER BY date DESC, id DESC LIMIT {} OFFSET {}",
            TRANSACTION_COLUMNS,
            conditions.join(" AND "),
            limit,
            offset
        );

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let transactions = stmt
            .query_map(param_refs.as_slice(), row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Update a transaction's categorization (pipeline path)
    pub fn update_categorization(
        &self,
        id: i64,
        category: &str,
        subcategory: Option<&str>,
        confidence: f64,
        by: CategorizedBy,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE transactions
             SET category = ?, subcategory = ?, confidence = ?, categorized_by = ?
             WHERE id = ?",
            params![category, subcategory, confidence, by.as_str(), id],
        )?;
        Ok(())
    }

    /// Attach an opaque invoice/receipt document id
    pub fn set_transaction_invoice(&self, id: i64, doc_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE transactions SET invoice_doc_id = ? WHERE id = ?",
            params![doc_id, id],
        )?;
        Ok(())
    }

    /// Mark a transaction business or personal
    pub fn set_transaction_business(&self, id: i64, is_business: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE transactions SET is_business = ? WHERE id = ?",
            params![is_business, id],
        )?;
        Ok(())
    }

    /// Recent categorized transactions for a user, newest first. Source pool
    /// for classifier example selection.
    pub fn list_categorized_examples(&self, user_id: &str, limit: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE user_id = ? AND category IS NOT NULL
             ORDER BY date DESC, id DESC LIMIT ?",
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(params![user_id, limit], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Relabel a merchant's machine-categorized transactions after a user
    /// correction. Rows the user categorized themselves are left alone.
    /// Returns the number of rows changed.
    pub fn relabel_merchant_transactions(
        &self,
        user_id: &str,
        merchant: &str,
        category: &str,
        subcategory: Option<&str>,
        exclude_id: i64,
    ) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE transactions
             SET category = ?, subcategory = ?, confidence = 0.85, categorized_by = 'auto'
             WHERE user_id = ? AND merchant = ? AND id != ?
               AND (categorized_by IS NULL OR categorized_by != 'user')",
            params![category, subcategory, user_id, merchant, exclude_id],
        )?;
        Ok(count)
    }

    /// Debit transactions for a user since a date, grouped client-side for
    /// recurring pattern detection. Oldest first.
    pub fn list_debits_since(&self, user_id: &str, since: NaiveDate) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE user_id = ? AND direction = 'debit' AND date >= ?
             ORDER BY date, id",
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(params![user_id, since.to_string()], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Link transactions to a detected subscription
    pub fn mark_transactions_recurring(&self, ids: &[i64], subscription_id: i64) -> Result<()> {
        let conn = self.conn()?;
        for id in ids {
            conn.execute(
                "UPDATE transactions SET is_recurring = 1, subscription_id = ? WHERE id = ?",
                params![subscription_id, id],
            )?;
        }
        Ok(())
    }

    /// Top merchants by debit spend over a date range
    pub fn merchant_totals(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        limit: i64,
    ) -> Result<Vec<(String, f64, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT merchant, SUM(amount), COUNT(*)
             FROM transactions
             WHERE user_id = ? AND direction = 'debit' AND merchant IS NOT NULL
               AND date >= ? AND date <= ?
             GROUP BY merchant
             ORDER BY SUM(amount) DESC
             LIMIT ?",
        )?;

        let totals = stmt
            .query_map(
                params![user_id, from.to_string(), to.to_string(), limit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(totals)
    }

    /// Per-category debit totals over a date range
    pub fn category_totals(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(String, f64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(category, 'uncategorized'), SUM(amount)
             FROM transactions
             WHERE user_id = ? AND direction = 'debit' AND date >= ? AND date <= ?
             GROUP BY COALESCE(category, 'uncategorized')
             ORDER BY SUM(amount) DESC",
        )?;

        let totals = stmt
            .query_map(
                params![user_id, from.to_string(), to.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(totals)
    }
}
