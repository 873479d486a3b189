//! Category feedback operations (append-only correction log)

use rusqlite::params;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::CategoryFeedback;

fn row_to_feedback(row: &rusqlite::Row) -> rusqlite::Result<CategoryFeedback> {
    let created_at_str: String = row.get(9)?;

    Ok(CategoryFeedback {
        id: row.get(0)?,
        user_id: row.get(1)?,
        transaction_id: row.get(2)?,
        merchant: row.get(3)?,
        description: row.get(4)?,
        amount: row.get(5)?,
        old_category: row.get(6)?,
        new_category: row.get(7)?,
        new_subcategory: row.get(8)?,
        created_at: parse_datetime(&created_at_str),
    })
}

impl Database {
    /// Record a user category correction. The log is append-only; every
    /// correction is kept even when the same transaction is corrected twice.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_category_feedback(
        &self,
        user_id: &str,
        transaction_id: i64,
        merchant: Option<&str>,
        description: &str,
        amount: f64,
        old_category: Option<&str>,
        new_category: &str,
        new_subcategory: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO category_feedback
             (user_id, transaction_id, merchant, description, amount, old_category, new_category, new_subcategory)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                user_id,
                transaction_id,
                merchant,
                description,
                amount,
                old_category,
                new_category,
                new_subcategory,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List a user's corrections, newest first
    pub fn list_category_feedback(&self, user_id: &str, limit: i64) -> Result<Vec<CategoryFeedback>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, transaction_id, merchant, description, amount,
                    old_category, new_category, new_subcategory, created_at
             FROM category_feedback WHERE user_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )?;

        let feedback = stmt
            .query_map(params![user_id, limit], row_to_feedback)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(feedback)
    }
}
