//! Bank connection operations

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{AccountType, BankConnection, ConnectionStatus};

fn row_to_connection(row: &rusqlite::Row) -> rusqlite::Result<BankConnection> {
    let account_type_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let created_at_str: String = row.get(9)?;
    let expires_at_str: String = row.get(10)?;
    let last_synced_str: Option<String> = row.get(11)?;

    Ok(BankConnection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        institution_id: row.get(2)?,
        institution_name: row.get(3)?,
        account_type: account_type_str.parse().unwrap_or(AccountType::Checking),
        status: status_str.parse().unwrap_or(ConnectionStatus::Error),
        reference: row.get(6)?,
        linkage_token_enc: row.get(7)?,
        error: row.get(8)?,
        created_at: parse_datetime(&created_at_str),
        expires_at: parse_datetime(&expires_at_str),
        last_synced_at: last_synced_str.map(|s| parse_datetime(&s)),
    })
}

const CONNECTION_COLUMNS: &str = "id, user_id, institution_id, institution_name, account_type, \
     status, reference, linkage_token_enc, error, created_at, expires_at, last_synced_at";

impl Database {
    /// Insert a new pending connection. Returns its id.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_connection(
        &self,
        user_id: &str,
        institution_id: &str,
        institution_name: &str,
        account_type: AccountType,
        reference: &str,
        linkage_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO bank_connections
             (user_id, institution_id, institution_name, account_type, status, reference, linkage_token_enc, expires_at)
             VALUES (?, ?, ?, ?, 'pending', ?, ?, ?)",
            params![
                user_id,
                institution_id,
                institution_name,
                account_type.as_str(),
                reference,
                linkage_token_enc,
                format_datetime(expires_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a connection by ID
    pub fn get_connection(&self, id: i64) -> Result<Option<BankConnection>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!("SELECT {} FROM bank_connections WHERE id = ?", CONNECTION_COLUMNS),
                params![id],
                row_to_connection,
            )
            .ok();
        Ok(result)
    }

    /// Look up a connection by its callback reference. The reference column
    /// is unique and indexed, so this is a point lookup.
    pub fn get_connection_by_reference(&self, reference: &str) -> Result<Option<BankConnection>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM bank_connections WHERE reference = ?",
                    CONNECTION_COLUMNS
                ),
                params![reference],
                row_to_connection,
            )
            .ok();
        Ok(result)
    }

    /// Get a connection, verifying ownership. Returns `Unauthorized` when the
    /// connection exists but belongs to someone else, `NotFound` when absent.
    pub fn get_owned_connection(&self, id: i64, user_id: &str) -> Result<BankConnection> {
        let connection = self
            .get_connection(id)?
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
        if connection.user_id != user_id {
            return Err(Error::Unauthorized);
        }
        Ok(connection)
    }

    /// List all connections for a user, newest first
    pub fn list_connections(&self, user_id: &str) -> Result<Vec<BankConnection>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bank_connections WHERE user_id = ? ORDER BY created_at DESC, id DESC",
            CONNECTION_COLUMNS
        ))?;

        let connections = stmt
            .query_map(params![user_id], row_to_connection)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(connections)
    }

    /// Update a connection's status and optional error message.
    /// Moving out of `error` clears any stored message.
    pub fn update_connection_status(
        &self,
        id: i64,
        status: ConnectionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE bank_connections SET status = ?, error = ? WHERE id = ?",
            params![status.as_str(), error, id],
        )?;
        Ok(())
    }

    /// Record a successful sync on the connection
    pub fn touch_connection_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE bank_connections SET last_synced_at = ? WHERE id = ?",
            params![format_datetime(at), id],
        )?;
        Ok(())
    }

    /// Mark every connection past its consent window as expired.
    /// Returns the number of connections transitioned.
    pub fn expire_due_connections(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE bank_connections SET status = 'expired'
             WHERE status != 'expired' AND expires_at <= ?",
            params![format_datetime(now)],
        )?;
        Ok(count)
    }

    /// Delete a connection and everything under it.
    ///
    /// Deletes explicitly rather than relying on ON DELETE CASCADE because
    /// the foreign_keys pragma is per-connection and pooled connections may
    /// not have it set.
    pub fn delete_connection(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;

        conn.execute("BEGIN TRANSACTION", [])?;

        let result = (|| {
            conn.execute(
                "DELETE FROM category_feedback WHERE transaction_id IN
                 (SELECT id FROM transactions WHERE account_id IN
                  (SELECT id FROM bank_accounts WHERE connection_id = ?))",
                params![id],
            )?;
            conn.execute(
                "DELETE FROM transactions WHERE account_id IN
                 (SELECT id FROM bank_accounts WHERE connection_id = ?)",
                params![id],
            )?;
            conn.execute(
                "DELETE FROM bank_accounts WHERE connection_id = ?",
                params![id],
            )?;
            conn.execute("DELETE FROM bank_connections WHERE id = ?", params![id])?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}
