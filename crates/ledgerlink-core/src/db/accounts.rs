//! Bank account operations

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::BankAccount;

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<BankAccount> {
    let created_at_str: String = row.get(10)?;
    let last_synced_str: Option<String> = row.get(11)?;

    Ok(BankAccount {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        user_id: row.get(2)?,
        external_id_enc: row.get(3)?,
        iban: row.get(4)?,
        name: row.get(5)?,
        currency: row.get(6)?,
        balance: row.get(7)?,
        available_balance: row.get(8)?,
        is_active: row.get(9)?,
        created_at: parse_datetime(&created_at_str),
        last_synced_at: last_synced_str.map(|s| parse_datetime(&s)),
    })
}

const ACCOUNT_COLUMNS: &str = "id, connection_id, user_id, external_id_enc, iban, name, currency, \
     balance, available_balance, is_active, created_at, last_synced_at";

impl Database {
    /// Insert a discovered account under a connection. Returns its id.
    pub fn insert_account(
        &self,
        connection_id: i64,
        user_id: &str,
        external_id_enc: &str,
        iban: Option<&str>,
        name: Option<&str>,
        currency: &str,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO bank_accounts (connection_id, user_id, external_id_enc, iban, name, currency)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![connection_id, user_id, external_id_enc, iban, name, currency],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get an account by ID
    pub fn get_account(&self, id: i64) -> Result<Option<BankAccount>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                &format!("SELECT {} FROM bank_accounts WHERE id = ?", ACCOUNT_COLUMNS),
                params![id],
                row_to_account,
            )
            .ok();
        Ok(account)
    }

    /// Get an account, verifying ownership
    pub fn get_owned_account(&self, id: i64, user_id: &str) -> Result<BankAccount> {
        let account = self
            .get_account(id)?
            .ok_or_else(|| Error::NotFound(format!("account {}", id)))?;
        if account.user_id != user_id {
            return Err(Error::Unauthorized);
        }
        Ok(account)
    }

    /// List all accounts for a user
    pub fn list_accounts(&self, user_id: &str) -> Result<Vec<BankAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bank_accounts WHERE user_id = ? ORDER BY id",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![user_id], row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// List accounts under one connection
    pub fn list_accounts_for_connection(&self, connection_id: i64) -> Result<Vec<BankAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bank_accounts WHERE connection_id = ? ORDER BY id",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![connection_id], row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Update an account's balances after a sync
    pub fn update_account_balance(
        &self,
        id: i64,
        balance: Option<f64>,
        available_balance: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE bank_accounts SET balance = ?, available_balance = ? WHERE id = ?",
            params![balance, available_balance, id],
        )?;
        Ok(())
    }

    /// Advance the account's sync watermark
    pub fn update_account_watermark(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE bank_accounts SET last_synced_at = ? WHERE id = ?",
            params![format_datetime(at), id],
        )?;
        Ok(())
    }

    /// Clear sync watermarks for all accounts under a connection, forcing the
    /// next sync to walk the full history window.
    pub fn clear_account_watermarks(&self, connection_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE bank_accounts SET last_synced_at = NULL WHERE connection_id = ?",
            params![connection_id],
        )?;
        Ok(())
    }

    /// Mark an account active or inactive
    pub fn set_account_active(&self, id: i64, is_active: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE bank_accounts SET is_active = ? WHERE id = ?",
            params![is_active, id],
        )?;
        Ok(())
    }
}
