//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `connections` - Bank connection lifecycle and consent state
//! - `accounts` - Bank account operations
//! - `transactions` - Transaction upsert, queries, categorization updates
//! - `subscriptions` - Detected recurring payment storage
//! - `feedback` - Append-only category correction log

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod accounts;
mod connections;
mod feedback;
mod subscriptions;
mod transactions;

pub use transactions::{TransactionFilter, TransactionUpsert};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "LEDGERLINK_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path. This allows moving/renaming/restoring the database freely.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"ledgerlink-v1-sl";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    // Derive key using Argon2id
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    // Extract the hash portion for use as SQLCipher key (hex encoded)
    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Format a DateTime<Utc> the way SQLite's CURRENT_TIMESTAMP does
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Whole-database row counts
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub connections: i64,
    pub linked_connections: i64,
    pub accounts: i64,
    pub transactions: i64,
    pub active_subscriptions: i64,
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `LEDGERLINK_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    ///
    /// Returns an error if `LEDGERLINK_DB_KEY` is not set. Use
    /// `new_unencrypted()` for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: This creates an unencrypted database. Only use for development
    /// or testing. For production, use `new()` with `LEDGERLINK_DB_KEY` set.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Use with_init to set the key on every new connection
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!("/tmp/ledgerlink_test_{}_{}.db", std::process::id(), id);

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Row counts across the whole database, for status output
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<i64> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };

        Ok(StorageStats {
            connections: count("SELECT COUNT(*) FROM bank_connections")?,
            linked_connections: count(
                "SELECT COUNT(*) FROM bank_connections WHERE status = 'linked'",
            )?,
            accounts: count("SELECT COUNT(*) FROM bank_accounts WHERE is_active = 1")?,
            transactions: count("SELECT COUNT(*) FROM transactions")?,
            active_subscriptions: count(
                "SELECT COUNT(*) FROM subscriptions WHERE status = 'active'",
            )?,
        })
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL mode: better concurrency, readers don't block writers
            PRAGMA journal_mode = WAL;

            -- Cache size: ~8MB (2000 pages * 4KB default page size)
            PRAGMA cache_size = 2000;

            -- Synchronous NORMAL: good balance of safety and performance
            PRAGMA synchronous = NORMAL;

            -- Store temp tables in memory
            PRAGMA temp_store = MEMORY;

            -- Bank connections (one row per consent grant at one institution)
            CREATE TABLE IF NOT EXISTS bank_connections (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                institution_id TEXT NOT NULL,
                institution_name TEXT NOT NULL,
                account_type TEXT NOT NULL DEFAULT 'checking',
                status TEXT NOT NULL DEFAULT 'pending',    -- pending, linked, expired, error
                reference TEXT NOT NULL UNIQUE,            -- opaque callback correlation value
                linkage_token_enc TEXT,                    -- vault-encrypted requisition id
                error TEXT,                                -- failure reason when status = error
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                expires_at DATETIME NOT NULL,              -- consent end, creation + 90 days
                last_synced_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_connections_user ON bank_connections(user_id);
            CREATE INDEX IF NOT EXISTS idx_connections_status ON bank_connections(status);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_connections_reference ON bank_connections(reference);

            -- Bank accounts discovered under a linked connection
            CREATE TABLE IF NOT EXISTS bank_accounts (
                id INTEGER PRIMARY KEY,
                connection_id INTEGER NOT NULL REFERENCES bank_connections(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                external_id_enc TEXT NOT NULL,             -- vault-encrypted provider account id
                iban TEXT,
                name TEXT,
                currency TEXT NOT NULL DEFAULT 'EUR',
                balance REAL,
                available_balance REAL,
                is_active BOOLEAN DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                last_synced_at DATETIME                    -- sync watermark
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_connection ON bank_accounts(connection_id);
            CREATE INDEX IF NOT EXISTS idx_accounts_user ON bank_accounts(user_id);

            -- Transactions
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES bank_accounts(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                external_id TEXT NOT NULL,                 -- provider id or dedup hash
                date DATE NOT NULL,
                amount REAL NOT NULL,                      -- positive magnitude
                currency TEXT NOT NULL,
                direction TEXT NOT NULL,                   -- debit, credit
                description TEXT NOT NULL,
                merchant TEXT,                             -- cleaned counterparty name
                category TEXT,
                subcategory TEXT,
                confidence REAL,
                categorized_by TEXT,                       -- auto, ml, user
                is_business BOOLEAN DEFAULT 0,
                is_recurring BOOLEAN DEFAULT 0,
                subscription_id INTEGER REFERENCES subscriptions(id) ON DELETE SET NULL,
                metadata TEXT,                             -- raw provider fields as JSON
                invoice_doc_id TEXT,                       -- opaque linked document id
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(account_id, external_id)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, date);
            CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_merchant ON transactions(merchant);
            CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category);
            CREATE INDEX IF NOT EXISTS idx_transactions_subscription ON transactions(subscription_id);

            -- Subscriptions (detected recurring charges)
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                merchant TEXT NOT NULL,
                amount REAL NOT NULL,
                currency TEXT NOT NULL DEFAULT 'EUR',
                frequency TEXT NOT NULL,                   -- daily, weekly, monthly, yearly
                category TEXT,
                next_expected DATE,
                confidence REAL NOT NULL,
                last_charged DATE,
                transaction_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',     -- active, inactive
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, merchant)
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON subscriptions(status);

            -- Category feedback (append-only user corrections, training signal)
            CREATE TABLE IF NOT EXISTS category_feedback (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                transaction_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
                merchant TEXT,
                description TEXT NOT NULL,
                amount REAL NOT NULL,
                old_category TEXT,
                new_category TEXT NOT NULL,
                new_subcategory TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_user ON category_feedback(user_id);
            CREATE INDEX IF NOT EXISTS idx_feedback_transaction ON category_feedback(transaction_id);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
