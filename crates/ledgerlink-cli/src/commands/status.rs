//! Status and listing command implementations (status, connections, accounts)

use std::path::Path;

use anyhow::Result;

use super::{open_db, truncate};

pub fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    use ledgerlink_core::db::DB_KEY_ENV;
    use std::fs;

    println!();
    println!("📊 LedgerLink Status");
    println!("   ─────────────────────────────────────────────────────────────");

    // Database path
    println!("   Database: {}", db_path.display());

    // Check if database file exists and get size
    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    // Check encryption status
    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    // Try to open the database and show stats
    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => {
                if let Ok(stats) = db.stats() {
                    println!();
                    println!(
                        "   Connections: {} ({} linked)",
                        stats.connections, stats.linked_connections
                    );
                    println!("   Accounts: {}", stats.accounts);
                    println!("   Transactions: {}", stats.transactions);
                    println!("   Active subscriptions: {}", stats.active_subscriptions);
                }
            }
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}

pub fn cmd_connections(db_path: &Path, user_id: &str, no_encrypt: bool) -> Result<()> {
    use chrono::Utc;
    use ledgerlink_core::connections::expires_within;

    const RENEWAL_HINT_DAYS: i64 = 14;

    let db = open_db(db_path, no_encrypt)?;
    // Sweep lapsed consents before listing
    let now = Utc::now();
    db.expire_due_connections(now)?;
    let connections = db.list_connections(user_id)?;

    if connections.is_empty() {
        println!("No bank connections. Start the server and link a bank:");
        println!("  ledgerlink serve");
        return Ok(());
    }

    println!();
    println!("🏦 Connections");
    println!("   ─────────────────────────────────────────────────────────────");

    for c in connections {
        let synced = c
            .last_synced_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "   #{:<4} {:<28} {:<8} expires {}  synced {}",
            c.id,
            truncate(&c.institution_name, 28),
            c.status.as_str(),
            c.expires_at.format("%Y-%m-%d"),
            synced,
        );
        if expires_within(&c, RENEWAL_HINT_DAYS, now)
            && c.status == ledgerlink_core::models::ConnectionStatus::Linked
        {
            println!("         ⏰ consent lapses soon, re-authorize to keep syncing");
        }
        if let Some(err) = c.error {
            println!("         ⚠️  {}", err);
        }
    }
    println!();

    Ok(())
}

pub fn cmd_accounts(db_path: &Path, user_id: &str, no_encrypt: bool) -> Result<()> {
    let db = open_db(db_path, no_encrypt)?;
    let accounts = db.list_accounts(user_id)?;

    if accounts.is_empty() {
        println!("No accounts found. Link a bank connection first.");
        return Ok(());
    }

    println!();
    println!("📁 Accounts");
    println!("   ─────────────────────────────────────────────────────────────");

    for account in accounts {
        let name = account.name.as_deref().unwrap_or("(unnamed)");
        let iban = account.iban.as_deref().unwrap_or("-");
        let balance = account
            .balance
            .map(|b| format!("{:.2} {}", b, account.currency))
            .unwrap_or_else(|| "not synced".to_string());
        println!(
            "   #{:<4} {:<24} {:<24} {}",
            account.id,
            truncate(name, 24),
            iban,
            balance,
        );
    }
    println!();

    Ok(())
}
