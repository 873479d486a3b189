//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `cmd_init` - Initialize the database
//! - `cmd_detect` - Run subscription detection
//! - `cmd_subscriptions` - List detected subscriptions

use std::path::Path;

use anyhow::{Context, Result};
use ledgerlink_core::db::Database;
use ledgerlink_core::detect::{monthly_cost, SubscriptionDetector};
use ledgerlink_core::models::SubscriptionStatus;

use super::truncate;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path.to_str().context("Database path must be UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let _db = open_db(db_path, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Start the server: ledgerlink serve");
    println!("  2. Link a bank via POST /api/connections");
    println!("  3. Pull transactions: ledgerlink sync");

    Ok(())
}

pub fn cmd_detect(db_path: &Path, user_id: &str, no_encrypt: bool) -> Result<()> {
    println!("🔍 Detecting recurring subscriptions for {}...", user_id);

    let db = open_db(db_path, no_encrypt)?;
    let detector = SubscriptionDetector::new(&db);
    let results = detector.detect(user_id)?;

    println!();
    println!("📊 Detection Results");
    println!("   ─────────────────────────────");
    println!("   Merchants considered: {}", results.merchants_considered);
    println!("   Subscriptions found: {}", results.subscriptions_found);
    if results.subscriptions_deactivated > 0 {
        println!("   Marked inactive: {}", results.subscriptions_deactivated);
    }

    if results.subscriptions_found > 0 {
        let total = detector.total_monthly_cost(user_id)?;
        println!();
        println!("   💸 Estimated monthly cost: {:.2}", total);
        println!();
        println!("Run 'ledgerlink subscriptions' to see details.");
    } else {
        println!();
        println!("No recurring charges found. Sync more history and try again.");
    }

    Ok(())
}

pub fn cmd_subscriptions(db_path: &Path, user_id: &str, no_encrypt: bool) -> Result<()> {
    let db = open_db(db_path, no_encrypt)?;
    let subscriptions = db.list_subscriptions(user_id, None)?;

    if subscriptions.is_empty() {
        println!("No subscriptions detected. Run 'ledgerlink detect' after syncing.");
        return Ok(());
    }

    println!();
    println!("📋 Subscriptions");
    println!("   ──────────────────────────────────────────────────────────────");

    let mut total = 0.0;
    for sub in &subscriptions {
        let marker = match sub.status {
            SubscriptionStatus::Active => "●",
            SubscriptionStatus::Inactive => "○",
        };
        let next = sub
            .next_expected
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {} {:<28} {:>8.2} {}  {:<8} next: {}",
            marker,
            truncate(&sub.merchant, 28),
            sub.amount,
            sub.currency,
            sub.frequency.as_str(),
            next,
        );
        if sub.status == SubscriptionStatus::Active {
            total += monthly_cost(sub);
        }
    }

    println!();
    println!("   💸 Monthly total (active): {:.2}", total);

    let detector = SubscriptionDetector::new(&db);
    let recommendations = detector.recommendations(user_id)?;
    if !recommendations.is_empty() {
        println!();
        for rec in recommendations {
            println!("   💡 {}", rec.message);
        }
    }
    println!();

    Ok(())
}
