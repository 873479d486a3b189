//! Sync command implementation

use std::path::Path;

use anyhow::Result;
use ledgerlink_core::{AggregatorClient, ClassifierClient, SyncReport, TransactionIngestor, VaultClient};

use super::open_db;

pub async fn cmd_sync(
    db_path: &Path,
    connection_id: Option<i64>,
    user_id: &str,
    no_encrypt: bool,
) -> Result<()> {
    println!("🔄 Syncing linked banks for {}...", user_id);

    let aggregator = match AggregatorClient::from_env() {
        Some(client) => client,
        None => {
            println!("   🏦 AGGREGATOR_HOST not set; using sandbox mock");
            AggregatorClient::mock()
        }
    };

    let vault = match VaultClient::from_env() {
        Some(client) => client,
        None => {
            println!("   🔑 LEDGERLINK_KMS_HOST not set; using in-process keyring");
            VaultClient::memory()
        }
    };

    let classifier = ClassifierClient::from_env();
    if classifier.is_none() {
        println!("   💡 Tip: Set CLASSIFIER_HOST for ML categorization");
    }

    let db = open_db(db_path, no_encrypt)?;
    let ingestor = TransactionIngestor::new(&db, &aggregator, &vault, classifier.as_ref());

    let reports = match connection_id {
        Some(id) => ingestor.sync_connection(id, user_id).await?,
        None => ingestor.sync_all(user_id).await?,
    };

    if reports.is_empty() {
        println!();
        println!("No linked connections to sync.");
        return Ok(());
    }

    println!();
    println!("📊 Sync Results");
    println!("   ─────────────────────────────");

    let mut inserted = 0;
    let mut failures = 0;
    for report in &reports {
        print_report(report);
        if let Some(outcome) = &report.outcome {
            inserted += outcome.inserted;
        }
        if report.error.is_some() {
            failures += 1;
        }
    }

    println!();
    if failures > 0 {
        println!("⚠️  {} new transactions, {} failures", inserted, failures);
    } else {
        println!("✅ {} new transactions", inserted);
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    match (&report.outcome, &report.error) {
        (Some(outcome), _) => println!(
            "   connection #{} account #{}: {} fetched, {} new, {} updated, {} categorized",
            report.connection_id,
            outcome.account_id,
            outcome.fetched,
            outcome.inserted,
            outcome.updated,
            outcome.categorized,
        ),
        (None, Some(error)) => match report.account_id {
            Some(account_id) => println!(
                "   connection #{} account #{}: ❌ {}",
                report.connection_id, account_id, error
            ),
            None => println!("   connection #{}: ❌ {}", report.connection_id, error),
        },
        (None, None) => {}
    }
}
