//! Server command implementation

use std::path::Path;

use anyhow::Result;
use ledgerlink_core::{AggregatorClient, ClassifierClient, VaultClient};
use ledgerlink_server::{JwtConfig, ServerConfig};

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
) -> Result<()> {
    println!("🚀 Starting LedgerLink server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    // Allowed CORS origins (comma-separated)
    let allowed_origins: Vec<String> = std::env::var("LEDGERLINK_ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    // Identity-service JWT configuration
    let jwks_url = std::env::var("LEDGERLINK_JWKS_URL")
        .ok()
        .filter(|s| !s.is_empty());
    let audience = std::env::var("LEDGERLINK_JWT_AUDIENCE")
        .ok()
        .filter(|s| !s.is_empty());
    let issuer = std::env::var("LEDGERLINK_JWT_ISSUER")
        .ok()
        .filter(|s| !s.is_empty());

    let redirect_url = std::env::var("LEDGERLINK_REDIRECT_URL")
        .unwrap_or_else(|_| format!("http://{}:{}/api/callback", host, port));

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if jwks_url.is_some() {
        println!("   🔐 Authentication: bearer tokens (JWKS validated)");
    } else {
        println!("   ❌ Authentication enabled but LEDGERLINK_JWKS_URL not set");
        println!("      Requests will be rejected until the identity service is configured,");
        println!("      or use --no-auth for local development.");
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }

    let aggregator = match AggregatorClient::from_env() {
        Some(client) => {
            println!("   🏦 Aggregator: configured (AGGREGATOR_HOST)");
            client
        }
        None => {
            println!("   🏦 Aggregator: sandbox mock (set AGGREGATOR_HOST for live banks)");
            AggregatorClient::mock()
        }
    };

    let vault = match VaultClient::from_env() {
        Some(client) => {
            println!("   🔑 Vault: KMS (LEDGERLINK_KMS_HOST)");
            client
        }
        None => {
            println!("   🔑 Vault: in-process keyring (set LEDGERLINK_KMS_HOST for KMS)");
            VaultClient::memory()
        }
    };

    let classifier = ClassifierClient::from_env();
    match &classifier {
        Some(_) => println!("   🤖 Classifier: configured (CLASSIFIER_HOST)"),
        None => println!("   💡 Tip: Set CLASSIFIER_HOST for ML categorization"),
    }

    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    let config = ServerConfig {
        require_auth: !no_auth,
        allowed_origins,
        jwt: JwtConfig {
            jwks_url,
            audience,
            issuer,
        },
        redirect_url,
    };

    ledgerlink_server::serve(db, aggregator, vault, classifier, host, port, config).await?;

    Ok(())
}
