//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// LedgerLink - Open-banking account aggregation
#[derive(Parser)]
#[command(name = "ledgerlink")]
#[command(about = "Self-hosted bank aggregation and transaction intelligence", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "ledgerlink.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set LEDGERLINK_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Show database status (encryption, size, row counts)
    Status,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server validates bearer tokens against the identity
        /// service configured via LEDGERLINK_JWKS_URL.
        #[arg(long)]
        no_auth: bool,
    },

    /// List bank connections
    Connections {
        /// User whose connections to list
        #[arg(short, long, default_value = "local-dev")]
        user: String,
    },

    /// List bank accounts
    Accounts {
        /// User whose accounts to list
        #[arg(short, long, default_value = "local-dev")]
        user: String,
    },

    /// Pull new transactions and balances from linked banks
    Sync {
        /// Sync a single connection instead of all linked connections
        #[arg(short, long)]
        connection: Option<i64>,

        /// User whose connections to sync
        #[arg(short, long, default_value = "local-dev")]
        user: String,
    },

    /// Detect recurring subscriptions from synced history
    Detect {
        /// User whose transactions to scan
        #[arg(short, long, default_value = "local-dev")]
        user: String,
    },

    /// List detected subscriptions with monthly cost rollup
    Subscriptions {
        /// User whose subscriptions to list
        #[arg(short, long, default_value = "local-dev")]
        user: String,
    },
}
