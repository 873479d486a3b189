//! LedgerLink CLI - Bank aggregation service
//!
//! Usage:
//!   ledgerlink init                 Initialize database
//!   ledgerlink serve --port 3000    Start web server
//!   ledgerlink sync                 Pull new transactions from linked banks
//!   ledgerlink detect               Detect recurring subscriptions

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt),
        Commands::Serve {
            port,
            host,
            no_auth,
        } => commands::cmd_serve(&cli.db, &host, port, no_auth, cli.no_encrypt).await,
        Commands::Connections { user } => commands::cmd_connections(&cli.db, &user, cli.no_encrypt),
        Commands::Accounts { user } => commands::cmd_accounts(&cli.db, &user, cli.no_encrypt),
        Commands::Sync { connection, user } => {
            commands::cmd_sync(&cli.db, connection, &user, cli.no_encrypt).await
        }
        Commands::Detect { user } => commands::cmd_detect(&cli.db, &user, cli.no_encrypt),
        Commands::Subscriptions { user } => {
            commands::cmd_subscriptions(&cli.db, &user, cli.no_encrypt)
        }
    }
}
