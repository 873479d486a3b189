//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Core commands (init, detect, subscriptions) and shared utilities (open_db)
//! - `serve` - Web server command
//! - `status` - Status and listing commands (status, connections, accounts)
//! - `sync` - Sync commands pulling data through the aggregator

pub mod core;
pub mod serve;
pub mod status;
pub mod sync;

// Re-export command functions for main.rs
pub use core::*;
pub use serve::*;
pub use status::*;
pub use sync::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
