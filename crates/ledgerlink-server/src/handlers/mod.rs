//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod accounts;
pub mod connections;
pub mod institutions;
pub mod insights;
pub mod subscriptions;
pub mod transactions;

// Re-export all handlers for use in router
pub use accounts::*;
pub use connections::*;
pub use institutions::*;
pub use insights::*;
pub use subscriptions::*;
pub use transactions::*;
