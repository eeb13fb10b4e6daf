//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They own the database queries, the upstream calls and the file system.

pub mod ai_client;
pub mod document_store;
pub mod gateway;
pub mod key_registry;
pub mod rate_limiter;
pub mod session;
pub mod transaction_service;
pub mod usage_ledger;
