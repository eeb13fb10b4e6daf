//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the request and response bodies built from them.

/// API key model
pub mod api_key;
/// Gateway endpoint names
pub mod endpoint;
/// AI-processing transaction model
pub mod transaction;
/// Usage ledger model
pub mod usage;
