//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (multipart form, JSON body, URL params)
//! 2. Delegates to a service
//! 3. Returns HTTP response (JSON, status code)

/// Signed document downloads
pub mod downloads;
/// Use-case, reverse-transaction and multi-agent endpoints
pub mod gateway;
pub mod health;
/// API key management
pub mod keys;
/// Transaction history
pub mod transactions;
