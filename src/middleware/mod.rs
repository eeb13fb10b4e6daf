//! HTTP middleware components.
//!
//! Middleware run before route handlers. They authenticate requests and
//! short-circuit the ones that must be rejected.

/// API key and session authentication
pub mod auth;
/// Per-IP request cap
pub mod ip_limit;
