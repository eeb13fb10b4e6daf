//! Usage ledger records and aggregated statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::endpoint::Endpoint;

/// One immutable accounting entry per gateway call.
///
/// # Database Table
///
/// Maps to the append-only `usage_records` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub api_key_id: Uuid,
    #[sqlx(try_from = "String")]
    pub endpoint: Endpoint,
    pub request_size: i64,
    pub response_size: i64,
    pub document_size: i64,
    pub processing_time_ms: i64,
    pub successful: bool,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Values for a new ledger entry. The timestamp is assigned by the database.
#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub user_id: Uuid,
    pub api_key_id: Uuid,
    pub endpoint: Endpoint,
    pub request_size: i64,
    pub response_size: i64,
    pub document_size: i64,
    pub processing_time_ms: i64,
    pub successful: bool,
    pub error: Option<String>,
}

/// Usage tallies for one key over a window.
///
/// ```json
/// {
///   "total": 5,
///   "byEndpoint": { "useCase": 3, "multiAgent": 2 },
///   "byDay": { "2025-12-20": 5 }
/// }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total: u64,
    pub by_endpoint: BTreeMap<String, u64>,
    /// Keyed by UTC calendar date, `YYYY-MM-DD`
    pub by_day: BTreeMap<String, u64>,
}
