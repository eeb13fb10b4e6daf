//! API key management handlers. All routes require a session token.
//!
//! - POST /keys - issue a key; the secret is shown once
//! - GET /keys - list the caller's keys
//! - GET /keys/:id/usage - usage over the last 30 days
//! - DELETE /keys/:id - revoke

use crate::{
    error::AppError,
    middleware::auth::CurrentUser,
    models::{
        api_key::{ApiKeyResponse, IssueKeyRequest},
        usage::UsageSummary,
    },
    services::{key_registry, usage_ledger},
    state::AppState,
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State, rejection::PathRejection},
    http::StatusCode,
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

/// Window reported by the usage endpoint.
const USAGE_WINDOW_DAYS: i64 = 30;

/// Issue a new API key.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "CI pipeline",
///   "permissions": { "useCaseApi": true, "reverseTransactionApi": false },
///   "rateLimit": { "requestsPerHour": 500 }
/// }
/// ```
///
/// # Response (201)
///
/// The key record including `key`, the plaintext secret. It is not
/// retrievable afterwards.
pub async fn issue_key(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiKeyResponse>), AppError> {
    // An empty body issues a key with every default.
    let request = if body.is_empty() {
        IssueKeyRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidRequest(format!("Invalid request body: {e}")))?
    };

    let (key, secret) = key_registry::issue(&state.pool, user.user_id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyResponse::from(key).with_secret(secret)),
    ))
}

/// List the caller's keys, revoked ones included. Secrets are never returned.
pub async fn list_keys(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ApiKeyResponse>>, AppError> {
    let keys = key_registry::list_for_user(&state.pool, user.user_id).await?;

    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

/// Usage tallies for one of the caller's keys over the trailing 30 days.
///
/// # Response (200)
///
/// ```json
/// {
///   "total": 5,
///   "byEndpoint": { "useCase": 3, "multiAgent": 2 },
///   "byDay": { "2025-12-20": 5 }
/// }
/// ```
pub async fn key_usage(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    key_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<UsageSummary>, AppError> {
    let Path(key_id) = key_id?;

    let key = key_registry::get_owned(&state.pool, user.user_id, key_id).await?;
    let since = Utc::now() - Duration::days(USAGE_WINDOW_DAYS);
    let summary = usage_ledger::aggregate(&state.pool, key.id, since).await?;

    Ok(Json(summary))
}

/// Revoke one of the caller's keys. Requests made with it fail with 401 from now on.
pub async fn revoke_key(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    key_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let Path(key_id) = key_id?;

    key_registry::revoke(&state.pool, user.user_id, key_id).await?;

    Ok(Json(json!({ "message": "API key revoked" })))
}
