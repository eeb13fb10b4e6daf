//! Key registry - issuance, lookup and revocation of API keys.
//!
//! Secrets are 32 random bytes, hex-encoded. Only their SHA-256 digest is
//! persisted; the plaintext is handed back once, at issuance.

use crate::{
    db::DbPool,
    error::AppError,
    models::api_key::{ApiKey, IssueKeyRequest},
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const KEY_COLUMNS: &str = "id, user_id, name, key_hash, key_prefix, is_active, \
     use_case_enabled, reverse_transaction_enabled, multi_agent_enabled, \
     requests_per_hour, created_at, last_used_at";

/// Characters of the secret kept for display.
const PREFIX_LEN: usize = 8;

/// Generate a cryptographically secure API key secret.
///
/// # Output
///
/// 64 hex characters (32 random bytes, 256 bits of entropy)
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// SHA-256 digest of a secret, hex-encoded.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Issue a new API key for `user_id`.
///
/// # Process
///
/// 1. Validate the requested rate limit
/// 2. Generate a fresh secret and hash it
/// 3. Insert the key with defaulted name, permissions and rate limit
/// 4. Return the stored row and the plaintext secret
///
/// # Defaults
///
/// - name: "API Key"
/// - permissions: every endpoint enabled
/// - rate limit: 100 requests per hour
pub async fn issue(
    pool: &DbPool,
    user_id: Uuid,
    request: IssueKeyRequest,
) -> Result<(ApiKey, String), AppError> {
    let permissions = request.permissions.unwrap_or_default();
    let rate_limit = request.rate_limit.unwrap_or_default();

    if rate_limit.requests_per_hour < 1 {
        return Err(AppError::InvalidRequest(
            "rateLimit.requestsPerHour must be at least 1".to_string(),
        ));
    }

    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "API Key".to_string());

    let secret = generate_secret();
    let key_hash = hash_secret(&secret);

    let key = sqlx::query_as::<_, ApiKey>(&format!(
        r#"
        INSERT INTO api_keys (
            user_id,
            name,
            key_hash,
            key_prefix,
            use_case_enabled,
            reverse_transaction_enabled,
            multi_agent_enabled,
            requests_per_hour
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {KEY_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&name)
    .bind(&key_hash)
    .bind(&secret[..PREFIX_LEN])
    .bind(permissions.use_case_api)
    .bind(permissions.reverse_transaction_api)
    .bind(permissions.multi_agent_api)
    .bind(rate_limit.requests_per_hour)
    .fetch_one(pool)
    .await?;

    tracing::info!(api_key_id = %key.id, user_id = %user_id, "API key issued");

    Ok((key, secret))
}

/// Find an active key by its plaintext secret.
///
/// Revoked keys are indistinguishable from unknown ones.
pub async fn lookup(pool: &DbPool, secret: &str) -> Result<Option<ApiKey>, AppError> {
    let key = sqlx::query_as::<_, ApiKey>(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE key_hash = $1 AND is_active = true"
    ))
    .bind(hash_secret(secret))
    .fetch_optional(pool)
    .await?;

    Ok(key)
}

/// Record that a key was just used.
///
/// Failures are logged and swallowed; they never fail the request.
pub async fn touch_last_used(pool: &DbPool, api_key_id: Uuid) {
    let result = sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
        .bind(api_key_id)
        .execute(pool)
        .await;

    if let Err(e) = result {
        tracing::warn!(api_key_id = %api_key_id, error = %e, "Failed to update last_used_at");
    }
}

/// Deactivate a key owned by `user_id` (soft delete).
///
/// # Security
///
/// - Verifies ownership; a foreign key id answers `NotFound`
/// - The row is kept so usage history stays joinable
pub async fn revoke(pool: &DbPool, user_id: Uuid, api_key_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE api_keys SET is_active = false WHERE id = $1 AND user_id = $2")
        .bind(api_key_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("API key not found"));
    }

    tracing::info!(api_key_id = %api_key_id, user_id = %user_id, "API key revoked");
    Ok(())
}

/// All keys of a user, active or not, newest first.
pub async fn list_for_user(pool: &DbPool, user_id: Uuid) -> Result<Vec<ApiKey>, AppError> {
    let keys = sqlx::query_as::<_, ApiKey>(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(keys)
}

/// A key by id, only if `user_id` owns it. Revoked keys are included.
pub async fn get_owned(
    pool: &DbPool,
    user_id: Uuid,
    api_key_id: Uuid,
) -> Result<ApiKey, AppError> {
    sqlx::query_as::<_, ApiKey>(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE id = $1 AND user_id = $2"
    ))
    .bind(api_key_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("API key not found"))
}
