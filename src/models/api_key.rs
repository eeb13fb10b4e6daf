//! API Key model for programmatic callers.
//!
//! API keys authenticate calls to the gateway endpoints. They are stored in the
//! database as SHA-256 hashes; the plaintext secret is only returned at issuance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::Endpoint;

/// Hourly allowance for keys issued without one, and for rows with no usable value.
pub const DEFAULT_REQUESTS_PER_HOUR: i32 = 100;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table. Rows are never deleted: revocation flips
/// `is_active` so usage records and transactions keep a valid key reference.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    /// Unique identifier for this API key
    pub id: Uuid,

    /// User who issued the key
    pub user_id: Uuid,

    /// Human-readable label
    pub name: String,

    /// SHA-256 hash of the secret (64 hex characters)
    ///
    /// When a request comes in with `X-API-Key: abc123`, we:
    /// 1. Hash "abc123" with SHA-256
    /// 2. Look up this hash in the database
    /// 3. If found and active, authenticate the request
    pub key_hash: String,

    /// First characters of the secret, safe to display
    pub key_prefix: String,

    /// Inactive keys are rejected during authentication.
    pub is_active: bool,

    pub use_case_enabled: bool,
    pub reverse_transaction_enabled: bool,
    pub multi_agent_enabled: bool,

    /// Hourly request allowance; see [`ApiKey::requests_per_hour`]
    pub requests_per_hour: Option<i32>,

    pub created_at: DateTime<Utc>,

    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Whether this key may call `endpoint`.
    pub fn allows(&self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::UseCase => self.use_case_enabled,
            Endpoint::ReverseTransaction => self.reverse_transaction_enabled,
            Endpoint::MultiAgent => self.multi_agent_enabled,
        }
    }

    /// Effective hourly limit. Missing or non-positive values fall back to the default
    /// so a misconfigured key is throttled rather than unlimited.
    pub fn requests_per_hour(&self) -> i64 {
        match self.requests_per_hour {
            Some(n) if n > 0 => i64::from(n),
            _ => i64::from(DEFAULT_REQUESTS_PER_HOUR),
        }
    }

    pub fn permissions(&self) -> Permissions {
        Permissions {
            use_case_api: self.use_case_enabled,
            reverse_transaction_api: self.reverse_transaction_enabled,
            multi_agent_api: self.multi_agent_enabled,
        }
    }
}

/// Per-endpoint permission flags.
///
/// Every flag defaults to enabled, both when the whole object is omitted and
/// when a single flag is missing from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default = "enabled")]
    pub use_case_api: bool,
    #[serde(default = "enabled")]
    pub reverse_transaction_api: bool,
    #[serde(default = "enabled")]
    pub multi_agent_api: bool,
}

fn enabled() -> bool {
    true
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            use_case_api: true,
            reverse_transaction_api: true,
            multi_agent_api: true,
        }
    }
}

/// Rate-limit configuration attached to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub requests_per_hour: i32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour: DEFAULT_REQUESTS_PER_HOUR,
        }
    }
}

/// Request body for `POST /keys`.
///
/// ```json
/// {
///   "name": "CI pipeline",
///   "permissions": { "useCaseApi": true, "reverseTransactionApi": false, "multiAgentApi": true },
///   "rateLimit": { "requestsPerHour": 500 }
/// }
/// ```
///
/// Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueKeyRequest {
    pub name: Option<String>,
    pub permissions: Option<Permissions>,
    pub rate_limit: Option<RateLimitConfig>,
}

/// API key as shown to its owner.
///
/// `key` carries the plaintext secret only in the issuance response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub key_prefix: String,
    pub active: bool,
    pub permissions: Permissions,
    pub rate_limit: RateLimitConfig,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            permissions: key.permissions(),
            rate_limit: RateLimitConfig {
                requests_per_hour: key.requests_per_hour() as i32,
            },
            name: key.name,
            key: None,
            key_prefix: key.key_prefix,
            active: key.is_active,
            created_at: key.created_at,
            last_used_at: key.last_used_at,
        }
    }
}

impl ApiKeyResponse {
    /// Include the plaintext secret (issuance only).
    pub fn with_secret(mut self, secret: String) -> Self {
        self.key = Some(secret);
        self
    }
}

#[cfg(test)]
pub(crate) fn sample_key(requests_per_hour: Option<i32>) -> ApiKey {
    ApiKey {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        name: "API Key".to_string(),
        key_hash: "0".repeat(64),
        key_prefix: "00000000".to_string(),
        is_active: true,
        use_case_enabled: true,
        reverse_transaction_enabled: true,
        multi_agent_enabled: true,
        requests_per_hour,
        created_at: Utc::now(),
        last_used_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_or_invalid_limit_uses_default() {
        assert_eq!(sample_key(None).requests_per_hour(), 100);
        assert_eq!(sample_key(Some(0)).requests_per_hour(), 100);
        assert_eq!(sample_key(Some(-5)).requests_per_hour(), 100);
        assert_eq!(sample_key(Some(7)).requests_per_hour(), 7);
    }

    #[test]
    fn test_allows_follows_flags() {
        let mut key = sample_key(None);
        key.reverse_transaction_enabled = false;
        assert!(key.allows(Endpoint::UseCase));
        assert!(!key.allows(Endpoint::ReverseTransaction));
        assert!(key.allows(Endpoint::MultiAgent));
    }

    #[test]
    fn test_partial_permissions_default_to_enabled() {
        let parsed: Permissions = serde_json::from_str(r#"{"multiAgentApi": false}"#).unwrap();
        assert!(parsed.use_case_api);
        assert!(parsed.reverse_transaction_api);
        assert!(!parsed.multi_agent_api);
    }

    #[test]
    fn test_listing_response_has_no_secret() {
        let json = serde_json::to_value(ApiKeyResponse::from(sample_key(None))).unwrap();
        assert!(json.get("key").is_none());
        assert!(json.get("keyHash").is_none());
        assert_eq!(json["rateLimit"]["requestsPerHour"], 100);

        let issued = ApiKeyResponse::from(sample_key(None)).with_secret("abc".to_string());
        let json = serde_json::to_value(issued).unwrap();
        assert_eq!(json["key"], "abc");
    }
}
