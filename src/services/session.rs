//! Session tokens (HS256 JWTs) carrying the caller's user id.

use jsonwebtoken::{DecodingKey, Validation, decode};
#[cfg(test)]
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: Uuid,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// Verifies session tokens with the process-wide secret.
///
/// Tokens are minted by the account service that shares `JWT_SECRET`.
pub struct SessionKeys {
    decoding_key: DecodingKey,
    #[cfg(test)]
    encoding_key: EncodingKey,
}

impl SessionKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            #[cfg(test)]
            encoding_key: EncodingKey::from_secret(secret),
        }
    }

    /// Mint a token for `user_id` valid for `ttl`, in the account service's format.
    #[cfg(test)]
    pub fn issue(&self, user_id: Uuid, ttl: chrono::Duration) -> Result<String, AppError> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user_id,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "Failed to encode session token");
            AppError::Unauthenticated("Could not issue session token")
        })
    }

    /// Validate signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AppError::Unauthenticated("Token expired")
                }
                _ => AppError::Unauthenticated("Invalid token"),
            })
    }
}

/// Extract the token from an `Authorization` header value.
///
/// Expects format: "Bearer <token>"
pub fn extract_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let keys = SessionKeys::new(b"a-test-secret-of-reasonable-length");
        let user_id = Uuid::new_v4();

        let token = keys.issue(user_id, chrono::Duration::hours(1)).unwrap();
        let claims = keys.verify(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let ours = SessionKeys::new(b"our-secret-our-secret-our-secret");
        let theirs = SessionKeys::new(b"their-secret-their-secret-theirs");

        let token = theirs.issue(Uuid::new_v4(), chrono::Duration::hours(1)).unwrap();
        assert!(matches!(
            ours.verify(&token),
            Err(AppError::Unauthenticated("Invalid token"))
        ));
    }

    #[test]
    fn test_rejects_expired_token() {
        let keys = SessionKeys::new(b"a-test-secret-of-reasonable-length");
        // Past the default 60 second leeway.
        let token = keys
            .issue(Uuid::new_v4(), chrono::Duration::minutes(-5))
            .unwrap();
        assert!(matches!(
            keys.verify(&token),
            Err(AppError::Unauthenticated("Token expired"))
        ));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer("bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("abc123"), None);
    }
}
