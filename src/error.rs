//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Authentication**: missing or invalid API key / session token (401)
/// - **Authorization**: API key lacks the endpoint permission (403)
/// - **Throttling**: per-key or per-IP limit exceeded (429)
/// - **Validation**: missing inputs, bad file types, oversized uploads (400)
/// - **Resource**: unknown or foreign ids (404)
/// - **Upstream / Storage / Database**: answered with a generic 500, detail logged only
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Some store errors are normalized in `into_response`: missing rows and
    /// malformed ids become 404, unique and check violations become 400.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Credential missing, malformed, expired, revoked or unknown.
    #[error("{0}")]
    Unauthenticated(&'static str),

    /// The API key is valid but not enabled for this endpoint.
    #[error("API key does not have permission to access this endpoint")]
    Forbidden,

    /// The API key used up its hourly allowance.
    #[error("API rate limit exceeded. Please try again later.")]
    RateLimited,

    /// The caller's address hit the coarse per-IP cap.
    #[error("Too many requests from this IP, please try again later.")]
    IpRateLimited,

    /// Request body or parameters are invalid.
    ///
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Uploaded document exceeds the configured size cap.
    #[error("File size too large")]
    FileTooLarge,

    /// Requested resource does not exist or belongs to another user.
    #[error("{0}")]
    NotFound(&'static str),

    /// The external AI service failed, timed out or answered non-2xx.
    #[error("AI service error: {0}")]
    Upstream(String),

    /// Reading or writing a document on disk failed.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::FileTooLarge
        } else {
            AppError::InvalidRequest(err.body_text())
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::InvalidRequest(err.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(err: MultipartRejection) -> Self {
        AppError::InvalidRequest(err.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self {
        AppError::InvalidRequest(err.body_text())
    }
}

/// A malformed id in the path can never name an existing resource.
impl From<PathRejection> for AppError {
    fn from(_: PathRejection) -> Self {
        AppError::NotFound("Resource not found")
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Upstream(format!("request timed out: {err}"))
        } else {
            AppError::Upstream(err.to_string())
        }
    }
}

const GENERIC_FAILURE: &str = "Error processing your request. Please try again.";

/// Map store-level failures to the status the caller should see.
fn classify_database_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "not_found",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // unique_violation
            Some("23505") => (
                StatusCode::BAD_REQUEST,
                "duplicate_value",
                "Duplicate field value entered".to_string(),
            ),
            // check_violation, not_null_violation
            Some("23514") | Some("23502") => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                db_err.message().to_string(),
            ),
            // invalid_text_representation (malformed id)
            Some("22P02") => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Resource not found".to_string(),
            ),
            _ => internal(),
        },
        _ => internal(),
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "An internal error occurred".to_string(),
    )
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `Unauthenticated` → 401 Unauthorized
/// - `Forbidden` → 403 Forbidden
/// - `RateLimited`, `IpRateLimited` → 429 Too Many Requests
/// - `InvalidRequest`, `FileTooLarge` → 400 Bad Request
/// - `NotFound` → 404 Not Found
/// - `Upstream`, `Storage` → 500 (hides details from client)
/// - `Database` → see `classify_database_error`
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthenticated(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthenticated", msg.to_string())
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                self.to_string(),
            ),
            AppError::IpRateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "ip_rate_limited",
                self.to_string(),
            ),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::FileTooLarge => {
                (StatusCode::BAD_REQUEST, "file_too_large", self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.to_string()),
            AppError::Upstream(ref detail) => {
                tracing::error!(error = %detail, "AI service call failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "processing_failed",
                    GENERIC_FAILURE.to_string(),
                )
            }
            AppError::Storage(ref err) => {
                tracing::error!(error = %err, "document storage failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "processing_failed",
                    GENERIC_FAILURE.to_string(),
                )
            }
            AppError::Database(ref err) => {
                let classified = classify_database_error(err);
                if classified.0.is_server_error() {
                    tracing::error!(error = %err, "database error");
                }
                classified
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(AppError::Unauthenticated("API key is required")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(AppError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_of(AppError::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_of(AppError::IpRateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            status_of(AppError::InvalidRequest("Text input is required".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(AppError::FileTooLarge), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(AppError::NotFound("Transaction not found")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::Database(sqlx::Error::RowNotFound)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::Database(sqlx::Error::PoolTimedOut)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_upstream_detail_is_not_leaked() {
        let response = AppError::Upstream("connection refused at 10.0.0.7".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("10.0.0.7"));
        assert!(text.contains("processing_failed"));
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_invalid_request() {
        use axum::extract::{FromRequest, Multipart};

        let request = axum::http::Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{}"))
            .unwrap();

        let Err(rejection) = Multipart::from_request(request, &()).await else {
            panic!("a JSON body must not extract as multipart");
        };
        let err = AppError::from(rejection);
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }
}
