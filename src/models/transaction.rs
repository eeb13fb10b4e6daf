//! Transaction data models and API request/response types.
//!
//! A transaction tracks one AI-processing request from creation to its
//! terminal outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::endpoint::Endpoint;

/// Lifecycle of a transaction.
///
/// `pending → processing → completed | failed`. The terminal update happens once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown transaction status: {0}")]
pub struct UnknownStatus(pub String);

/// Decodes the text column.
impl TryFrom<String> for TransactionStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            _ => Err(UnknownStatus(value)),
        }
    }
}

/// Represents a transaction record from the database.
///
/// # Database Table
///
/// Maps to the `transactions` table. `transaction_type` and `status` are text
/// columns constrained to the values of [`Endpoint`] and [`TransactionStatus`],
/// decoded into those types.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,

    pub user_id: Uuid,

    pub api_key_id: Uuid,

    #[sqlx(try_from = "String")]
    pub transaction_type: Endpoint,

    pub input_text: Option<String>,

    /// Stored upload, for document endpoints
    pub input_document_path: Option<String>,

    /// Stored result document, for document endpoints
    pub output_document_path: Option<String>,

    /// Inline result, for the multi-agent endpoint
    pub output_text: Option<String>,

    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,

    pub created_at: DateTime<Utc>,

    /// Set together with a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// File name of the stored result document, the part a download link signs.
    pub fn output_file_name(&self) -> Option<&str> {
        self.output_document_path
            .as_deref()
            .and_then(|path| Path::new(path).file_name())
            .and_then(|name| name.to_str())
    }
}

/// What a successful call produced.
///
/// Only the stored path is kept for a document. Download links expire, so
/// they are signed again whenever the transaction is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutput {
    Document { path: String },
    Text(String),
}

/// Query parameters for `GET /transactions`.
#[derive(Debug, Default, Deserialize)]
pub struct ListTransactionsQuery {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    #[serde(rename = "type")]
    pub transaction_type: Option<Endpoint>,
}

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

impl ListTransactionsQuery {
    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }
}

/// Response returned for transaction lookups.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: Endpoint,
    pub api_key_id: Uuid,
    pub input_text: Option<String>,
    pub output_text: Option<String>,
    pub download_url: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionResponse {
    /// Server-side file paths stay internal; `download_url` is a freshly signed
    /// link to the output document, if there is one.
    pub fn new(transaction: Transaction, download_url: Option<String>) -> Self {
        Self {
            id: transaction.id,
            transaction_type: transaction.transaction_type,
            api_key_id: transaction.api_key_id,
            input_text: transaction.input_text,
            output_text: transaction.output_text,
            download_url,
            status: transaction.status,
            created_at: transaction.created_at,
            completed_at: transaction.completed_at,
        }
    }
}

/// Page of transactions plus the total matching count.
#[derive(Debug, Serialize)]
pub struct TransactionList {
    pub count: i64,
    pub data: Vec<TransactionResponse>,
}

/// JSON body of `POST /multi-agent`.
#[derive(Debug, Deserialize)]
pub struct MultiAgentRequest {
    pub text: Option<String>,
}

/// Reply to a document endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub download_url: String,
    pub transaction_id: Uuid,
}

/// Reply to `POST /multi-agent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAgentResponse {
    pub response: String,
    pub transaction_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults_and_clamping() {
        let query = ListTransactionsQuery::default();
        assert_eq!(query.limit(), 10);
        assert_eq!(query.skip(), 0);

        let query = ListTransactionsQuery {
            limit: Some(10_000),
            skip: Some(-3),
            transaction_type: None,
        };
        assert_eq!(query.limit(), MAX_PAGE_SIZE);
        assert_eq!(query.skip(), 0);

        let query = ListTransactionsQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(query.limit(), 1);
    }

    #[test]
    fn test_status_decodes_from_column() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Processing,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
        ] {
            let decoded = TransactionStatus::try_from(status.as_str().to_string()).unwrap();
            assert_eq!(decoded, status);
        }
        assert!(TransactionStatus::try_from("done".to_string()).is_err());
    }

    #[test]
    fn test_response_shape() {
        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            api_key_id: Uuid::new_v4(),
            transaction_type: Endpoint::UseCase,
            input_text: Some("summarize".to_string()),
            input_document_path: Some("uploads/a.pdf".to_string()),
            output_document_path: Some("downloads/usecase_a.pdf".to_string()),
            output_text: None,
            status: TransactionStatus::Completed,
            created_at: now,
            completed_at: Some(now),
        };
        assert_eq!(transaction.output_file_name(), Some("usecase_a.pdf"));

        let link = Some("http://localhost/downloads/usecase_a.pdf?expires=1".to_string());
        let json = serde_json::to_value(TransactionResponse::new(transaction, link)).unwrap();
        assert_eq!(json["type"], "useCase");
        assert_eq!(json["status"], "completed");
        assert!(json.get("inputDocumentPath").is_none());
        assert!(json.get("outputDocumentPath").is_none());
        assert!(json["downloadUrl"].is_string());
    }
}
