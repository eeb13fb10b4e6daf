//! Gateway HTTP handlers for the AI endpoints.
//!
//! - POST /use-case - multipart `text` + `document`, returns a download link
//! - POST /reverse-transaction - same shape as `/use-case`
//! - POST /multi-agent - JSON `{"text": ...}`, returns the reply inline
//!
//! Every route here sits behind API-key authentication.

use crate::{
    error::AppError,
    middleware::auth::CurrentKey,
    models::{
        api_key::ApiKey,
        endpoint::Endpoint,
        transaction::{DocumentResponse, MultiAgentRequest, MultiAgentResponse},
    },
    services::{
        document_store::{DocumentStore, StoredDocument},
        gateway::DocumentInput,
        rate_limiter::Admission,
    },
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{
        Multipart, State,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
};

/// `X-RateLimit-Limit` and `X-RateLimit-Remaining`.
type RateLimitHeaders = [(&'static str, String); 2];

fn rate_limit_headers(admission: &Admission) -> RateLimitHeaders {
    [
        ("X-RateLimit-Limit", admission.limit().to_string()),
        ("X-RateLimit-Remaining", admission.remaining().to_string()),
    ]
}

/// Generate a use-case document from text plus a source document.
///
/// # Request (multipart/form-data)
///
/// - `text`: instructions for the model
/// - `document`: pdf, doc(x), txt, rtf, xls(x), csv, json, jpg or png, at most 10 MiB
///
/// # Response (200)
///
/// ```json
/// {
///   "downloadUrl": "http://localhost:3000/downloads/usecase_5f0c....pdf?expires=...&signature=...",
///   "transactionId": "770e8400-..."
/// }
/// ```
pub async fn use_case(
    State(state): State<AppState>,
    Extension(CurrentKey(key)): Extension<CurrentKey>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(RateLimitHeaders, Json<DocumentResponse>), AppError> {
    process_document(&state, &key, Endpoint::UseCase, multipart).await
}

/// Reverse-transaction processing. Same contract as [`use_case`].
pub async fn reverse_transaction(
    State(state): State<AppState>,
    Extension(CurrentKey(key)): Extension<CurrentKey>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(RateLimitHeaders, Json<DocumentResponse>), AppError> {
    process_document(&state, &key, Endpoint::ReverseTransaction, multipart).await
}

/// Multi-agent text processing.
///
/// # Request Body
///
/// ```json
/// { "text": "Plan a product launch" }
/// ```
///
/// # Response (200)
///
/// ```json
/// { "response": "...", "transactionId": "770e8400-..." }
/// ```
pub async fn multi_agent(
    State(state): State<AppState>,
    Extension(CurrentKey(key)): Extension<CurrentKey>,
    payload: Result<Json<MultiAgentRequest>, JsonRejection>,
) -> Result<(RateLimitHeaders, Json<MultiAgentResponse>), AppError> {
    let admission = state.gateway.admit(&key, Endpoint::MultiAgent).await?;

    let Json(request) = payload?;
    let text = request
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest("Text input is required".to_string()))?;

    let headers = rate_limit_headers(&admission);
    let transaction = state.gateway.multi_agent(&key, admission, text).await?;

    Ok((
        headers,
        Json(MultiAgentResponse {
            response: transaction.output_text.unwrap_or_default(),
            transaction_id: transaction.id,
        }),
    ))
}

async fn process_document(
    state: &AppState,
    key: &ApiKey,
    endpoint: Endpoint,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(RateLimitHeaders, Json<DocumentResponse>), AppError> {
    // Permission and allowance are checked before the body is read.
    let admission = state.gateway.admit(key, endpoint).await?;
    let input = read_document_form(&state.documents, multipart?).await?;

    let headers = rate_limit_headers(&admission);
    let transaction = state
        .gateway
        .process_document(key, endpoint, admission, input)
        .await?;

    let download_url = state.documents.transaction_link(&transaction).ok_or_else(|| {
        AppError::Upstream("completed transaction has no output document".to_string())
    })?;

    Ok((
        headers,
        Json(DocumentResponse {
            download_url,
            transaction_id: transaction.id,
        }),
    ))
}

/// Read `text` and stream `document` to disk.
///
/// On any validation failure the stored upload is removed again.
async fn read_document_form(
    documents: &DocumentStore,
    mut multipart: Multipart,
) -> Result<DocumentInput, AppError> {
    let mut text: Option<String> = None;
    let mut upload: Option<(StoredDocument, String)> = None;

    let parsed = async {
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("text") => text = Some(field.text().await?),
                Some("document") => {
                    if upload.is_some() {
                        return Err(AppError::InvalidRequest(
                            "Only one document may be uploaded".to_string(),
                        ));
                    }
                    let Some(original_name) = field.file_name().map(str::to_string) else {
                        return Err(AppError::InvalidRequest(
                            "Document file is required".to_string(),
                        ));
                    };
                    let content_type = field.content_type().map(str::to_string);

                    let stored = documents
                        .save_upload(&original_name, content_type.as_deref(), field)
                        .await?;
                    upload = Some((stored, original_name));
                }
                _ => {}
            }
        }
        Ok::<(), AppError>(())
    }
    .await;

    let text = text.filter(|t| !t.trim().is_empty());
    match (parsed, text, upload) {
        (Ok(()), Some(text), Some((document, original_name))) => Ok(DocumentInput {
            text,
            document,
            original_name,
        }),
        (parsed, text, upload) => {
            if let Some((document, _)) = upload {
                documents.remove(&document.path).await;
            }
            parsed?;
            let message = if text.is_none() {
                "Text input is required"
            } else {
                "Document file is required"
            };
            Err(AppError::InvalidRequest(message.to_string()))
        }
    }
}
