//! Signed download links for generated documents.
//!
//! - GET /downloads/:file?expires=<unix>&signature=<hex>

use crate::{error::AppError, services::document_store, state::AppState};
use axum::{
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// Stream a generated document.
///
/// Unknown files, tampered or expired links and missing parameters all
/// answer 404 so a link reveals nothing about other files.
pub async fn download(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    const NOT_FOUND: AppError = AppError::NotFound("Document not found");

    let Ok(Query(DownloadQuery {
        expires: Some(expires),
        signature: Some(signature),
    })) = query
    else {
        return Err(NOT_FOUND);
    };

    let path = state
        .documents
        .resolve_download(&file_name, expires, &signature, Utc::now())?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(NOT_FOUND),
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    let headers = [
        (
            header::CONTENT_TYPE,
            document_store::content_type_for(extension).to_string(),
        ),
        (header::CONTENT_LENGTH, size.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
    ];

    Ok((headers, Body::from_stream(document_store::read_chunks(file))).into_response())
}
