//! Transaction HTTP handlers.
//!
//! - GET /transactions - the caller's transactions, newest first
//! - GET /transactions/:id - one transaction owned by the caller

use crate::{
    error::AppError,
    middleware::auth::CurrentUser,
    models::transaction::{
        ListTransactionsQuery, Transaction, TransactionList, TransactionResponse,
    },
    services::{document_store::DocumentStore, transaction_service},
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
};
use uuid::Uuid;

/// List the caller's transactions.
///
/// Accepts an API key or a session token.
///
/// # Query Parameters
///
/// - `limit`: page size, default 10, clamped to 1..=100
/// - `skip`: rows to skip, default 0
/// - `type`: `useCase`, `reverseTransaction` or `multiAgent`
///
/// # Response (200)
///
/// `downloadUrl` is signed at request time, so it is valid for the configured
/// link lifetime from now however old the transaction is.
///
/// ```json
/// {
///   "count": 42,
///   "data": [{ "id": "...", "type": "useCase", "status": "completed", ... }]
/// }
/// ```
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    query: Result<Query<ListTransactionsQuery>, QueryRejection>,
) -> Result<Json<TransactionList>, AppError> {
    let Query(query) = query?;

    let (transactions, count) =
        transaction_service::list_for_user(&state.pool, user.user_id, &query).await?;

    Ok(Json(TransactionList {
        count,
        data: transactions
            .into_iter()
            .map(|t| to_response(&state.documents, t))
            .collect(),
    }))
}

/// Get a single transaction.
///
/// # Security
///
/// Only transactions owned by the session's user are returned. Foreign and
/// malformed ids both answer 404.
pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    transaction_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<TransactionResponse>, AppError> {
    let Path(transaction_id) = transaction_id?;

    let transaction =
        transaction_service::get_for_user(&state.pool, user.user_id, transaction_id).await?;

    Ok(Json(to_response(&state.documents, transaction)))
}

/// Output documents get a link signed now; stored transactions never carry one.
fn to_response(documents: &DocumentStore, transaction: Transaction) -> TransactionResponse {
    let download_url = documents.transaction_link(&transaction);
    TransactionResponse::new(transaction, download_url)
}
