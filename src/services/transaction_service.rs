//! Transaction service - lifecycle and queries for AI-processing transactions.
//!
//! This service handles:
//! - Creating transactions in `pending` state at request start
//! - Moving them to `processing` before the upstream call
//! - The single terminal update (`completed` with output, or `failed`)
//! - Owner-scoped lookups and paginated listing

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        endpoint::Endpoint,
        transaction::{ListTransactionsQuery, Transaction, TransactionOutput, TransactionStatus},
    },
};
use uuid::Uuid;

/// Create a transaction in `pending` state.
pub async fn create_pending(
    pool: &DbPool,
    user_id: Uuid,
    api_key_id: Uuid,
    endpoint: Endpoint,
    input_text: Option<&str>,
    input_document_path: Option<&str>,
) -> Result<Transaction, AppError> {
    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            user_id,
            api_key_id,
            transaction_type,
            input_text,
            input_document_path,
            status
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(api_key_id)
    .bind(endpoint.as_str())
    .bind(input_text)
    .bind(input_document_path)
    .bind(TransactionStatus::Pending.as_str())
    .fetch_one(pool)
    .await?;

    Ok(transaction)
}

/// `pending → processing`, right before the upstream call.
pub async fn mark_processing(pool: &DbPool, transaction_id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE transactions SET status = $2 WHERE id = $1 AND status = $3")
        .bind(transaction_id)
        .bind(TransactionStatus::Processing.as_str())
        .bind(TransactionStatus::Pending.as_str())
        .execute(pool)
        .await?;

    Ok(())
}

/// Terminal success: store the output and set `completed_at`.
///
/// A document output fills `output_document_path`; a text output fills
/// `output_text`. Already-terminal rows are left untouched.
pub async fn complete(
    pool: &DbPool,
    transaction_id: Uuid,
    output: TransactionOutput,
) -> Result<Transaction, AppError> {
    let (document_path, text) = match output {
        TransactionOutput::Document { path } => (Some(path), None),
        TransactionOutput::Text(text) => (None, Some(text)),
    };

    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = $2,
            output_document_path = $3,
            output_text = $4,
            completed_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'processing')
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(TransactionStatus::Completed.as_str())
    .bind(document_path)
    .bind(text)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Transaction not found"))?;

    Ok(transaction)
}

/// Terminal failure. Already-terminal rows are left untouched.
pub async fn fail(pool: &DbPool, transaction_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE transactions
        SET status = $2,
            completed_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(transaction_id)
    .bind(TransactionStatus::Failed.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a transaction by ID, only if `user_id` owns it.
pub async fn get_for_user(
    pool: &DbPool,
    user_id: Uuid,
    transaction_id: Uuid,
) -> Result<Transaction, AppError> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1 AND user_id = $2")
        .bind(transaction_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Transaction not found"))
}

/// A page of a user's transactions, newest first, plus the total matching count.
pub async fn list_for_user(
    pool: &DbPool,
    user_id: Uuid,
    query: &ListTransactionsQuery,
) -> Result<(Vec<Transaction>, i64), AppError> {
    let kind = query.transaction_type.map(Endpoint::as_str);

    let transactions = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE user_id = $1
          AND ($2::TEXT IS NULL OR transaction_type = $2)
        ORDER BY created_at DESC, id DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(query.limit())
    .bind(query.skip())
    .fetch_all(pool)
    .await?;

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM transactions WHERE user_id = $1 AND ($2::TEXT IS NULL OR transaction_type = $2)",
    )
    .bind(user_id)
    .bind(kind)
    .fetch_one(pool)
    .await?;

    Ok((transactions, count))
}
