//! Gateway orchestration for the three AI endpoints.
//!
//! # Request Flow
//!
//! 1. Permission check for the endpoint (403)
//! 2. Rate limit admission (429)
//! 3. Transaction created `pending`, moved to `processing`
//! 4. One upstream call
//! 5. Terminal update: `completed` with output, or `failed`
//! 6. One usage record, successful or not
//!
//! The admission is released only after step 6, so the ledger and the
//! limiter never disagree about an in-flight request.

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        api_key::ApiKey,
        endpoint::Endpoint,
        transaction::{Transaction, TransactionOutput},
        usage::NewUsageRecord,
    },
    services::{
        ai_client::AiClient,
        document_store::{DocumentStore, StoredDocument},
        rate_limiter::{Admission, RateLimiter, UsageCounter},
        transaction_service, usage_ledger,
    },
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Persistence the gateway writes to: transaction lifecycle and the usage ledger.
///
/// Implemented for the database pool; tests supply an in-memory store.
pub trait GatewayStore: UsageCounter + Send + Sync {
    fn create_pending(
        &self,
        key: &ApiKey,
        endpoint: Endpoint,
        input_text: Option<&str>,
        input_document_path: Option<&str>,
    ) -> impl Future<Output = Result<Transaction, AppError>> + Send;

    fn mark_processing(
        &self,
        transaction_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn complete(
        &self,
        transaction_id: Uuid,
        output: TransactionOutput,
    ) -> impl Future<Output = Result<Transaction, AppError>> + Send;

    fn fail(&self, transaction_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    fn record_usage(
        &self,
        event: NewUsageRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

impl GatewayStore for DbPool {
    fn create_pending(
        &self,
        key: &ApiKey,
        endpoint: Endpoint,
        input_text: Option<&str>,
        input_document_path: Option<&str>,
    ) -> impl Future<Output = Result<Transaction, AppError>> + Send {
        transaction_service::create_pending(
            self,
            key.user_id,
            key.id,
            endpoint,
            input_text,
            input_document_path,
        )
    }

    fn mark_processing(
        &self,
        transaction_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send {
        transaction_service::mark_processing(self, transaction_id)
    }

    fn complete(
        &self,
        transaction_id: Uuid,
        output: TransactionOutput,
    ) -> impl Future<Output = Result<Transaction, AppError>> + Send {
        transaction_service::complete(self, transaction_id, output)
    }

    fn fail(&self, transaction_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send {
        transaction_service::fail(self, transaction_id)
    }

    fn record_usage(
        &self,
        event: NewUsageRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send {
        async move {
            usage_ledger::record(self, event).await?;
            Ok(())
        }
    }
}

/// Validated input of a document endpoint. The upload is already on disk.
#[derive(Debug)]
pub struct DocumentInput {
    pub text: String,
    pub document: StoredDocument,
    /// Client-supplied file name, forwarded upstream
    pub original_name: String,
}

/// Sizes reported to the usage ledger, in bytes.
#[derive(Debug, Clone, Copy, Default)]
struct CallSizes {
    request: i64,
    response: i64,
    document: i64,
}

pub struct Gateway<S = DbPool> {
    store: S,
    ai: AiClient,
    documents: Arc<DocumentStore>,
    limiter: RateLimiter,
}

impl<S: GatewayStore> Gateway<S> {
    pub fn new(
        store: S,
        ai: AiClient,
        documents: Arc<DocumentStore>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            store,
            ai,
            documents,
            limiter,
        }
    }

    /// Permission then rate limit. Nothing is recorded for a rejected request.
    pub async fn admit(&self, key: &ApiKey, endpoint: Endpoint) -> Result<Admission, AppError> {
        if !key.allows(endpoint) {
            tracing::warn!(
                api_key_id = %key.id,
                endpoint = %endpoint,
                "API key lacks permission for endpoint"
            );
            return Err(AppError::Forbidden);
        }

        self.limiter.check_and_admit(&self.store, key).await
    }

    /// Run a document endpoint for an admitted request.
    pub async fn process_document(
        &self,
        key: &ApiKey,
        endpoint: Endpoint,
        admission: Admission,
        input: DocumentInput,
    ) -> Result<Transaction, AppError> {
        let started = Instant::now();
        let document = input.document.size as i64;
        let mut sizes = CallSizes {
            request: input.text.len() as i64 + document,
            response: 0,
            document,
        };

        let result = self.run_document(key, endpoint, &input).await;
        if let Ok((_, output)) = &result {
            sizes.response = output.size as i64;
        }

        let event = usage_event(key, endpoint, started, sizes, result.as_ref().err());
        self.record_usage(event).await;
        drop(admission);

        result.map(|(transaction, _)| transaction)
    }

    /// Run the multi-agent endpoint for an admitted request.
    pub async fn multi_agent(
        &self,
        key: &ApiKey,
        admission: Admission,
        text: String,
    ) -> Result<Transaction, AppError> {
        let started = Instant::now();
        let mut sizes = CallSizes {
            request: text.len() as i64,
            ..Default::default()
        };

        let result = self.run_multi_agent(key, &text).await;
        if let Ok(transaction) = &result {
            sizes.response = transaction.output_text.as_deref().map_or(0, str::len) as i64;
        }

        let error = result.as_ref().err();
        let event = usage_event(key, Endpoint::MultiAgent, started, sizes, error);
        self.record_usage(event).await;
        drop(admission);

        result
    }

    async fn run_document(
        &self,
        key: &ApiKey,
        endpoint: Endpoint,
        input: &DocumentInput,
    ) -> Result<(Transaction, StoredDocument), AppError> {
        let input_path = input.document.path_string();
        let transaction = self
            .store
            .create_pending(key, endpoint, Some(input.text.as_str()), Some(input_path.as_str()))
            .await?;

        let outcome = async {
            self.store.mark_processing(transaction.id).await?;

            let output = self
                .ai
                .process_document(
                    endpoint,
                    &input.text,
                    &input.document,
                    &input.original_name,
                    &self.documents,
                )
                .await?;

            let path = output.path_string();
            let completed = self
                .store
                .complete(transaction.id, TransactionOutput::Document { path })
                .await?;

            Ok::<_, AppError>((completed, output))
        }
        .await;

        match &outcome {
            Ok(_) => tracing::info!(
                transaction_id = %transaction.id,
                endpoint = %endpoint,
                "Transaction completed"
            ),
            Err(_) => self.mark_failed(transaction.id).await,
        }

        outcome
    }

    async fn run_multi_agent(&self, key: &ApiKey, text: &str) -> Result<Transaction, AppError> {
        let transaction = self
            .store
            .create_pending(key, Endpoint::MultiAgent, Some(text), None)
            .await?;

        let outcome = async {
            self.store.mark_processing(transaction.id).await?;
            let reply = self.ai.multi_agent(text).await?;
            let output = TransactionOutput::Text(reply);
            self.store.complete(transaction.id, output).await
        }
        .await;

        match &outcome {
            Ok(_) => tracing::info!(
                transaction_id = %transaction.id,
                endpoint = %Endpoint::MultiAgent,
                "Transaction completed"
            ),
            Err(_) => self.mark_failed(transaction.id).await,
        }

        outcome
    }

    async fn mark_failed(&self, transaction_id: Uuid) {
        tracing::warn!(transaction_id = %transaction_id, "Transaction failed");
        if let Err(e) = self.store.fail(transaction_id).await {
            tracing::error!(
                transaction_id = %transaction_id,
                error = %e,
                "Failed to mark transaction as failed"
            );
        }
    }

    /// A ledger write failure is logged; the caller still gets the call's outcome.
    async fn record_usage(&self, event: NewUsageRecord) {
        let api_key_id = event.api_key_id;
        if let Err(e) = self.store.record_usage(event).await {
            tracing::error!(api_key_id = %api_key_id, error = %e, "Failed to record usage");
        }
    }
}

fn usage_event(
    key: &ApiKey,
    endpoint: Endpoint,
    started: Instant,
    sizes: CallSizes,
    error: Option<&AppError>,
) -> NewUsageRecord {
    NewUsageRecord {
        user_id: key.user_id,
        api_key_id: key.id,
        endpoint,
        request_size: sizes.request,
        response_size: sizes.response,
        document_size: sizes.document,
        processing_time_ms: started.elapsed().as_millis() as i64,
        successful: error.is_none(),
        error: error.map(ToString::to_string),
    }
}
