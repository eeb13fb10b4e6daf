//! Client for the external AI service.
//!
//! # Contract
//!
//! - `POST /use-case`, `POST /reverse-transaction`: multipart `text` + `document`
//!   in, binary document out
//! - `POST /multi-agent`: JSON `{"text": ...}` in, `{"response": ...}` out
//!
//! Every call carries `Authorization: Bearer <AI_API_KEY>`. One attempt per
//! request, bounded by the configured timeout; there are no retries.

use crate::{
    config::Config,
    error::AppError,
    models::endpoint::Endpoint,
    services::document_store::{self, DocumentStore, StoredDocument},
};
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Serialize)]
struct MultiAgentRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct MultiAgentResponse {
    response: String,
}

/// Shared HTTP client for the AI service. Cheap to clone.
#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl AiClient {
    pub fn new(base_url: Url, api_key: String, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Upstream(format!("HTTP client error: {e}")))?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.ai_base_url()?,
            config.ai_api_key.clone(),
            Duration::from_secs(config.ai_api_timeout_secs),
        )?)
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.upstream_path()
        )
    }

    /// Send text plus a stored document; stream the returned document into `store`.
    ///
    /// # Process
    ///
    /// 1. Open the upload and wrap it as a streamed multipart part
    /// 2. POST to the endpoint's path with the bearer credential
    /// 3. Reject non-2xx statuses
    /// 4. Stream the response body to the download directory
    pub async fn process_document(
        &self,
        endpoint: Endpoint,
        text: &str,
        document: &StoredDocument,
        original_name: &str,
        store: &DocumentStore,
    ) -> Result<StoredDocument, AppError> {
        let file = tokio::fs::File::open(&document.path).await?;
        let body = reqwest::Body::wrap_stream(document_store::read_chunks(file));
        let part =
            Part::stream_with_length(body, document.size).file_name(original_name.to_string());

        let form = Form::new().text("text", text.to_string()).part("document", part);

        let response = self
            .http
            .post(self.endpoint_url(endpoint))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let response = ensure_success(response).await?;

        store
            .save_output(
                endpoint,
                &document.extension,
                response.bytes_stream().map_err(AppError::from),
            )
            .await
    }

    /// Send text to the multi-agent endpoint and return its text reply.
    pub async fn multi_agent(&self, text: &str) -> Result<String, AppError> {
        let response = self
            .http
            .post(self.endpoint_url(Endpoint::MultiAgent))
            .bearer_auth(&self.api_key)
            .json(&MultiAgentRequest { text })
            .send()
            .await?;

        let response = ensure_success(response).await?;

        let body: MultiAgentResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Malformed multi-agent response: {e}")))?;

        Ok(body.response)
    }
}

/// Turn a non-2xx response into `Upstream`, keeping a short excerpt of its body for the log.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    Err(AppError::Upstream(format!(
        "AI service returned {status}: {excerpt}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Multipart,
        http::{HeaderMap, StatusCode},
        routing::post,
    };
    use chrono::Duration as ChronoDuration;
    use std::path::Path;

    /// Fake AI service on an ephemeral port.
    async fn spawn_upstream(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer upstream-key")
    }

    async fn echo_document(headers: HeaderMap, mut multipart: Multipart) -> (StatusCode, Vec<u8>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Vec::new());
        }
        let mut text = String::new();
        let mut document = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("text") => text = field.text().await.unwrap(),
                Some("document") => document = field.bytes().await.unwrap().to_vec(),
                _ => {}
            }
        }
        let mut out = text.into_bytes();
        out.push(b'|');
        out.extend(document);
        (StatusCode::OK, out)
    }

    async fn reply(
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
        }
        let text = body["text"].as_str().unwrap_or_default().to_uppercase();
        (StatusCode::OK, Json(serde_json::json!({ "response": text })))
    }

    fn client(base: Url) -> AiClient {
        AiClient::new(base, "upstream-key".to_string(), Duration::from_secs(5)).unwrap()
    }

    fn store(dir: &Path) -> DocumentStore {
        DocumentStore::new(
            dir.join("uploads"),
            dir.join("downloads"),
            Url::parse("http://localhost/downloads").unwrap(),
            b"key",
            ChronoDuration::hours(1),
            1024 * 1024,
        )
        .unwrap()
    }

    fn one_chunk(
        data: &'static [u8],
    ) -> impl futures::Stream<Item = Result<axum::body::Bytes, AppError>> {
        futures::stream::iter(vec![Ok(axum::body::Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn test_process_document_streams_result_to_store() {
        let base = spawn_upstream(Router::new().route("/use-case", post(echo_document))).await;
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dirs().await.unwrap();

        let input = store
            .save_upload(
                "input.txt",
                Some("text/plain"),
                one_chunk(b"contract body"),
            )
            .await
            .unwrap();

        let output = client(base)
            .process_document(Endpoint::UseCase, "summarize", &input, "input.txt", &store)
            .await
            .unwrap();

        assert!(output.file_name.starts_with("usecase_"));
        assert!(output.file_name.ends_with(".txt"));
        assert_eq!(
            tokio::fs::read(&output.path).await.unwrap(),
            b"summarize|contract body"
        );
        assert_eq!(output.size, 23);
    }

    #[tokio::test]
    async fn test_multi_agent_returns_response_text() {
        let base = spawn_upstream(Router::new().route("/multi-agent", post(reply))).await;

        let text = client(base).multi_agent("plan a trip").await.unwrap();
        assert_eq!(text, "PLAN A TRIP");
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_error() {
        let base = spawn_upstream(Router::new().route(
            "/multi-agent",
            post(|| async { (StatusCode::BAD_GATEWAY, "model overloaded") }),
        ))
        .await;

        let err = client(base).multi_agent("hello").await.unwrap_err();
        match err {
            AppError::Upstream(msg) => {
                assert!(msg.contains("502"));
                assert!(msg.contains("model overloaded"));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_credential_is_rejected_upstream() {
        let base = spawn_upstream(Router::new().route("/multi-agent", post(reply))).await;
        let client = AiClient::new(base, "wrong".to_string(), Duration::from_secs(5)).unwrap();

        assert!(matches!(
            client.multi_agent("hello").await,
            Err(AppError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_upstream_error() {
        // Port 1 is never listening in the test environment.
        let client = client(Url::parse("http://127.0.0.1:1").unwrap());
        assert!(matches!(
            client.multi_agent("hello").await,
            Err(AppError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_document_call_leaves_no_output() {
        let base = spawn_upstream(Router::new().route(
            "/reverse-transaction",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dirs().await.unwrap();

        let input = store
            .save_upload(
                "input.csv",
                None,
                one_chunk(b"a,b"),
            )
            .await
            .unwrap();

        let result = client(base)
            .process_document(Endpoint::ReverseTransaction, "undo", &input, "input.csv", &store)
            .await;

        assert!(matches!(result, Err(AppError::Upstream(_))));
        let mut entries = tokio::fs::read_dir(dir.path().join("downloads")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
