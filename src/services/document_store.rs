//! Document store - uploaded inputs and AI-produced outputs on the local filesystem.
//!
//! Both directions are streamed chunk by chunk; no document is ever held in
//! memory whole. Outputs are handed out through HMAC-signed, expiring links.

use crate::{
    config::Config,
    error::AppError,
    models::{endpoint::Endpoint, transaction::Transaction},
};
use axum::body::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::{Stream, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const READ_CHUNK: usize = 64 * 1024;

/// File extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "txt", "rtf", "xls", "xlsx", "csv", "json", "jpg", "jpeg", "png",
];

/// Content types accepted for upload, when the part declares one.
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "application/rtf",
    "text/rtf",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/csv",
    "application/json",
    "image/jpeg",
    "image/png",
];

/// A document written to disk.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    /// Name inside its directory, e.g. `usecase_<uuid>.pdf`
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Lower-case extension without the dot
    pub extension: String,
}

impl StoredDocument {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Check an upload's name and declared content type against the allow-list.
///
/// Returns the lower-case extension.
pub fn validate_upload(file_name: &str, content_type: Option<&str>) -> Result<String, AppError> {
    let invalid = || {
        AppError::InvalidRequest(
            "Invalid file type. Only documents, spreadsheets, PDFs, and images are allowed."
                .to_string(),
        )
    };

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(invalid)?;

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(invalid());
    }

    if let Some(content_type) = content_type {
        // Ignore parameters such as "; charset=utf-8".
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
            return Err(invalid());
        }
    }

    Ok(extension)
}

/// A file name that is safe to join onto a store directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub struct DocumentStore {
    upload_dir: PathBuf,
    download_dir: PathBuf,
    url_base: Url,
    signing_key: Vec<u8>,
    link_ttl: Duration,
    max_upload_bytes: u64,
}

impl DocumentStore {
    /// # Errors
    ///
    /// `InvalidRequest` if `url_base` cannot carry path segments (e.g. `mailto:`).
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
        url_base: Url,
        signing_key: &[u8],
        link_ttl: Duration,
        max_upload_bytes: u64,
    ) -> Result<Self, AppError> {
        if url_base.cannot_be_a_base() {
            return Err(AppError::InvalidRequest(format!(
                "download URL base {url_base} cannot carry a path"
            )));
        }

        Ok(Self {
            upload_dir: upload_dir.into(),
            download_dir: download_dir.into(),
            url_base,
            signing_key: signing_key.to_vec(),
            link_ttl,
            max_upload_bytes,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            &config.upload_dir,
            &config.download_dir,
            config.download_base_url()?,
            config.jwt_secret.as_bytes(),
            Duration::seconds(config.download_link_ttl_secs as i64),
            config.max_upload_bytes,
        )?)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Create both directories if missing.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.download_dir).await
    }

    /// Stream an uploaded document to the upload directory.
    ///
    /// # Process
    ///
    /// 1. Validate name and content type
    /// 2. Write chunks under `<uuid>.<ext>`, counting bytes
    /// 3. Abort and remove the partial file once the size cap is passed
    pub async fn save_upload<S, E>(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        chunks: S,
    ) -> Result<StoredDocument, AppError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<AppError>,
    {
        let extension = validate_upload(original_name, content_type)?;
        let file_name = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.upload_dir.join(&file_name);

        let size = write_stream(&path, chunks, Some(self.max_upload_bytes)).await?;

        Ok(StoredDocument {
            file_name,
            path,
            size,
            extension,
        })
    }

    /// Stream an AI-produced document to the download directory.
    pub async fn save_output<S, E>(
        &self,
        endpoint: Endpoint,
        extension: &str,
        chunks: S,
    ) -> Result<StoredDocument, AppError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<AppError>,
    {
        let file_name = format!("{}_{}.{}", endpoint.output_prefix(), Uuid::new_v4(), extension);
        let path = self.download_dir.join(&file_name);

        let size = write_stream(&path, chunks, None).await?;

        Ok(StoredDocument {
            file_name,
            path,
            size,
            extension: extension.to_string(),
        })
    }

    /// Best-effort removal; failures are logged.
    pub async fn remove(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove document");
        }
    }

    /// Signed download link for an output document, valid for the configured TTL.
    pub fn download_url(&self, file_name: &str) -> String {
        self.download_url_at(file_name, Utc::now())
    }

    /// Fresh link to a transaction's output document, if it produced one.
    pub fn transaction_link(&self, transaction: &Transaction) -> Option<String> {
        transaction
            .output_file_name()
            .map(|name| self.download_url(name))
    }

    pub fn download_url_at(&self, file_name: &str, now: DateTime<Utc>) -> String {
        let expires = (now + self.link_ttl).timestamp();
        let signature = self.sign(file_name, expires);

        let mut url = self.url_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(file_name);
        }
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);
        url.to_string()
    }

    /// Check a download link and return the file it points to.
    ///
    /// Bad names, bad signatures and expired links are all `NotFound`.
    pub fn resolve_download(
        &self,
        file_name: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, AppError> {
        const NOT_FOUND: AppError = AppError::NotFound("Document not found");

        if !is_plain_file_name(file_name) || expires < now.timestamp() {
            return Err(NOT_FOUND);
        }

        let provided = hex::decode(signature).map_err(|_| NOT_FOUND)?;
        let mut mac = self.mac();
        mac.update(signing_payload(file_name, expires).as_bytes());
        mac.verify_slice(&provided).map_err(|_| NOT_FOUND)?;

        Ok(self.download_dir.join(file_name))
    }

    fn sign(&self, file_name: &str, expires: i64) -> String {
        let mut mac = self.mac();
        mac.update(signing_payload(file_name, expires).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.signing_key).expect("HMAC key length is valid")
    }
}

/// Read a file as a stream of chunks.
pub fn read_chunks(
    file: tokio::fs::File,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok::<_, std::io::Error>(Some((buf, file)))
    })
}

/// Content type served for a stored document.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain; charset=utf-8",
        "rtf" => "application/rtf",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

fn signing_payload(file_name: &str, expires: i64) -> String {
    format!("{file_name}:{expires}")
}

/// Write a chunk stream to `path`, returning the byte count.
///
/// The file is removed if the stream errors or exceeds `limit`.
async fn write_stream<S, E>(path: &Path, chunks: S, limit: Option<u64>) -> Result<u64, AppError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<AppError>,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut chunks = std::pin::pin!(chunks);
    let mut written: u64 = 0;

    let result = async {
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(Into::<AppError>::into)?;
            written += chunk.len() as u64;
            if limit.is_some_and(|max| written > max) {
                return Err(AppError::FileTooLarge);
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(e) = result {
        drop(file);
        if let Err(remove_err) = tokio::fs::remove_file(path).await {
            tracing::warn!(
                path = %path.display(),
                error = %remove_err,
                "Failed to remove partial document"
            );
        }
        return Err(e);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::stream;

    fn store(dir: &Path, max_upload_bytes: u64) -> DocumentStore {
        DocumentStore::new(
            dir.join("uploads"),
            dir.join("downloads"),
            Url::parse("https://files.example.com/downloads").unwrap(),
            b"signing-key",
            Duration::hours(1),
            max_upload_bytes,
        )
        .unwrap()
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, AppError>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
    }

    fn completed_document(path: PathBuf, completed_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            api_key_id: Uuid::new_v4(),
            transaction_type: Endpoint::UseCase,
            input_text: Some("summarize".to_string()),
            input_document_path: None,
            output_document_path: Some(path.to_string_lossy().into_owned()),
            output_text: None,
            status: crate::models::transaction::TransactionStatus::Completed,
            created_at: completed_at,
            completed_at: Some(completed_at),
        }
    }

    /// Split a signed link into `(file, expires, signature)`.
    fn link_parts(link: &str) -> (String, i64, String) {
        let url = Url::parse(link).unwrap();
        let file = url.path_segments().unwrap().last().unwrap().to_string();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        (file, query["expires"].parse().unwrap(), query["signature"].clone())
    }

    #[test]
    fn test_transaction_link_is_signed_fresh_on_every_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        let completed_at = Utc::now() - Duration::days(2);
        let path = dir.path().join("downloads").join("usecase_x.pdf");
        let transaction = completed_document(path.clone(), completed_at);

        // A link signed when the transaction finished has long expired.
        let (file, expires, signature) =
            link_parts(&store.download_url_at("usecase_x.pdf", completed_at));
        assert!(store.resolve_download(&file, expires, &signature, Utc::now()).is_err());

        let link = store.transaction_link(&transaction).unwrap();
        let (file, expires, signature) = link_parts(&link);
        assert_eq!(file, "usecase_x.pdf");
        assert_eq!(
            store.resolve_download(&file, expires, &signature, Utc::now()).unwrap(),
            path
        );
    }

    #[test]
    fn test_text_transaction_has_no_link() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        let mut transaction = completed_document(PathBuf::new(), Utc::now());
        transaction.output_document_path = None;
        transaction.output_text = Some("reply".to_string());

        assert!(store.transaction_link(&transaction).is_none());
    }

    #[test]
    fn test_validate_upload_allow_list() {
        assert_eq!(validate_upload("Report.PDF", Some("application/pdf")).unwrap(), "pdf");
        assert_eq!(validate_upload("notes.txt", Some("text/plain; charset=utf-8")).unwrap(), "txt");
        assert_eq!(validate_upload("sheet.xlsx", None).unwrap(), "xlsx");

        assert!(validate_upload("script.exe", None).is_err());
        assert!(validate_upload("no_extension", None).is_err());
        assert!(validate_upload("photo.png", Some("application/x-msdownload")).is_err());
    }

    #[tokio::test]
    async fn test_save_upload_streams_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        store.ensure_dirs().await.unwrap();

        let saved = store
            .save_upload("doc.pdf", Some("application/pdf"), chunks(&[b"hello ", b"world"]))
            .await
            .unwrap();

        assert_eq!(saved.size, 11);
        assert_eq!(saved.extension, "pdf");
        assert!(saved.file_name.ends_with(".pdf"));
        assert_eq!(tokio::fs::read(&saved.path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 8);
        store.ensure_dirs().await.unwrap();

        let result = store
            .save_upload("doc.txt", None, chunks(&[b"12345", b"67890"]))
            .await;

        assert!(matches!(result, Err(AppError::FileTooLarge)));
        let mut entries = tokio::fs::read_dir(dir.path().join("uploads")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_error_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 8);
        store.ensure_dirs().await.unwrap();

        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(AppError::Upstream("connection reset".into())),
        ]);
        let result = store.save_output(Endpoint::UseCase, "pdf", failing).await;

        assert!(matches!(result, Err(AppError::Upstream(_))));
        let mut entries = tokio::fs::read_dir(dir.path().join("downloads")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_output_is_not_size_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        store.ensure_dirs().await.unwrap();

        let saved = store
            .save_output(Endpoint::ReverseTransaction, "docx", chunks(&[b"0123456789"]))
            .await
            .unwrap();

        assert!(saved.file_name.starts_with("reverse_"));
        assert!(saved.file_name.ends_with(".docx"));
        assert_eq!(saved.size, 10);
    }

    #[test]
    fn test_download_link_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        let now = Utc.with_ymd_and_hms(2025, 12, 20, 12, 0, 0).unwrap();

        let link = Url::parse(&store.download_url_at("usecase_abc.pdf", now)).unwrap();
        assert_eq!(link.path(), "/downloads/usecase_abc.pdf");

        let query: std::collections::HashMap<_, _> = link.query_pairs().into_owned().collect();
        let expires: i64 = query["expires"].parse().unwrap();
        let signature = &query["signature"];

        let path = store
            .resolve_download("usecase_abc.pdf", expires, signature, now)
            .unwrap();
        assert_eq!(path, dir.path().join("downloads").join("usecase_abc.pdf"));

        // Another file, a later expiry, or a stale link all fail.
        assert!(store.resolve_download("usecase_xyz.pdf", expires, signature, now).is_err());
        assert!(store.resolve_download("usecase_abc.pdf", expires + 1, signature, now).is_err());
        let later = now + Duration::hours(2);
        assert!(store.resolve_download("usecase_abc.pdf", expires, signature, later).is_err());
    }

    #[test]
    fn test_download_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        let now = Utc::now();
        let expires = (now + Duration::minutes(5)).timestamp();
        let signature = store.sign("../secret.txt", expires);

        assert!(store.resolve_download("../secret.txt", expires, &signature, now).is_err());
        assert!(store.resolve_download(".env", expires, &signature, now).is_err());
    }
}
