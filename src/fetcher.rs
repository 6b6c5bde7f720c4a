//! Single-attempt attachment transfer.
//!
//! A [`Fetcher`] moves the bytes of one remote location into one local file and reports
//! what it wrote. It never retries; that is [`retry`](crate::retry)'s job.

use crate::error::{Result, TransferError};
use crate::types::FetchReceipt;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Abstraction over one download attempt, enabling fake transports in tests.
///
/// Implementations must create missing parent directories of `destination` and replace
/// any file already there.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Transfer `source_location` into `destination`
    async fn fetch(
        &self,
        source_location: &str,
        destination: &Path,
    ) -> std::result::Result<FetchReceipt, TransferError>;
}

/// Production [`Fetcher`] issuing plain HTTP GET requests.
///
/// Session credentials are the caller's concern: either they are already embedded in the
/// location (token query parameter) or they are supplied as default headers through
/// [`HttpFetcher::with_headers`].
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_headers(timeout, HeaderMap::new())
    }

    /// Create a fetcher that sends `headers` (e.g. an authorization header) with every request
    pub fn with_headers(timeout: Duration, headers: HeaderMap) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            timeout: Some(timeout),
        })
    }

    /// Wrap an already configured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    fn request_error(&self, url: &str, source: reqwest::Error) -> TransferError {
        match self.timeout {
            Some(timeout) if source.is_timeout() => TransferError::Timeout {
                url: url.to_string(),
                timeout,
            },
            _ => TransferError::Request {
                url: url.to_string(),
                source,
            },
        }
    }

    async fn write_body(
        &self,
        url: &str,
        response: reqwest::Response,
        destination: &Path,
    ) -> std::result::Result<FetchReceipt, TransferError> {
        let write_error = |source| TransferError::Write {
            path: destination.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(write_error)?;
        let mut hasher = Sha256::new();
        let mut bytes = 0u64;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| {
                if source.is_timeout() {
                    self.request_error(url, source)
                } else {
                    TransferError::Body {
                        url: url.to_string(),
                        source,
                    }
                }
            })?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(write_error)?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        Ok(FetchReceipt {
            bytes,
            sha256: Some(format!("{:x}", hasher.finalize())),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        source_location: &str,
        destination: &Path,
    ) -> std::result::Result<FetchReceipt, TransferError> {
        let response = self
            .client
            .get(source_location)
            .send()
            .await
            .map_err(|e| self.request_error(source_location, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: source_location.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TransferError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let result = self.write_body(source_location, response, destination).await;
        if result.is_err() {
            // the next attempt rewrites the file from scratch
            if let Err(e) = tokio::fs::remove_file(destination).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::debug!(
                    path = %destination.display(),
                    error = %e,
                    "Failed to remove partial attachment file"
                );
            }
        }
        result
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &[u8] = b"hello, world";

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_writes_file_and_creates_directories() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/7"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let destination = temp_dir.path().join("1001").join("7").join("photo.jpg");
        let url = format!("{}/attachments/7", mock_server.uri());

        let receipt = fetcher().fetch(&url, &destination).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), BODY);
        assert_eq!(receipt.bytes, BODY.len() as u64);
        assert_eq!(
            receipt.sha256.as_deref(),
            Some(format!("{:x}", Sha256::digest(BODY)).as_str())
        );
    }

    #[tokio::test]
    async fn test_fetch_overwrites_existing_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let destination = temp_dir.path().join("a.bin");
        std::fs::write(&destination, b"stale content that is much longer than the body").unwrap();

        fetcher()
            .fetch(&format!("{}/a", mock_server.uri()), &destination)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_transfer_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let destination = temp_dir.path().join("x").join("missing.jpg");
        let err = fetcher()
            .fetch(&format!("{}/missing", mock_server.uri()), &destination)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Status { status: 404, .. }));
        assert!(!destination.exists(), "no file for a failed status");
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = fetcher()
            .fetch("http://127.0.0.1:1/nothing", &temp_dir.path().join("n"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Request { .. }));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(BODY)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let err = HttpFetcher::new(Duration::from_millis(50))
            .unwrap()
            .fetch(
                &format!("{}/slow", mock_server.uri()),
                &temp_dir.path().join("slow.bin"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_fetch_sends_session_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .and(header("authorization", "Bearer session-token"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .mount(&mock_server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            "Bearer session-token".parse().unwrap(),
        );
        let temp_dir = tempfile::tempdir().unwrap();
        let destination = temp_dir.path().join("private.bin");

        HttpFetcher::with_headers(Duration::from_secs(5), headers)
            .unwrap()
            .fetch(&format!("{}/private", mock_server.uri()), &destination)
            .await
            .unwrap();
        assert!(destination.exists());
    }

    #[tokio::test]
    async fn test_fetch_unwritable_destination() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::tempdir().unwrap();
        // a regular file where a parent directory should be
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let err = fetcher()
            .fetch(
                &format!("{}/a", mock_server.uri()),
                &blocker.join("7").join("a.jpg"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Write { .. }));
    }
}
