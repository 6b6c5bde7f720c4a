//! HTTP fixtures: a mock attachment server and matching listings

use async_trait::async_trait;
use attachment_backup::{FetchReceipt, Fetcher, RecordId, RemoteAttachment, TransferError};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers every attachment request with its own path as the body
struct EchoPath;

impl Respond for EchoPath {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(request.url.path())
    }
}

/// Start a server that serves every `/attachments/{parent}/{attachment}`
pub async fn attachment_server() -> MockServer {
    let server = MockServer::start().await;
    mount_attachments(&server).await;
    server
}

/// (Re)mount the catch-all attachment route, e.g. after `MockServer::reset`
pub async fn mount_attachments(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/attachments/\d+/\d+$"))
        .respond_with(EchoPath)
        .mount(server)
        .await;
}

/// URL path of one attachment
pub fn attachment_path(parent: i64, attachment: i64) -> String {
    format!("/attachments/{parent}/{attachment}")
}

/// Make one attachment answer `status` forever
pub async fn fail_always(server: &MockServer, parent: i64, attachment: i64, status: u16) {
    Mock::given(method("GET"))
        .and(path(attachment_path(parent, attachment)))
        .respond_with(ResponseTemplate::new(status))
        .with_priority(1)
        .mount(server)
        .await;
}

/// Make one attachment answer 503 for its first `times` requests
pub async fn fail_first(server: &MockServer, parent: i64, attachment: i64, times: u64) {
    Mock::given(method("GET"))
        .and(path(attachment_path(parent, attachment)))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(1)
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// Requests the server received for one attachment
pub async fn requests_for(server: &MockServer, parent: i64, attachment: i64) -> usize {
    let wanted = attachment_path(parent, attachment);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == wanted)
        .count()
}

/// Listing entry for one attachment on `server`
pub fn remote(server: &MockServer, parent: i64, attachment: i64) -> RemoteAttachment {
    RemoteAttachment {
        parent_record_id: RecordId::from(parent),
        attachment_id: RecordId::from(attachment),
        name: format!("IMG_{parent:04}.jpg"),
        download_url: format!("{}{}", server.uri(), attachment_path(parent, attachment)),
        content_type: Some("image/jpeg".to_string()),
        size: None,
    }
}

/// Listing of attachments `(1..=n, 1)` on `server`
pub fn listing(server: &MockServer, n: i64) -> Vec<RemoteAttachment> {
    (1..=n).map(|parent| remote(server, parent, 1)).collect()
}

/// Fetcher wrapper recording how many fetches overlap
pub struct ConcurrencyProbe {
    inner: Arc<dyn Fetcher>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new(inner: Arc<dyn Fetcher>) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ConcurrencyProbe {
    async fn fetch(
        &self,
        source_location: &str,
        destination: &Path,
    ) -> Result<FetchReceipt, TransferError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let result = self.inner.fetch(source_location, destination).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
