//! HTTP transport.
//!
//! Requests and answers travel as CBOR-encoded [`SyncMessage`]s in POST
//! bodies. The HTTP client itself sits behind [`HttpClient`], so any
//! library (or an in-process loopback) can carry the bytes.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteStore;
use outbox_sync_protocol::{
    ReadRequest, RemoteRecord, SyncMessage, WriteOutcome, WriteRequest, READ_PATH, WRITE_PATH,
};
use parking_lot::RwLock;
use std::future::Future;
use tracing::debug;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, String>> + Send;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

/// A [`RemoteStore`] reached over HTTP.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the remote (e.g., "https://api.example.com").
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn exchange(&self, path: &str, message: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.client.is_healthy() {
            return Err(SyncError::NotConnected);
        }

        let body = message.encode()?;
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, kind = message.kind(), "posting");

        let response = match self.client.post(&url, body).await {
            Ok(response) => response,
            Err(e) => {
                *self.last_error.write() = Some(e.clone());
                return Err(SyncError::transport_retryable(e));
            }
        };
        *self.last_error.write() = None;

        match SyncMessage::decode(&response)? {
            SyncMessage::Error { message } => Err(SyncError::Server(message)),
            reply => Ok(reply),
        }
    }
}

impl<C: HttpClient> RemoteStore for HttpTransport<C> {
    async fn write(&self, request: WriteRequest) -> SyncResult<WriteOutcome> {
        let reply = self.exchange(WRITE_PATH, SyncMessage::Write(request)).await?;
        Ok(reply.into_write_outcome()?)
    }

    async fn read(&self, request: ReadRequest) -> SyncResult<Option<RemoteRecord>> {
        let reply = self.exchange(READ_PATH, SyncMessage::Read(request)).await?;
        Ok(reply.into_read_response()?.record)
    }
}

/// Trait for servers that can answer loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST body for an endpoint path.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An [`HttpClient`] that hands requests straight to an in-process server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a client bound to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/outbox/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::{document, Value};
    use outbox_core::{EntityId, PendingMutation, Version};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestClient {
        response: RwLock<Result<Vec<u8>, String>>,
        healthy: AtomicBool,
        last_url: RwLock<Option<String>>,
    }

    impl TestClient {
        fn answering(message: &SyncMessage) -> Self {
            Self {
                response: RwLock::new(Ok(message.encode().unwrap())),
                healthy: AtomicBool::new(true),
                last_url: RwLock::new(None),
            }
        }
    }

    impl HttpClient for TestClient {
        async fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            *self.last_url.write() = Some(url.to_string());
            self.response.read().clone()
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn write_request() -> WriteRequest {
        WriteRequest::from_mutation(&PendingMutation::create(
            "tasks",
            EntityId::new(),
            document([("n", Value::from(1))]),
        ))
    }

    #[tokio::test]
    async fn write_posts_to_write_endpoint() {
        let record = RemoteRecord::new(document([("n", Value::from(1))]), Version::new(1));
        let client = TestClient::answering(&SyncMessage::WriteResult(WriteOutcome::Applied {
            record: Some(record.clone()),
        }));
        let transport = HttpTransport::new("https://api.example.com", client);

        let outcome = transport.write(write_request()).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Applied { record: Some(record) });
        assert_eq!(
            transport.client.last_url.read().as_deref(),
            Some("https://api.example.com/outbox/write")
        );
        assert_eq!(transport.last_error(), None);
    }

    #[tokio::test]
    async fn client_failure_is_retryable() {
        let client = TestClient::answering(&SyncMessage::Error {
            message: String::new(),
        });
        *client.response.write() = Err("connection reset".into());
        let transport = HttpTransport::new("https://api.example.com", client);

        let err = transport.write(write_request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn error_message_becomes_server_error() {
        let client = TestClient::answering(&SyncMessage::Error {
            message: "overloaded".into(),
        });
        let transport = HttpTransport::new("https://api.example.com", client);
        assert!(matches!(
            transport.write(write_request()).await,
            Err(SyncError::Server(ref m)) if m == "overloaded"
        ));
    }

    #[tokio::test]
    async fn wrong_answer_kind_is_protocol_error() {
        let client = TestClient::answering(&SyncMessage::WriteResult(WriteOutcome::Applied {
            record: None,
        }));
        let transport = HttpTransport::new("https://api.example.com", client);
        let result = transport
            .read(ReadRequest {
                collection: "tasks".into(),
                entity_id: EntityId::new(),
            })
            .await;
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[tokio::test]
    async fn unhealthy_client_is_not_connected() {
        let client = TestClient::answering(&SyncMessage::Error {
            message: String::new(),
        });
        client.healthy.store(false, Ordering::SeqCst);
        let transport = HttpTransport::new("https://api.example.com", client);
        assert!(matches!(
            transport.write(write_request()).await,
            Err(SyncError::NotConnected)
        ));
    }

    struct Echo;

    impl LoopbackServer for Echo {
        fn handle_post(&self, path: &str, _body: &[u8]) -> Result<Vec<u8>, String> {
            Ok(path.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn loopback_strips_base_url() {
        let client = LoopbackClient::new(Echo);
        let reply = client
            .post("http://localhost:8080/outbox/read", Vec::new())
            .await
            .unwrap();
        assert_eq!(reply, b"/outbox/read");
    }
}
