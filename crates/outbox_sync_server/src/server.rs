//! Main server type.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::rows::AppliedWrite;
use outbox_codec::Document;
use outbox_core::EntityId;
use outbox_sync_protocol::{
    ReadRequest, ReadResponse, RemoteRecord, SyncMessage, WriteOutcome, WriteRequest, READ_PATH,
    WRITE_PATH,
};
use tracing::warn;

/// The reference remote store.
///
/// # Example
///
/// ```
/// use outbox_codec::{document, Value};
/// use outbox_core::{EntityId, PendingMutation};
/// use outbox_sync_protocol::{WriteOutcome, WriteRequest};
/// use outbox_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let create = PendingMutation::create("tasks", EntityId::new(), document([("n", Value::from(1))]));
/// let outcome = server.write(&WriteRequest::from_mutation(&create));
/// assert!(matches!(outcome, WriteOutcome::Applied { record: Some(_) }));
/// ```
pub struct SyncServer {
    handler: RequestHandler,
}

impl SyncServer {
    /// Creates a server with no rows.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            handler: RequestHandler::new(config),
        }
    }

    /// Handles a write request.
    pub fn write(&self, request: &WriteRequest) -> WriteOutcome {
        self.handler.handle_write(request)
    }

    /// Handles a read request.
    pub fn read(&self, request: &ReadRequest) -> ReadResponse {
        self.handler.handle_read(request)
    }

    /// Dispatches a decoded message.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for messages only a server sends.
    pub fn handle_message(&self, message: SyncMessage) -> ServerResult<SyncMessage> {
        match message {
            SyncMessage::Write(request) => Ok(SyncMessage::WriteResult(self.write(&request))),
            SyncMessage::Read(request) => Ok(SyncMessage::ReadResult(self.read(&request))),
            other => Err(ServerError::InvalidRequest(format!(
                "unexpected {} message",
                other.kind()
            ))),
        }
    }

    /// Handles an encoded request body for an endpoint.
    ///
    /// Malformed requests are answered with an encoded `Error` message; only
    /// an unknown path or an encoding failure of the answer is an `Err`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.serve(path, body).map_err(|e| e.to_string())
    }

    fn serve(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        if path != WRITE_PATH && path != READ_PATH {
            return Err(ServerError::NotFound(path.to_string()));
        }

        let answer = match SyncMessage::decode(body) {
            Ok(message) => {
                let expected = if path == WRITE_PATH { "write" } else { "read" };
                if message.kind() == expected {
                    self.handle_message(message)
                } else {
                    Err(ServerError::InvalidRequest(format!(
                        "{} message sent to {path}",
                        message.kind()
                    )))
                }
            }
            Err(e) => Err(ServerError::from(e)),
        };

        let reply = answer.unwrap_or_else(|e| {
            warn!(path, error = %e, "request failed");
            SyncMessage::Error {
                message: e.to_string(),
            }
        });
        Ok(reply.encode()?)
    }

    /// Writes a row directly, as another client would.
    pub fn put_direct(&self, collection: &str, id: EntityId, data: &Document) -> RemoteRecord {
        self.handler.put_direct(collection, id, data)
    }

    /// Deletes a row directly, as another client would.
    pub fn delete_direct(&self, collection: &str, id: EntityId) -> bool {
        self.handler.delete_direct(collection, id)
    }

    /// Returns a row.
    pub fn row(&self, collection: &str, id: EntityId) -> Option<RemoteRecord> {
        self.handler.row(collection, id)
    }

    /// Every row of a collection in id order.
    pub fn rows_in(&self, collection: &str) -> Vec<(EntityId, RemoteRecord)> {
        self.handler.rows_in(collection)
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.handler.row_count()
    }

    /// Every applied write, oldest first.
    pub fn history(&self) -> Vec<AppliedWrite> {
        self.handler.history()
    }
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::{document, Value};
    use outbox_core::PendingMutation;

    #[test]
    fn post_write_then_read() {
        let server = SyncServer::default();
        let id = EntityId::new();
        let create = PendingMutation::create("tasks", id, document([("n", Value::from(1))]));

        let body = SyncMessage::Write(WriteRequest::from_mutation(&create))
            .encode()
            .unwrap();
        let reply = SyncMessage::decode(&server.handle_post(WRITE_PATH, &body).unwrap()).unwrap();
        assert!(matches!(
            reply.into_write_outcome().unwrap(),
            WriteOutcome::Applied { record: Some(_) }
        ));

        let body = SyncMessage::Read(ReadRequest {
            collection: "tasks".into(),
            entity_id: id,
        })
        .encode()
        .unwrap();
        let reply = SyncMessage::decode(&server.handle_post(READ_PATH, &body).unwrap()).unwrap();
        let record = reply.into_read_response().unwrap().record.unwrap();
        assert_eq!(record.payload, document([("n", Value::from(1))]));
    }

    #[test]
    fn garbage_body_gets_error_message() {
        let server = SyncServer::default();
        let reply = server.handle_post(WRITE_PATH, b"not cbor").unwrap();
        assert!(matches!(
            SyncMessage::decode(&reply).unwrap(),
            SyncMessage::Error { .. }
        ));
    }

    #[test]
    fn wrong_message_for_endpoint() {
        let server = SyncServer::default();
        let body = SyncMessage::Read(ReadRequest {
            collection: "tasks".into(),
            entity_id: EntityId::new(),
        })
        .encode()
        .unwrap();
        let reply = SyncMessage::decode(&server.handle_post(WRITE_PATH, &body).unwrap()).unwrap();
        assert!(matches!(reply, SyncMessage::Error { .. }));
    }

    #[test]
    fn unknown_path() {
        let server = SyncServer::default();
        assert!(server.handle_post("/sync/pull", &[]).is_err());
    }
}
