//! Protocol messages.

use crate::error::{ProtocolError, ProtocolResult};
use outbox_codec::{from_cbor, to_cbor, Document};
use outbox_core::{EntityId, MutationId, MutationKind, PendingMutation, ServerSnapshot, Version};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Endpoint path for writes.
pub const WRITE_PATH: &str = "/outbox/write";

/// Endpoint path for reads.
pub const READ_PATH: &str = "/outbox/read";

/// A row as the remote store holds it.
pub type RemoteRecord = ServerSnapshot;

/// A conditional write of one mutation.
///
/// The remote applies it only if the row is still at `base_version`.
/// `mutation_id` makes re-submission safe: a remote that already applied
/// the id answers with the original outcome and writes nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Client-generated mutation id.
    pub mutation_id: MutationId,
    /// Write kind.
    pub kind: MutationKind,
    /// Target collection.
    pub collection: String,
    /// Target row.
    pub entity_id: EntityId,
    /// Fields to write. Empty for deletes.
    pub data: Document,
    /// Version the write expects the row to be at. `None` for creates.
    pub base_version: Option<Version>,
}

impl WriteRequest {
    /// Builds the request for a pending mutation.
    pub fn from_mutation(mutation: &PendingMutation) -> Self {
        Self {
            mutation_id: mutation.id,
            kind: mutation.kind,
            collection: mutation.collection.clone(),
            entity_id: mutation.entity_id,
            data: mutation.data.clone(),
            base_version: mutation.base_version,
        }
    }

    /// Replaces the expected version.
    #[must_use]
    pub fn with_base(mut self, base_version: Option<Version>) -> Self {
        self.base_version = base_version;
        self
    }

    /// Replaces the written fields.
    #[must_use]
    pub fn with_data(mut self, data: Document) -> Self {
        self.data = data;
        self
    }
}

/// The remote's answer to a [`WriteRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOutcome {
    /// The write took effect. `record` is the row afterwards, `None` after a delete.
    Applied {
        /// Row after the write.
        record: Option<RemoteRecord>,
    },
    /// The row was not at the expected version; nothing was written.
    Conflict {
        /// The row as the remote holds it now, `None` if absent.
        current: Option<RemoteRecord>,
    },
    /// The remote refused the write for a reason retrying cannot fix.
    Rejected {
        /// Reason given by the remote.
        reason: String,
    },
}

/// Read one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Collection.
    pub collection: String,
    /// Row id.
    pub entity_id: EntityId,
}

/// Answer to a [`ReadRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// The row, `None` if the remote does not hold it.
    pub record: Option<RemoteRecord>,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Client asks for a write.
    Write(WriteRequest),
    /// Remote answers a write.
    WriteResult(WriteOutcome),
    /// Client asks for a row.
    Read(ReadRequest),
    /// Remote answers a read.
    ReadResult(ReadResponse),
    /// The remote could not process the request.
    Error {
        /// Description of the failure.
        message: String,
    },
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u16,
    message: &'a SyncMessage,
}

#[derive(Deserialize)]
struct Envelope {
    version: u16,
    message: SyncMessage,
}

impl SyncMessage {
    /// Short name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Write(_) => "write",
            SyncMessage::WriteResult(_) => "write_result",
            SyncMessage::Read(_) => "read",
            SyncMessage::ReadResult(_) => "read_result",
            SyncMessage::Error { .. } => "error",
        }
    }

    /// Encodes the message with the protocol version.
    ///
    /// # Errors
    ///
    /// Returns an error if CBOR encoding fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_cbor(&EnvelopeRef {
            version: PROTOCOL_VERSION,
            message: self,
        })?)
    }

    /// Decodes a message, checking the protocol version.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed bytes or another protocol version.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope: Envelope = from_cbor(bytes)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: envelope.version,
            });
        }
        Ok(envelope.message)
    }

    /// Unwraps a write answer.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedMessage` for any other message.
    pub fn into_write_outcome(self) -> ProtocolResult<WriteOutcome> {
        match self {
            SyncMessage::WriteResult(outcome) => Ok(outcome),
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "write_result",
                got: other.kind(),
            }),
        }
    }

    /// Unwraps a read answer.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedMessage` for any other message.
    pub fn into_read_response(self) -> ProtocolResult<ReadResponse> {
        match self {
            SyncMessage::ReadResult(response) => Ok(response),
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "read_result",
                got: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::{document, Value};

    #[test]
    fn request_mirrors_mutation() {
        let mutation = PendingMutation::update(
            "tasks",
            EntityId::new(),
            document([("done", Value::from(true))]),
            Some(Version::new(4)),
        );
        let request = WriteRequest::from_mutation(&mutation);
        assert_eq!(request.mutation_id, mutation.id);
        assert_eq!(request.kind, MutationKind::Update);
        assert_eq!(request.base_version, Some(Version::new(4)));

        let reissued = request.with_base(Some(Version::new(5)));
        assert_eq!(reissued.base_version, Some(Version::new(5)));
        assert_eq!(reissued.mutation_id, mutation.id);
    }

    #[test]
    fn write_message_survives_encoding() {
        let mutation =
            PendingMutation::create("notes", EntityId::new(), document([("body", Value::from("hi"))]));
        let message = SyncMessage::Write(WriteRequest::from_mutation(&mutation));
        let decoded = SyncMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn outcome_unwrapping() {
        let record = RemoteRecord::new(document([("n", Value::from(1))]), Version::new(2));
        let applied = SyncMessage::WriteResult(WriteOutcome::Applied {
            record: Some(record.clone()),
        });
        assert_eq!(
            applied.into_write_outcome().unwrap(),
            WriteOutcome::Applied { record: Some(record) }
        );

        let error = SyncMessage::Error {
            message: "boom".into(),
        };
        assert!(matches!(
            error.into_read_response(),
            Err(ProtocolError::UnexpectedMessage { got: "error", .. })
        ));
    }

    #[test]
    fn other_protocol_version_is_refused() {
        let bytes = to_cbor(&EnvelopeRef {
            version: 99,
            message: &SyncMessage::Error {
                message: String::new(),
            },
        })
        .unwrap();
        assert!(matches!(
            SyncMessage::decode(&bytes),
            Err(ProtocolError::VersionMismatch { found: 99, .. })
        ));
    }
}
