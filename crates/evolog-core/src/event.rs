//! Stored stream events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;
use crate::message::{Envelope, EventMessage, RecordedEvent};
use crate::payload::{Payload, SerializedPayload};

/// One row of the event log.
///
/// `(state_kind, stream_id, version)` is unique, and the versions of a
/// stream form a contiguous sequence starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// State kind the stream folds into.
    pub state_kind: String,
    /// Stream identifier.
    pub stream_id: String,
    /// 1-based position within the stream.
    pub version: i64,
    /// Qualified event type name, `<namespace>.<name>`.
    pub event_type: String,
    /// Serialized event body.
    pub payload: Value,
    /// When the event was raised.
    pub raised_at: DateTime<Utc>,
    /// Unique message identifier.
    pub message_id: Uuid,
    /// Business process the event belongs to.
    pub process_id: Uuid,
    /// Who started the process, if known.
    pub initiator: Option<String>,
    /// The message that caused the event.
    pub predecessor_id: Option<Uuid>,
    /// The append transaction that stored the event.
    pub transaction_id: Uuid,
}

impl StreamEvent {
    /// The stored payload in its registry form.
    #[must_use]
    pub fn serialized_payload(&self) -> SerializedPayload {
        SerializedPayload {
            type_name: self.event_type.clone(),
            data: self.payload.clone(),
        }
    }

    /// Decodes the stored payload into the aggregate's event type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnresolvableType` or `DomainError::Serialization`
    /// if the row does not decode.
    pub fn decode<E: Payload>(&self) -> Result<E, DomainError> {
        E::decode(&self.serialized_payload())
    }

    /// Decodes the row into a typed envelope with its causal metadata.
    ///
    /// # Errors
    ///
    /// Same as [`StreamEvent::decode`].
    pub fn to_envelope<E: Payload>(&self) -> Result<Envelope<E>, DomainError> {
        Ok(Envelope {
            id: self.message_id,
            process_id: self.process_id,
            initiator: self.initiator.clone(),
            predecessor_id: self.predecessor_id,
            payload: self.decode()?,
        })
    }

    /// Converts the row into the message published on the bus.
    #[must_use]
    pub fn to_message(&self) -> EventMessage {
        Envelope {
            id: self.message_id,
            process_id: self.process_id,
            initiator: self.initiator.clone(),
            predecessor_id: self.predecessor_id,
            payload: RecordedEvent {
                state_kind: self.state_kind.clone(),
                stream_id: self.stream_id.clone(),
                version: self.version,
                event_type: self.event_type.clone(),
                data: self.payload.clone(),
                raised_at: self.raised_at,
                transaction_id: self.transaction_id,
            },
        }
    }
}
