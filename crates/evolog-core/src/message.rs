//! Command and event envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::payload::SerializedPayload;

/// Causal metadata wrapped around every command and event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<P> {
    /// Unique message identifier.
    pub id: Uuid,
    /// Threads the causal chain across an entire business process.
    pub process_id: Uuid,
    /// Who started the chain, if known.
    pub initiator: Option<String>,
    /// The message that caused this one.
    pub predecessor_id: Option<Uuid>,
    /// The wrapped command or event.
    pub payload: P,
}

impl<P> Envelope<P> {
    /// Wraps a payload that starts a new causal chain.
    #[must_use]
    pub fn originate(payload: P, initiator: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            process_id: Uuid::now_v7(),
            initiator,
            predecessor_id: None,
            payload,
        }
    }
}

/// The causal metadata an append inherits from the message that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Causation {
    /// Business process the appended events belong to.
    pub process_id: Uuid,
    /// Who started the process, if known.
    pub initiator: Option<String>,
    /// The message that caused the append.
    pub predecessor_id: Option<Uuid>,
}

impl Causation {
    /// Starts a new process with no predecessor.
    #[must_use]
    pub fn originate(initiator: Option<String>) -> Self {
        Self {
            process_id: Uuid::now_v7(),
            initiator,
            predecessor_id: None,
        }
    }

    /// Continues the process of `message`, naming it as the predecessor.
    #[must_use]
    pub fn caused_by<P>(message: &Envelope<P>) -> Self {
        Self {
            process_id: message.process_id,
            initiator: message.initiator.clone(),
            predecessor_id: Some(message.id),
        }
    }
}

/// A serialized command on the wire.
pub type CommandMessage = Envelope<SerializedPayload>;

/// A stored event as published to the bus.
pub type EventMessage = Envelope<RecordedEvent>;

/// Event body sent to the bus: the serialized payload plus the stream
/// position consumers need to order and deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    /// State kind of the stream.
    pub state_kind: String,
    /// Stream the event belongs to.
    pub stream_id: String,
    /// Position in the stream.
    pub version: i64,
    /// Qualified event type name.
    pub event_type: String,
    /// Serialized event body.
    pub data: Value,
    /// When the event was raised.
    pub raised_at: DateTime<Utc>,
    /// The append transaction that stored the event.
    pub transaction_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_originate_starts_a_new_process() {
        let first = Envelope::originate("open", Some("alice".to_owned()));
        let second = Envelope::originate("open", Some("alice".to_owned()));

        assert_eq!(first.predecessor_id, None);
        assert_eq!(first.initiator.as_deref(), Some("alice"));
        assert_ne!(first.id, second.id);
        assert_ne!(first.process_id, second.process_id);
    }

    #[test]
    fn test_causation_from_message_links_predecessor() {
        let command = Envelope::originate("open", None);

        let causation = Causation::caused_by(&command);

        assert_eq!(causation.process_id, command.process_id);
        assert_eq!(causation.predecessor_id, Some(command.id));
        assert_eq!(causation.initiator, None);
    }

    #[test]
    fn test_envelope_wire_shape_is_camel_case() {
        let envelope = Envelope::originate(1_u8, None);

        let value = serde_json::to_value(&envelope).unwrap();

        assert!(value.get("processId").is_some());
        assert!(value.get("predecessorId").is_some());
    }
}
