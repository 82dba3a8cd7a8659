use serde::{Deserialize, Serialize};
use uuid::Uuid;

use manuerp_core::AggregateId;

/// A committed event plus the stream metadata consumers need to order it.
///
/// `sequence_number` is the 1-based position in the aggregate's stream; read
/// models use it to skip duplicates and detect gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: String,
    event_type: String,
    sequence_number: u64,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
