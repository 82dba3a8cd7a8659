use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use manuerp_core::{AggregateId, ExpectedVersion};

/// An event ready to be appended to a stream (no sequence number yet).
///
/// Built from a typed domain event with [`UncommittedEvent::from_typed`], which
/// serializes the payload and captures `event_type`, `event_version` and
/// `occurred_at` so the event can be decoded again on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// An event persisted in an append-only stream.
///
/// Sequence numbers are assigned by the store, start at 1 and are gap-free
/// within a stream; the last one is the stream version used for optimistic
/// concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Envelope for publication on the event bus.
    pub fn to_envelope(&self) -> manuerp_events::EventEnvelope<JsonValue> {
        manuerp_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.event_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Infrastructure errors raised by an event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<crate::blocking::BlockingError> for EventStoreError {
    fn from(value: crate::blocking::BlockingError) -> Self {
        EventStoreError::Backend(value.to_string())
    }
}

/// Append-only store of per-aggregate event streams.
///
/// Implementations must:
/// - append a batch atomically (all events or none)
/// - reject a batch that mixes aggregates or aggregate types
/// - check `expected_version` against the current stream version before writing
/// - assign sequence numbers `current + 1, current + 2, ...`
///
/// `load_stream` returns the stream in sequence order, or an empty vector for
/// an aggregate that has never been written. `load_all` returns every stream,
/// ordered by aggregate id and then sequence number.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all()
    }
}

impl UncommittedEvent {
    /// Wrap a typed domain event for appending.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: manuerp_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// Check that a batch targets a single aggregate stream of a single type.
///
/// Returns the shared `(aggregate_id, aggregate_type)`, or `None` for an empty batch.
pub(crate) fn batch_stream(
    events: &[UncommittedEvent],
) -> Result<Option<(AggregateId, String)>, EventStoreError> {
    let Some(first) = events.first() else {
        return Ok(None);
    };
    for (idx, e) in events.iter().enumerate() {
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }
    Ok(Some((first.aggregate_id, first.aggregate_type.clone())))
}
