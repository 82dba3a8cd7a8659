use std::collections::HashMap;
use std::sync::RwLock;

use manuerp_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, batch_stream};

/// In-memory append-only event store for tests and local runs.
///
/// The version check and the append happen under one write lock, so two
/// writers racing on the same stream cannot both succeed.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Number of streams written so far.
    pub fn stream_count(&self) -> usize {
        self.streams.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some((aggregate_id, aggregate_type)) = batch_stream(&events)? else {
            return Ok(vec![]);
        };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        let existing = streams.get(&aggregate_id).map(Vec::as_slice).unwrap_or(&[]);
        let current = Self::current_version(existing);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(first) = existing.first() {
            if first.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    first.aggregate_type, aggregate_type
                )));
            }
        }

        let stream = streams.entry(aggregate_id).or_default();
        let mut committed = Vec::with_capacity(events.len());
        for (offset, e) in events.into_iter().enumerate() {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: current + 1 + offset as u64,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;
        let mut out: Vec<StoredEvent> = streams.values().flatten().cloned().collect();
        out.sort_by_key(|e| (e.aggregate_id, e.sequence_number));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({ "n": 1 }),
        }
    }

    #[test]
    fn assigns_gap_free_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let first = store
            .append(vec![event(id, "t"), event(id, "t")], ExpectedVersion::NoStream)
            .unwrap();
        let second = store
            .append(vec![event(id, "t")], ExpectedVersion::Exact(2))
            .unwrap();

        let seqs: Vec<u64> = first.iter().chain(&second).map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(store.load_stream(id).unwrap().len(), 3);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append(vec![event(id, "t")], ExpectedVersion::NoStream).unwrap();

        let err = store
            .append(vec![event(id, "t")], ExpectedVersion::NoStream)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert_eq!(store.load_stream(id).unwrap().len(), 1);
    }

    #[test]
    fn rejects_mixed_batches_and_type_changes() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        let err = store
            .append(vec![event(a, "t"), event(b, "t")], ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));

        store.append(vec![event(a, "t")], ExpectedVersion::Any).unwrap();
        let err = store
            .append(vec![event(a, "other")], ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn load_all_orders_by_stream_then_sequence() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(vec![event(b, "t")], ExpectedVersion::NoStream).unwrap();
        store.append(vec![event(a, "t"), event(a, "t")], ExpectedVersion::NoStream).unwrap();
        store.append(vec![event(b, "t")], ExpectedVersion::Exact(1)).unwrap();

        let all = store.load_all().unwrap();
        let mut expected: Vec<(AggregateId, u64)> = vec![(a, 1), (a, 2), (b, 1), (b, 2)];
        expected.sort();
        let keys: Vec<(AggregateId, u64)> =
            all.iter().map(|e| (e.aggregate_id, e.sequence_number)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn unknown_stream_loads_empty() {
        let store = InMemoryEventStore::new();
        assert!(store.load_stream(AggregateId::new()).unwrap().is_empty());
        assert!(store.append(vec![], ExpectedVersion::Any).unwrap().is_empty());
        assert_eq!(store.stream_count(), 0);
        assert!(store.load_all().unwrap().is_empty());
    }
}
