//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! command
//!   -> load stream
//!   -> rehydrate aggregate
//!   -> handle (pure decision, produces events)
//!   -> append with ExpectedVersion = loaded version
//!   -> publish committed events
//! ```
//!
//! A stale version on append means another writer got there first. The
//! dispatcher then reloads and decides again, up to `max_retries` times, so a
//! command is always judged against the state it is actually appended to.
//! Nothing here does IO itself; the store and bus are injected.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use manuerp_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use manuerp_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Retries after the first attempt when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 16;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: u64, requested: u64 },

    /// Deterministic conflict decided by the aggregate (duplicate id, double reversal, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic concurrency kept failing after `attempts` tries.
    #[error("concurrency conflict after {attempts} attempt(s): {message}")]
    ConcurrencyConflict { attempts: u32, message: String },

    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Events were appended but publishing them failed.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(message) => DispatchError::ConcurrencyConflict {
                attempts: 1,
                message,
            },
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                DispatchError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::InsufficientStock {
                available,
                requested,
            } => DispatchError::InsufficientStock {
                available,
                requested,
            },
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    /// Aggregate state after the committed events were applied.
    pub aggregate: A,
    /// Committed events with their assigned sequence numbers (empty for a no-op).
    pub committed: Vec<StoredEvent>,
    /// Decision attempts it took, 1 when there was no contention.
    pub attempts: u32,
}

/// Reusable command engine: load, decide, append, publish.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    max_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch `command` against the aggregate stored under `aggregate_id`.
    ///
    /// `make_aggregate` builds the empty instance that history is replayed
    /// into. Domain errors are returned as-is and never retried; only a stale
    /// stream version triggers a reload.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: manuerp_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.try_dispatch(aggregate_id, aggregate_type, command, &make_aggregate) {
                Ok((aggregate, committed)) => {
                    self.publish(&committed)?;
                    return Ok(Dispatched {
                        aggregate,
                        committed,
                        attempts,
                    });
                }
                Err(DispatchError::ConcurrencyConflict { message, .. }) => {
                    if attempts > self.max_retries {
                        warn!(
                            aggregate_id = %aggregate_id,
                            attempts,
                            "giving up after repeated concurrency conflicts"
                        );
                        return Err(DispatchError::ConcurrencyConflict { attempts, message });
                    }
                    debug!(aggregate_id = %aggregate_id, attempts, "stale stream version, retrying");
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Load the stream and rebuild the aggregate without deciding anything.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    fn try_dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: &impl Fn(AggregateId) -> A,
    ) -> Result<(A, Vec<StoredEvent>), DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: manuerp_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::from_loaded(stream_version(&history));

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;

        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok((aggregate, vec![]));
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for ev in &decided {
            aggregate.apply(ev);
        }
        Ok((aggregate, committed))
    }

    fn publish(&self, committed: &[StoredEvent]) -> Result<(), DispatchError> {
        for stored in committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

/// The stream must belong to `aggregate_id` and be numbered 1, 2, 3, ...
fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        let expected = idx as u64 + 1;
        if e.sequence_number != expected {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "gap in loaded stream (expected sequence_number {expected}, found {})",
                e.sequence_number
            ))));
        }
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;
    use manuerp_core::AggregateRoot;
    use manuerp_events::InMemoryEventBus;
    use manuerp_inventory::{
        CreateItem, InventoryCommand, InventoryItem, InventoryItemId, MovementId, StockLevels,
        INVENTORY_ITEM_AGGREGATE,
    };

    use super::*;
    use crate::event_store::InMemoryEventStore;

    type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;

    fn create(item_id: InventoryItemId, initial_stock: u64) -> InventoryCommand {
        InventoryCommand::CreateItem(CreateItem {
            item_id,
            part_number: "PN-1".to_string(),
            material: "Steel sheet".to_string(),
            description: None,
            unit: "pcs".to_string(),
            location: None,
            supplier_id: None,
            levels: StockLevels::new(5, 10, 100),
            initial_stock,
            unit_cost: Some(250),
            initial_movement_id: MovementId::new(),
            created_by: None,
            occurred_at: Utc::now(),
        })
    }

    fn make(id: AggregateId) -> InventoryItem {
        InventoryItem::empty(InventoryItemId::new(id))
    }

    #[test]
    fn dispatch_appends_publishes_and_returns_new_state() {
        let bus = Arc::new(Bus::new());
        let sub = bus.subscribe();
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus.clone());
        let item_id = InventoryItemId::generate();

        let out = dispatcher
            .dispatch(item_id.0, INVENTORY_ITEM_AGGREGATE, &create(item_id, 40), make)
            .unwrap();

        assert_eq!(out.committed.len(), 2);
        assert_eq!(out.attempts, 1);
        assert_eq!(out.aggregate.current_stock(), 40);
        assert_eq!(out.aggregate.version(), 2);

        let published = sub.drain();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].event_type(), "inventory.item.created");
        assert_eq!(published[1].sequence_number(), 2);
    }

    #[test]
    fn domain_errors_are_not_retried() {
        let dispatcher =
            CommandDispatcher::new(InMemoryEventStore::new(), Bus::new());
        let item_id = InventoryItemId::generate();
        dispatcher
            .dispatch(item_id.0, INVENTORY_ITEM_AGGREGATE, &create(item_id, 0), make)
            .unwrap();

        let err = dispatcher
            .dispatch(item_id.0, INVENTORY_ITEM_AGGREGATE, &create(item_id, 0), make)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    /// Store that reports a stale version a fixed number of times before delegating.
    struct FlakyStore {
        inner: InMemoryEventStore,
        failures_left: AtomicU32,
    }

    impl EventStore for FlakyStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EventStoreError::Concurrency("simulated".to_string()));
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }

        fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_all()
        }
    }

    #[test]
    fn stale_versions_are_retried_until_the_budget_runs_out() {
        let store = FlakyStore {
            inner: InMemoryEventStore::new(),
            failures_left: AtomicU32::new(2),
        };
        let dispatcher = CommandDispatcher::new(store, Bus::new()).with_max_retries(2);
        let item_id = InventoryItemId::generate();
        let out = dispatcher
            .dispatch(item_id.0, INVENTORY_ITEM_AGGREGATE, &create(item_id, 0), make)
            .unwrap();
        assert_eq!(out.attempts, 3);

        let store = FlakyStore {
            inner: InMemoryEventStore::new(),
            failures_left: AtomicU32::new(5),
        };
        let dispatcher = CommandDispatcher::new(store, Bus::new()).with_max_retries(2);
        let err = dispatcher
            .dispatch(item_id.0, INVENTORY_ITEM_AGGREGATE, &create(item_id, 0), make)
            .unwrap_err();
        assert!(matches!(err, DispatchError::ConcurrencyConflict { attempts: 3, .. }));
    }

    #[test]
    fn load_rebuilds_without_deciding() {
        let dispatcher =
            CommandDispatcher::new(InMemoryEventStore::new(), Bus::new());
        let item_id = InventoryItemId::generate();
        dispatcher
            .dispatch(item_id.0, INVENTORY_ITEM_AGGREGATE, &create(item_id, 12), make)
            .unwrap();

        let item: InventoryItem = dispatcher.load(item_id.0, make).unwrap();
        assert_eq!(item.current_stock(), 12);

        let missing: InventoryItem = dispatcher.load(AggregateId::new(), make).unwrap();
        assert!(!missing.exists());
    }
}
