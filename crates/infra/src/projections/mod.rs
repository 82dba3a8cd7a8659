//! Read model builders.
//!
//! Projections consume committed envelopes and maintain query-shaped views.
//! They are:
//! - rebuildable from the event store
//! - idempotent (an envelope at or below the stream cursor is ignored)
//! - strict about order (a gap in a stream is an error, not a skip)

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use manuerp_core::AggregateId;
use manuerp_events::EventEnvelope;
use manuerp_inventory::{INVENTORY_ITEM_AGGREGATE, InventoryEvent};

pub mod inventory_stock;
pub mod movement_ledger;

pub use inventory_stock::{InventoryStockProjection, ItemReadModel};
pub use movement_ledger::{
    DateRange, MovementEntry, MovementLedgerProjection, MovementSummary, TypeTotals,
};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize inventory event: {0}")]
    Deserialize(String),

    #[error("event item_id does not match envelope aggregate_id ({0})")]
    AggregateMismatch(AggregateId),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("read model lock poisoned")]
    Poisoned,
}

/// Last applied sequence number per stream.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    /// Run `apply` if `seq` is the next position of the stream.
    ///
    /// Returns `Ok(false)` for a duplicate. The cursor lock is held while
    /// `apply` runs, so one stream's events are applied one at a time and in order.
    pub(crate) fn advance(
        &self,
        aggregate_id: AggregateId,
        seq: u64,
        apply: impl FnOnce() -> Result<(), ProjectionError>,
    ) -> Result<bool, ProjectionError> {
        let mut cursors = self.inner.write().map_err(|_| ProjectionError::Poisoned)?;
        let last = cursors.get(&aggregate_id).copied().unwrap_or(0);

        if seq <= last {
            return Ok(false);
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(aggregate_id, seq);
        Ok(true)
    }

    pub(crate) fn position(&self, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.get(&aggregate_id).copied())
            .unwrap_or(0)
    }

    pub(crate) fn reset(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}

/// Decode an inventory envelope; `None` for streams of other aggregate types.
pub(crate) fn decode_inventory(
    envelope: &EventEnvelope<JsonValue>,
) -> Result<Option<InventoryEvent>, ProjectionError> {
    if envelope.aggregate_type() != INVENTORY_ITEM_AGGREGATE {
        return Ok(None);
    }
    let event: InventoryEvent = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
    if event.item_id().0 != envelope.aggregate_id() {
        return Err(ProjectionError::AggregateMismatch(envelope.aggregate_id()));
    }
    Ok(Some(event))
}

/// Stable replay order: stream, then sequence.
pub(crate) fn sort_for_replay(envelopes: &mut [EventEnvelope<JsonValue>]) {
    envelopes.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));
}
