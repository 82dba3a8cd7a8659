//! Movement ledger: one row per recorded movement, in stream order.
//!
//! Rows are append-only. The only thing that changes after a row is written
//! is its reversal marker, set when a `MovementReversed` event arrives.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use manuerp_events::EventEnvelope;
use manuerp_forecast::UsageSample;
use manuerp_inventory::{
    Direction, InventoryEvent, InventoryItemId, MovementId, MovementType, StockMovement,
};

use super::{ProjectionError, StreamCursors, decode_inventory, sort_for_replay};

/// A movement row plus its reversal marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub sequence_number: u64,
    pub movement: StockMovement,
    pub is_reversed: bool,
    /// The compensating movement, once reversed.
    pub reversal_reference: Option<MovementId>,
}

impl MovementEntry {
    /// Counts as consumption: outbound, not a compensating entry, not reversed.
    pub fn is_usage(&self) -> bool {
        self.movement.direction == Direction::Outbound
            && self.movement.reversal_of.is_none()
            && !self.is_reversed
    }
}

/// Half-open time window `[from, to)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }
}

/// Per-type totals inside a summary.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTotals {
    pub count: usize,
    pub quantity: u64,
    /// Sum of `quantity * unit_cost`, in cents.
    pub value: u64,
}

/// Aggregated movements of one item over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementSummary {
    pub item_id: InventoryItemId,
    pub range: DateRange,
    /// Only types that occurred, in `MovementType::ALL` order.
    pub by_type: Vec<(MovementType, TypeTotals)>,
    pub inbound: u64,
    pub outbound: u64,
    pub net_change: i128,
    pub reversed_count: usize,
}

impl MovementSummary {
    pub fn totals_for(&self, movement_type: MovementType) -> TypeTotals {
        self.by_type
            .iter()
            .find(|(t, _)| *t == movement_type)
            .map(|(_, totals)| *totals)
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct ItemLedger {
    entries: Vec<MovementEntry>,
    index: HashMap<MovementId, usize>,
}

#[derive(Debug, Default)]
pub struct MovementLedgerProjection {
    ledgers: RwLock<HashMap<InventoryItemId, ItemLedger>>,
    cursors: StreamCursors,
}

impl MovementLedgerProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(event) = decode_inventory(envelope)? else {
            return Ok(());
        };
        let seq = envelope.sequence_number();
        self.cursors
            .advance(envelope.aggregate_id(), seq, || self.apply_event(event, seq))
            .map(|_| ())
    }

    fn apply_event(&self, event: InventoryEvent, seq: u64) -> Result<(), ProjectionError> {
        let mut ledgers = self.ledgers.write().map_err(|_| ProjectionError::Poisoned)?;
        match event {
            InventoryEvent::MovementRecorded(movement) => {
                let ledger = ledgers.entry(movement.item_id).or_default();
                ledger.index.insert(movement.movement_id, ledger.entries.len());
                ledger.entries.push(MovementEntry {
                    sequence_number: seq,
                    movement,
                    is_reversed: false,
                    reversal_reference: None,
                });
            }
            InventoryEvent::MovementReversed(e) => {
                if let Some(ledger) = ledgers.get_mut(&e.item_id) {
                    if let Some(&idx) = ledger.index.get(&e.movement_id) {
                        let entry = &mut ledger.entries[idx];
                        entry.is_reversed = true;
                        entry.reversal_reference = Some(e.reversal_movement_id);
                    }
                }
            }
            InventoryEvent::ItemCreated(_)
            | InventoryEvent::StockLevelsChanged(_)
            | InventoryEvent::ItemDeactivated(_) => {}
        }
        Ok(())
    }

    fn with_ledger<T>(&self, item_id: InventoryItemId, f: impl FnOnce(&[MovementEntry]) -> T) -> T {
        match self.ledgers.read() {
            Ok(ledgers) => f(ledgers.get(&item_id).map(|l| l.entries.as_slice()).unwrap_or(&[])),
            Err(_) => f(&[]),
        }
    }

    /// Every movement of an item, oldest first.
    pub fn movements(&self, item_id: InventoryItemId) -> Vec<MovementEntry> {
        self.with_ledger(item_id, |entries| entries.to_vec())
    }

    pub fn movement(&self, item_id: InventoryItemId, movement_id: MovementId) -> Option<MovementEntry> {
        self.with_ledger(item_id, |entries| {
            entries.iter().find(|e| e.movement.movement_id == movement_id).cloned()
        })
    }

    pub fn movements_in(&self, item_id: InventoryItemId, range: DateRange) -> Vec<MovementEntry> {
        self.with_ledger(item_id, |entries| {
            entries
                .iter()
                .filter(|e| range.contains(e.movement.occurred_at))
                .cloned()
                .collect()
        })
    }

    pub fn summary(&self, item_id: InventoryItemId, range: DateRange) -> MovementSummary {
        self.with_ledger(item_id, |entries| {
            let mut totals: HashMap<MovementType, TypeTotals> = HashMap::new();
            let mut summary = MovementSummary {
                item_id,
                range,
                by_type: vec![],
                inbound: 0,
                outbound: 0,
                net_change: 0,
                reversed_count: 0,
            };

            for e in entries.iter().filter(|e| range.contains(e.movement.occurred_at)) {
                let m = &e.movement;
                let t = totals.entry(m.movement_type).or_default();
                t.count += 1;
                t.quantity = t.quantity.saturating_add(m.quantity);
                t.value = t.value.saturating_add(m.total_cost());

                match m.direction {
                    Direction::Inbound => summary.inbound = summary.inbound.saturating_add(m.quantity),
                    Direction::Outbound => summary.outbound = summary.outbound.saturating_add(m.quantity),
                }
                summary.net_change += m.signed_quantity();
                if e.is_reversed {
                    summary.reversed_count += 1;
                }
            }

            summary.by_type = MovementType::ALL
                .into_iter()
                .filter_map(|t| totals.get(&t).map(|totals| (t, *totals)))
                .collect();
            summary
        })
    }

    /// Consumption samples for forecasting, oldest first.
    pub fn usage_samples(&self, item_id: InventoryItemId) -> Vec<UsageSample> {
        self.with_ledger(item_id, |entries| {
            entries
                .iter()
                .filter(|e| e.is_usage())
                .map(|e| UsageSample {
                    occurred_at: e.movement.occurred_at,
                    quantity: e.movement.quantity,
                })
                .collect()
        })
    }

    /// Units consumed within `range`.
    pub fn usage_in(&self, item_id: InventoryItemId, range: DateRange) -> u64 {
        self.with_ledger(item_id, |entries| {
            entries
                .iter()
                .filter(|e| e.is_usage() && range.contains(e.movement.occurred_at))
                .fold(0u64, |acc, e| acc.saturating_add(e.movement.quantity))
        })
    }

    pub fn position(&self, item_id: InventoryItemId) -> u64 {
        self.cursors.position(item_id.0)
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.reset();
        self.ledgers
            .write()
            .map_err(|_| ProjectionError::Poisoned)?
            .clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        sort_for_replay(&mut envs);
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
