use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use manuerp_events::EventEnvelope;
use manuerp_inventory::{InventoryEvent, InventoryItemId, StockLevels, StockStatus, SupplierId};

use super::{ProjectionError, StreamCursors, decode_inventory, sort_for_replay};
use crate::read_model::ReadStore;

/// Queryable item view: current stock, thresholds and derived status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReadModel {
    pub item_id: InventoryItemId,
    pub part_number: String,
    pub material: String,
    pub description: Option<String>,
    pub unit: String,
    pub location: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub levels: StockLevels,
    pub current_stock: u64,
    /// Weighted average unit cost, in cents.
    pub average_cost: u64,
    pub status: StockStatus,
    pub is_active: bool,
    pub movement_count: usize,
    pub last_movement_at: Option<DateTime<Utc>>,
    /// Stream position this view reflects.
    pub version: u64,
}

impl ItemReadModel {
    /// Stock value at average cost, in cents.
    pub fn stock_value(&self) -> u64 {
        self.current_stock.saturating_mul(self.average_cost)
    }
}

/// Item stock projection.
#[derive(Debug)]
pub struct InventoryStockProjection<S>
where
    S: ReadStore<InventoryItemId, ItemReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> InventoryStockProjection<S>
where
    S: ReadStore<InventoryItemId, ItemReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::default(),
        }
    }

    pub fn get(&self, item_id: &InventoryItemId) -> Option<ItemReadModel> {
        self.store.get(item_id)
    }

    /// All items, ordered by part number.
    pub fn list(&self) -> Vec<ItemReadModel> {
        let mut items = self.store.list();
        items.sort_by(|a, b| a.part_number.cmp(&b.part_number));
        items
    }

    pub fn find_by_part_number(&self, part_number: &str) -> Option<ItemReadModel> {
        let wanted = part_number.trim();
        self.store
            .list()
            .into_iter()
            .find(|i| i.part_number.eq_ignore_ascii_case(wanted))
    }

    /// Active items at or below their reorder point (including out of stock).
    pub fn needing_reorder(&self) -> Vec<ItemReadModel> {
        self.list()
            .into_iter()
            .filter(|i| i.is_active && i.status.needs_reorder())
            .collect()
    }

    pub fn position(&self, item_id: InventoryItemId) -> u64 {
        self.cursors.position(item_id.0)
    }

    /// Apply one committed envelope. Duplicates are ignored.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(event) = decode_inventory(envelope)? else {
            return Ok(());
        };
        let seq = envelope.sequence_number();
        self.cursors
            .advance(envelope.aggregate_id(), seq, || {
                self.apply_event(event, seq);
                Ok(())
            })
            .map(|_| ())
    }

    fn apply_event(&self, event: InventoryEvent, seq: u64) {
        let item_id = event.item_id();
        let mut rm = match event {
            InventoryEvent::ItemCreated(e) => ItemReadModel {
                item_id: e.item_id,
                part_number: e.part_number,
                material: e.material,
                description: e.description,
                unit: e.unit,
                location: e.location,
                supplier_id: e.supplier_id,
                status: e.levels.status_for(0),
                levels: e.levels,
                current_stock: 0,
                average_cost: e.average_cost,
                is_active: true,
                movement_count: 0,
                last_movement_at: None,
                version: seq,
            },
            other => {
                let Some(mut rm) = self.store.get(&item_id) else {
                    return;
                };
                match other {
                    InventoryEvent::MovementRecorded(m) => {
                        rm.current_stock = m.new_stock;
                        rm.movement_count += 1;
                        rm.last_movement_at = Some(m.occurred_at);
                        if m.affects_average_cost() {
                            rm.average_cost = manuerp_inventory::weighted_average(
                                m.previous_stock,
                                rm.average_cost,
                                m.quantity,
                                m.unit_cost,
                            );
                        }
                    }
                    InventoryEvent::StockLevelsChanged(e) => rm.levels = e.levels,
                    InventoryEvent::ItemDeactivated(_) => rm.is_active = false,
                    InventoryEvent::MovementReversed(_) | InventoryEvent::ItemCreated(_) => {}
                }
                rm
            }
        };
        rm.status = rm.levels.status_for(rm.current_stock);
        rm.version = seq;
        self.store.upsert(item_id, rm);
    }

    /// Drop everything and replay `envelopes` in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.reset();
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        sort_for_replay(&mut envs);
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
