//! Stock ledger service.
//!
//! Orchestrates the write path (dispatcher + item aggregate), keeps the read
//! models current, and runs forecasts over the movement history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use manuerp_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use manuerp_forecast::{DAYS_PER_MONTH, Forecast, ForecastId, ForecastJob, UsageHistory, mean_mape};
use manuerp_inventory::{
    CreateItem, DeactivateItem, INVENTORY_ITEM_AGGREGATE, InventoryCommand, InventoryEvent,
    InventoryItem, InventoryItemId, MovementId, RecordMovement, ReverseMovement, StockLevels,
    StockMovement, UpdateStockLevels,
};

use crate::command_dispatcher::{CommandDispatcher, Dispatched, DispatchError};
use crate::config::LedgerConfig;
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::forecast_store::{ForecastStore, InMemoryForecastStore};
use crate::projections::{
    DateRange, InventoryStockProjection, ItemReadModel, MovementEntry, MovementLedgerProjection,
    MovementSummary,
};
use crate::read_model::InMemoryReadStore;
use crate::suppliers::{InMemorySupplierDirectory, SupplierDirectory};

mod error;
mod requests;

pub use error::LedgerError;
pub use requests::{ActionableItem, ForecastOptions, MovementReceipt, MovementRequest, NewItem};

type ItemStore = InMemoryReadStore<InventoryItemId, ItemReadModel>;

/// Ledger wired to the in-memory store and bus.
pub type InMemoryStockLedger =
    StockLedger<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>>;

pub struct StockLedger<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    config: LedgerConfig,
    items: InventoryStockProjection<ItemStore>,
    movements: MovementLedgerProjection,
    forecasts: Arc<dyn ForecastStore>,
    suppliers: Arc<dyn SupplierDirectory>,
    /// Normalised part number -> item. Held for the whole create so two
    /// requests cannot claim the same number.
    part_numbers: Mutex<HashMap<String, InventoryItemId>>,
    /// One gate per item; writes to the same item run one at a time in this
    /// process, so the store's version check only has to settle races with
    /// other processes.
    write_gates: Mutex<HashMap<InventoryItemId, Arc<Mutex<()>>>>,
}

impl InMemoryStockLedger {
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(InMemoryEventStore::new(), InMemoryEventBus::new(), config)
    }
}

impl<S, B> StockLedger<S, B> {
    pub fn new(store: S, bus: B, config: LedgerConfig) -> Self {
        let dispatcher =
            CommandDispatcher::new(store, bus).with_max_retries(config.max_concurrency_retries);
        Self {
            dispatcher,
            config,
            items: InventoryStockProjection::new(InMemoryReadStore::new()),
            movements: MovementLedgerProjection::new(),
            forecasts: Arc::new(InMemoryForecastStore::new()),
            suppliers: Arc::new(InMemorySupplierDirectory::new()),
            part_numbers: Mutex::new(HashMap::new()),
            write_gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_suppliers(mut self, suppliers: impl SupplierDirectory + 'static) -> Self {
        self.suppliers = Arc::new(suppliers);
        self
    }

    pub fn with_forecast_store(mut self, forecasts: impl ForecastStore + 'static) -> Self {
        self.forecasts = Arc::new(forecasts);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.dispatcher.store()
    }

    pub fn item(&self, item_id: InventoryItemId) -> Option<ItemReadModel> {
        self.items.get(&item_id)
    }

    pub fn item_by_part_number(&self, part_number: &str) -> Option<ItemReadModel> {
        self.items.find_by_part_number(part_number)
    }

    /// Every item, including deactivated ones, ordered by part number.
    pub fn items(&self) -> Vec<ItemReadModel> {
        self.items.list()
    }

    pub fn items_needing_reorder(&self) -> Vec<ItemReadModel> {
        self.items.needing_reorder()
    }

    /// Full movement history of an item, oldest first.
    pub fn movements(&self, item_id: InventoryItemId) -> Vec<MovementEntry> {
        self.movements.movements(item_id)
    }

    /// Movements that occurred within `range`, oldest first.
    pub fn movements_between(&self, item_id: InventoryItemId, range: DateRange) -> Vec<MovementEntry> {
        self.movements.movements_in(item_id, range)
    }

    pub fn movement_summary(
        &self,
        item_id: InventoryItemId,
        range: DateRange,
    ) -> Result<MovementSummary, LedgerError> {
        if range.to < range.from {
            return Err(LedgerError::Validation(format!(
                "date range ends ({}) before it starts ({})",
                range.to, range.from
            )));
        }
        self.require_item(item_id)?;
        Ok(self.movements.summary(item_id, range))
    }

    pub fn active_forecast(&self, item_id: InventoryItemId) -> Result<Option<Forecast>, LedgerError> {
        Ok(self.forecasts.active_for(item_id.0)?)
    }

    /// Every forecast generated for the item, oldest first.
    pub fn forecast_history(&self, item_id: InventoryItemId) -> Result<Vec<Forecast>, LedgerError> {
        Ok(self.forecasts.for_item(item_id.0)?)
    }

    pub fn find_actionable(&self, days_threshold: u32) -> Result<Vec<ActionableItem>, LedgerError> {
        self.find_actionable_at(Utc::now(), days_threshold)
    }

    /// Active items whose current forecast says to order within `days_threshold`
    /// days of `now`, soonest first. Overdue orders are included.
    pub fn find_actionable_at(
        &self,
        now: DateTime<Utc>,
        days_threshold: u32,
    ) -> Result<Vec<ActionableItem>, LedgerError> {
        let deadline = now + Duration::days(i64::from(days_threshold));
        let mut actionable: Vec<ActionableItem> = self
            .forecasts
            .active()?
            .into_iter()
            .filter(|f| !f.is_stale_at(now) && f.needs_order_by(deadline))
            .filter_map(|forecast| {
                let item = self.items.get(&InventoryItemId::new(forecast.item_id))?;
                if !item.is_active {
                    return None;
                }
                let days_until_order = forecast
                    .recommended_order_date
                    .map_or(0, |d| (d - now).num_days());
                Some(ActionableItem {
                    item,
                    forecast,
                    days_until_order,
                })
            })
            .collect();

        actionable.sort_by(|a, b| {
            a.forecast
                .recommended_order_date
                .cmp(&b.forecast.recommended_order_date)
                .then_with(|| a.item.part_number.cmp(&b.item.part_number))
        });
        Ok(actionable)
    }

    pub fn expire_forecasts(&self, now: DateTime<Utc>) -> Result<Vec<ForecastId>, LedgerError> {
        let expired = self.forecasts.expire_stale(now)?;
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale forecasts");
        }
        Ok(expired)
    }

    fn require_item(&self, item_id: InventoryItemId) -> Result<ItemReadModel, LedgerError> {
        self.items
            .get(&item_id)
            .ok_or_else(|| LedgerError::NotFound(format!("inventory item {item_id}")))
    }
}

impl<S, B> StockLedger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Ledger over a store that may already hold history. Every stream is
    /// replayed into the read models and the part number index before the
    /// ledger accepts requests.
    pub fn restore(store: S, bus: B, config: LedgerConfig) -> Result<Self, LedgerError> {
        let ledger = Self::new(store, bus, config);
        let history = ledger.store().load_all()?;
        ledger.rebuild_read_models(history.iter().map(StoredEvent::to_envelope))?;
        Ok(ledger)
    }

    /// [`restore`](Self::restore) with configuration from the process
    /// environment (see [`LedgerConfig::load`]).
    pub fn from_env(store: S, bus: B) -> anyhow::Result<Self> {
        Ok(Self::restore(store, bus, LedgerConfig::load()?)?)
    }

    pub fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.dispatcher.bus().subscribe()
    }

    /// Register a new item. Part numbers are unique, ignoring case and
    /// surrounding whitespace, and stay reserved after deactivation.
    pub fn create_item(&self, request: NewItem) -> Result<ItemReadModel, LedgerError> {
        let key = part_number_key(&request.part_number);
        let mut index = self
            .part_numbers
            .lock()
            .map_err(|_| LedgerError::Storage("part number index lock poisoned".into()))?;
        if let Some(existing) = index.get(&key) {
            return Err(LedgerError::Conflict(format!(
                "part number '{}' is already used by item {existing}",
                request.part_number.trim()
            )));
        }

        let item_id = InventoryItemId::generate();
        let command = InventoryCommand::CreateItem(CreateItem {
            item_id,
            part_number: request.part_number.trim().to_string(),
            material: request.material,
            description: request.description,
            unit: request.unit,
            location: request.location,
            supplier_id: request.supplier_id,
            levels: request.levels,
            initial_stock: request.initial_stock,
            unit_cost: request.unit_cost,
            initial_movement_id: MovementId::new(),
            created_by: request.created_by,
            occurred_at: request.occurred_at.unwrap_or_else(Utc::now),
        });
        // A publish failure comes after the append, so the number is taken.
        let dispatched = self.dispatch(item_id, &command);
        if matches!(dispatched, Ok(_) | Err(LedgerError::Publish(_))) {
            index.insert(key, item_id);
        }
        dispatched?;

        let item = self.require_item(item_id)?;
        info!(
            item_id = %item_id,
            part_number = %item.part_number,
            current_stock = item.current_stock,
            status = %item.status,
            "inventory item created"
        );
        Ok(item)
    }

    /// Apply one stock movement atomically: the item's stock, its status and
    /// the ledger entry change together or not at all.
    pub fn record_movement(&self, request: MovementRequest) -> Result<MovementReceipt, LedgerError> {
        let item_id = request.item_id;
        let movement_id = request.movement_id.unwrap_or_else(MovementId::new);
        let command = InventoryCommand::RecordMovement(RecordMovement {
            item_id,
            movement_id,
            movement_type: request.movement_type,
            direction: request.direction,
            quantity: request.quantity,
            reason: request.reason,
            details: request.details,
            policy: request.policy.unwrap_or(self.config.negative_stock_policy),
            created_by: request.created_by,
            occurred_at: request.occurred_at.unwrap_or_else(Utc::now),
        });

        let dispatched = self.dispatch(item_id, &command)?;
        let movement = committed_movement(&dispatched.committed, movement_id)?;

        let mut warnings = Vec::new();
        if movement.clamped {
            warn!(
                item_id = %item_id,
                movement_id = %movement_id,
                requested = movement.requested_quantity,
                applied = movement.quantity,
                "outbound movement clamped to available stock"
            );
            warnings.push(format!(
                "requested {} but only {} were available; stock clamped to zero",
                movement.requested_quantity, movement.quantity
            ));
        }

        Ok(self.receipt(&dispatched, movement, warnings))
    }

    /// Cancel a movement with a compensating adjustment.
    pub fn reverse_movement(
        &self,
        item_id: InventoryItemId,
        movement_id: MovementId,
        reason: impl Into<String>,
        created_by: Option<manuerp_core::UserId>,
    ) -> Result<MovementReceipt, LedgerError> {
        let reversal_movement_id = MovementId::new();
        let command = InventoryCommand::ReverseMovement(ReverseMovement {
            item_id,
            movement_id,
            reversal_movement_id,
            reason: reason.into(),
            created_by,
            occurred_at: Utc::now(),
        });

        let dispatched = self.dispatch(item_id, &command)?;
        let movement = committed_movement(&dispatched.committed, reversal_movement_id)?;
        info!(
            item_id = %item_id,
            reversed = %movement_id,
            compensation = %reversal_movement_id,
            "movement reversed"
        );
        Ok(self.receipt(&dispatched, movement, vec![]))
    }

    pub fn update_stock_levels(
        &self,
        item_id: InventoryItemId,
        levels: StockLevels,
    ) -> Result<ItemReadModel, LedgerError> {
        let command = InventoryCommand::UpdateStockLevels(UpdateStockLevels {
            item_id,
            levels,
            occurred_at: Utc::now(),
        });
        self.dispatch(item_id, &command)?;
        self.require_item(item_id)
    }

    /// Soft delete. History stays; further movements fail with `NotFound`.
    pub fn deactivate_item(&self, item_id: InventoryItemId) -> Result<(), LedgerError> {
        let command = InventoryCommand::DeactivateItem(DeactivateItem {
            item_id,
            occurred_at: Utc::now(),
        });
        self.dispatch(item_id, &command)?;
        info!(item_id = %item_id, "inventory item deactivated");
        Ok(())
    }

    /// Replay the item's movements from zero and return the resulting stock.
    ///
    /// Fails if any movement's `previous_stock` disagrees with the running
    /// total or its snapshot disagrees with its own quantity.
    pub fn reconstruct_stock(&self, item_id: InventoryItemId) -> Result<u64, LedgerError> {
        let history = self.dispatcher.store().load_stream(item_id.0)?;
        if history.is_empty() {
            return Err(LedgerError::NotFound(format!("inventory item {item_id}")));
        }

        let mut stock: i128 = 0;
        for stored in &history {
            let InventoryEvent::MovementRecorded(m) = decode(stored)? else {
                continue;
            };
            if i128::from(m.previous_stock) != stock || !m.is_consistent() {
                return Err(LedgerError::Inconsistent(format!(
                    "movement {} at sequence {} breaks the stock chain (running total {stock}, recorded {} -> {})",
                    m.movement_id, stored.sequence_number, m.previous_stock, m.new_stock
                )));
            }
            stock += m.signed_quantity();
        }

        let stock = u64::try_from(stock)
            .map_err(|_| LedgerError::Inconsistent(format!("reconstructed stock {stock} is negative")))?;

        let item = self
            .dispatcher
            .load(item_id.0, |id| InventoryItem::empty(InventoryItemId::new(id)))?;
        if item.current_stock() != stock {
            return Err(LedgerError::Inconsistent(format!(
                "item {item_id} holds {} but its movements sum to {stock}",
                item.current_stock()
            )));
        }
        Ok(stock)
    }

    pub fn recalculate_forecast(
        &self,
        item_id: InventoryItemId,
        options: ForecastOptions,
    ) -> Result<Forecast, LedgerError> {
        self.recalculate_forecast_at(item_id, options, Utc::now())
    }

    /// Compute a fresh forecast from the movement history and make it the
    /// item's active one. The forecast it replaces is scored against the
    /// usage observed since it became valid.
    pub fn recalculate_forecast_at(
        &self,
        item_id: InventoryItemId,
        options: ForecastOptions,
        as_of: DateTime<Utc>,
    ) -> Result<Forecast, LedgerError> {
        let item = self.require_item(item_id)?;
        if !item.is_active {
            return Err(LedgerError::NotFound(format!("inventory item {item_id}")));
        }

        let lead_time_days = item
            .supplier_id
            .and_then(|s| self.suppliers.lead_time_days(s))
            .unwrap_or(self.config.default_lead_time_days);
        let history = self.forecasts.for_item(item_id.0)?;

        let mut job = ForecastJob::new(UsageHistory {
            item_id: item_id.0,
            current_stock: item.current_stock,
            max_stock: item.levels.max_stock,
            samples: self.movements.usage_samples(item_id),
        })
        .with_seasonal_factor(options.seasonal_factor)
        .with_trend_factor(options.trend_factor)
        .with_lead_time_days(lead_time_days)
        .with_lookback_months(self.config.forecast_lookback_months)
        .with_validity_months(self.config.forecast_validity_months)
        .with_historical_mape(mean_mape(&history));
        if let Some(target) = options.target_stock {
            job = job.with_target_stock(target);
        }
        let draft = job.run(as_of)?;

        let evaluate = |previous: &Forecast| {
            let range = DateRange::new(previous.valid_from, as_of);
            let used = self.movements.usage_in(item_id, range);
            let elapsed_days = (as_of - previous.valid_from).num_seconds().max(0) as f64 / 86_400.0;
            let months = (elapsed_days / DAYS_PER_MONTH).max(1.0);
            previous.evaluate(used as f64 / months, as_of)
        };
        let promotion = self.forecasts.promote(draft, &evaluate)?;

        let active = promotion.active;
        info!(
            item_id = %item_id,
            forecast_id = %active.id,
            methodology = ?active.methodology,
            confidence = active.confidence,
            superseded = promotion.superseded.is_some(),
            "forecast recalculated"
        );
        Ok(active)
    }

    /// Rebuild both read models and the part number index from `envelopes`.
    pub fn rebuild_read_models(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), LedgerError> {
        let mut index = self
            .part_numbers
            .lock()
            .map_err(|_| LedgerError::Storage("part number index lock poisoned".into()))?;
        let envelopes: Vec<_> = envelopes.into_iter().collect();

        self.items.rebuild_from_scratch(envelopes.iter().cloned())?;
        self.movements.rebuild_from_scratch(envelopes)?;

        index.clear();
        for item in self.items.list() {
            index.insert(part_number_key(&item.part_number), item.item_id);
        }
        info!(items = index.len(), "read models rebuilt");
        Ok(())
    }

    fn dispatch(
        &self,
        item_id: InventoryItemId,
        command: &InventoryCommand,
    ) -> Result<Dispatched<InventoryItem>, LedgerError> {
        let gate = self.write_gate(item_id)?;
        let _serialized = gate.lock().unwrap_or_else(PoisonError::into_inner);

        let result = self.dispatcher.dispatch(
            item_id.0,
            INVENTORY_ITEM_AGGREGATE,
            command,
            |id| InventoryItem::empty(InventoryItemId::new(id)),
        );
        // A publish failure happens after the append, so the events are committed.
        if matches!(result, Ok(_) | Err(DispatchError::Publish(_))) {
            self.catch_up(item_id)?;
        }
        Ok(result?)
    }

    fn write_gate(&self, item_id: InventoryItemId) -> Result<Arc<Mutex<()>>, LedgerError> {
        let mut gates = self
            .write_gates
            .lock()
            .map_err(|_| LedgerError::Storage("write gate table lock poisoned".into()))?;
        Ok(Arc::clone(gates.entry(item_id).or_default()))
    }

    /// Bring both read models up to the item's stored stream.
    fn catch_up(&self, item_id: InventoryItemId) -> Result<(), LedgerError> {
        let from = self.items.position(item_id).min(self.movements.position(item_id));
        let history = self.dispatcher.store().load_stream(item_id.0)?;
        let mut applied = 0usize;
        for stored in history.iter().filter(|e| e.sequence_number > from) {
            let envelope = stored.to_envelope();
            self.items.apply_envelope(&envelope)?;
            self.movements.apply_envelope(&envelope)?;
            applied += 1;
        }
        debug!(item_id = %item_id, from, applied, "read models caught up");
        Ok(())
    }

    fn receipt(
        &self,
        dispatched: &Dispatched<InventoryItem>,
        movement: StockMovement,
        warnings: Vec<String>,
    ) -> MovementReceipt {
        let levels = dispatched.aggregate.levels();
        MovementReceipt {
            previous_status: levels.status_for(movement.previous_stock),
            status: levels.status_for(movement.new_stock),
            movement,
            warnings,
            attempts: dispatched.attempts,
        }
    }
}

fn part_number_key(part_number: &str) -> String {
    part_number.trim().to_lowercase()
}

fn decode(stored: &StoredEvent) -> Result<InventoryEvent, LedgerError> {
    serde_json::from_value(stored.payload.clone()).map_err(|e| {
        LedgerError::Inconsistent(format!(
            "undecodable event at sequence {}: {e}",
            stored.sequence_number
        ))
    })
}

fn committed_movement(
    committed: &[StoredEvent],
    movement_id: MovementId,
) -> Result<StockMovement, LedgerError> {
    for stored in committed {
        if let InventoryEvent::MovementRecorded(m) = decode(stored)? {
            if m.movement_id == movement_id {
                return Ok(m);
            }
        }
    }
    Err(LedgerError::Inconsistent(format!(
        "movement {movement_id} missing from committed events"
    )))
}
