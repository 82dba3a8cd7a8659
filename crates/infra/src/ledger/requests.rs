//! Request and response shapes of the ledger service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use manuerp_core::UserId;
use manuerp_forecast::Forecast;
use manuerp_inventory::{
    Direction, InventoryItemId, MovementDetails, MovementId, MovementType, NegativeStockPolicy,
    StockLevels, StockMovement, StockStatus, SupplierId,
};

use crate::projections::ItemReadModel;

/// Input of [`StockLedger::create_item`](super::StockLedger::create_item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub part_number: String,
    pub material: String,
    pub description: Option<String>,
    pub unit: String,
    pub location: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub levels: StockLevels,
    /// Opening balance, recorded as an `initial` movement when non-zero.
    pub initial_stock: u64,
    /// Cost of the opening balance, in cents.
    pub unit_cost: Option<u64>,
    pub created_by: Option<UserId>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewItem {
    pub fn new(
        part_number: impl Into<String>,
        material: impl Into<String>,
        unit: impl Into<String>,
        levels: StockLevels,
    ) -> Self {
        Self {
            part_number: part_number.into(),
            material: material.into(),
            description: None,
            unit: unit.into(),
            location: None,
            supplier_id: None,
            levels,
            initial_stock: 0,
            unit_cost: None,
            created_by: None,
            occurred_at: None,
        }
    }

    pub fn with_initial_stock(mut self, quantity: u64, unit_cost: u64) -> Self {
        self.initial_stock = quantity;
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_supplier(mut self, supplier_id: SupplierId) -> Self {
        self.supplier_id = Some(supplier_id);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn created_by(mut self, user: UserId) -> Self {
        self.created_by = Some(user);
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }
}

/// Input of [`StockLedger::record_movement`](super::StockLedger::record_movement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub item_id: InventoryItemId,
    pub movement_type: MovementType,
    /// Required for adjustments, ignored by every other type.
    pub direction: Option<Direction>,
    pub quantity: u64,
    pub reason: String,
    pub details: MovementDetails,
    /// Falls back to the configured policy.
    pub policy: Option<NegativeStockPolicy>,
    /// Caller-chosen id; generated when absent.
    pub movement_id: Option<MovementId>,
    pub created_by: Option<UserId>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl MovementRequest {
    pub fn new(
        item_id: InventoryItemId,
        movement_type: MovementType,
        quantity: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            item_id,
            movement_type,
            direction: None,
            quantity,
            reason: reason.into(),
            details: MovementDetails::default(),
            policy: None,
            movement_id: None,
            created_by: None,
            occurred_at: None,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_policy(mut self, policy: NegativeStockPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_details(mut self, details: MovementDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: u64) -> Self {
        self.details.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_movement_id(mut self, movement_id: MovementId) -> Self {
        self.movement_id = Some(movement_id);
        self
    }

    pub fn created_by(mut self, user: UserId) -> Self {
        self.created_by = Some(user);
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }
}

/// What a caller gets back after a movement was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReceipt {
    pub movement: StockMovement,
    pub previous_status: StockStatus,
    pub status: StockStatus,
    /// Non-fatal notes, e.g. a clamped quantity.
    pub warnings: Vec<String>,
    /// Decision attempts; above 1 means other writers got in first.
    pub attempts: u32,
}

impl MovementReceipt {
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.status
    }
}

/// Tuning knobs for a forecast run.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOptions {
    pub seasonal_factor: f64,
    pub trend_factor: f64,
    /// Replenish up to this level instead of the item's max stock.
    pub target_stock: Option<u64>,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            seasonal_factor: 1.0,
            trend_factor: 1.0,
            target_stock: None,
        }
    }
}

/// An item whose active forecast says to order soon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionableItem {
    pub item: ItemReadModel,
    pub forecast: Forecast,
    /// Negative when the order date has already passed.
    pub days_until_order: i64,
}
