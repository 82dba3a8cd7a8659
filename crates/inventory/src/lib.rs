//! Inventory domain (event-sourced).
//!
//! An inventory item's event stream is its stock ledger: every change to
//! `current_stock` is a `MovementRecorded` event carrying a before/after
//! snapshot. Everything here is deterministic domain logic with no IO.

pub mod item;
pub mod movement;
pub mod status;

pub use item::{
    CreateItem, DeactivateItem, InventoryCommand, InventoryEvent, InventoryItem, InventoryItemId,
    ItemCreated, ItemDeactivated, MovementReversed, RecordMovement, ReverseMovement,
    StockLevels, StockLevelsChanged, SupplierId, UpdateStockLevels, INVENTORY_ITEM_AGGREGATE,
};
pub use movement::{
    Direction, MovementDetails, MovementId, MovementType, NegativeStockPolicy, StockMovement,
    weighted_average,
};
pub use status::{StockStatus, derive_status};
