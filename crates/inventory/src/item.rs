use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use manuerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, uuid_newtype};
use manuerp_events::Event;

use crate::movement::{
    Direction, MovementDetails, MovementId, MovementType, NegativeStockPolicy, StockMovement,
    weighted_average,
};
use crate::status::{StockStatus, derive_status};

/// Stream type name used when persisting item events.
pub const INVENTORY_ITEM_AGGREGATE: &str = "inventory.item";

/// Inventory item identifier (the item's stream id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryItemId(pub AggregateId);

impl InventoryItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for InventoryItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Reference to a supplier record owned by the purchasing side.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(Uuid);

uuid_newtype!(SupplierId, "SupplierId");

/// Stock thresholds that drive status derivation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub min_stock: u64,
    pub max_stock: u64,
    pub reorder_point: u64,
}

impl StockLevels {
    pub fn new(min_stock: u64, reorder_point: u64, max_stock: u64) -> Self {
        Self {
            min_stock,
            max_stock,
            reorder_point,
        }
    }

    /// `min_stock <= max_stock` and `reorder_point <= max_stock`, with a non-zero max.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.max_stock == 0 {
            return Err(DomainError::validation("max_stock must be positive"));
        }
        if self.min_stock > self.max_stock {
            return Err(DomainError::validation(format!(
                "min_stock ({}) cannot exceed max_stock ({})",
                self.min_stock, self.max_stock
            )));
        }
        if self.reorder_point > self.max_stock {
            return Err(DomainError::validation(format!(
                "reorder_point ({}) cannot exceed max_stock ({})",
                self.reorder_point, self.max_stock
            )));
        }
        Ok(())
    }

    pub fn status_for(&self, current_stock: u64) -> StockStatus {
        derive_status(current_stock, self.reorder_point, self.max_stock)
    }
}

/// What the aggregate remembers about each of its movements.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct LedgerMark {
    direction: Direction,
    quantity: u64,
    unit_cost: u64,
    is_reversal: bool,
    reversed_by: Option<MovementId>,
}

/// Aggregate root: InventoryItem.
///
/// `current_stock` only changes by applying `MovementRecorded`; `status` is
/// re-derived every time stock or thresholds change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    id: InventoryItemId,
    part_number: String,
    material: String,
    description: Option<String>,
    unit: String,
    location: Option<String>,
    supplier_id: Option<SupplierId>,
    levels: StockLevels,
    current_stock: u64,
    average_cost: u64,
    status: StockStatus,
    is_active: bool,
    movements: HashMap<MovementId, LedgerMark>,
    version: u64,
    created: bool,
}

impl InventoryItem {
    /// Not-yet-created instance, ready for rehydration.
    pub fn empty(id: InventoryItemId) -> Self {
        Self {
            id,
            part_number: String::new(),
            material: String::new(),
            description: None,
            unit: String::new(),
            location: None,
            supplier_id: None,
            levels: StockLevels::default(),
            current_stock: 0,
            average_cost: 0,
            status: StockStatus::OutOfStock,
            is_active: false,
            movements: HashMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InventoryItemId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn part_number(&self) -> &str {
        &self.part_number
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn levels(&self) -> StockLevels {
        self.levels
    }

    pub fn current_stock(&self) -> u64 {
        self.current_stock
    }

    pub fn average_cost(&self) -> u64 {
        self.average_cost
    }

    pub fn status(&self) -> StockStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn movement_count(&self) -> usize {
        self.movements.len()
    }

    pub fn reversed_by(&self, movement_id: MovementId) -> Option<MovementId> {
        self.movements.get(&movement_id).and_then(|m| m.reversed_by)
    }

    fn refresh_status(&mut self) {
        self.status = self.levels.status_for(self.current_stock);
    }
}

impl AggregateRoot for InventoryItem {
    type Id = InventoryItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateItem. A non-zero `initial_stock` is booked as an `initial` movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItem {
    pub item_id: InventoryItemId,
    pub part_number: String,
    pub material: String,
    pub description: Option<String>,
    pub unit: String,
    pub location: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub levels: StockLevels,
    pub initial_stock: u64,
    pub unit_cost: Option<u64>,
    pub initial_movement_id: MovementId,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMovement.
///
/// `direction` is required for adjustments and must agree with the type's
/// direction otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub item_id: InventoryItemId,
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub direction: Option<Direction>,
    pub quantity: u64,
    pub reason: String,
    pub details: MovementDetails,
    pub policy: NegativeStockPolicy,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseMovement (append a compensating entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseMovement {
    pub item_id: InventoryItemId,
    pub movement_id: MovementId,
    pub reversal_movement_id: MovementId,
    pub reason: String,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateStockLevels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStockLevels {
    pub item_id: InventoryItemId,
    pub levels: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateItem (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateItem {
    pub item_id: InventoryItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    CreateItem(CreateItem),
    RecordMovement(RecordMovement),
    ReverseMovement(ReverseMovement),
    UpdateStockLevels(UpdateStockLevels),
    DeactivateItem(DeactivateItem),
}

impl InventoryCommand {
    pub fn item_id(&self) -> InventoryItemId {
        match self {
            InventoryCommand::CreateItem(c) => c.item_id,
            InventoryCommand::RecordMovement(c) => c.item_id,
            InventoryCommand::ReverseMovement(c) => c.item_id,
            InventoryCommand::UpdateStockLevels(c) => c.item_id,
            InventoryCommand::DeactivateItem(c) => c.item_id,
        }
    }
}

/// Event: ItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub item_id: InventoryItemId,
    pub part_number: String,
    pub material: String,
    pub description: Option<String>,
    pub unit: String,
    pub location: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub levels: StockLevels,
    pub average_cost: u64,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementReversed (marks the original entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReversed {
    pub item_id: InventoryItemId,
    pub movement_id: MovementId,
    pub reversal_movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockLevelsChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevelsChanged {
    pub item_id: InventoryItemId,
    pub levels: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDeactivated {
    pub item_id: InventoryItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ItemCreated(ItemCreated),
    MovementRecorded(StockMovement),
    MovementReversed(MovementReversed),
    StockLevelsChanged(StockLevelsChanged),
    ItemDeactivated(ItemDeactivated),
}

impl InventoryEvent {
    pub fn item_id(&self) -> InventoryItemId {
        match self {
            InventoryEvent::ItemCreated(e) => e.item_id,
            InventoryEvent::MovementRecorded(e) => e.item_id,
            InventoryEvent::MovementReversed(e) => e.item_id,
            InventoryEvent::StockLevelsChanged(e) => e.item_id,
            InventoryEvent::ItemDeactivated(e) => e.item_id,
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ItemCreated(_) => "inventory.item.created",
            InventoryEvent::MovementRecorded(_) => "inventory.movement.recorded",
            InventoryEvent::MovementReversed(_) => "inventory.movement.reversed",
            InventoryEvent::StockLevelsChanged(_) => "inventory.item.levels_changed",
            InventoryEvent::ItemDeactivated(_) => "inventory.item.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ItemCreated(e) => e.occurred_at,
            InventoryEvent::MovementRecorded(e) => e.occurred_at,
            InventoryEvent::MovementReversed(e) => e.occurred_at,
            InventoryEvent::StockLevelsChanged(e) => e.occurred_at,
            InventoryEvent::ItemDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryItem {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ItemCreated(e) => {
                self.id = e.item_id;
                self.part_number = e.part_number.clone();
                self.material = e.material.clone();
                self.description = e.description.clone();
                self.unit = e.unit.clone();
                self.location = e.location.clone();
                self.supplier_id = e.supplier_id;
                self.levels = e.levels;
                self.current_stock = 0;
                self.average_cost = e.average_cost;
                self.is_active = true;
                self.created = true;
            }
            InventoryEvent::MovementRecorded(m) => {
                if m.affects_average_cost() {
                    self.average_cost =
                        weighted_average(m.previous_stock, self.average_cost, m.quantity, m.unit_cost);
                }
                self.current_stock = m.new_stock;
                self.movements.insert(
                    m.movement_id,
                    LedgerMark {
                        direction: m.direction,
                        quantity: m.quantity,
                        unit_cost: m.unit_cost,
                        is_reversal: m.reversal_of.is_some(),
                        reversed_by: None,
                    },
                );
            }
            InventoryEvent::MovementReversed(e) => {
                if let Some(mark) = self.movements.get_mut(&e.movement_id) {
                    mark.reversed_by = Some(e.reversal_movement_id);
                }
            }
            InventoryEvent::StockLevelsChanged(e) => {
                self.levels = e.levels;
            }
            InventoryEvent::ItemDeactivated(_) => {
                self.is_active = false;
            }
        }

        self.refresh_status();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::CreateItem(cmd) => self.handle_create(cmd),
            InventoryCommand::RecordMovement(cmd) => self.handle_record(cmd),
            InventoryCommand::ReverseMovement(cmd) => self.handle_reverse(cmd),
            InventoryCommand::UpdateStockLevels(cmd) => self.handle_levels(cmd),
            InventoryCommand::DeactivateItem(cmd) => self.handle_deactivate(cmd),
        }
    }
}

/// Resolve the stock after moving `quantity` in `direction` from `previous`.
///
/// Returns `(applied_quantity, new_stock, clamped)`.
pub fn resolve_quantity(
    previous: u64,
    direction: Direction,
    quantity: u64,
    policy: NegativeStockPolicy,
) -> Result<(u64, u64, bool), DomainError> {
    match direction {
        Direction::Inbound => {
            let new_stock = previous
                .checked_add(quantity)
                .ok_or_else(|| DomainError::validation("quantity overflows stock counter"))?;
            Ok((quantity, new_stock, false))
        }
        Direction::Outbound if quantity <= previous => Ok((quantity, previous - quantity, false)),
        Direction::Outbound => match policy {
            NegativeStockPolicy::ClampToZero if previous > 0 => Ok((previous, 0, true)),
            _ => Err(DomainError::insufficient_stock(previous, quantity)),
        },
    }
}

fn require_text(value: &str, field: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(())
}

impl InventoryItem {
    fn ensure_item_id(&self, item_id: InventoryItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self, item_id: InventoryItemId) -> Result<(), DomainError> {
        if !self.created || !self.is_active {
            return Err(DomainError::not_found(format!("inventory item {item_id}")));
        }
        self.ensure_item_id(item_id)
    }

    fn ensure_new_movement_id(&self, movement_id: MovementId) -> Result<(), DomainError> {
        if self.movements.contains_key(&movement_id) {
            return Err(DomainError::conflict(format!(
                "movement {movement_id} already recorded"
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateItem) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already exists"));
        }
        self.ensure_item_id(cmd.item_id)?;
        require_text(&cmd.part_number, "part_number")?;
        require_text(&cmd.material, "material")?;
        require_text(&cmd.unit, "unit")?;
        cmd.levels.validate()?;

        let unit_cost = cmd.unit_cost.unwrap_or(0);
        let mut events = vec![InventoryEvent::ItemCreated(ItemCreated {
            item_id: cmd.item_id,
            part_number: cmd.part_number.trim().to_string(),
            material: cmd.material.trim().to_string(),
            description: cmd.description.clone(),
            unit: cmd.unit.trim().to_string(),
            location: cmd.location.clone(),
            supplier_id: cmd.supplier_id,
            levels: cmd.levels,
            average_cost: unit_cost,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })];

        if cmd.initial_stock > 0 {
            events.push(InventoryEvent::MovementRecorded(StockMovement {
                movement_id: cmd.initial_movement_id,
                item_id: cmd.item_id,
                movement_type: MovementType::Initial,
                direction: Direction::Inbound,
                quantity: cmd.initial_stock,
                requested_quantity: cmd.initial_stock,
                previous_stock: 0,
                new_stock: cmd.initial_stock,
                unit_cost,
                reason: "initial stock".to_string(),
                details: MovementDetails {
                    unit_cost: cmd.unit_cost,
                    supplier_id: cmd.supplier_id,
                    ..MovementDetails::default()
                },
                reversal_of: None,
                clamped: false,
                created_by: cmd.created_by,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_active(cmd.item_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        require_text(&cmd.reason, "reason")?;
        if cmd.movement_type == MovementType::Initial {
            return Err(DomainError::validation(
                "initial movements are only recorded when the item is created",
            ));
        }
        self.ensure_new_movement_id(cmd.movement_id)?;

        let direction = match (cmd.movement_type, cmd.direction) {
            (MovementType::Adjustment, Some(d)) => d,
            (MovementType::Adjustment, None) => {
                return Err(DomainError::validation(
                    "adjustment requires an explicit direction",
                ));
            }
            (t, Some(d)) if d != t.default_direction() => {
                return Err(DomainError::validation(format!(
                    "movement type '{t}' cannot be {d:?}"
                )));
            }
            (t, _) => t.default_direction(),
        };

        let (applied, new_stock, clamped) =
            resolve_quantity(self.current_stock, direction, cmd.quantity, cmd.policy)?;

        Ok(vec![InventoryEvent::MovementRecorded(StockMovement {
            movement_id: cmd.movement_id,
            item_id: cmd.item_id,
            movement_type: cmd.movement_type,
            direction,
            quantity: applied,
            requested_quantity: cmd.quantity,
            previous_stock: self.current_stock,
            new_stock,
            unit_cost: cmd.details.unit_cost.unwrap_or(self.average_cost),
            reason: cmd.reason.trim().to_string(),
            details: cmd.details.clone(),
            reversal_of: None,
            clamped,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseMovement) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_active(cmd.item_id)?;
        require_text(&cmd.reason, "reason")?;

        let mark = self
            .movements
            .get(&cmd.movement_id)
            .ok_or_else(|| DomainError::not_found(format!("movement {}", cmd.movement_id)))?;
        if mark.is_reversal {
            return Err(DomainError::validation("reversal entries cannot be reversed"));
        }
        if let Some(by) = mark.reversed_by {
            return Err(DomainError::conflict(format!(
                "movement {} already reversed by {by}",
                cmd.movement_id
            )));
        }
        self.ensure_new_movement_id(cmd.reversal_movement_id)?;

        let direction = mark.direction.opposite();
        let (applied, new_stock, _) = resolve_quantity(
            self.current_stock,
            direction,
            mark.quantity,
            NegativeStockPolicy::Reject,
        )?;

        Ok(vec![
            InventoryEvent::MovementRecorded(StockMovement {
                movement_id: cmd.reversal_movement_id,
                item_id: cmd.item_id,
                movement_type: MovementType::Adjustment,
                direction,
                quantity: applied,
                requested_quantity: applied,
                previous_stock: self.current_stock,
                new_stock,
                unit_cost: mark.unit_cost,
                reason: format!("reversal of {}: {}", cmd.movement_id, cmd.reason.trim()),
                details: MovementDetails {
                    reference: Some(cmd.movement_id.to_string()),
                    ..MovementDetails::default()
                },
                reversal_of: Some(cmd.movement_id),
                clamped: false,
                created_by: cmd.created_by,
                occurred_at: cmd.occurred_at,
            }),
            InventoryEvent::MovementReversed(MovementReversed {
                item_id: cmd.item_id,
                movement_id: cmd.movement_id,
                reversal_movement_id: cmd.reversal_movement_id,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_levels(&self, cmd: &UpdateStockLevels) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_active(cmd.item_id)?;
        cmd.levels.validate()?;
        if cmd.levels == self.levels {
            return Ok(vec![]);
        }
        Ok(vec![InventoryEvent::StockLevelsChanged(StockLevelsChanged {
            item_id: cmd.item_id,
            levels: cmd.levels,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateItem) -> Result<Vec<InventoryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("inventory item {}", cmd.item_id)));
        }
        self.ensure_item_id(cmd.item_id)?;
        if !self.is_active {
            return Err(DomainError::conflict("item already deactivated"));
        }
        Ok(vec![InventoryEvent::ItemDeactivated(ItemDeactivated {
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
