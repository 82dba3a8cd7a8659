//! Movement types and the immutable movement record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use manuerp_core::{DomainError, UserId, uuid_newtype};

use crate::item::{InventoryItemId, SupplierId};

/// Identifier of a single ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

uuid_newtype!(MovementId, "MovementId");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    In,
    Out,
    Transfer,
    Adjustment,
    Return,
    Scrap,
    Initial,
}

impl MovementType {
    pub const ALL: [MovementType; 7] = [
        MovementType::In,
        MovementType::Out,
        MovementType::Transfer,
        MovementType::Adjustment,
        MovementType::Return,
        MovementType::Scrap,
        MovementType::Initial,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Transfer => "transfer",
            MovementType::Adjustment => "adjustment",
            MovementType::Return => "return",
            MovementType::Scrap => "scrap",
            MovementType::Initial => "initial",
        }
    }

    /// Direction implied by the type alone. Adjustments must state their own
    /// direction; recording one without it is a validation error.
    pub fn default_direction(self) -> Direction {
        match self {
            MovementType::In | MovementType::Return | MovementType::Initial => Direction::Inbound,
            MovementType::Out
            | MovementType::Transfer
            | MovementType::Adjustment
            | MovementType::Scrap => Direction::Outbound,
        }
    }

    /// Whether an inbound movement of this type contributes to average cost.
    pub fn affects_average_cost(self) -> bool {
        matches!(
            self,
            MovementType::In | MovementType::Return | MovementType::Initial
        )
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Inbound => Direction::Outbound,
            Direction::Outbound => Direction::Inbound,
        }
    }

    pub fn signed(self, quantity: u64) -> i128 {
        match self {
            Direction::Inbound => i128::from(quantity),
            Direction::Outbound => -i128::from(quantity),
        }
    }
}

/// What to do when an outbound movement asks for more than is on hand.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegativeStockPolicy {
    /// Fail with `InsufficientStock`; stock is untouched.
    #[default]
    Reject,
    /// Apply only what is available and flag the movement as clamped.
    ClampToZero,
}

impl core::str::FromStr for NegativeStockPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "clamp" | "clamp-to-zero" | "clamp_to_zero" => Ok(Self::ClampToZero),
            other => Err(DomainError::validation(format!(
                "unknown negative stock policy '{other}'"
            ))),
        }
    }
}

/// Optional metadata attached to a movement request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDetails {
    /// Unit cost in minor currency units; defaults to the item's average cost.
    pub unit_cost: Option<u64>,
    pub reference: Option<String>,
    pub work_order: Option<String>,
    pub supplier_id: Option<SupplierId>,
}

/// One append-only ledger entry with its before/after snapshot.
///
/// `new_stock - previous_stock == direction.signed(quantity)` holds for every
/// recorded movement. When a clamp applied, `quantity < requested_quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub movement_id: MovementId,
    pub item_id: InventoryItemId,
    pub movement_type: MovementType,
    pub direction: Direction,
    pub quantity: u64,
    pub requested_quantity: u64,
    pub previous_stock: u64,
    pub new_stock: u64,
    pub unit_cost: u64,
    pub reason: String,
    pub details: MovementDetails,
    /// Set on compensating entries: the movement this one reverses.
    pub reversal_of: Option<MovementId>,
    pub clamped: bool,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn signed_quantity(&self) -> i128 {
        self.direction.signed(self.quantity)
    }

    pub fn total_cost(&self) -> u64 {
        self.quantity.saturating_mul(self.unit_cost)
    }

    /// The snapshot agrees with the signed quantity.
    pub fn is_consistent(&self) -> bool {
        i128::from(self.new_stock) - i128::from(self.previous_stock) == self.signed_quantity()
    }

    /// Inbound receipt whose unit cost feeds the weighted average.
    pub fn affects_average_cost(&self) -> bool {
        self.direction == Direction::Inbound
            && self.movement_type.affects_average_cost()
            && self.reversal_of.is_none()
    }
}

/// Weighted average unit cost after receiving `quantity` at `unit_cost` on
/// top of `on_hand` units valued at `avg_cost`. Rounds half up.
pub fn weighted_average(on_hand: u64, avg_cost: u64, quantity: u64, unit_cost: u64) -> u64 {
    let total_qty = u128::from(on_hand) + u128::from(quantity);
    if total_qty == 0 {
        return avg_cost;
    }
    let value =
        u128::from(on_hand) * u128::from(avg_cost) + u128::from(quantity) * u128::from(unit_cost);
    let avg = (value + total_qty / 2) / total_qty;
    u64::try_from(avg).unwrap_or(u64::MAX)
}
