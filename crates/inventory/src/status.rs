//! Stock status derivation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
    Overstock,
}

impl StockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StockStatus::InStock => "in-stock",
            StockStatus::LowStock => "low-stock",
            StockStatus::OutOfStock => "out-of-stock",
            StockStatus::Overstock => "overstock",
        }
    }

    /// Low or out of stock: the item needs replenishment.
    pub fn needs_reorder(self) -> bool {
        matches!(self, StockStatus::LowStock | StockStatus::OutOfStock)
    }
}

impl core::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as a pure function of stock and thresholds.
///
/// First match wins: out-of-stock (`== 0`), overstock (`>= max_stock`),
/// low-stock (`<= reorder_point`), otherwise in-stock.
pub fn derive_status(current_stock: u64, reorder_point: u64, max_stock: u64) -> StockStatus {
    if current_stock == 0 {
        StockStatus::OutOfStock
    } else if current_stock >= max_stock {
        StockStatus::Overstock
    } else if current_stock <= reorder_point {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundary_table() {
        // reorder = 20, max = 100
        let cases = [
            (0, StockStatus::OutOfStock),
            (1, StockStatus::LowStock),
            (20, StockStatus::LowStock),
            (21, StockStatus::InStock),
            (99, StockStatus::InStock),
            (100, StockStatus::Overstock),
            (250, StockStatus::Overstock),
        ];
        for (stock, expected) in cases {
            assert_eq!(derive_status(stock, 20, 100), expected, "stock = {stock}");
        }
    }

    #[test]
    fn reorder_point_is_inclusive() {
        assert_eq!(derive_status(20, 20, 100), StockStatus::LowStock);
    }

    #[test]
    fn overstock_wins_over_low_stock_when_thresholds_overlap() {
        // reorder >= max is rejected on write, but the function stays total.
        assert_eq!(derive_status(10, 50, 10), StockStatus::Overstock);
        assert_eq!(derive_status(0, 50, 0), StockStatus::OutOfStock);
    }

    #[test]
    fn serializes_as_kebab_case() {
        let json = serde_json::to_string(&StockStatus::OutOfStock).unwrap();
        assert_eq!(json, "\"out-of-stock\"");
        assert_eq!(StockStatus::LowStock.to_string(), "low-stock");
    }

    proptest! {
        #[test]
        fn derivation_is_idempotent(stock in 0u64..10_000, reorder in 0u64..5_000, extra in 1u64..5_000) {
            let max = reorder + extra;
            let first = derive_status(stock, reorder, max);
            let second = derive_status(stock, reorder, max);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn status_matches_thresholds(stock in 0u64..10_000, reorder in 0u64..5_000, extra in 1u64..5_000) {
            let max = reorder + extra;
            let status = derive_status(stock, reorder, max);
            match status {
                StockStatus::OutOfStock => prop_assert_eq!(stock, 0),
                StockStatus::Overstock => prop_assert!(stock >= max && stock > 0),
                StockStatus::LowStock => prop_assert!(stock > 0 && stock <= reorder && stock < max),
                StockStatus::InStock => prop_assert!(stock > reorder && stock < max),
            }
        }
    }
}
