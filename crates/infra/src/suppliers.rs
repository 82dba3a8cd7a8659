//! Supplier lead times, as seen by the forecaster.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use manuerp_inventory::SupplierId;

/// Read-only view of the purchasing side's supplier records.
pub trait SupplierDirectory: Send + Sync {
    /// Days between placing an order and receiving it, if known.
    fn lead_time_days(&self, supplier_id: SupplierId) -> Option<u32>;
}

impl<D> SupplierDirectory for Arc<D>
where
    D: SupplierDirectory + ?Sized,
{
    fn lead_time_days(&self, supplier_id: SupplierId) -> Option<u32> {
        (**self).lead_time_days(supplier_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySupplierDirectory {
    lead_times: RwLock<HashMap<SupplierId, u32>>,
}

impl InMemorySupplierDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, supplier_id: SupplierId, lead_time_days: u32) {
        if let Ok(mut map) = self.lead_times.write() {
            map.insert(supplier_id, lead_time_days);
        }
    }
}

impl SupplierDirectory for InMemorySupplierDirectory {
    fn lead_time_days(&self, supplier_id: SupplierId) -> Option<u32> {
        self.lead_times.read().ok()?.get(&supplier_id).copied()
    }
}
