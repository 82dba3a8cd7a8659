//! Forecast persistence.
//!
//! Forecasts are never deleted. An item has at most one active forecast;
//! promoting a new one supersedes the old one in the same critical section.

pub mod postgres;

pub use postgres::PostgresForecastStore;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use manuerp_core::{AggregateId, DomainError};
use manuerp_forecast::{Forecast, ForecastAccuracy, ForecastId};

#[derive(Debug, Error)]
pub enum ForecastStoreError {
    #[error("forecast not found: {0}")]
    NotFound(ForecastId),

    #[error("invalid forecast transition: {0}")]
    Transition(String),

    #[error("forecast store lock poisoned")]
    Poisoned,

    #[error("forecast storage backend failure: {0}")]
    Backend(String),
}

impl From<crate::blocking::BlockingError> for ForecastStoreError {
    fn from(value: crate::blocking::BlockingError) -> Self {
        ForecastStoreError::Backend(value.to_string())
    }
}

impl From<DomainError> for ForecastStoreError {
    fn from(value: DomainError) -> Self {
        ForecastStoreError::Transition(value.to_string())
    }
}

/// Outcome of [`ForecastStore::promote`].
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub active: Forecast,
    pub superseded: Option<Forecast>,
}

pub trait ForecastStore: Send + Sync {
    fn get(&self, id: ForecastId) -> Result<Option<Forecast>, ForecastStoreError>;

    /// All forecasts ever generated for an item, oldest first.
    fn for_item(&self, item_id: AggregateId) -> Result<Vec<Forecast>, ForecastStoreError>;

    fn active_for(&self, item_id: AggregateId) -> Result<Option<Forecast>, ForecastStoreError>;

    /// Every active forecast.
    fn active(&self) -> Result<Vec<Forecast>, ForecastStoreError>;

    /// Activate a draft forecast and supersede the item's current one.
    ///
    /// `evaluate` scores the outgoing forecast before it is superseded.
    fn promote(
        &self,
        draft: Forecast,
        evaluate: &dyn Fn(&Forecast) -> ForecastAccuracy,
    ) -> Result<Promotion, ForecastStoreError>;

    /// Expire active forecasts whose validity window ended before `now`.
    fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<ForecastId>, ForecastStoreError>;
}

impl<S> ForecastStore for Arc<S>
where
    S: ForecastStore + ?Sized,
{
    fn get(&self, id: ForecastId) -> Result<Option<Forecast>, ForecastStoreError> {
        (**self).get(id)
    }

    fn for_item(&self, item_id: AggregateId) -> Result<Vec<Forecast>, ForecastStoreError> {
        (**self).for_item(item_id)
    }

    fn active_for(&self, item_id: AggregateId) -> Result<Option<Forecast>, ForecastStoreError> {
        (**self).active_for(item_id)
    }

    fn active(&self) -> Result<Vec<Forecast>, ForecastStoreError> {
        (**self).active()
    }

    fn promote(
        &self,
        draft: Forecast,
        evaluate: &dyn Fn(&Forecast) -> ForecastAccuracy,
    ) -> Result<Promotion, ForecastStoreError> {
        (**self).promote(draft, evaluate)
    }

    fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<ForecastId>, ForecastStoreError> {
        (**self).expire_stale(now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    forecasts: HashMap<ForecastId, Forecast>,
    by_item: HashMap<AggregateId, Vec<ForecastId>>,
    active: HashMap<AggregateId, ForecastId>,
}

#[derive(Debug, Default)]
pub struct InMemoryForecastStore {
    inner: RwLock<Inner>,
}

impl InMemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForecastStore for InMemoryForecastStore {
    fn get(&self, id: ForecastId) -> Result<Option<Forecast>, ForecastStoreError> {
        let inner = self.inner.read().map_err(|_| ForecastStoreError::Poisoned)?;
        Ok(inner.forecasts.get(&id).cloned())
    }

    fn for_item(&self, item_id: AggregateId) -> Result<Vec<Forecast>, ForecastStoreError> {
        let inner = self.inner.read().map_err(|_| ForecastStoreError::Poisoned)?;
        Ok(inner
            .by_item
            .get(&item_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.forecasts.get(id).cloned())
            .collect())
    }

    fn active_for(&self, item_id: AggregateId) -> Result<Option<Forecast>, ForecastStoreError> {
        let inner = self.inner.read().map_err(|_| ForecastStoreError::Poisoned)?;
        Ok(inner
            .active
            .get(&item_id)
            .and_then(|id| inner.forecasts.get(id).cloned()))
    }

    fn active(&self) -> Result<Vec<Forecast>, ForecastStoreError> {
        let inner = self.inner.read().map_err(|_| ForecastStoreError::Poisoned)?;
        let mut out: Vec<Forecast> = inner
            .active
            .values()
            .filter_map(|id| inner.forecasts.get(id).cloned())
            .collect();
        out.sort_by_key(|f| (f.item_id, f.generated_at));
        Ok(out)
    }

    fn promote(
        &self,
        mut draft: Forecast,
        evaluate: &dyn Fn(&Forecast) -> ForecastAccuracy,
    ) -> Result<Promotion, ForecastStoreError> {
        let mut inner = self.inner.write().map_err(|_| ForecastStoreError::Poisoned)?;
        let item_id = draft.item_id;
        draft.activate()?;

        let superseded = match inner.active.get(&item_id).copied() {
            Some(previous_id) => {
                let previous = inner
                    .forecasts
                    .get_mut(&previous_id)
                    .ok_or(ForecastStoreError::NotFound(previous_id))?;
                previous.accuracy = Some(evaluate(previous));
                previous.supersede(draft.id)?;
                Some(previous.clone())
            }
            None => None,
        };

        inner.active.insert(item_id, draft.id);
        inner.by_item.entry(item_id).or_default().push(draft.id);
        inner.forecasts.insert(draft.id, draft.clone());

        Ok(Promotion {
            active: draft,
            superseded,
        })
    }

    fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<ForecastId>, ForecastStoreError> {
        let mut inner = self.inner.write().map_err(|_| ForecastStoreError::Poisoned)?;
        let stale: Vec<(AggregateId, ForecastId)> = inner
            .active
            .iter()
            .filter(|(_, id)| inner.forecasts.get(id).is_some_and(|f| f.is_stale_at(now)))
            .map(|(item, id)| (*item, *id))
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for (item_id, id) in stale {
            if let Some(f) = inner.forecasts.get_mut(&id) {
                f.expire(now)?;
            }
            inner.active.remove(&item_id);
            expired.push(id);
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use manuerp_forecast::{ForecastJob, ForecastStatus, UsageHistory, UsageSample};

    use super::*;

    fn draft(item_id: AggregateId, as_of: DateTime<Utc>) -> Forecast {
        ForecastJob::new(UsageHistory {
            item_id,
            current_stock: 40,
            max_stock: 100,
            samples: vec![UsageSample {
                occurred_at: as_of - Duration::days(20),
                quantity: 10,
            }],
        })
        .run(as_of)
        .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap()
    }

    fn perfect(f: &Forecast) -> ForecastAccuracy {
        f.evaluate(f.projected_monthly_usage, t0())
    }

    #[test]
    fn promote_supersedes_previous_and_records_accuracy() {
        let store = InMemoryForecastStore::new();
        let item = AggregateId::new();

        let first = store.promote(draft(item, t0()), &perfect).unwrap();
        assert!(first.superseded.is_none());
        assert_eq!(first.active.status, ForecastStatus::Active);

        let second = store
            .promote(draft(item, t0() + Duration::days(7)), &perfect)
            .unwrap();
        let old = second.superseded.unwrap();
        assert_eq!(old.id, first.active.id);
        assert_eq!(old.status, ForecastStatus::Superseded);
        assert_eq!(old.superseded_by, Some(second.active.id));
        assert_eq!(old.accuracy.map(|a| a.mape), Some(0.0));

        assert_eq!(store.active_for(item).unwrap().unwrap().id, second.active.id);
        assert_eq!(store.for_item(item).unwrap().len(), 2);
        assert_eq!(store.active().unwrap().len(), 1);
    }

    #[test]
    fn expire_stale_only_touches_forecasts_past_validity() {
        let store = InMemoryForecastStore::new();
        let fresh_item = AggregateId::new();
        let stale_item = AggregateId::new();

        store.promote(draft(stale_item, t0()), &perfect).unwrap();
        store
            .promote(draft(fresh_item, t0() + Duration::days(80)), &perfect)
            .unwrap();

        let now = t0() + Duration::days(100);
        let expired = store.expire_stale(now).unwrap();
        assert_eq!(expired.len(), 1);
        assert!(store.active_for(stale_item).unwrap().is_none());
        assert!(store.active_for(fresh_item).unwrap().is_some());

        let history = store.for_item(stale_item).unwrap();
        assert_eq!(history[0].status, ForecastStatus::Expired);
    }

    #[test]
    fn promoting_a_non_draft_fails() {
        let store = InMemoryForecastStore::new();
        let mut f = draft(AggregateId::new(), t0());
        f.activate().unwrap();
        assert!(matches!(
            store.promote(f, &perfect),
            Err(ForecastStoreError::Transition(_))
        ));
    }
}
