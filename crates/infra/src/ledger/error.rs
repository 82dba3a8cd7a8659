use thiserror::Error;

use manuerp_core::DomainError;
use manuerp_forecast::ForecastError;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStoreError;
use crate::forecast_store::ForecastStoreError;
use crate::projections::ProjectionError;

/// Errors surfaced by [`StockLedger`](super::StockLedger).
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: u64, requested: u64 },

    /// The request clashes with current state (duplicate part number, double reversal, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Concurrent writers kept winning the race for the same item.
    #[error("concurrency conflict after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    /// Stored history breaks a ledger invariant.
    #[error("ledger inconsistency: {0}")]
    Inconsistent(String),

    #[error("storage failure: {0}")]
    Storage(String),

    /// The change was stored but downstream consumers were not notified.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl LedgerError {
    /// Status code an HTTP adapter should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Validation(_) => 400,
            LedgerError::NotFound(_) => 404,
            LedgerError::InsufficientStock { .. }
            | LedgerError::Conflict(_)
            | LedgerError::ConcurrencyConflict { .. } => 409,
            LedgerError::Inconsistent(_) | LedgerError::Storage(_) | LedgerError::Publish(_) => 500,
        }
    }

    /// Same request may succeed if simply sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict { .. })
    }
}

impl From<DispatchError> for LedgerError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Validation(msg) => LedgerError::Validation(msg),
            DispatchError::NotFound(what) => LedgerError::NotFound(what),
            DispatchError::InsufficientStock {
                available,
                requested,
            } => LedgerError::InsufficientStock {
                available,
                requested,
            },
            DispatchError::Conflict(msg) => LedgerError::Conflict(msg),
            DispatchError::ConcurrencyConflict { attempts, .. } => {
                LedgerError::ConcurrencyConflict { attempts }
            }
            DispatchError::InvariantViolation(msg) | DispatchError::Deserialize(msg) => {
                LedgerError::Inconsistent(msg)
            }
            DispatchError::Store(e) => LedgerError::from(e),
            DispatchError::Publish(msg) => LedgerError::Publish(msg),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        DispatchError::from(value).into()
    }
}

impl From<EventStoreError> for LedgerError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(_) => LedgerError::ConcurrencyConflict { attempts: 1 },
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

impl From<ProjectionError> for LedgerError {
    fn from(value: ProjectionError) -> Self {
        LedgerError::Storage(value.to_string())
    }
}

impl From<ForecastError> for LedgerError {
    fn from(value: ForecastError) -> Self {
        match value {
            ForecastError::InvalidInput(msg) => LedgerError::Validation(msg),
        }
    }
}

impl From<ForecastStoreError> for LedgerError {
    fn from(value: ForecastStoreError) -> Self {
        match value {
            ForecastStoreError::Transition(msg) => LedgerError::Conflict(msg),
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(LedgerError::Validation("x".into()).http_status(), 400);
        assert_eq!(LedgerError::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            LedgerError::InsufficientStock {
                available: 1,
                requested: 2
            }
            .http_status(),
            409
        );
        assert_eq!(LedgerError::ConcurrencyConflict { attempts: 3 }.http_status(), 409);
        assert_eq!(LedgerError::Storage("x".into()).http_status(), 500);
    }

    #[test]
    fn domain_errors_keep_their_category() {
        let err: LedgerError = DomainError::insufficient_stock(20, 25).into();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                available: 20,
                requested: 25
            }
        ));

        let err: LedgerError = DomainError::validation("reason is required").into();
        assert_eq!(err.to_string(), "validation failed: reason is required");
    }
}
