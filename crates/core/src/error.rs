//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Only deterministic business failures live here. Every variant names the
/// rule that failed so callers can report it verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or out-of-range input (blank reason, zero quantity, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant would be broken by the requested change.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced record does not exist (or is soft-deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// An outbound change would drive stock below zero.
    #[error("insufficient stock for outbound movement (available: {available}, requested: {requested})")]
    InsufficientStock { available: u64, requested: u64 },

    /// Duplicate or stale state (already exists, already reversed, stale version).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn insufficient_stock(available: u64, requested: u64) -> Self {
        Self::InsufficientStock {
            available,
            requested,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_names_both_quantities() {
        let err = DomainError::insufficient_stock(3, 5);
        let msg = err.to_string();
        assert!(msg.contains("insufficient stock"));
        assert!(msg.contains("available: 3"));
        assert!(msg.contains("requested: 5"));
    }

    #[test]
    fn not_found_includes_subject() {
        let err = DomainError::not_found("inventory item");
        assert_eq!(err.to_string(), "not found: inventory item");
    }
}
