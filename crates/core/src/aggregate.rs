//! Aggregate contract for event-sourced domain models.

use crate::error::{DomainError, DomainResult};

/// Identity + version of an aggregate root.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far; equals the stream revision once rehydrated.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation used when appending to a stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append regardless of the current revision.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must be at exactly this revision.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for a stream that was loaded at `version` (0 = empty).
    pub fn from_loaded(version: u64) -> Self {
        if version == 0 {
            Self::NoStream
        } else {
            Self::Exact(version)
        }
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => actual == 0,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale stream version (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Decide/evolve split for event-sourced aggregates.
///
/// `handle` inspects state and returns the events a command produces without
/// touching state; `apply` folds one event into state. Neither may perform IO,
/// so the same history always rebuilds the same aggregate.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Fold one event into state. Implementations bump `version()` by one.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events `command` produces against the current state.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_stream_only_matches_zero() {
        assert!(ExpectedVersion::NoStream.matches(0));
        assert!(!ExpectedVersion::NoStream.matches(1));
    }

    #[test]
    fn from_loaded_maps_empty_stream_to_no_stream() {
        assert_eq!(ExpectedVersion::from_loaded(0), ExpectedVersion::NoStream);
        assert_eq!(ExpectedVersion::from_loaded(4), ExpectedVersion::Exact(4));
    }

    #[test]
    fn check_reports_conflict_on_stale_version() {
        let err = ExpectedVersion::Exact(2).check(3).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(ExpectedVersion::Any.check(99).is_ok());
    }
}
