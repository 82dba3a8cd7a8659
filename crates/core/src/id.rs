//! Strongly-typed identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an authenticated caller (attribution on items and movements).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of an aggregate root (one event stream per aggregate).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

/// Implements constructors, `Display`, `FromStr` and `Uuid` conversions for a
/// `struct Name(Uuid)` newtype. Exported so domain crates can declare their
/// own record ids the same way.
#[macro_export]
macro_rules! uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Fresh time-ordered (v7) identifier. Tests should prefer explicit ids.
            pub fn new() -> Self {
                Self(::uuid::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &::uuid::Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::core::fmt::Display for $t {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<::uuid::Uuid> for $t {
            fn from(value: ::uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for ::uuid::Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl ::core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = <::uuid::Uuid as ::core::str::FromStr>::from_str(s)
                    .map_err(|e| $crate::DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(UserId, "UserId");
uuid_newtype!(AggregateId, "AggregateId");

impl AggregateId {
    /// Parse without going through the macro's generic `FromStr` (handy in tests).
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Self::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        let id = AggregateId::new();
        let parsed: AggregateId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_id_is_invalid_id_error() {
        let err = AggregateId::parse("not-a-uuid").unwrap_err();
        match err {
            DomainError::InvalidId(msg) => assert!(msg.starts_with("AggregateId")),
            other => panic!("expected InvalidId, got {other:?}"),
        }
    }
}
