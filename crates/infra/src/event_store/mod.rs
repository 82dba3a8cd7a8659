//! Append-only event store boundary.
//!
//! An inventory item's stream is its stock ledger, so the store's optimistic
//! version check is what makes "read stock, decide, append movement" atomic.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
