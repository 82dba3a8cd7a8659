use chrono::{DateTime, Utc};

/// A domain event: an immutable, versioned fact appended to a stream.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable type name (e.g. "inventory.movement.recorded").
    fn event_type(&self) -> &'static str;

    /// Schema version of the payload.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
