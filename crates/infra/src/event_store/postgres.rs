//! Postgres-backed event store.
//!
//! One row per event in `ledger_events`; the primary key
//! `(aggregate_id, sequence_number)` is what makes concurrent appends safe.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | `EventStoreError` |
//! |------------|---------------|-------------------|
//! | unique violation | `23505` | `Concurrency` |
//! | check violation | `23514` | `InvalidAppend` |
//! | other database error | any | `Backend` |
//! | pool closed, io, tls, ... | n/a | `Backend` |

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use manuerp_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, batch_stream};
use crate::blocking::block_on;

/// DDL for the event table. Idempotent; run by [`PostgresEventStore::ensure_schema`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_events (
    event_id        UUID        NOT NULL UNIQUE,
    aggregate_id    UUID        NOT NULL,
    aggregate_type  TEXT        NOT NULL,
    sequence_number BIGINT      NOT NULL CHECK (sequence_number > 0),
    event_type      TEXT        NOT NULL,
    event_version   INTEGER     NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB       NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (aggregate_id, sequence_number)
);
"#;

/// Append-only event store on Postgres.
///
/// `append` runs in a transaction: read `MAX(sequence_number)`, compare with
/// the expected version, insert. A writer that slips in between the read and
/// the insert trips the primary key and the loser gets `Concurrency`.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Load one stream in sequence order.
    #[instrument(skip(self), fields(event_count = tracing::field::Empty), err)]
    pub async fn load_events(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM ledger_events
            WHERE aggregate_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_events", e))?;

        let events = rows
            .iter()
            .map(stored_event_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("event_count", events.len());
        Ok(events)
    }

    /// Load every stream, ordered by aggregate then sequence.
    #[instrument(skip(self), fields(event_count = tracing::field::Empty), err)]
    pub async fn load_all_events(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM ledger_events
            ORDER BY aggregate_id ASC, sequence_number ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_all_events", e))?;

        let events = rows
            .iter()
            .map(stored_event_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("event_count", events.len());
        Ok(events)
    }

    /// Append a batch to one stream under an optimistic version check.
    #[instrument(
        skip(self, events),
        fields(event_count = events.len(), expected_version = ?expected_version),
        err
    )]
    pub async fn append_events(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some((aggregate_id, aggregate_type)) = batch_stream(&events)? else {
            return Ok(vec![]);
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current_version, existing_type) = check_stream_version(&mut tx, aggregate_id).await?;

        if let Some(existing) = existing_type.filter(|t| *t != aggregate_type) {
            rollback(tx).await?;
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
            )));
        }

        if !expected_version.matches(current_version) {
            rollback(tx).await?;
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current_version}"
            )));
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut next_sequence = current_version + 1;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO ledger_events (
                    event_id,
                    aggregate_id,
                    aggregate_type,
                    sequence_number,
                    event_type,
                    event_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(to_db_i64(next_sequence)?)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "concurrent append detected at sequence_number {next_sequence}"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            committed.push(StoredEvent {
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number: next_sequence,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            });
            next_sequence += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), EventStoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))
}

async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM ledger_events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Backend(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Backend(format!("failed to read aggregate_type: {e}")))?;

    Ok((current_version.max(0) as u64, aggregate_type))
}

fn stored_event_from_row(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let decode = |e: sqlx::Error| EventStoreError::Backend(format!("failed to decode event row: {e}"));

    let sequence_number: i64 = row.try_get("sequence_number").map_err(decode)?;
    let event_version: i32 = row.try_get("event_version").map_err(decode)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(decode)?,
        aggregate_id: AggregateId::from_uuid(row.try_get("aggregate_id").map_err(decode)?),
        aggregate_type: row.try_get("aggregate_type").map_err(decode)?,
        sequence_number: sequence_number.max(0) as u64,
        event_type: row.try_get("event_type").map_err(decode)?,
        event_version: event_version.max(0) as u32,
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
    })
}

fn to_db_i64(value: u64) -> Result<i64, EventStoreError> {
    i64::try_from(value)
        .map_err(|_| EventStoreError::InvalidAppend(format!("sequence_number {value} out of range")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        block_on(self.append_events(events, expected_version))?
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.load_events(aggregate_id))?
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.load_all_events())?
    }
}

#[cfg(test)]
mod tests {
    use crate::blocking::BlockingError;

    use super::*;

    #[test]
    fn schema_keys_events_by_stream_position() {
        assert!(SCHEMA.contains("PRIMARY KEY (aggregate_id, sequence_number)"));
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS ledger_events"));
    }

    #[test]
    fn sequence_numbers_beyond_bigint_are_rejected() {
        assert_eq!(to_db_i64(7).unwrap(), 7);
        assert!(matches!(
            to_db_i64(u64::MAX),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn runtime_bridge_failures_are_backend_errors() {
        let err: EventStoreError = BlockingError::CurrentThread.into();
        assert!(matches!(err, EventStoreError::Backend(_)));
    }
}
