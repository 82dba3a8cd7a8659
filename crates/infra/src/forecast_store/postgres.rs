//! Postgres-backed forecast store.
//!
//! One row per forecast in `ledger_forecasts`. The whole record lives in the
//! `body` column; `item_id`, `status` and `generated_at` are copied out for
//! lookups. A partial unique index keeps at most one active row per item, so
//! two racing promotions cannot both win.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use manuerp_core::AggregateId;
use manuerp_forecast::{Forecast, ForecastAccuracy, ForecastId, ForecastStatus};

use super::{ForecastStore, ForecastStoreError, Promotion};
use crate::blocking::block_on;

/// DDL for the forecast table. Idempotent; run by [`PostgresForecastStore::ensure_schema`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_forecasts (
    forecast_id  UUID        PRIMARY KEY,
    item_id      UUID        NOT NULL,
    status       TEXT        NOT NULL,
    generated_at TIMESTAMPTZ NOT NULL,
    body         JSONB       NOT NULL
);
CREATE INDEX IF NOT EXISTS ledger_forecasts_by_item
    ON ledger_forecasts (item_id, generated_at);
CREATE UNIQUE INDEX IF NOT EXISTS ledger_forecasts_one_active
    ON ledger_forecasts (item_id) WHERE status = 'active';
"#;

#[derive(Debug, Clone)]
pub struct PostgresForecastStore {
    pool: Arc<PgPool>,
}

impl PostgresForecastStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), ForecastStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch(
        &self,
        sql: &str,
        bind: Option<uuid::Uuid>,
    ) -> Result<Vec<Forecast>, ForecastStoreError> {
        let mut query = sqlx::query(sql);
        if let Some(id) = bind {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_forecasts", e))?;
        rows.iter().map(forecast_from_row).collect()
    }

    #[instrument(skip(self, draft, evaluate), fields(item_id = %draft.item_id, forecast_id = %draft.id), err)]
    pub async fn promote_forecast(
        &self,
        mut draft: Forecast,
        evaluate: &dyn Fn(&Forecast) -> ForecastAccuracy,
    ) -> Result<Promotion, ForecastStoreError> {
        draft.activate()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            "SELECT body FROM ledger_forecasts WHERE item_id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(draft.item_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_active_forecast", e))?;

        let superseded = match row {
            Some(row) => {
                let mut previous = forecast_from_row(&row)?;
                previous.accuracy = Some(evaluate(&previous));
                previous.supersede(draft.id)?;
                update(&mut tx, &previous).await?;
                Some(previous)
            }
            None => None,
        };
        insert(&mut tx, &draft).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Promotion {
            active: draft,
            superseded,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn expire_stale_forecasts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ForecastId>, ForecastStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let rows = sqlx::query("SELECT body FROM ledger_forecasts WHERE status = 'active' FOR UPDATE")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_active_forecasts", e))?;

        let mut expired = Vec::new();
        for row in &rows {
            let mut forecast = forecast_from_row(row)?;
            if !forecast.is_stale_at(now) {
                continue;
            }
            forecast.expire(now)?;
            update(&mut tx, &forecast).await?;
            expired.push(forecast.id);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(expired)
    }
}

async fn insert(tx: &mut Transaction<'_, Postgres>, forecast: &Forecast) -> Result<(), ForecastStoreError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_forecasts (forecast_id, item_id, status, generated_at, body)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(forecast.id.as_uuid())
    .bind(forecast.item_id.as_uuid())
    .bind(status_label(forecast.status))
    .bind(forecast.generated_at)
    .bind(to_body(forecast)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_forecast", e))?;
    Ok(())
}

async fn update(tx: &mut Transaction<'_, Postgres>, forecast: &Forecast) -> Result<(), ForecastStoreError> {
    sqlx::query("UPDATE ledger_forecasts SET status = $2, body = $3 WHERE forecast_id = $1")
        .bind(forecast.id.as_uuid())
        .bind(status_label(forecast.status))
        .bind(to_body(forecast)?)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_forecast", e))?;
    Ok(())
}

/// Same spelling as the serialized `ForecastStatus`.
fn status_label(status: ForecastStatus) -> &'static str {
    match status {
        ForecastStatus::Draft => "draft",
        ForecastStatus::Active => "active",
        ForecastStatus::Superseded => "superseded",
        ForecastStatus::Expired => "expired",
    }
}

fn to_body(forecast: &Forecast) -> Result<JsonValue, ForecastStoreError> {
    serde_json::to_value(forecast)
        .map_err(|e| ForecastStoreError::Backend(format!("forecast {} not serializable: {e}", forecast.id)))
}

fn forecast_from_row(row: &PgRow) -> Result<Forecast, ForecastStoreError> {
    let body: JsonValue = row
        .try_get("body")
        .map_err(|e| ForecastStoreError::Backend(format!("failed to read forecast row: {e}")))?;
    serde_json::from_value(body)
        .map_err(|e| ForecastStoreError::Backend(format!("undecodable forecast row: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ForecastStoreError {
    match err {
        // Only the one-active-per-item index can be violated by a promotion.
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            ForecastStoreError::Transition(format!(
                "another forecast became active concurrently ({operation})"
            ))
        }
        sqlx::Error::Database(db_err) => {
            ForecastStoreError::Backend(format!("database error in {operation}: {}", db_err.message()))
        }
        other => ForecastStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

impl ForecastStore for PostgresForecastStore {
    fn get(&self, id: ForecastId) -> Result<Option<Forecast>, ForecastStoreError> {
        let found = block_on(self.fetch(
            "SELECT body FROM ledger_forecasts WHERE forecast_id = $1",
            Some(*id.as_uuid()),
        ))??;
        Ok(found.into_iter().next())
    }

    fn for_item(&self, item_id: AggregateId) -> Result<Vec<Forecast>, ForecastStoreError> {
        block_on(self.fetch(
            "SELECT body FROM ledger_forecasts WHERE item_id = $1 ORDER BY generated_at, forecast_id",
            Some(*item_id.as_uuid()),
        ))?
    }

    fn active_for(&self, item_id: AggregateId) -> Result<Option<Forecast>, ForecastStoreError> {
        let found = block_on(self.fetch(
            "SELECT body FROM ledger_forecasts WHERE item_id = $1 AND status = 'active'",
            Some(*item_id.as_uuid()),
        ))??;
        Ok(found.into_iter().next())
    }

    fn active(&self) -> Result<Vec<Forecast>, ForecastStoreError> {
        block_on(self.fetch(
            "SELECT body FROM ledger_forecasts WHERE status = 'active' ORDER BY item_id, generated_at",
            None,
        ))?
    }

    fn promote(
        &self,
        draft: Forecast,
        evaluate: &dyn Fn(&Forecast) -> ForecastAccuracy,
    ) -> Result<Promotion, ForecastStoreError> {
        block_on(self.promote_forecast(draft, evaluate))?
    }

    fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<ForecastId>, ForecastStoreError> {
        block_on(self.expire_stale_forecasts(now))?
    }
}
