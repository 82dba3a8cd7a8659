//! Forecast record and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use manuerp_core::{AggregateId, DomainError, uuid_newtype};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForecastId(Uuid);

uuid_newtype!(ForecastId, "ForecastId");

/// `draft -> active -> (superseded | expired)`. Both end states are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastStatus {
    Draft,
    Active,
    Superseded,
    Expired,
}

impl ForecastStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ForecastStatus::Superseded | ForecastStatus::Expired)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForecastMethod {
    /// No outbound usage in the lookback window.
    InsufficientData,
    /// Plain average of observed monthly usage.
    MovingAverage,
    /// Average scaled by non-neutral seasonal/trend factors.
    SeasonalAdjusted,
}

/// Projected demand over the next 1/3/6/12 months, in stock units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandProjection {
    pub next_month: u64,
    pub next_quarter: u64,
    pub next_half_year: u64,
    pub next_year: u64,
}

impl DemandProjection {
    pub fn from_monthly(monthly: f64) -> Self {
        let months = |n: f64| (monthly * n).round().max(0.0) as u64;
        Self {
            next_month: months(1.0),
            next_quarter: months(3.0),
            next_half_year: months(6.0),
            next_year: months(12.0),
        }
    }
}

/// How a forecast compared with what actually happened.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastAccuracy {
    /// Absolute percentage error of the monthly usage prediction.
    pub mape: f64,
    /// Predicted minus actual monthly usage (positive = over-forecast).
    pub bias: f64,
    pub actual_monthly_usage: f64,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: ForecastId,
    pub item_id: AggregateId,
    pub status: ForecastStatus,
    pub current_stock: u64,
    pub average_monthly_usage: f64,
    pub projected_monthly_usage: f64,
    pub seasonal_factor: f64,
    pub trend_factor: f64,
    pub predicted_demand: DemandProjection,
    pub predicted_stock_out_date: Option<DateTime<Utc>>,
    pub recommended_order_quantity: u64,
    pub recommended_order_date: Option<DateTime<Utc>>,
    pub lead_time_days: u32,
    /// 0..=100
    pub confidence: u8,
    pub methodology: ForecastMethod,
    pub data_points: usize,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub accuracy: Option<ForecastAccuracy>,
    pub superseded_by: Option<ForecastId>,
    pub generated_at: DateTime<Utc>,
}

impl Forecast {
    pub fn is_active(&self) -> bool {
        self.status == ForecastStatus::Active
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// Recommended order date falls on or before `deadline`.
    pub fn needs_order_by(&self, deadline: DateTime<Utc>) -> bool {
        self.recommended_order_date.is_some_and(|d| d <= deadline)
    }

    pub fn activate(&mut self) -> Result<(), DomainError> {
        self.transition(ForecastStatus::Draft, ForecastStatus::Active)
    }

    pub fn supersede(&mut self, by: ForecastId) -> Result<(), DomainError> {
        self.transition(ForecastStatus::Active, ForecastStatus::Superseded)?;
        self.superseded_by = Some(by);
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.is_stale_at(now) {
            return Err(DomainError::invariant(format!(
                "forecast {} is valid until {}",
                self.id, self.valid_until
            )));
        }
        self.transition(ForecastStatus::Active, ForecastStatus::Expired)
    }

    fn transition(&mut self, from: ForecastStatus, to: ForecastStatus) -> Result<(), DomainError> {
        if self.status != from {
            return Err(DomainError::invariant(format!(
                "forecast {} cannot move from {:?} to {:?}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    /// Score this forecast's monthly prediction against observed usage.
    pub fn evaluate(&self, actual_monthly_usage: f64, at: DateTime<Utc>) -> ForecastAccuracy {
        let predicted = self.projected_monthly_usage;
        let bias = predicted - actual_monthly_usage;
        let mape = if actual_monthly_usage > 0.0 {
            (bias.abs() / actual_monthly_usage) * 100.0
        } else if predicted > 0.0 {
            100.0
        } else {
            0.0
        };
        ForecastAccuracy {
            mape,
            bias,
            actual_monthly_usage,
            evaluated_at: at,
        }
    }
}

/// Mean MAPE over the forecasts that have been evaluated, if any.
pub fn mean_mape<'a>(forecasts: impl IntoIterator<Item = &'a Forecast>) -> Option<f64> {
    let (sum, n) = forecasts
        .into_iter()
        .filter_map(|f| f.accuracy.map(|a| a.mape))
        .fold((0.0, 0usize), |(s, n), m| (s + m, n + 1));
    (n > 0).then(|| sum / n as f64)
}
