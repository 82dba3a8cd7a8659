//! Usage-based depletion forecast.
//!
//! Model:
//! - Average monthly usage = outbound units in the lookback window divided by
//!   the months actually observed (first sample to `as_of`, at least one).
//! - Projected usage = average × seasonal factor × trend factor.
//! - Stock-out date = `as_of` + current stock / projected daily usage.
//! - Order date = stock-out date − supplier lead time.
//! - Order quantity tops stock up to the target at the moment the order lands.
//! - Confidence blends sample count, month-to-month volatility and the item's
//!   past forecast error.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use manuerp_core::AggregateId;

use crate::error::ForecastError;
use crate::model::{DemandProjection, Forecast, ForecastId, ForecastMethod, ForecastStatus};

/// Average Gregorian month length in days.
pub const DAYS_PER_MONTH: f64 = 30.436_875;

/// Samples at which the sample-count term of confidence saturates.
const FULL_CONFIDENCE_SAMPLES: usize = 12;

/// Confidence multiplier used when no past forecast has been evaluated.
const UNKNOWN_ACCURACY_SCORE: f64 = 0.85;

/// Longest horizon we will put a date on.
const MAX_HORIZON_DAYS: f64 = 36_500.0;

/// One outbound movement, as seen by the forecaster.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    pub occurred_at: DateTime<Utc>,
    pub quantity: u64,
}

/// Snapshot of an item and its outbound history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageHistory {
    pub item_id: AggregateId,
    pub current_stock: u64,
    pub max_stock: u64,
    pub samples: Vec<UsageSample>,
}

/// Forecast computation for one item.
#[derive(Debug, Clone)]
pub struct ForecastJob {
    history: UsageHistory,
    seasonal_factor: f64,
    trend_factor: f64,
    lead_time_days: u32,
    target_stock: Option<u64>,
    lookback_months: u32,
    validity_months: u32,
    historical_mape: Option<f64>,
}

impl ForecastJob {
    pub fn new(history: UsageHistory) -> Self {
        Self {
            history,
            seasonal_factor: 1.0,
            trend_factor: 1.0,
            lead_time_days: 0,
            target_stock: None,
            lookback_months: 12,
            validity_months: 3,
            historical_mape: None,
        }
    }

    pub fn with_seasonal_factor(mut self, factor: f64) -> Self {
        self.seasonal_factor = factor;
        self
    }

    pub fn with_trend_factor(mut self, factor: f64) -> Self {
        self.trend_factor = factor;
        self
    }

    pub fn with_lead_time_days(mut self, days: u32) -> Self {
        self.lead_time_days = days;
        self
    }

    /// Stock level the recommended order restores (defaults to max stock).
    pub fn with_target_stock(mut self, target: u64) -> Self {
        self.target_stock = Some(target);
        self
    }

    pub fn with_lookback_months(mut self, months: u32) -> Self {
        self.lookback_months = months;
        self
    }

    pub fn with_validity_months(mut self, months: u32) -> Self {
        self.validity_months = months;
        self
    }

    pub fn with_historical_mape(mut self, mape: Option<f64>) -> Self {
        self.historical_mape = mape;
        self
    }

    fn validate(&self) -> Result<(), ForecastError> {
        for (name, v) in [
            ("seasonal_factor", self.seasonal_factor),
            ("trend_factor", self.trend_factor),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(ForecastError::InvalidInput(format!(
                    "{name} must be a finite positive number"
                )));
            }
        }
        if self.lookback_months == 0 {
            return Err(ForecastError::InvalidInput(
                "lookback_months must be at least 1".to_string(),
            ));
        }
        if self.validity_months == 0 {
            return Err(ForecastError::InvalidInput(
                "validity_months must be at least 1".to_string(),
            ));
        }
        if let Some(m) = self.historical_mape {
            if !(m.is_finite() && m >= 0.0) {
                return Err(ForecastError::InvalidInput(
                    "historical_mape must be a finite non-negative number".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Compute a draft forecast as of `as_of`.
    pub fn run(&self, as_of: DateTime<Utc>) -> Result<Forecast, ForecastError> {
        self.validate()?;

        let window_start = as_of
            .checked_sub_months(Months::new(self.lookback_months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let window: Vec<UsageSample> = self
            .history
            .samples
            .iter()
            .copied()
            .filter(|s| s.occurred_at >= window_start && s.occurred_at <= as_of && s.quantity > 0)
            .collect();

        let total = window.iter().fold(0u64, |acc, s| acc.saturating_add(s.quantity));
        let valid_until = as_of
            .checked_add_months(Months::new(self.validity_months))
            .unwrap_or(as_of + Duration::days(90));

        let mut forecast = Forecast {
            id: ForecastId::new(),
            item_id: self.history.item_id,
            status: ForecastStatus::Draft,
            current_stock: self.history.current_stock,
            average_monthly_usage: 0.0,
            projected_monthly_usage: 0.0,
            seasonal_factor: self.seasonal_factor,
            trend_factor: self.trend_factor,
            predicted_demand: DemandProjection::default(),
            predicted_stock_out_date: None,
            recommended_order_quantity: 0,
            recommended_order_date: None,
            lead_time_days: self.lead_time_days,
            confidence: 0,
            methodology: ForecastMethod::InsufficientData,
            data_points: window.len(),
            valid_from: as_of,
            valid_until,
            accuracy: None,
            superseded_by: None,
            generated_at: as_of,
        };

        let Some(first) = window.iter().map(|s| s.occurred_at).min() else {
            return Ok(forecast);
        };
        if total == 0 {
            return Ok(forecast);
        }

        let months_observed = (days_between(first, as_of) / DAYS_PER_MONTH)
            .clamp(1.0, f64::from(self.lookback_months));
        let average = total as f64 / months_observed;
        let projected = average * self.seasonal_factor * self.trend_factor;
        let daily = projected / DAYS_PER_MONTH;

        let stock = self.history.current_stock as f64;
        let days_left = (stock / daily).min(MAX_HORIZON_DAYS);
        let stock_out = as_of + days_duration(days_left);
        let lead = Duration::days(i64::from(self.lead_time_days));
        let order_date = stock_out - lead;

        // An order placed on time lands as stock hits zero. A late one also has
        // to cover the demand that went unmet between stock-out and arrival.
        let backlog = if order_date < as_of {
            daily * days_between(stock_out, as_of + lead)
        } else {
            0.0
        };
        let target = match self.target_stock.unwrap_or(self.history.max_stock) {
            0 => projected.ceil(),
            t => t as f64,
        };
        let order_quantity = (target + backlog).ceil() as u64;

        forecast.average_monthly_usage = average;
        forecast.projected_monthly_usage = projected;
        forecast.predicted_demand = DemandProjection::from_monthly(projected);
        forecast.predicted_stock_out_date = Some(stock_out);
        forecast.recommended_order_date = Some(order_date);
        forecast.recommended_order_quantity = order_quantity;
        forecast.methodology = if self.seasonal_factor != 1.0 || self.trend_factor != 1.0 {
            ForecastMethod::SeasonalAdjusted
        } else {
            ForecastMethod::MovingAverage
        };
        forecast.confidence = self.confidence(&window, months_observed, as_of);

        Ok(forecast)
    }

    fn confidence(&self, window: &[UsageSample], months_observed: f64, as_of: DateTime<Utc>) -> u8 {
        let sample_score = window.len().min(FULL_CONFIDENCE_SAMPLES) as f64
            / FULL_CONFIDENCE_SAMPLES as f64;

        let buckets = monthly_buckets(window, months_observed.ceil() as usize, as_of);
        let m = mean(&buckets);
        let volatility_score = if m <= f64::EPSILON {
            0.0
        } else {
            1.0 / (1.0 + stddev_sample(&buckets, m) / m)
        };

        let accuracy_score = match self.historical_mape {
            Some(mape) => 1.0 - mape.min(100.0) / 100.0,
            None => UNKNOWN_ACCURACY_SCORE,
        };

        (100.0 * sample_score * volatility_score * accuracy_score)
            .round()
            .clamp(0.0, 100.0) as u8
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 86_400.0
}

fn days_duration(days: f64) -> Duration {
    Duration::seconds((days * 86_400.0).round() as i64)
}

/// Usage summed into month-long buckets counted back from `as_of`.
fn monthly_buckets(window: &[UsageSample], months: usize, as_of: DateTime<Utc>) -> Vec<f64> {
    let mut buckets = vec![0.0; months.max(1)];
    let last = buckets.len() - 1;
    for s in window {
        let idx = ((days_between(s.occurred_at, as_of) / DAYS_PER_MONTH).floor() as usize).min(last);
        buckets[idx] += s.quantity as f64;
    }
    buckets
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1).
fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / ((xs.len() - 1) as f64);
    var.sqrt()
}
