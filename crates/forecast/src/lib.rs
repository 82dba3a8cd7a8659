//! `manuerp-forecast`
//!
//! Stock depletion forecasting. The engine is pure: callers hand it a usage
//! history snapshot and get back a draft `Forecast`. Persisting, activating
//! and superseding forecasts is the store's job (see `manuerp-infra`).

pub mod engine;
pub mod error;
pub mod model;

pub use engine::{DAYS_PER_MONTH, ForecastJob, UsageHistory, UsageSample};
pub use error::ForecastError;
pub use model::{
    DemandProjection, Forecast, ForecastAccuracy, ForecastId, ForecastMethod, ForecastStatus,
    mean_mape,
};
