use thiserror::Error;

/// Forecast input problems. Sparse history is not an error; it yields an
/// `insufficient-data` forecast instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForecastError {
    #[error("invalid forecast input: {0}")]
    InvalidInput(String),
}
