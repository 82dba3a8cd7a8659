//! Infrastructure for the stock ledger: event storage, command dispatch,
//! read models, forecast storage, configuration and the ledger service.

mod blocking;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod forecast_store;
pub mod ledger;
pub mod projections;
pub mod read_model;
pub mod suppliers;

pub use config::LedgerConfig;
pub use ledger::{
    ActionableItem, ForecastOptions, InMemoryStockLedger, LedgerError, MovementReceipt,
    MovementRequest, NewItem, StockLedger,
};

#[cfg(test)]
mod integration_tests;
