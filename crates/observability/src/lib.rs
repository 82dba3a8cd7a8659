//! Process-wide tracing setup shared by binaries, tests and benches.

pub mod tracing;

pub use self::tracing::{LogFormat, init, init_with};
