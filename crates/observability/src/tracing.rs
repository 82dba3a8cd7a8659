//! Tracing subscriber initialisation.
//!
//! Filtering follows `RUST_LOG` (default `info`); `MANUERP_LOG_FORMAT`
//! picks between JSON lines (default) and human-readable output.

use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "MANUERP_LOG_FORMAT";

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// Unknown values fall back to JSON.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "compact" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }

    fn from_env() -> Self {
        std::env::var(ENV_LOG_FORMAT)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

/// Install the global subscriber with settings from the environment.
///
/// Safe to call multiple times; only the first call installs anything.
pub fn init() {
    init_with(LogFormat::from_env(), "info");
}

/// Install the global subscriber. `default_directive` applies when
/// `RUST_LOG` is unset or unparsable.
pub fn init_with(format: LogFormat, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    // try_init fails once a global subscriber exists; later calls are no-ops.
    let _ = match format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init(),
        LogFormat::Pretty => builder.compact().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats_leniently() {
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(" TEXT "), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Json);
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_with(LogFormat::Pretty, "debug");
        init_with(LogFormat::Json, "info");
        init();
        ::tracing::info!("still logging");
    }
}
