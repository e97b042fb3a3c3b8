//! Logging initialization.
//!
//! Controlled by [`LoggingConfig`] and the `STRATA_LOG` environment variable:
//! - `format = "off"` → nothing is installed (tracing macros are no-ops)
//! - `format = "pretty"` → human-readable events to stderr
//! - `format = "json"` → JSON events and span closes to stderr
//!
//! `STRATA_LOG` takes `EnvFilter` directives (e.g. `strata=debug`) and
//! overrides `logging.level` when set.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "STRATA_LOG";

/// Install a global subscriber according to `config`.
///
/// Returns `true` if a subscriber was installed by this call. Returns `false`
/// for `format = "off"` or when a global subscriber already exists, so
/// calling this more than once is harmless.
pub fn init(config: &LoggingConfig) -> bool {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = build_filter(config);
    let installed = match config.format {
        LogFormat::Off => return false,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init(),
    };
    installed.is_ok()
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_installs_nothing() {
        assert!(!init(&LoggingConfig::default()));
    }

    #[test]
    fn bad_level_falls_back() {
        let config = LoggingConfig {
            format: LogFormat::Pretty,
            level: "not a [valid directive".to_owned(),
        };
        // Must not panic; the filter degrades to "info".
        let _ = build_filter(&config);
    }
}
