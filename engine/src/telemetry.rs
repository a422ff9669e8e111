//! Telemetry
//!
//! Installs the global `tracing-subscriber` for the `baton` binary and for
//! embedders that want the same output. Library code only emits events; it
//! never installs a subscriber on its own.
//!
//! Filter priority: `RUST_LOG` > the level passed in (from `--log` or the
//! `[core] log_level` setting) > "info". Debug builds print human-readable
//! lines, release builds print one JSON object per event with the current
//! span attached.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose events are emitted at the configured level
const FILTERED_TARGETS: [&str; 2] = ["baton_engine", "sdk"];

/// Build the default filter directive for `log_level`
///
/// Third-party crates stay at `warn` unless the level is stricter.
pub fn default_filter(log_level: &str) -> String {
    let base = match log_level {
        "error" => "error",
        _ => "warn",
    };
    let mut directives = vec![base.to_string()];
    directives.extend(
        FILTERED_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, log_level)),
    );
    directives.join(",")
}

/// Initialize the tracing subscriber with the given log level
///
/// Only the first call installs a subscriber; later calls are no-ops.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_targets_own_crates() {
        assert_eq!(
            default_filter("debug"),
            "warn,baton_engine=debug,sdk=debug"
        );
    }

    #[test]
    fn test_default_filter_error_level() {
        assert_eq!(default_filter("error"), "error,baton_engine=error,sdk=error");
    }

    #[test]
    fn test_default_filter_parses() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            assert!(EnvFilter::try_new(default_filter(level)).is_ok());
        }
    }
}
