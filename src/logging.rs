//! Log output for the sync service.
//!
//! Events go to stderr as `HH:MM:SS.mmm LEVEL thread target: [component] ...`
//! so that command output on stdout stays machine readable.
//!
//! ```toml
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! "stacksync::tasks" = "debug"
//! reqwest = "warn"
//! ```
//!
//! `RUST_LOG`, when set, replaces the whole configured filter:
//! ```bash
//! RUST_LOG=stacksync::watcher=trace stacksync serve
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

static INIT: Once = Once::new();

struct WallClock;

impl FormatTime for WallClock {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directives built from config, and the module entries that were
/// left out because their level is not one tracing knows.
#[derive(Debug, PartialEq, Eq)]
struct Directives {
    filter: String,
    rejected: Vec<String>,
}

fn known_level(level: &str) -> bool {
    LEVELS.contains(&level.to_ascii_lowercase().as_str())
}

fn directives(config: &LoggingConfig) -> Directives {
    let default = if known_level(&config.default) {
        config.default.to_ascii_lowercase()
    } else {
        "info".to_string()
    };
    let mut rejected = Vec::new();
    if default != config.default.to_ascii_lowercase() {
        rejected.push(format!("default={}", config.default));
    }

    let mut parts = vec![default];
    for (module, level) in &config.modules {
        if known_level(level) {
            parts.push(format!("{module}={}", level.to_ascii_lowercase()));
        } else {
            rejected.push(format!("{module}={level}"));
        }
    }

    Directives {
        filter: parts.join(","),
        rejected,
    }
}

/// Install the global subscriber. Later calls do nothing.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let from_env = std::env::var("RUST_LOG").is_ok();
        let Directives { filter, rejected } = directives(config);
        let filter = if from_env {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter)
        };

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(WallClock)
            .with_thread_names(true)
            .with_target(true)
            .with_filter(filter);
        tracing_subscriber::registry().with(layer).init();

        if !from_env {
            for entry in rejected {
                tracing::warn!("[logging] ignoring unknown level in `{entry}`");
            }
        }
    });
}

/// Info-level event tagged with the component that emitted it.
///
/// ```ignore
/// log_event!("registry", "registered", "{}", path.display());
/// log_event!("app", "shutting down");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-level counterpart of [`log_event!`].
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn config(default: &str, modules: &[(&str, &str)]) -> LoggingConfig {
        LoggingConfig {
            default: default.to_string(),
            modules: modules
                .iter()
                .map(|(m, l)| (m.to_string(), l.to_string()))
                .collect::<IndexMap<_, _>>(),
        }
    }

    #[test]
    fn test_module_levels_in_config_order() {
        let built = directives(&config(
            "info",
            &[("stacksync::tasks", "debug"), ("reqwest", "WARN")],
        ));
        assert_eq!(built.filter, "info,stacksync::tasks=debug,reqwest=warn");
        assert!(built.rejected.is_empty());
    }

    #[test]
    fn test_unknown_levels_are_left_out() {
        let built = directives(&config("loud", &[("stacksync::watcher", "verbose")]));
        assert_eq!(built.filter, "info");
        assert_eq!(
            built.rejected,
            vec!["default=loud", "stacksync::watcher=verbose"]
        );
    }

    #[test]
    fn test_default_config() {
        let built = directives(&LoggingConfig::default());
        assert_eq!(built.filter, "info");
    }
}
