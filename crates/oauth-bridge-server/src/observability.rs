//! Tracing setup.
//!
//! The filter starts at `info` and is swapped for `logging.level` once the
//! configuration is loaded. `RUST_LOG`, when set, wins over both.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// HTTP stack crates capped at `warn` when the configured level is chattier.
const QUIET_TARGETS: [&str; 4] = ["hyper", "hyper_util", "h2", "reqwest"];

fn filter_for(level: &str) -> EnvFilter {
    let level = level.to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" => {
            let directives: Vec<String> = std::iter::once(level.clone())
                .chain(QUIET_TARGETS.iter().map(|t| format!("{t}=warn")))
                .collect();
            EnvFilter::new(directives.join(","))
        }
        _ => EnvFilter::new(level),
    }
}

fn rust_log_set() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

pub fn init_tracing() {
    let filter = if rust_log_set() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for("info"))
    } else {
        filter_for("info")
    };

    let (reload_layer, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Switches the filter to the configured level unless `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if rust_log_set() {
        tracing::debug!(level, "RUST_LOG is set, ignoring logging.level");
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    match handle.reload(filter_for(level)) {
        Ok(()) => tracing::debug!(level, "Log level applied"),
        Err(e) => tracing::warn!(level, error = %e, "Failed to apply log level"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_levels_quiet_http_stack() {
        let filter = filter_for("DEBUG").to_string();
        assert!(filter.contains("debug"));
        assert!(filter.contains("hyper=warn"));
        assert!(filter.contains("reqwest=warn"));
    }

    #[test]
    fn test_quiet_levels_are_used_as_is() {
        assert_eq!(filter_for("error").to_string(), "error");
        assert_eq!(filter_for("off").to_string(), "off");
    }
}
