//! Tracing initialisation for the `changeflow` binary.
//!
//! Console output goes to stderr so `--json` reports on stdout stay
//! parseable. `RUST_LOG` overrides the default level.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// File name prefix of the daily rolling log.
pub const LOG_FILE_PREFIX: &str = "changeflow.log";

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}

/// Install the global subscriber.
///
/// * `json` emits newline-delimited JSON on stderr.
/// * `file_dir` adds a daily rolling JSON log in that directory; keep the
///   returned guard alive until exit or buffered lines are lost.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(verbose: bool, json: bool, file_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(false)
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let (file_layer, guard) = match file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .ok();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_verbose_lowers_default_level() {
        assert_eq!(default_directive(true), "debug");
        assert_eq!(default_directive(false), "warn");
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        let dir = tempdir().unwrap();
        let guard = init_tracing(false, true, Some(dir.path()));
        assert!(guard.is_some());
        assert!(init_tracing(true, false, None).is_none());
        tracing::warn!("logged after init");
    }
}
