//! Tracing setup for the `rsls` binary.
//!
//! Two layers: a compact stderr layer whose level follows `-q`/`-v` (or
//! `RUST_LOG`), and a daily rolling log file in the user cache directory
//! that records at `info` unless `RUST_LOG` says otherwise.

use std::path::PathBuf;

use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

use crate::args::GlobalArgs;

const LOG_FILE: &str = "rsls.log";

fn stderr_level(args: &GlobalArgs) -> &'static str {
    if args.quiet {
        return "off";
    }
    match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn log_dir() -> PathBuf {
    ProjectDirs::from("com.github", "rsls", "rsls")
        .map_or_else(std::env::temp_dir, |dirs| dirs.cache_dir().to_path_buf())
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must outlive every
/// command. Installing twice is a no-op.
pub fn init_tracing(args: &GlobalArgs) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir(), LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    let stderr_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(stderr_level(args)));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(stderr_filter);

    let _ = Registry::default()
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(quiet: bool, verbose: u8) -> GlobalArgs {
        GlobalArgs { quiet, verbose }
    }

    #[test]
    fn test_stderr_level_follows_flags() {
        assert_eq!(stderr_level(&args(true, 0)), "off");
        assert_eq!(stderr_level(&args(false, 0)), "warn");
        assert_eq!(stderr_level(&args(false, 1)), "info");
        assert_eq!(stderr_level(&args(false, 2)), "debug");
        assert_eq!(stderr_level(&args(false, 5)), "trace");
    }
}
