//! Subscriber setup. Stdout carries outbound commands, so logs go to stderr
//! or, with `--log-dir`, to a file.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "playground-replay.log";

fn filter() -> EnvFilter {
    let debug_enabled = env::var("PLAYGROUND_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    if let Some(dir) = log_dir {
        match fs_err::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_ansi(false)
                    .with_writer(writer)
                    .init();
                return Some(guard);
            }
            Err(err) => {
                eprintln!("playground-replay: logging to stderr, {}", err);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .init();
    None
}
