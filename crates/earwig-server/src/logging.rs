//! Logging initialization.
//!
//! Production runs log structured JSON to rolling daily files plus a compact
//! stream on stdout for the journal; development runs get pretty stdout
//! output only.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer alive for the process lifetime.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initializes the logging system.
///
/// The filter comes from `RUST_LOG`, falling back to `EARWIG_LOG_LEVEL`,
/// falling back to `info`.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let default_level =
        std::env::var("EARWIG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&default_level))?;

    if is_production {
        let log_dir = log_directory();
        std::fs::create_dir_all(&log_dir).ok();

        let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "earwig");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_target(true);
        let stdout_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stdout_layer)
            .init();

        let _ = FILE_GUARD.set(guard);
    } else {
        let stdout_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .init();
    }

    Ok(())
}

/// Log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/earwig")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "earwig")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
