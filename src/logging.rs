//! Environment-aware structured logging.
//!
//! Console output plus a JSON log file per process, so that child worker
//! processes leave their own trail when browser automation goes sideways.
//! Worker processes log to stderr because stdout carries the IPC protocol.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Where the console layer writes. Worker children must keep stdout clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    Stdout,
    Stderr,
}

/// Initialize tracing with a console layer and a per-process JSON file layer.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init_structured_logging(log_dir: &std::path::Path, console: ConsoleTarget) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = detect_environment();
        let log_level = default_log_level(&environment);

        if !log_dir.exists() {
            if let Err(e) = fs::create_dir_all(log_dir) {
                eprintln!("failed to create log directory {}: {e}", log_dir.display());
            }
        }

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path: PathBuf = log_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let env_filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.clone()))
        };

        let console_layer = match console {
            ConsoleTarget::Stdout => fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .with_filter(env_filter())
                .boxed(),
            ConsoleTarget::Stderr => fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(false)
                .with_filter(env_filter())
                .boxed(),
        };

        let subscriber = tracing_subscriber::registry().with(console_layer).with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_filter(env_filter()),
        );

        // Integration tests may have already installed a subscriber.
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }

        tracing::info!(
            pid,
            environment = %environment,
            log_file = %log_path.display(),
            "structured logging initialized"
        );

        // Keep the non-blocking writer alive for the life of the process.
        std::mem::forget(guard);
    });
}

/// Current environment from environment variables.
pub fn detect_environment() -> String {
    std::env::var("OWL_GATEWAY_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}
