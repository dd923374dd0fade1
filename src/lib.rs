//! CoolSafe - hot-food cooling compliance
//!
//! Tracks cooling sessions against their time limits, keeps an offline-first
//! audit trail that syncs to a backend, and lets kitchen staff drive the
//! workflow hands-free by voice.

pub mod clock;
pub mod config;
pub mod cooling;
pub mod database;
pub mod directory;
pub mod speech;
pub mod sync;
pub mod voice;

use std::path::PathBuf;

/// Format timestamps using the system's local time via chrono
struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Directory holding the append-only log file
pub fn get_log_dir() -> PathBuf {
    config::get_config_dir().join("logs")
}

/// Sets up logging to stdout and `~/.coolsafe/logs/coolsafe.log`
///
/// `RUST_LOG` overrides the default `info` filter. Falls back to stdout only
/// when the log file cannot be opened.
pub fn init_logging() {
    use tracing_subscriber::prelude::*;

    let log_dir = get_log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("coolsafe.log"))
        .ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        let stdout_layer = tracing_subscriber::fmt::layer().with_timer(LocalTimer);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .init();
    }
}
