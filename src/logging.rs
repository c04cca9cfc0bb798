//! Logging configuration.
//!
//! By default logs go to stderr. When `logging.stderr` is disabled, Linux
//! systems log to systemd-journald, with a daily rolling file as fallback
//! for other platforms or when journald is unavailable.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "PHOTO_VISION_LOG";

/// Initialize the logging system.
///
/// The filter comes from `PHOTO_VISION_LOG` (e.g. `debug`,
/// `photo_vision::pipeline=trace`) and falls back to `default_level`.
pub fn init(config: &LoggingConfig, default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if config.stderr {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
        return Ok(());
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = config.log_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photo-vision")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "photo-vision.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes buffered lines on drop, so it has to outlive main
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}
