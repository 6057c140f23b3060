use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFileConfig, LogRotation};

/// Keeps the background file writer alive; dropping it flushes and stops it.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

impl LogRotation {
    fn to_appender(self) -> Rotation {
        match self {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Falls back to `info` when the directive does not parse.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Creates the log directory and a rolling appender inside it.
pub fn open_log_file(config: &LogFileConfig) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(&config.dir)
        .map_err(|err| format!("failed to create log directory {}: {err}", config.dir.display()))?;
    RollingFileAppender::builder()
        .rotation(config.rotation.to_appender())
        .filename_prefix(config.prefix.as_str())
        .build(&config.dir)
        .map_err(|err| format!("failed to open log file in {}: {err}", config.dir.display()))
}

/// Installs the global subscriber: console on stderr, plus a non-blocking
/// rolling file when configured. A file that cannot be opened is reported
/// once the console layer is up and logging continues without it.
pub fn init_tracing(config: &LogConfig) -> Option<FileLogGuard> {
    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    let (file_writer, file_error) = match config.file.as_ref().map(open_log_file) {
        Some(Ok(appender)) => (Some(tracing_appender::non_blocking(appender)), None),
        Some(Err(err)) => (None, Some(err)),
        None => (None, None),
    };
    let (file_layer, guard) = match file_writer {
        Some((writer, guard)) => (
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
            Some(FileLogGuard { _guard: guard }),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(err) = file_error {
        warn!(error = %err, "file logging disabled");
    }
    guard
}
