use std::path::PathBuf;

use tracing::warn;

use crate::db::config::{env_bool, env_u64};
use crate::review::config::LearningSettings;

const DEFAULT_DUE_QUEUE_LIMIT: usize = 20;
const DEFAULT_LOG_FILE_PREFIX: &str = "tiered-review.log";

#[derive(Debug, Clone)]
pub struct Config {
    pub log: LogConfig,
    pub due_queue_limit: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let due_queue_limit = usize::try_from(env_u64("DUE_QUEUE_LIMIT", DEFAULT_DUE_QUEUE_LIMIT as u64))
            .unwrap_or(DEFAULT_DUE_QUEUE_LIMIT);

        Self {
            log: LogConfig::from_env(),
            due_queue_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `tiered_review=debug,sqlx=warn`.
    pub level: String,
    /// Rolling file output; console only when `None`.
    pub file: Option<LogFileConfig>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let file = env_bool("ENABLE_FILE_LOGS", false).then(|| LogFileConfig {
            dir: std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs")),
            prefix: std::env::var("LOG_FILE_PREFIX")
                .ok()
                .filter(|prefix| !prefix.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_FILE_PREFIX.to_string()),
            rotation: std::env::var("LOG_ROTATION")
                .ok()
                .and_then(|raw| LogRotation::parse(&raw))
                .unwrap_or_default(),
        });

        Self { level, file }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub rotation: LogRotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl LogRotation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

/// Process-wide defaults for users without stored settings. A combination
/// that fails validation is discarded as a whole. Call after tracing is up so
/// the warning is not lost.
pub fn default_settings_from_env() -> LearningSettings {
    let builtin = LearningSettings::default();
    let settings = LearningSettings {
        desired_retention: env_f64("SRS_DESIRED_RETENTION", builtin.desired_retention),
        initial_stability: env_f64("SRS_INITIAL_STABILITY", builtin.initial_stability),
        initial_difficulty: env_f64("SRS_INITIAL_DIFFICULTY", builtin.initial_difficulty),
        promote_stability_multiplier: env_f64(
            "SRS_PROMOTE_STABILITY_MULTIPLIER",
            builtin.promote_stability_multiplier,
        ),
        promote_difficulty_delta: env_f64(
            "SRS_PROMOTE_DIFFICULTY_DELTA",
            builtin.promote_difficulty_delta,
        ),
    };

    match settings.validate() {
        Ok(()) => settings,
        Err(err) => {
            warn!(error = %err, "ignoring SRS_* overrides, using built-in learning settings");
            builtin
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .unwrap_or(default)
}
