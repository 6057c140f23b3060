use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use tiered_review::config::{default_settings_from_env, Config};
use tiered_review::db::{DbConfig, SqliteStore};
use tiered_review::logging;
use tiered_review::review::ReviewEngine;

/// Tiered spaced-repetition review scheduler
#[derive(Parser, Debug)]
#[command(name = "tiered-review", version)]
#[command(about = "Tiered spaced-repetition review scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the SQLite schema
    Migrate,
    /// Print a user's due review queue as JSON
    Due {
        /// User whose queue is selected
        user_id: Uuid,
        /// Maximum number of items (defaults to DUE_QUEUE_LIMIT)
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log);

    let db_config = DbConfig::from_env();
    let store = match SqliteStore::connect(&db_config).await {
        Ok(store) => store.with_default_settings(default_settings_from_env()),
        Err(err) => {
            tracing::error!(error = %err, path = %db_config.path.display(), "failed to open database");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = store.migrate().await {
        tracing::error!(error = %err, "schema migration failed");
        return ExitCode::FAILURE;
    }

    let (user_id, limit) = match cli.command {
        Command::Migrate => {
            tracing::info!(path = %db_config.path.display(), "database ready");
            return ExitCode::SUCCESS;
        }
        Command::Due { user_id, limit } => (user_id, limit.unwrap_or(config.due_queue_limit)),
    };

    let engine = ReviewEngine::new(Arc::new(store));
    let due = match engine.select_due(user_id, Utc::now(), Some(limit)).await {
        Ok(due) => due,
        Err(err) => {
            tracing::error!(error = %err, code = err.code(), "due queue query failed");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&due) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to encode due queue");
            ExitCode::FAILURE
        }
    }
}
