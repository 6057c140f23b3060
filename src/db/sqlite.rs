use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::config::DbConfig;
use crate::db::sqlite_schema::{split_sql_statements, SCHEMA_VERSION, SQLITE_SCHEMA_SQL};
use crate::db::{ProgressStore, StoreError};
use crate::review::aggregate::{ChangeSet, ItemProgress};
use crate::review::config::LearningSettings;
use crate::review::types::{DueItem, Rating, ReviewEvent, Tier, TierProgress};

const PROGRESS_COLUMNS: &str = r#""id", "userId", "itemId", "tierId", "tierIndex", "stability", "difficulty", "lastReviewedMs", "nextReviewMs", "isActive", "version""#;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    defaults: LearningSettings,
}

impl SqliteStore {
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(config.journal_mode.to_sqlx())
            .busy_timeout(config.busy_timeout)
            .foreign_keys(config.foreign_keys);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        debug!(path = %config.path.display(), "sqlite pool opened");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            defaults: LearningSettings::default(),
        }
    }

    pub fn with_default_settings(mut self, defaults: LearningSettings) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Recorded schema version; `None` before the first migration.
    pub async fn schema_version(&self) -> Result<Option<String>, StoreError> {
        let metadata: Option<String> = sqlx::query_scalar(
            r#"SELECT "name" FROM sqlite_master WHERE "type" = 'table' AND "name" = '_db_metadata'"#,
        )
        .fetch_optional(&self.pool)
        .await?;
        if metadata.is_none() {
            return Ok(None);
        }

        let version: Option<String> = sqlx::query_scalar(
            r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(version)
    }

    /// Applies the bundled schema once; later calls are no-ops.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        if self.schema_version().await?.is_some() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for stmt in split_sql_statements(SQLITE_SCHEMA_SQL) {
            sqlx::query(&stmt).execute(&mut *tx).await?;
        }
        sqlx::query(
            r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#,
        )
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(version = SCHEMA_VERSION, "sqlite schema applied");
        Ok(())
    }

    /// Registers an item with tiers `0..tier_count`.
    pub async fn insert_item(&self, item_id: Uuid, tier_count: u32) -> Result<Vec<Tier>, StoreError> {
        let tiers: Vec<Tier> = (0..tier_count).map(|index| Tier::new(item_id, index)).collect();
        self.insert_tiers(&tiers).await?;
        Ok(tiers)
    }

    pub async fn insert_tiers(&self, tiers: &[Tier]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for tier in tiers {
            sqlx::query(r#"INSERT INTO "item_tiers" ("id", "itemId", "tierIndex") VALUES (?, ?, ?)"#)
                .bind(tier.id.to_string())
                .bind(tier.item_id.to_string())
                .bind(i64::from(tier.index))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn stored_settings(&self, user_id: Uuid) -> Result<Option<LearningSettings>, StoreError> {
        let row = sqlx::query(
            r#"SELECT "desiredRetention", "initialStability", "initialDifficulty",
                      "promoteStabilityMultiplier", "promoteDifficultyDelta"
               FROM "learning_settings" WHERE "userId" = ?"#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<LearningSettings, StoreError> {
            Ok(LearningSettings {
                desired_retention: row.try_get("desiredRetention")?,
                initial_stability: row.try_get("initialStability")?,
                initial_difficulty: row.try_get("initialDifficulty")?,
                promote_stability_multiplier: row.try_get("promoteStabilityMultiplier")?,
                promote_difficulty_delta: row.try_get("promoteDifficultyDelta")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn settings_for(&self, user_id: Uuid) -> Result<LearningSettings, StoreError> {
        if let Some(settings) = self.stored_settings(user_id).await? {
            return Ok(settings);
        }

        let defaults = self.defaults;
        sqlx::query(
            r#"INSERT OR IGNORE INTO "learning_settings"
               ("userId", "desiredRetention", "initialStability", "initialDifficulty",
                "promoteStabilityMultiplier", "promoteDifficultyDelta", "updatedAtMs")
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(user_id.to_string())
        .bind(defaults.desired_retention)
        .bind(defaults.initial_stability)
        .bind(defaults.initial_difficulty)
        .bind(defaults.promote_stability_multiplier)
        .bind(defaults.promote_difficulty_delta)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        debug!(user_id = %user_id, "learning settings created with defaults");

        Ok(self.stored_settings(user_id).await?.unwrap_or(defaults))
    }

    async fn save_settings(
        &self,
        user_id: Uuid,
        settings: &LearningSettings,
    ) -> Result<(), StoreError> {
        settings.validate()?;
        sqlx::query(
            r#"INSERT INTO "learning_settings"
               ("userId", "desiredRetention", "initialStability", "initialDifficulty",
                "promoteStabilityMultiplier", "promoteDifficultyDelta", "updatedAtMs")
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT ("userId") DO UPDATE SET
                 "desiredRetention" = excluded."desiredRetention",
                 "initialStability" = excluded."initialStability",
                 "initialDifficulty" = excluded."initialDifficulty",
                 "promoteStabilityMultiplier" = excluded."promoteStabilityMultiplier",
                 "promoteDifficultyDelta" = excluded."promoteDifficultyDelta",
                 "updatedAtMs" = excluded."updatedAtMs""#,
        )
        .bind(user_id.to_string())
        .bind(settings.desired_retention)
        .bind(settings.initial_stability)
        .bind(settings.initial_difficulty)
        .bind(settings.promote_stability_multiplier)
        .bind(settings.promote_difficulty_delta)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn item_tiers(&self, item_id: Uuid) -> Result<Option<Vec<Tier>>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT "id", "tierIndex" FROM "item_tiers" WHERE "itemId" = ? ORDER BY "tierIndex" ASC"#,
        )
        .bind(item_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let tiers = rows
            .iter()
            .map(|row| -> Result<Tier, StoreError> {
                Ok(Tier {
                    id: parse_uuid(row, "id")?,
                    item_id,
                    index: parse_index(row, "tierIndex")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(tiers))
    }

    async fn load_progress(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<ItemProgress, StoreError> {
        let sql = format!(
            r#"SELECT {PROGRESS_COLUMNS} FROM "tier_progress"
               WHERE "userId" = ? AND "itemId" = ? ORDER BY "tierIndex" ASC"#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.to_string())
            .bind(item_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let rows = rows
            .iter()
            .map(map_progress_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ItemProgress::new(user_id, item_id, rows))
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        match apply_changes(&mut *tx, &changes).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    /// Timestamps are persisted at millisecond resolution, so `now` is
    /// compared at that resolution too. Every returned item carries a stored
    /// `next_review` no later than `now`.
    async fn due(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<DueItem>, StoreError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            r#"SELECT "id", "itemId", "tierId", "tierIndex", "stability", "difficulty", "nextReviewMs"
               FROM "tier_progress"
               WHERE "userId" = ? AND "isActive" = 1
                 AND "nextReviewMs" IS NOT NULL AND "nextReviewMs" <= ?
               ORDER BY "nextReviewMs" ASC, "itemId" ASC
               LIMIT ?"#,
        )
        .bind(user_id.to_string())
        .bind(now.timestamp_millis())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DueItem, StoreError> {
                Ok(DueItem {
                    item_id: parse_uuid(row, "itemId")?,
                    progress_id: parse_uuid(row, "id")?,
                    active_tier_id: parse_uuid(row, "tierId")?,
                    active_tier_index: parse_index(row, "tierIndex")?,
                    stability: row.try_get("stability")?,
                    difficulty: row.try_get("difficulty")?,
                    next_review: from_millis(row.try_get("nextReviewMs")?)?,
                })
            })
            .collect()
    }

    async fn review_events(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<Vec<ReviewEvent>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT "id", "tierId", "tierIndex", "rating", "shownAtMs", "revealedAtMs",
                      "ratedAtMs", "nextReviewMs", "intervalMinutes"
               FROM "review_events"
               WHERE "userId" = ? AND "itemId" = ?
               ORDER BY "ratedAtMs" ASC, "rowid" ASC"#,
        )
        .bind(user_id.to_string())
        .bind(item_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ReviewEvent, StoreError> {
                let rating: String = row.try_get("rating")?;
                Ok(ReviewEvent {
                    id: parse_uuid(row, "id")?,
                    user_id,
                    item_id,
                    tier_id: parse_uuid(row, "tierId")?,
                    tier_index: parse_index(row, "tierIndex")?,
                    rating: rating
                        .parse::<Rating>()
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    shown_at: from_millis(row.try_get("shownAtMs")?)?,
                    revealed_at: row
                        .try_get::<Option<i64>, _>("revealedAtMs")?
                        .map(from_millis)
                        .transpose()?,
                    rated_at: from_millis(row.try_get("ratedAtMs")?)?,
                    next_review: from_millis(row.try_get("nextReviewMs")?)?,
                    interval_minutes: row.try_get("intervalMinutes")?,
                })
            })
            .collect()
    }
}

/// Deactivating updates run first so the partial unique index on active rows
/// never sees two of them.
async fn apply_changes(conn: &mut SqliteConnection, changes: &ChangeSet) -> Result<(), StoreError> {
    for row in &changes.updates {
        let result = sqlx::query(
            r#"UPDATE "tier_progress"
               SET "stability" = ?, "difficulty" = ?, "lastReviewedMs" = ?, "nextReviewMs" = ?,
                   "isActive" = ?, "version" = "version" + 1
               WHERE "id" = ? AND "version" = ?"#,
        )
        .bind(row.stability)
        .bind(row.difficulty)
        .bind(row.last_reviewed.map(|at| at.timestamp_millis()))
        .bind(row.next_review.map(|at| at.timestamp_millis()))
        .bind(row.is_active)
        .bind(row.id.to_string())
        .bind(row.version)
        .execute(&mut *conn)
        .await
        .map_err(write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "progress {} changed since version {}",
                row.id, row.version
            )));
        }
    }

    for row in &changes.inserts {
        let sql = format!(
            r#"INSERT INTO "tier_progress" ({PROGRESS_COLUMNS})
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        );
        sqlx::query(&sql)
            .bind(row.id.to_string())
            .bind(row.user_id.to_string())
            .bind(row.item_id.to_string())
            .bind(row.tier_id.to_string())
            .bind(i64::from(row.tier_index))
            .bind(row.stability)
            .bind(row.difficulty)
            .bind(row.last_reviewed.map(|at| at.timestamp_millis()))
            .bind(row.next_review.map(|at| at.timestamp_millis()))
            .bind(row.is_active)
            .bind(row.version)
            .execute(&mut *conn)
            .await
            .map_err(write_error)?;
    }

    for event in &changes.events {
        sqlx::query(
            r#"INSERT INTO "review_events"
               ("id", "userId", "itemId", "tierId", "tierIndex", "rating", "shownAtMs",
                "revealedAtMs", "ratedAtMs", "nextReviewMs", "intervalMinutes")
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.user_id.to_string())
        .bind(event.item_id.to_string())
        .bind(event.tier_id.to_string())
        .bind(i64::from(event.tier_index))
        .bind(event.rating.as_str())
        .bind(event.shown_at.timestamp_millis())
        .bind(event.revealed_at.map(|at| at.timestamp_millis()))
        .bind(event.rated_at.timestamp_millis())
        .bind(event.next_review.timestamp_millis())
        .bind(event.interval_minutes)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// A unique violation means another writer got there first.
fn write_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(db_err.message().to_string())
        }
        _ => StoreError::Sqlx(err),
    }
}

fn map_progress_row(row: &SqliteRow) -> Result<TierProgress, StoreError> {
    Ok(TierProgress {
        id: parse_uuid(row, "id")?,
        user_id: parse_uuid(row, "userId")?,
        item_id: parse_uuid(row, "itemId")?,
        tier_id: parse_uuid(row, "tierId")?,
        tier_index: parse_index(row, "tierIndex")?,
        stability: row.try_get("stability")?,
        difficulty: row.try_get("difficulty")?,
        last_reviewed: row
            .try_get::<Option<i64>, _>("lastReviewedMs")?
            .map(from_millis)
            .transpose()?,
        next_review: row
            .try_get::<Option<i64>, _>("nextReviewMs")?
            .map(from_millis)
            .transpose()?,
        is_active: row.try_get("isActive")?,
        version: row.try_get("version")?,
    })
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, StoreError> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| StoreError::Corrupt(format!("{column} {raw:?}: {e}")))
}

fn parse_index(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {raw}")))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}
