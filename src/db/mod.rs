pub mod config;
pub mod memory;
pub mod sqlite;
pub mod sqlite_schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::review::aggregate::{ChangeSet, ItemProgress};
use crate::review::config::{InvalidSettings, LearningSettings};
use crate::review::types::{DueItem, ReviewEvent, Tier};

pub use config::DbConfig;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A row changed since it was loaded, or a concurrent insert won.
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    InvalidSettings(#[from] InvalidSettings),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Persistence boundary of the review engine. Implementations must apply a
/// [`ChangeSet`] all or nothing and reject updates whose `version` no longer
/// matches the stored row.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Stored settings, or the store defaults when the user has none yet.
    async fn settings_for(&self, user_id: Uuid) -> Result<LearningSettings, StoreError>;

    async fn save_settings(
        &self,
        user_id: Uuid,
        settings: &LearningSettings,
    ) -> Result<(), StoreError>;

    /// Tier catalog of an item; `None` when the item is unknown.
    async fn item_tiers(&self, item_id: Uuid) -> Result<Option<Vec<Tier>>, StoreError>;

    async fn load_progress(&self, user_id: Uuid, item_id: Uuid)
        -> Result<ItemProgress, StoreError>;

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;

    async fn due(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<DueItem>, StoreError>;

    /// Rating history of one aggregate, oldest first.
    async fn review_events(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<Vec<ReviewEvent>, StoreError>;
}
