//! In-process store used by tests and embedders that do not need durability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::db::{ProgressStore, StoreError};
use crate::review::aggregate::{ChangeSet, ItemProgress};
use crate::review::config::LearningSettings;
use crate::review::due::select_due;
use crate::review::types::{DueItem, ReviewEvent, Tier};

type AggregateKey = (Uuid, Uuid);

#[derive(Debug, Default)]
struct Tables {
    settings: HashMap<Uuid, LearningSettings>,
    tiers: HashMap<Uuid, Vec<Tier>>,
    progress: HashMap<AggregateKey, ItemProgress>,
    events: Vec<ReviewEvent>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    defaults: LearningSettings,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_settings(defaults: LearningSettings) -> Self {
        Self {
            defaults,
            tables: RwLock::default(),
        }
    }

    /// Registers an item with tiers `0..tier_count`.
    pub fn insert_item(&self, item_id: Uuid, tier_count: u32) -> Vec<Tier> {
        let tiers: Vec<Tier> = (0..tier_count).map(|index| Tier::new(item_id, index)).collect();
        self.insert_tiers(item_id, tiers.clone());
        tiers
    }

    /// Registers an item with an arbitrary tier list, gaps included.
    pub fn insert_tiers(&self, item_id: Uuid, tiers: Vec<Tier>) {
        self.tables.write().tiers.insert(item_id, tiers);
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn settings_for(&self, user_id: Uuid) -> Result<LearningSettings, StoreError> {
        if let Some(settings) = self.tables.read().settings.get(&user_id) {
            return Ok(*settings);
        }
        let mut tables = self.tables.write();
        Ok(*tables.settings.entry(user_id).or_insert(self.defaults))
    }

    async fn save_settings(
        &self,
        user_id: Uuid,
        settings: &LearningSettings,
    ) -> Result<(), StoreError> {
        settings.validate()?;
        self.tables.write().settings.insert(user_id, *settings);
        Ok(())
    }

    async fn item_tiers(&self, item_id: Uuid) -> Result<Option<Vec<Tier>>, StoreError> {
        Ok(self.tables.read().tiers.get(&item_id).cloned())
    }

    async fn load_progress(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<ItemProgress, StoreError> {
        Ok(self
            .tables
            .read()
            .progress
            .get(&(user_id, item_id))
            .cloned()
            .unwrap_or_else(|| ItemProgress::empty(user_id, item_id)))
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let key = (changes.user_id, changes.item_id);
        let mut tables = self.tables.write();

        let mut rows = tables
            .progress
            .get(&key)
            .map(|progress| progress.rows().to_vec())
            .unwrap_or_default();

        for update in &changes.updates {
            let stored = rows
                .iter_mut()
                .find(|row| row.id == update.id)
                .ok_or_else(|| StoreError::Conflict(format!("progress {} is gone", update.id)))?;
            if stored.version != update.version {
                return Err(StoreError::Conflict(format!(
                    "progress {} is at version {}, expected {}",
                    update.id, stored.version, update.version
                )));
            }
            *stored = update.clone();
            stored.version += 1;
        }

        for insert in &changes.inserts {
            if rows
                .iter()
                .any(|row| row.id == insert.id || row.tier_id == insert.tier_id)
            {
                return Err(StoreError::Conflict(format!(
                    "progress for tier {} already exists",
                    insert.tier_id
                )));
            }
            rows.push(insert.clone());
        }

        let next = ItemProgress::new(changes.user_id, changes.item_id, rows);
        if next.active_count() > 1 {
            return Err(StoreError::Conflict(format!(
                "user {} item {} would have {} active tiers",
                changes.user_id,
                changes.item_id,
                next.active_count()
            )));
        }
        next.check_invariants().map_err(StoreError::Corrupt)?;

        tables.progress.insert(key, next);
        tables.events.extend(changes.events);
        Ok(())
    }

    async fn due(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<DueItem>, StoreError> {
        let tables = self.tables.read();
        let rows = tables
            .progress
            .iter()
            .filter(|((owner, _), _)| *owner == user_id)
            .flat_map(|(_, progress)| progress.rows());
        Ok(select_due(rows, now, limit))
    }

    async fn review_events(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<Vec<ReviewEvent>, StoreError> {
        let mut events: Vec<ReviewEvent> = self
            .tables
            .read()
            .events
            .iter()
            .filter(|event| event.user_id == user_id && event.item_id == item_id)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.rated_at);
        Ok(events)
    }
}
