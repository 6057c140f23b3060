//! The per (user, item) aggregate and the change set a store commits for it.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::review::policy::{MAX_DIFFICULTY, MIN_DIFFICULTY, STABILITY_FLOOR_DAYS};
use crate::review::types::{ReviewEvent, TierProgress};

/// All tier rows one user has for one item, ordered by tier index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    user_id: Uuid,
    item_id: Uuid,
    rows: Vec<TierProgress>,
}

impl ItemProgress {
    pub fn new(user_id: Uuid, item_id: Uuid, mut rows: Vec<TierProgress>) -> Self {
        rows.sort_by_key(|row| row.tier_index);
        Self {
            user_id,
            item_id,
            rows,
        }
    }

    pub fn empty(user_id: Uuid, item_id: Uuid) -> Self {
        Self::new(user_id, item_id, Vec::new())
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    pub fn rows(&self) -> &[TierProgress] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<TierProgress> {
        self.rows
    }

    pub fn active(&self) -> Option<&TierProgress> {
        self.rows.iter().find(|row| row.is_active)
    }

    pub fn active_count(&self) -> usize {
        self.rows.iter().filter(|row| row.is_active).count()
    }

    pub fn row(&self, id: Uuid) -> Option<&TierProgress> {
        self.rows.iter().find(|row| row.id == id)
    }

    pub fn row_mut(&mut self, id: Uuid) -> Option<&mut TierProgress> {
        self.rows.iter_mut().find(|row| row.id == id)
    }

    pub fn row_for_tier_mut(&mut self, tier_id: Uuid) -> Option<&mut TierProgress> {
        self.rows.iter_mut().find(|row| row.tier_id == tier_id)
    }

    pub fn insert(&mut self, row: TierProgress) {
        let at = self
            .rows
            .partition_point(|existing| existing.tier_index <= row.tier_index);
        self.rows.insert(at, row);
    }

    /// Row-level and aggregate-level invariants: one active row at most, one
    /// row per tier, stability at or above the floor, difficulty in range.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.active_count() > 1 {
            return Err(format!(
                "{} active tiers for user {} item {}",
                self.active_count(),
                self.user_id,
                self.item_id
            ));
        }

        let mut tiers = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            if row.user_id != self.user_id || row.item_id != self.item_id {
                return Err(format!("progress {} belongs to another aggregate", row.id));
            }
            if !tiers.insert(row.tier_id) {
                return Err(format!("duplicate progress for tier {}", row.tier_id));
            }
            if !(row.stability >= STABILITY_FLOOR_DAYS) {
                return Err(format!(
                    "progress {} stability {} below floor",
                    row.id, row.stability
                ));
            }
            if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&row.difficulty) {
                return Err(format!(
                    "progress {} difficulty {} out of range",
                    row.id, row.difficulty
                ));
            }
        }
        Ok(())
    }

    /// Rows added or modified relative to `before`. Updated rows keep the
    /// version they were loaded with; deactivations come first so a store
    /// never sees two active rows mid-commit.
    pub fn changes_since(&self, before: &ItemProgress) -> ChangeSet {
        let mut changes = ChangeSet::new(self.user_id, self.item_id);

        for row in &self.rows {
            match before.row(row.id) {
                None => changes.inserts.push(row.clone()),
                Some(original) if original != row => changes.updates.push(row.clone()),
                Some(_) => {}
            }
        }

        changes.updates.sort_by_key(|row| row.is_active);
        changes
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub updates: Vec<TierProgress>,
    pub inserts: Vec<TierProgress>,
    pub events: Vec<ReviewEvent>,
}

impl ChangeSet {
    pub fn new(user_id: Uuid, item_id: Uuid) -> Self {
        Self {
            user_id,
            item_id,
            updates: Vec::new(),
            inserts: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.events.is_empty()
    }
}
