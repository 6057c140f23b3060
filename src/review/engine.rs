use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{ProgressStore, StoreError};
use crate::review::aggregate::ItemProgress;
use crate::review::config::LearningSettings;
use crate::review::error::ReviewError;
use crate::review::locks::AggregateLocks;
use crate::review::policy::ReviewPolicy;
use crate::review::transition::{self, TierLadder};
use crate::review::types::{
    ActiveTier, DueItem, ReviewEvent, ReviewOutcome, ReviewPreview, ReviewSubmission,
    TierProgress,
};

/// A conflicted command is retried once with fresh state, then reported.
const MAX_COMMIT_ATTEMPTS: usize = 2;

pub struct ReviewEngine {
    store: Arc<dyn ProgressStore>,
    policy: ReviewPolicy,
    locks: AggregateLocks,
}

impl ReviewEngine {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self {
            store,
            policy: ReviewPolicy,
            locks: AggregateLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    pub async fn ensure_active_progress(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TierProgress, ReviewError> {
        self.mutate(user_id, item_id, |progress, ladder, settings| {
            let row = transition::ensure_active(progress, ladder, settings, now)?;
            Ok((row, Vec::new()))
        })
        .await
    }

    pub async fn record_rating(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        submission: ReviewSubmission,
    ) -> Result<ReviewOutcome, ReviewError> {
        let policy = self.policy;
        let outcome = self
            .mutate(user_id, item_id, move |progress, ladder, settings| {
                let row = transition::review(
                    progress,
                    ladder,
                    &policy,
                    submission.rating,
                    settings,
                    submission.rated_at,
                )?;
                let event = ReviewEvent::for_rating(&row, &submission);
                Ok((ReviewOutcome::new(&row, event.clone()), vec![event]))
            })
            .await?;

        debug!(
            user_id = %user_id,
            item_id = %item_id,
            rating = %submission.rating,
            tier_index = outcome.active_tier_index,
            stability = outcome.new_stability,
            difficulty = outcome.new_difficulty,
            next_review = %outcome.new_next_review,
            "rating recorded"
        );
        Ok(outcome)
    }

    pub async fn promote(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ActiveTier, ReviewError> {
        let active = self
            .mutate(user_id, item_id, |progress, ladder, settings| {
                Ok((transition::promote(progress, ladder, settings, now)?, Vec::new()))
            })
            .await?;
        info!(user_id = %user_id, item_id = %item_id, tier_index = active.tier_index, "tier promoted");
        Ok(active)
    }

    pub async fn demote(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ActiveTier, ReviewError> {
        let active = self
            .mutate(user_id, item_id, |progress, ladder, settings| {
                Ok((transition::demote(progress, ladder, settings, now)?, Vec::new()))
            })
            .await?;
        info!(user_id = %user_id, item_id = %item_id, tier_index = active.tier_index, "tier demoted");
        Ok(active)
    }

    /// Intervals each rating would produce for the active tier. Creates the
    /// tier 0 row on first engagement but never changes memory state.
    pub async fn preview_ratings(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewPreview>, ReviewError> {
        let active = self.ensure_active_progress(user_id, item_id, now).await?;
        let settings = self.store.settings_for(user_id).await?;
        Ok(self.policy.preview(&active.memory_state(), &settings, now))
    }

    pub async fn select_due(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<DueItem>, ReviewError> {
        let due = self.store.due(user_id, now, limit).await?;
        debug!(user_id = %user_id, count = due.len(), "due queue selected");
        Ok(due)
    }

    pub async fn item_progress(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<ItemProgress, ReviewError> {
        Ok(self.store.load_progress(user_id, item_id).await?)
    }

    pub async fn settings(&self, user_id: Uuid) -> Result<LearningSettings, ReviewError> {
        Ok(self.store.settings_for(user_id).await?)
    }

    pub async fn update_settings(
        &self,
        user_id: Uuid,
        settings: LearningSettings,
    ) -> Result<(), ReviewError> {
        settings.validate()?;
        self.store.save_settings(user_id, &settings).await?;
        info!(user_id = %user_id, "learning settings updated");
        Ok(())
    }

    async fn ladder(&self, item_id: Uuid) -> Result<TierLadder, ReviewError> {
        self.store
            .item_tiers(item_id)
            .await?
            .map(|tiers| TierLadder::new(item_id, tiers))
            .ok_or(ReviewError::ItemNotFound(item_id))
    }

    /// Runs `op` on a fresh copy of the aggregate while holding its lock and
    /// commits the resulting change set in one store transaction.
    async fn mutate<T, F>(&self, user_id: Uuid, item_id: Uuid, op: F) -> Result<T, ReviewError>
    where
        T: Send,
        F: Fn(
                &mut ItemProgress,
                &TierLadder,
                &LearningSettings,
            ) -> Result<(T, Vec<ReviewEvent>), ReviewError>
            + Send,
    {
        let _guard = self.locks.acquire(user_id, item_id).await;
        let ladder = self.ladder(item_id).await?;
        let settings = self.store.settings_for(user_id).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let before = self.store.load_progress(user_id, item_id).await?;
            let mut progress = before.clone();
            let (value, events) = op(&mut progress, &ladder, &settings)?;

            let mut changes = progress.changes_since(&before);
            changes.events = events;
            if changes.is_empty() {
                return Ok(value);
            }

            let created: Vec<u32> = changes.inserts.iter().map(|row| row.tier_index).collect();
            match self.store.commit(changes).await {
                Ok(()) => {
                    for tier_index in created {
                        info!(user_id = %user_id, item_id = %item_id, tier_index, "tier progress created");
                    }
                    return Ok(value);
                }
                Err(StoreError::Conflict(reason)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(
                        user_id = %user_id,
                        item_id = %item_id,
                        attempt,
                        reason = %reason,
                        "progress commit conflicted, retrying"
                    );
                }
                Err(StoreError::Conflict(reason)) => {
                    warn!(user_id = %user_id, item_id = %item_id, reason = %reason, "progress commit conflicted");
                    return Err(ReviewError::ConcurrentModification { user_id, item_id });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
