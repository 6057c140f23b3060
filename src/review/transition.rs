//! Tier ladder state machine.
//!
//! States per (user, item): no progress, or tier k active. Transitions:
//! - review: self-loop on the active tier, runs the rating policy
//! - promote: k -> k + 1, fails at the top tier
//! - demote: k -> k - 1, fails at tier 0
//!
//! Every function works on an in-memory [`ItemProgress`]; persisting the
//! result atomically is the caller's job.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::review::aggregate::ItemProgress;
use crate::review::config::LearningSettings;
use crate::review::error::ReviewError;
use crate::review::policy::{clamp_difficulty, floor_stability, ReviewPolicy};
use crate::review::types::{ActiveTier, MemoryState, Rating, Tier, TierProgress};

/// Ordered tier catalog of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLadder {
    item_id: Uuid,
    tiers: Vec<Tier>,
}

impl TierLadder {
    pub fn new(item_id: Uuid, mut tiers: Vec<Tier>) -> Self {
        tiers.sort_by_key(|tier| tier.index);
        Self { item_id, tiers }
    }

    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier(&self, index: u32) -> Option<&Tier> {
        self.tiers
            .binary_search_by_key(&index, |tier| tier.index)
            .ok()
            .map(|at| &self.tiers[at])
    }

    pub fn base(&self) -> Result<&Tier, ReviewError> {
        self.tier(0).ok_or(ReviewError::MissingTierZero {
            item_id: self.item_id,
        })
    }

    pub fn max_index(&self) -> Option<u32> {
        self.tiers.last().map(|tier| tier.index)
    }
}

/// Returns the active row, creating tier 0 from the user's settings when the
/// item has never been studied.
pub fn ensure_active(
    progress: &mut ItemProgress,
    ladder: &TierLadder,
    settings: &LearningSettings,
    now: DateTime<Utc>,
) -> Result<TierProgress, ReviewError> {
    if let Some(active) = progress.active() {
        return Ok(active.clone());
    }

    let base = ladder.base()?;
    let row = TierProgress::new_active(
        progress.user_id(),
        base,
        MemoryState {
            stability: floor_stability(settings.initial_stability),
            difficulty: clamp_difficulty(settings.initial_difficulty),
            last_reviewed: None,
            next_review: Some(now),
        },
    );
    progress.insert(row.clone());
    Ok(row)
}

/// Applies a rating to the active tier and returns the updated row.
pub fn review(
    progress: &mut ItemProgress,
    ladder: &TierLadder,
    policy: &ReviewPolicy,
    rating: Rating,
    settings: &LearningSettings,
    now: DateTime<Utc>,
) -> Result<TierProgress, ReviewError> {
    let active = ensure_active(progress, ladder, settings, now)?;
    let next = policy.apply(&active.memory_state(), rating, settings, now);

    let row = active_row_mut(progress, active.id)?;
    row.set_memory_state(&next);
    Ok(row.clone())
}

pub fn promote(
    progress: &mut ItemProgress,
    ladder: &TierLadder,
    settings: &LearningSettings,
    now: DateTime<Utc>,
) -> Result<ActiveTier, ReviewError> {
    let current = ensure_active(progress, ladder, settings, now)?;
    let target = current
        .tier_index
        .checked_add(1)
        .and_then(|index| ladder.tier(index))
        .ok_or(ReviewError::NoNextTier {
            item_id: ladder.item_id(),
            current: current.tier_index,
        })?;

    // First visit inherits scaled confidence from the tier below and is due
    // at once.
    let seed = MemoryState {
        stability: floor_stability(current.stability * settings.promote_stability_multiplier),
        difficulty: clamp_difficulty(current.difficulty + settings.promote_difficulty_delta),
        last_reviewed: Some(now),
        next_review: Some(now),
    };
    switch_active(progress, &current, target, seed)
}

pub fn demote(
    progress: &mut ItemProgress,
    ladder: &TierLadder,
    settings: &LearningSettings,
    now: DateTime<Utc>,
) -> Result<ActiveTier, ReviewError> {
    let current = ensure_active(progress, ladder, settings, now)?;
    let at_floor = ReviewError::AtFloor {
        item_id: ladder.item_id(),
        current: current.tier_index,
    };
    let target = match current.tier_index.checked_sub(1) {
        Some(index) => ladder.tier(index).ok_or(at_floor)?,
        None => return Err(at_floor),
    };

    // First visit restarts from the user's initial settings.
    let seed = MemoryState {
        stability: floor_stability(settings.initial_stability),
        difficulty: clamp_difficulty(settings.initial_difficulty),
        last_reviewed: Some(now),
        next_review: Some(now),
    };
    switch_active(progress, &current, target, seed)
}

/// Deactivates `current` and activates the row for `target`, resuming it
/// unchanged when it exists and creating it from `seed` otherwise.
fn switch_active(
    progress: &mut ItemProgress,
    current: &TierProgress,
    target: &Tier,
    seed: MemoryState,
) -> Result<ActiveTier, ReviewError> {
    active_row_mut(progress, current.id)?.is_active = false;

    if let Some(existing) = progress.row_for_tier_mut(target.id) {
        existing.is_active = true;
        return Ok(existing.active_tier());
    }

    let row = TierProgress::new_active(progress.user_id(), target, seed);
    let active = row.active_tier();
    progress.insert(row);
    Ok(active)
}

fn active_row_mut(
    progress: &mut ItemProgress,
    id: Uuid,
) -> Result<&mut TierProgress, ReviewError> {
    let user_id = progress.user_id();
    let item_id = progress.item_id();
    progress
        .row_mut(id)
        .ok_or(ReviewError::ConcurrentModification { user_id, item_id })
}
