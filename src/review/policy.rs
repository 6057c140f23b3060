use chrono::{DateTime, Duration, Utc};

use crate::review::config::LearningSettings;
use crate::review::types::{MemoryState, Rating, ReviewPreview};

/// Lowest stability a tier can hold, in days (about five minutes).
pub const STABILITY_FLOOR_DAYS: f64 = 0.0035;
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;
/// Delay used when a never-reviewed tier is failed on its first rating.
pub const FIRST_AGAIN_DELAY_MINUTES: i64 = 5;

const MS_PER_DAY: f64 = 86_400_000.0;

pub const fn stability_multiplier(rating: Rating) -> f64 {
    match rating {
        Rating::Again => 0.25,
        Rating::Hard => 0.85,
        Rating::Good => 1.15,
        Rating::Easy => 1.35,
    }
}

pub const fn difficulty_delta(rating: Rating) -> f64 {
    match rating {
        Rating::Again => 0.6,
        Rating::Hard => 0.15,
        Rating::Good => -0.05,
        Rating::Easy => -0.15,
    }
}

pub fn floor_stability(stability: f64) -> f64 {
    // f64::max drops NaN, so a corrupt input collapses to the floor.
    stability.max(STABILITY_FLOOR_DAYS)
}

pub fn clamp_difficulty(difficulty: f64) -> f64 {
    if difficulty.is_nan() {
        return MAX_DIFFICULTY;
    }
    difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Converts a fractional day count to a millisecond-resolution duration of at
/// least one millisecond. `None` when the span does not fit in a `Duration`.
pub fn days_to_duration(days: f64) -> Option<Duration> {
    let ms = (days * MS_PER_DAY).round().max(1.0);
    if !ms.is_finite() || ms >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(ms as i64)
}

/// `now` plus `days`, saturating at the last representable instant.
pub fn schedule_after(now: DateTime<Utc>, days: f64) -> DateTime<Utc> {
    days_to_duration(days)
        .and_then(|interval| now.checked_add_signed(interval))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Stateless rating policy. Every timestamp comes in through `now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewPolicy;

impl ReviewPolicy {
    pub fn apply(
        &self,
        state: &MemoryState,
        rating: Rating,
        _settings: &LearningSettings,
        now: DateTime<Utc>,
    ) -> MemoryState {
        let stability = floor_stability(state.stability * stability_multiplier(rating));
        let difficulty = clamp_difficulty(state.difficulty + difficulty_delta(rating));

        let next_review = if rating == Rating::Again && state.last_reviewed.is_none() {
            now + Duration::minutes(FIRST_AGAIN_DELAY_MINUTES)
        } else {
            schedule_after(now, stability)
        };

        MemoryState {
            stability,
            difficulty,
            last_reviewed: Some(now),
            next_review: Some(next_review),
        }
    }

    /// What each of the four ratings would schedule, without committing any.
    pub fn preview(
        &self,
        state: &MemoryState,
        settings: &LearningSettings,
        now: DateTime<Utc>,
    ) -> Vec<ReviewPreview> {
        Rating::ALL
            .iter()
            .map(|&rating| {
                let next = self.apply(state, rating, settings, now);
                let next_review = next.next_review.unwrap_or(now);
                ReviewPreview {
                    rating,
                    interval_seconds: (next_review - now).num_seconds().max(0),
                    next_review,
                }
            })
            .collect()
    }
}

pub fn apply_rating(
    state: &MemoryState,
    rating: Rating,
    settings: &LearningSettings,
    now: DateTime<Utc>,
) -> MemoryState {
    ReviewPolicy.apply(state, rating, settings, now)
}
