use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::review::error::ReviewError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 4] = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];

    pub const fn as_str(self) -> &'static str {
        match self {
            Rating::Again => "again",
            Rating::Hard => "hard",
            Rating::Good => "good",
            Rating::Easy => "easy",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = ReviewError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "again" => Ok(Rating::Again),
            "hard" => Ok(Rating::Hard),
            "good" => Ok(Rating::Good),
            "easy" => Ok(Rating::Easy),
            _ => Err(ReviewError::InvalidRating(value.to_string())),
        }
    }
}

impl TryFrom<&str> for Rating {
    type Error = ReviewError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Memory model of one tier: what the policy reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryState {
    pub stability: f64,
    pub difficulty: f64,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub next_review: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub id: Uuid,
    pub item_id: Uuid,
    pub index: u32,
}

impl Tier {
    pub fn new(item_id: Uuid, index: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            index,
        }
    }
}

/// Per (user, tier) progress row. `version` is the optimistic concurrency
/// token; stores bump it on every committed update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub tier_id: Uuid,
    pub tier_index: u32,
    pub stability: f64,
    pub difficulty: f64,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub next_review: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub version: i64,
}

impl TierProgress {
    pub fn new_active(user_id: Uuid, tier: &Tier, state: MemoryState) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            item_id: tier.item_id,
            tier_id: tier.id,
            tier_index: tier.index,
            stability: state.stability,
            difficulty: state.difficulty,
            last_reviewed: state.last_reviewed,
            next_review: state.next_review,
            is_active: true,
            version: 0,
        }
    }

    pub fn memory_state(&self) -> MemoryState {
        MemoryState {
            stability: self.stability,
            difficulty: self.difficulty,
            last_reviewed: self.last_reviewed,
            next_review: self.next_review,
        }
    }

    pub fn set_memory_state(&mut self, state: &MemoryState) {
        self.stability = state.stability;
        self.difficulty = state.difficulty;
        self.last_reviewed = state.last_reviewed;
        self.next_review = state.next_review;
    }

    pub fn active_tier(&self) -> ActiveTier {
        ActiveTier {
            progress_id: self.id,
            tier_id: self.tier_id,
            tier_index: self.tier_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTier {
    pub progress_id: Uuid,
    pub tier_id: Uuid,
    pub tier_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSubmission {
    pub rating: Rating,
    pub shown_at: DateTime<Utc>,
    pub revealed_at: Option<DateTime<Utc>>,
    pub rated_at: DateTime<Utc>,
}

impl ReviewSubmission {
    /// A submission where the item was shown and rated at the same instant.
    pub fn at(rating: Rating, now: DateTime<Utc>) -> Self {
        Self {
            rating,
            shown_at: now,
            revealed_at: None,
            rated_at: now,
        }
    }
}

/// Append-only record of one rating, handed to the analytics collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub tier_id: Uuid,
    pub tier_index: u32,
    pub rating: Rating,
    pub shown_at: DateTime<Utc>,
    pub revealed_at: Option<DateTime<Utc>>,
    pub rated_at: DateTime<Utc>,
    pub next_review: DateTime<Utc>,
    pub interval_minutes: i64,
}

impl ReviewEvent {
    pub fn for_rating(row: &TierProgress, submission: &ReviewSubmission) -> Self {
        let next_review = row.next_review.unwrap_or(submission.rated_at);
        Self {
            id: Uuid::new_v4(),
            user_id: row.user_id,
            item_id: row.item_id,
            tier_id: row.tier_id,
            tier_index: row.tier_index,
            rating: submission.rating,
            shown_at: submission.shown_at,
            revealed_at: submission.revealed_at,
            rated_at: submission.rated_at,
            next_review,
            interval_minutes: (next_review - submission.rated_at).num_minutes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub new_stability: f64,
    pub new_difficulty: f64,
    pub new_next_review: DateTime<Utc>,
    pub active_tier_id: Uuid,
    pub active_tier_index: u32,
    pub progress_id: Uuid,
    pub event: ReviewEvent,
}

impl ReviewOutcome {
    pub fn new(row: &TierProgress, event: ReviewEvent) -> Self {
        Self {
            new_stability: row.stability,
            new_difficulty: row.difficulty,
            new_next_review: event.next_review,
            active_tier_id: row.tier_id,
            active_tier_index: row.tier_index,
            progress_id: row.id,
            event,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPreview {
    pub rating: Rating,
    pub interval_seconds: i64,
    pub next_review: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueItem {
    pub item_id: Uuid,
    pub progress_id: Uuid,
    pub active_tier_id: Uuid,
    pub active_tier_index: u32,
    pub stability: f64,
    pub difficulty: f64,
    pub next_review: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_parses_case_insensitively() {
        assert_eq!("GOOD".parse::<Rating>().ok(), Some(Rating::Good));
        assert_eq!(" easy ".parse::<Rating>().ok(), Some(Rating::Easy));
        assert_eq!(Rating::try_from("again").ok(), Some(Rating::Again));
    }

    #[test]
    fn unknown_rating_is_rejected() {
        let err = "perfect".parse::<Rating>().unwrap_err();
        assert!(matches!(err, ReviewError::InvalidRating(ref raw) if raw == "perfect"));
        assert!("".parse::<Rating>().is_err());
    }

    #[test]
    fn rating_serializes_lowercase() {
        let json = serde_json::to_string(&Rating::Hard).unwrap();
        assert_eq!(json, "\"hard\"");
        assert!(serde_json::from_str::<Rating>("\"meh\"").is_err());
    }
}
