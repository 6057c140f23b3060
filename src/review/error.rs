use thiserror::Error;
use uuid::Uuid;

use crate::db::StoreError;
use crate::review::config::InvalidSettings;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("invalid rating: {0:?}")]
    InvalidRating(String),
    #[error("item {item_id} has no tier above {current}")]
    NoNextTier { item_id: Uuid, current: u32 },
    #[error("item {item_id} has no tier below {current}")]
    AtFloor { item_id: Uuid, current: u32 },
    #[error("item {item_id} has no tier 0")]
    MissingTierZero { item_id: Uuid },
    #[error("item not found: {0}")]
    ItemNotFound(Uuid),
    #[error("progress of user {user_id} on item {item_id} was modified concurrently")]
    ConcurrentModification { user_id: Uuid, item_id: Uuid },
    #[error(transparent)]
    InvalidSettings(#[from] InvalidSettings),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReviewError {
    pub const fn code(&self) -> &'static str {
        match self {
            ReviewError::InvalidRating(_) => "INVALID_RATING",
            ReviewError::NoNextTier { .. } => "NO_NEXT_TIER",
            ReviewError::AtFloor { .. } => "AT_FLOOR",
            ReviewError::MissingTierZero { .. } => "MISSING_TIER_ZERO",
            ReviewError::ItemNotFound(_) => "NOT_FOUND",
            ReviewError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            ReviewError::InvalidSettings(_) => "VALIDATION_ERROR",
            ReviewError::Store(_) => "STORE_ERROR",
        }
    }

    /// Server-side faults. Everything else is a normal negative result for
    /// the caller.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReviewError::MissingTierZero { .. } | ReviewError::Store(_)
        )
    }
}
