pub mod aggregate;
pub mod config;
pub mod due;
pub mod engine;
pub mod error;
pub mod locks;
pub mod policy;
pub mod transition;
pub mod types;

pub use aggregate::{ChangeSet, ItemProgress};
pub use config::{InvalidSettings, LearningSettings};
pub use engine::ReviewEngine;
pub use error::ReviewError;
pub use policy::{apply_rating, ReviewPolicy};
pub use transition::TierLadder;
pub use types::{
    ActiveTier, DueItem, MemoryState, Rating, ReviewEvent, ReviewOutcome, ReviewPreview,
    ReviewSubmission, Tier, TierProgress,
};
