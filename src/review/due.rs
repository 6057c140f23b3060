use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::review::types::{DueItem, TierProgress};

/// Active rows whose `next_review` has passed, earliest first. Ties on the
/// timestamp break by item id so the order is reproducible.
pub fn select_due<'a, I>(rows: I, now: DateTime<Utc>, limit: Option<usize>) -> Vec<DueItem>
where
    I: IntoIterator<Item = &'a TierProgress>,
{
    let mut due: Vec<DueItem> = rows
        .into_iter()
        .filter(|row| row.is_active)
        .filter_map(|row| {
            let next_review = row.next_review?;
            (next_review <= now).then(|| DueItem {
                item_id: row.item_id,
                progress_id: row.id,
                active_tier_id: row.tier_id,
                active_tier_index: row.tier_index,
                stability: row.stability,
                difficulty: row.difficulty,
                next_review,
            })
        })
        .collect();

    due.sort_by(due_order);
    if let Some(limit) = limit {
        due.truncate(limit);
    }
    due
}

pub fn due_order(a: &DueItem, b: &DueItem) -> Ordering {
    a.next_review
        .cmp(&b.next_review)
        .then_with(|| a.item_id.cmp(&b.item_id))
}
