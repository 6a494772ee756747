use std::collections::HashSet;

use crate::sync::engine::types::UpdateConsumersResult;
use crate::types::{BlockHeight, Hash, SyncStart};

/// Union and intersection of every consumer's known pool ids.
///
/// With no consumers both sets are empty.
pub fn pool_union_and_intersection<I>(known: I) -> (HashSet<Hash>, HashSet<Hash>)
where
    I: IntoIterator<Item = HashSet<Hash>>,
{
    let mut iter = known.into_iter();
    let Some(first) = iter.next() else {
        return (HashSet::new(), HashSet::new());
    };

    let mut union = first.clone();
    let mut intersection = first;

    for ids in iter {
        intersection.retain(|id| ids.contains(id));
        union.extend(ids);
    }

    log::debug!(
        "[POOL] union size {}, intersection size {}",
        union.len(),
        intersection.len()
    );

    (union, intersection)
}

/// Picks the least synced consumer and the earliest sync start.
///
/// `entries` holds `(sync start, tracker height)` per consumer in registry
/// order. Returns the index of the first consumer with the lowest height and
/// the element-wise minimum of all sync starts.
pub fn select_common_history(entries: &[(SyncStart, BlockHeight)]) -> Option<(usize, SyncStart)> {
    let (first_start, first_height) = *entries.first()?;

    let mut shortest = 0;
    let mut shortest_height = first_height;
    let mut sync_start = first_start;

    for (index, (start, height)) in entries.iter().enumerate().skip(1) {
        if *height < shortest_height {
            shortest = index;
            shortest_height = *height;
        }
        sync_start.timestamp = sync_start.timestamp.min(start.timestamp);
        sync_start.height = sync_start.height.min(start.height);
    }

    Some((shortest, sync_start))
}

/// Slice of an interval a consumer resuming at `new_block_height` gets:
/// `(offset into the interval, block count)`.
pub fn consumer_block_range(
    interval_start: BlockHeight,
    new_block_height: BlockHeight,
    interval_len: usize,
) -> (usize, usize) {
    let offset = new_block_height.saturating_sub(interval_start) as usize;
    (offset.min(interval_len), interval_len.saturating_sub(offset))
}

pub fn classify_update(has_errors: bool, changed: bool) -> UpdateConsumersResult {
    if has_errors {
        UpdateConsumersResult::ErrorOccurred
    } else if changed {
        UpdateConsumersResult::AddedNewBlocks
    } else {
        UpdateConsumersResult::NothingChanged
    }
}

/// A second pool query scoped to the intersection is needed unless every
/// consumer knows the same pool and the shortcut is enabled.
pub fn needs_intersection_query(
    union: &HashSet<Hash>,
    intersection: &HashSet<Hash>,
    shortcut: bool,
) -> bool {
    !(shortcut && union == intersection)
}
