use std::collections::HashSet;

use crate::model::{FeedItem, Id};

/// How a fetched page is combined with the cached list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Page 1, source switch or refresh: the page becomes the list.
    Replace,
    /// Load-more: new ids are appended after the existing list.
    Append,
}

/// Combine a fetched page with the cached item list.
///
/// Never mutates `existing`. Duplicate ids are dropped with the first
/// occurrence winning, so order of first appearance is preserved. The
/// server is expected to return unique, non-overlapping pages but
/// occasionally doesn't (items shifting between pages while a user scrolls).
///
/// Runs in O(n + m) using a set of known ids.
pub fn merge(existing: &[FeedItem], page: Vec<FeedItem>, mode: MergeMode) -> Vec<FeedItem> {
    let (mut seen, mut merged): (HashSet<Id>, Vec<FeedItem>) = match mode {
        MergeMode::Replace => (
            HashSet::with_capacity(page.len()),
            Vec::with_capacity(page.len()),
        ),
        MergeMode::Append => {
            let mut merged = Vec::with_capacity(existing.len() + page.len());
            merged.extend_from_slice(existing);
            (existing.iter().map(|i| i.id.clone()).collect(), merged)
        }
    };

    let base = merged.len();
    let received = page.len();
    for item in page {
        if seen.insert(item.id.clone()) {
            merged.push(item);
        }
    }

    let dropped = received - (merged.len() - base);
    if dropped > 0 {
        tracing::debug!(?mode, dropped, "Dropped duplicate items while merging page");
    }

    merged
}
