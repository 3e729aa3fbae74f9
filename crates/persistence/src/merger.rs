//! Merging of per-backend search results.
//!
//! Sub-results are ordered by backend ordinal and concatenated. Posts are
//! de-duplicated by id, keeping the first occurrence (the lowest ordinal,
//! then the backend's own relevance order). The union is then stably sorted
//! by creation time, newest first, and truncated to the limit.
//!
//! The output depends only on the set of sub-results, not on the order in
//! which backends answered.

use std::cmp::Reverse;
use std::collections::HashSet;

use crate::types::Post;

/// Results returned by one backend.
#[derive(Debug, Clone)]
pub struct BackendHits {
    /// Ordinal of the backend.
    pub ordinal: usize,
    /// Matches in the backend's relevance order.
    pub posts: Vec<Post>,
}

/// Merges sub-results into at most `limit` posts.
pub fn merge(mut results: Vec<BackendHits>, limit: usize) -> Vec<Post> {
    results.sort_by_key(|r| r.ordinal);

    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<Post> = results
        .into_iter()
        .flat_map(|r| r.posts)
        .filter(|p| seen.insert(p.id.clone()))
        .collect();

    merged.sort_by_key(|p| Reverse(p.created_at));
    merged.truncate(limit);
    merged
}
