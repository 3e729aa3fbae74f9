//! Assertions over search results and registry state.

use std::collections::HashSet;

use postvault_persistence::registry::RegistryState;
use postvault_persistence::types::{Post, SearchResult};

/// Asserts that `created_at` never increases along `posts`.
pub fn assert_newest_first(posts: &[Post]) {
    for pair in posts.windows(2) {
        assert!(
            pair[0].created_at >= pair[1].created_at,
            "post {} ({}) sorts before newer post {} ({})",
            pair[0].id,
            pair[0].created_at,
            pair[1].id,
            pair[1].created_at
        );
    }
}

/// Asserts that no id appears twice.
pub fn assert_unique_ids(posts: &[Post]) {
    let mut seen = HashSet::new();
    for post in posts {
        assert!(seen.insert(post.id.as_str()), "duplicate id {} in result", post.id);
    }
}

/// Asserts the ordering and uniqueness guarantees of a search result.
pub fn assert_well_formed(result: &SearchResult) {
    assert_newest_first(&result.posts);
    assert_unique_ids(&result.posts);
}

/// Asserts that exactly the descriptors below `current_index` are exhausted.
pub fn assert_registry_consistent(state: &RegistryState) {
    state.validate().expect("registry invariants hold");
    for d in state.descriptors() {
        assert_eq!(
            d.exhausted,
            d.id < state.current_index(),
            "descriptor {} exhausted flag disagrees with current_index {}",
            d.id,
            state.current_index()
        );
    }
}
