//! Federated search.
//!
//! A keyword query fans out to every registered backend, active and
//! exhausted alike, as concurrent tasks on a `JoinSet`. Each sub-query is
//! bounded by `sub_query_timeout`; the whole search by `search_timeout`,
//! after which outstanding sub-queries are aborted and whatever finished is
//! merged. Backends that fail, time out or panic are left out of the merge
//! and listed in [`SearchResult::failed_backends`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio::time::{Duration, timeout, timeout_at};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{BackendError, SearchError, StorageResult};
use crate::merger::{self, BackendHits};
use crate::pool::PoolManager;
use crate::rollover::RolloverController;
use crate::types::{BackendDescriptor, Post, SearchResult};

/// Fans keyword queries out to every backend and merges the answers.
#[derive(Debug, Clone)]
pub struct FederatedSearch {
    pools: Arc<PoolManager>,
    rollover: Arc<RolloverController>,
    sub_query_timeout: Duration,
    search_timeout: Duration,
    max_limit: usize,
}

impl FederatedSearch {
    /// Creates a search engine over shared components.
    pub fn new(
        pools: Arc<PoolManager>,
        rollover: Arc<RolloverController>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            pools,
            rollover,
            sub_query_timeout: config.sub_query_timeout,
            search_timeout: config.search_timeout,
            max_limit: config.max_search_limit,
        }
    }

    /// Searches every backend for `keyword`, returning at most `limit` posts.
    ///
    /// `limit` is capped at the configured maximum. Total unavailability
    /// yields an empty result with every ordinal in `failed_backends`.
    pub async fn search(&self, keyword: &str, limit: usize) -> StorageResult<SearchResult> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(SearchError::EmptyKeyword.into());
        }
        let limit = limit.min(self.max_limit);
        if limit == 0 {
            return Ok(SearchResult::default());
        }

        let descriptors = self.rollover.descriptors();
        let ordinals: Vec<usize> = descriptors.iter().map(|d| d.id).collect();
        let mut pending: BTreeSet<usize> = ordinals.iter().copied().collect();

        let mut tasks: JoinSet<(usize, StorageResult<Vec<Post>>)> = JoinSet::new();
        for descriptor in descriptors {
            let pools = Arc::clone(&self.pools);
            let keyword = keyword.to_string();
            let budget = self.sub_query_timeout;
            tasks.spawn(async move {
                let id = descriptor.id;
                let result = sub_query(&pools, &descriptor, &keyword, limit, budget).await;
                (id, result)
            });
        }

        let deadline = tokio::time::Instant::now() + self.search_timeout;
        let mut answered: Vec<BackendHits> = Vec::new();

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((ordinal, Ok(posts))))) => {
                    pending.remove(&ordinal);
                    answered.push(BackendHits { ordinal, posts });
                }
                Ok(Some(Ok((ordinal, Err(e))))) => {
                    pending.remove(&ordinal);
                    warn!(backend = ordinal, error = %e, "Sub-query failed, skipping backend");
                }
                Ok(Some(Err(e))) => {
                    // The ordinal stays pending and is reported as failed.
                    warn!("Search task failed: {}", e);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        outstanding = pending.len(),
                        timeout_ms = self.search_timeout.as_millis() as u64,
                        "Search deadline reached, cancelling outstanding sub-queries"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        let mut answered_backends: Vec<usize> = answered.iter().map(|h| h.ordinal).collect();
        answered_backends.sort_unstable();
        let failed_backends: Vec<usize> = ordinals
            .into_iter()
            .filter(|i| answered_backends.binary_search(i).is_err())
            .collect();

        let posts = merger::merge(answered, limit);
        debug!(
            keyword,
            limit,
            hits = posts.len(),
            answered = answered_backends.len(),
            failed = failed_backends.len(),
            "Search complete"
        );

        Ok(SearchResult {
            posts,
            answered_backends,
            failed_backends,
        })
    }
}

async fn sub_query(
    pools: &PoolManager,
    descriptor: &BackendDescriptor,
    keyword: &str,
    limit: usize,
    budget: Duration,
) -> StorageResult<Vec<Post>> {
    let started = Instant::now();
    let query = async {
        let backend = pools.acquire(descriptor).await?;
        backend.search_text(keyword, limit).await
    };
    let result = match timeout(budget, query).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::QueryFailed {
            backend: descriptor.label(),
            message: format!("sub-query timed out after {}ms", budget.as_millis()),
        }
        .into()),
    };
    debug!(
        backend = %descriptor.label(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        ok = result.is_ok(),
        "Sub-query finished"
    );
    result
}
