use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use deadpool_postgres::Pool;
use serde::Serialize;

use crate::config::{BranchingConfig, DatabaseConfig};
use crate::error::{BranchError, Result};
use crate::model::BranchStatus;
use crate::naming::RESERVED_SLUG;
use crate::storage::Storage;

/// True iff the slug addresses the main branch: empty or the literal `main`.
pub fn is_main_branch(slug: &str) -> bool {
    slug.is_empty() || slug == RESERVED_SLUG
}

/// Point-in-time counters for one cached pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub slug: String,
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Resolves a branch slug to a live connection pool.
///
/// Branch pools are created lazily on first use and cached; the main pool is
/// owned by the host process, held outside the cache, and never closed here.
/// The active-branch override is an atomic cell on the router itself, so
/// independent router instances (one per test, say) do not share state.
pub struct Router {
    storage: Arc<Storage>,
    branching: BranchingConfig,
    database: DatabaseConfig,
    main_pool: Pool,
    pools: RwLock<HashMap<String, Pool>>,
    active_branch: RwLock<Option<String>>,
}

impl Router {
    pub fn new(storage: Arc<Storage>, config: &crate::config::Config, main_pool: Pool) -> Self {
        Self {
            storage,
            branching: config.branching.clone(),
            database: config.database.clone(),
            main_pool,
            pools: RwLock::new(HashMap::new()),
            active_branch: RwLock::new(None),
        }
    }

    pub fn main_pool(&self) -> Pool {
        self.main_pool.clone()
    }

    /// Resolves `slug` to a pool, creating and caching one on first use.
    ///
    /// The main branch (empty slug or `main`) short-circuits to the main pool
    /// without touching Storage. Concurrent first lookups of the same slug
    /// race on the write lock; the loser discards its freshly built pool,
    /// which has opened no connections yet.
    pub async fn get_pool(&self, slug: &str) -> Result<Pool> {
        // The main branch stays reachable even with branching disabled;
        // the kill switch governs branches, not the database itself.
        if is_main_branch(slug) {
            return Ok(self.main_pool.clone());
        }
        if !self.branching.enabled {
            return Err(BranchError::BranchingDisabled);
        }

        // Fast path: read lock only. The guard drops before any await.
        if let Some(pool) = self.pools.read().unwrap().get(slug) {
            return Ok(pool.clone());
        }

        let branch = self.storage.get_branch_by_slug(slug).await?;
        if branch.status != BranchStatus::Ready {
            return Err(BranchError::BranchNotReady {
                slug: slug.to_string(),
                status: branch.status.to_string(),
            });
        }

        let url = self.database.branch_url(&branch.database_name)?;
        let pool = self.database.create_pool(&url)?;

        let mut pools = self.pools.write().unwrap();
        if let Some(existing) = pools.get(slug) {
            // Another task won the race; its pool is the published one.
            return Ok(existing.clone());
        }
        pools.insert(slug.to_string(), pool.clone());
        log::info!("created connection pool for branch {slug}");
        Ok(pool)
    }

    pub fn has_pool(&self, slug: &str) -> bool {
        self.pools.read().unwrap().contains_key(slug)
    }

    /// Slugs with a cached pool, sorted for stable output.
    pub fn active_pools(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.pools.read().unwrap().keys().cloned().collect();
        slugs.sort();
        slugs
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        let mut stats = vec![stats_for(RESERVED_SLUG, &self.main_pool)];
        let pools = self.pools.read().unwrap();
        let mut slugs: Vec<&String> = pools.keys().collect();
        slugs.sort();
        for slug in slugs {
            stats.push(stats_for(slug, &pools[slug]));
        }
        stats
    }

    /// Removes and closes the cached pool for `slug`. Absent entries succeed
    /// silently, so teardown paths can call this unconditionally.
    pub fn close_pool(&self, slug: &str) {
        let removed = self.pools.write().unwrap().remove(slug);
        if let Some(pool) = removed {
            pool.close();
            log::info!("closed connection pool for branch {slug}");
        }
    }

    /// Closes every cached branch pool. The main pool is owned by the host
    /// process and stays open.
    pub fn close_all_pools(&self) {
        let drained: Vec<(String, Pool)> = self.pools.write().unwrap().drain().collect();
        for (slug, pool) in drained {
            pool.close();
            log::debug!("closed connection pool for branch {slug}");
        }
    }

    /// Acquires a connection and pings it, pre-creating the pool if needed.
    pub async fn warmup_pool(&self, slug: &str) -> Result<()> {
        let pool = self.get_pool(slug).await?;
        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Closes the cached pool for `slug` and builds a fresh one.
    pub async fn refresh_pool(&self, slug: &str) -> Result<Pool> {
        self.close_pool(slug);
        self.get_pool(slug).await
    }

    // ---- active branch override ----

    pub fn set_active_branch(&self, slug: &str) {
        *self.active_branch.write().unwrap() = Some(slug.to_string());
    }

    pub fn clear_active_branch(&self) {
        *self.active_branch.write().unwrap() = None;
    }

    pub fn get_active_branch(&self) -> Option<String> {
        self.active_branch.read().unwrap().clone()
    }

    /// The active override when set, else the configured default branch.
    pub fn get_default_branch(&self) -> String {
        match self.get_active_branch() {
            Some(slug) if !slug.is_empty() => slug,
            _ => self.branching.default_branch.clone(),
        }
    }

    /// `"api"` when an override is in effect, `"config"` otherwise.
    pub fn active_branch_source(&self) -> &'static str {
        match self.get_active_branch() {
            Some(slug) if !slug.is_empty() => "api",
            _ => "config",
        }
    }
}

fn stats_for(slug: &str, pool: &Pool) -> PoolStats {
    let status = pool.status();
    PoolStats {
        slug: slug.to_string(),
        max_size: status.max_size,
        size: status.size,
        available: status.available,
        waiting: status.waiting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_router(enabled: bool) -> Router {
        let mut config = Config::default();
        config.branching.enabled = enabled;
        config.database.url = "postgresql://postgres@localhost:5432/postgres".into();
        // Pools connect lazily, so none of this touches a server.
        let main_pool = config.database.create_main_pool().unwrap();
        let storage = Arc::new(Storage::new(main_pool.clone()));
        Router::new(storage, &config, main_pool)
    }

    #[test]
    fn is_main_branch_matches_empty_and_reserved() {
        assert!(is_main_branch(""));
        assert!(is_main_branch("main"));
        assert!(!is_main_branch("feat-x"));
        assert!(!is_main_branch("main-2"));
    }

    #[tokio::test]
    async fn disabled_branching_refuses_lookups_but_serves_main() {
        let router = test_router(false);
        assert!(matches!(
            router.get_pool("feat-x").await,
            Err(BranchError::BranchingDisabled)
        ));
        // The main database stays reachable behind the kill switch.
        router.get_pool("").await.unwrap();
        router.get_pool("main").await.unwrap();
    }

    #[tokio::test]
    async fn main_slugs_short_circuit_to_the_main_pool() {
        let router = test_router(true);
        // No branch metadata exists; these succeed only because the main
        // branch never goes through Storage.
        router.get_pool("").await.unwrap();
        router.get_pool("main").await.unwrap();
        assert!(!router.has_pool(""));
        assert!(!router.has_pool("main"));
        assert!(router.active_pools().is_empty());
    }

    #[test]
    fn close_pool_is_silent_for_absent_entries() {
        let router = test_router(true);
        router.close_pool("never-created");
        router.close_all_pools();
    }

    #[test]
    fn active_branch_override_switches_source() {
        let router = test_router(true);
        assert_eq!(router.get_active_branch(), None);
        assert_eq!(router.get_default_branch(), "main");
        assert_eq!(router.active_branch_source(), "config");

        router.set_active_branch("feat-x");
        assert_eq!(router.get_active_branch().as_deref(), Some("feat-x"));
        assert_eq!(router.get_default_branch(), "feat-x");
        assert_eq!(router.active_branch_source(), "api");

        router.clear_active_branch();
        assert_eq!(router.get_default_branch(), "main");
        assert_eq!(router.active_branch_source(), "config");
    }

    #[test]
    fn routers_do_not_share_override_state() {
        let a = test_router(true);
        let b = test_router(true);
        a.set_active_branch("feat-a");
        assert_eq!(b.get_active_branch(), None);
    }

    #[test]
    fn pool_stats_always_reports_main_first() {
        let router = test_router(true);
        let stats = router.pool_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].slug, "main");
        assert_eq!(stats[0].size, 0);
    }
}
