use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use tokio_postgres::error::SqlState;
use url::Url;
use uuid::Uuid;

use crate::config::{BranchingConfig, Config, DatabaseConfig};
use crate::error::{BranchError, Result};
use crate::model::{
    AccessLevel, ActivityAction, ActivityLogEntry, Branch, BranchFilter, BranchStatus, BranchType,
    DataCloneMode, GitHubPrRef, NewActivity, NewBranch,
};
use crate::naming::{
    generate_database_name, generate_pr_slug, generate_slug, sanitize_identifier, validate_slug,
};
use crate::seeder::Seeder;
use crate::storage::Storage;

/// Internal deadline for DDL, independent of the caller's own timeout.
/// `CREATE DATABASE ... TEMPLATE` and `DROP DATABASE` interact with
/// server-side locks and must not hang an operation forever.
const DDL_TIMEOUT: Duration = Duration::from_secs(60);

/// Callback invalidating the router's cached pool for a slug before the
/// underlying database goes away.
pub type PoolInvalidator = Arc<dyn Fn(&str) + Send + Sync>;

/// Request to create a branch. Unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CreateBranchRequest {
    pub name: String,
    /// Explicit slug; derived from `name` when absent.
    pub slug: Option<String>,
    pub parent_branch_id: Option<Uuid>,
    pub data_clone_mode: Option<DataCloneMode>,
    pub branch_type: Option<BranchType>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seeds_path: Option<String>,
    pub github: Option<GitHubPrRef>,
    pub created_by: Option<String>,
}

/// Outcome of one expiry sweep. Per-branch failures never abort the sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub failed: Vec<CleanupFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub slug: String,
    pub error: String,
}

/// Orchestrates branch lifecycles: metadata transitions through Storage,
/// physical databases through template clones on the main pool.
pub struct BranchManager {
    storage: Arc<Storage>,
    branching: BranchingConfig,
    database: DatabaseConfig,
    main_pool: Pool,
    base_url: Url,
    owner: String,
    /// Per-database-name mutexes serializing DDL. Postgres rejects a TEMPLATE
    /// copy while the template has other sessions, and a DROP while anyone is
    /// connected to the target.
    ddl_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    invalidator: RwLock<Option<PoolInvalidator>>,
}

impl BranchManager {
    /// Parses the main connection URL once; an invalid URL is a construction
    /// error, not a latent runtime one.
    pub fn new(storage: Arc<Storage>, config: &Config, main_pool: Pool) -> Result<Self> {
        let base_url = config.database.parsed_url()?;
        let owner = base_url.username().to_string();
        Ok(Self {
            storage,
            branching: config.branching.clone(),
            database: config.database.clone(),
            main_pool,
            base_url,
            owner,
            ddl_locks: Mutex::new(HashMap::new()),
            invalidator: RwLock::new(None),
        })
    }

    pub fn set_pool_invalidator(&self, invalidator: PoolInvalidator) {
        *self.invalidator.write().unwrap() = Some(invalidator);
    }

    fn invalidate_pool(&self, slug: &str) {
        if let Some(invalidator) = self.invalidator.read().unwrap().as_ref() {
            invalidator(slug);
        }
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.branching.enabled {
            Ok(())
        } else {
            Err(BranchError::BranchingDisabled)
        }
    }

    /// Registers the singular main branch row if missing, pointing at the
    /// control-plane database itself. Idempotent.
    pub async fn ensure_main_branch(&self) -> Result<Branch> {
        if let Some(main) = self.storage.get_main_branch().await? {
            return Ok(main);
        }

        let slug = self.branching.default_branch.clone();
        let database_name = self.base_url.path().trim_start_matches('/').to_string();
        let new = NewBranch {
            name: slug.clone(),
            slug,
            database_name,
            branch_type: BranchType::Main,
            parent_branch_id: None,
            data_clone_mode: DataCloneMode::SchemaOnly,
            created_by: None,
            expires_at: None,
            seeds_path: None,
            github: None,
        };

        let storage = self.storage.clone();
        let branch = self
            .storage
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let branch = storage.create_branch_in(&**tx, new).await?;
                    storage
                        .update_branch_status_in(&**tx, branch.id, BranchStatus::Ready, None)
                        .await?;
                    Ok(branch)
                })
            })
            .await?;
        log::info!(
            "registered main branch backed by database {}",
            branch.database_name
        );
        self.storage.get_branch(branch.id).await
    }

    // ---- create ----

    pub async fn create_branch(&self, request: CreateBranchRequest) -> Result<Branch> {
        self.ensure_enabled()?;

        let slug = match &request.slug {
            Some(slug) => slug.clone(),
            None => generate_slug(&request.name),
        };
        validate_slug(&slug)?;
        self.check_limits(request.created_by.as_deref()).await?;

        let data_clone_mode = request
            .data_clone_mode
            .unwrap_or(self.branching.default_data_clone_mode);
        let branch_type = request.branch_type.unwrap_or(BranchType::Preview);
        let expires_at = compute_expiry(
            branch_type,
            request.expires_at,
            self.branching.auto_delete_after(),
        );

        let parent = match request.parent_branch_id {
            Some(parent_id) => {
                let parent = self.storage.get_branch(parent_id).await?;
                if parent.status != BranchStatus::Ready {
                    return Err(BranchError::BranchNotReady {
                        slug: parent.slug,
                        status: parent.status.to_string(),
                    });
                }
                parent
            }
            None => self.main_branch().await?,
        };

        let database_name = generate_database_name(&self.branching.database_prefix, &slug);
        // The row goes in before any DDL: a crash mid-provisioning leaves a
        // `creating` record that restart-time cleanup can reason about, and
        // the unique constraints settle concurrent creates of the same slug.
        let branch = self
            .storage
            .create_branch(NewBranch {
                name: request.name.clone(),
                slug: slug.clone(),
                database_name,
                branch_type,
                parent_branch_id: Some(parent.id),
                data_clone_mode,
                created_by: request.created_by.clone(),
                expires_at,
                seeds_path: request.seeds_path.clone(),
                github: request.github.clone(),
            })
            .await?;
        self.storage
            .append_activity(
                NewActivity::started(branch.id, ActivityAction::Created)
                    .executed_by(request.created_by.as_deref()),
            )
            .await;

        let started = Instant::now();
        match self.provision_branch(&branch, &parent).await {
            Ok(()) => {
                self.storage
                    .update_branch_status(branch.id, BranchStatus::Ready, None)
                    .await?;
                self.storage
                    .append_activity(
                        NewActivity::success(branch.id, ActivityAction::Created)
                            .executed_by(request.created_by.as_deref())
                            .duration_ms(started.elapsed().as_millis() as i64),
                    )
                    .await;
                log::info!("created branch {slug} ({})", branch.database_name);
                self.storage.get_branch(branch.id).await
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(status_err) = self
                    .storage
                    .update_branch_status(branch.id, BranchStatus::Error, Some(&message))
                    .await
                {
                    log::warn!("failed to record error status for branch {slug}: {status_err}");
                }
                self.storage
                    .append_activity(
                        NewActivity::failed(branch.id, ActivityAction::Created, message.clone())
                            .executed_by(request.created_by.as_deref())
                            .duration_ms(started.elapsed().as_millis() as i64),
                    )
                    .await;
                // Best-effort removal of a half-created database; the row
                // stays in `error` for inspection.
                if let Err(drop_err) = self.drop_database(&branch.database_name).await {
                    log::warn!(
                        "cleanup drop of {} failed: {drop_err}",
                        branch.database_name
                    );
                }
                Err(e)
            }
        }
    }

    async fn provision_branch(&self, branch: &Branch, parent: &Branch) -> Result<()> {
        self.clone_database(&branch.database_name, &parent.database_name)
            .await?;
        if branch.data_clone_mode == DataCloneMode::SeedData {
            self.seed_branch(branch).await?;
        }
        Ok(())
    }

    async fn seed_branch(&self, branch: &Branch) -> Result<()> {
        let seeds_dir = branch
            .seeds_path
            .clone()
            .or_else(|| {
                self.branching
                    .seeds_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string())
            })
            .unwrap_or_default();
        if seeds_dir.is_empty() {
            log::debug!("no seeds path configured for branch {}", branch.slug);
            return Ok(());
        }

        self.storage
            .append_activity(NewActivity::started(branch.id, ActivityAction::Seeding))
            .await;

        let url = self.database.branch_url(&branch.database_name)?;
        let pool = self.database.create_pool(&url)?;
        let seeder = Seeder::new(seeds_dir);
        let result = seeder.execute_seeds(&pool, &branch.slug).await;
        pool.close();

        match result {
            Ok(count) => {
                self.storage
                    .append_activity(
                        NewActivity::success(branch.id, ActivityAction::Seeding)
                            .details(serde_json::json!({ "files": count })),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                self.storage
                    .append_activity(NewActivity::failed(
                        branch.id,
                        ActivityAction::Seeding,
                        e.to_string(),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    // ---- delete ----

    pub async fn delete_branch(&self, id: Uuid) -> Result<()> {
        self.ensure_enabled()?;
        let branch = self.storage.get_branch(id).await?;
        if branch.is_main() {
            return Err(BranchError::CannotDeleteMain);
        }

        self.storage
            .update_branch_status(id, BranchStatus::Deleting, None)
            .await?;
        self.invalidate_pool(&branch.slug);

        let started = Instant::now();
        match self.drop_database(&branch.database_name).await {
            Ok(()) => {
                self.storage.delete_branch(id).await?;
                self.storage
                    .append_activity(
                        NewActivity::success(id, ActivityAction::Deleted)
                            .duration_ms(started.elapsed().as_millis() as i64),
                    )
                    .await;
                log::info!("deleted branch {} ({})", branch.slug, branch.database_name);
                Ok(())
            }
            Err(e) => {
                // The database may still exist; leave the row in `error` so
                // an operator can retry instead of leaking it silently.
                let message = e.to_string();
                if let Err(status_err) = self
                    .storage
                    .update_branch_status(id, BranchStatus::Error, Some(&message))
                    .await
                {
                    log::warn!(
                        "failed to record drop failure for branch {}: {status_err}",
                        branch.slug
                    );
                }
                self.storage
                    .append_activity(NewActivity::failed(
                        id,
                        ActivityAction::Deleted,
                        message.clone(),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn delete_branch_by_slug(&self, slug: &str) -> Result<()> {
        self.ensure_enabled()?;
        let branch = self.storage.get_branch_by_slug(slug).await?;
        self.delete_branch(branch.id).await
    }

    // ---- reset ----

    /// Drops and re-clones a branch's database in place, under a `migrating`
    /// status. The row survives, and with it the id, access grants, and
    /// creation metadata.
    pub async fn reset_branch(&self, id: Uuid) -> Result<Branch> {
        self.ensure_enabled()?;
        let branch = self.storage.get_branch(id).await?;
        if branch.is_main() {
            return Err(BranchError::CannotDeleteMain);
        }
        let parent = match branch.parent_branch_id {
            Some(parent_id) => {
                let parent = self.storage.get_branch(parent_id).await?;
                if parent.status != BranchStatus::Ready {
                    return Err(BranchError::BranchNotReady {
                        slug: parent.slug,
                        status: parent.status.to_string(),
                    });
                }
                parent
            }
            None => self.main_branch().await?,
        };

        self.storage
            .update_branch_status(id, BranchStatus::Migrating, None)
            .await?;
        self.invalidate_pool(&branch.slug);
        self.storage
            .append_activity(NewActivity::started(id, ActivityAction::Reset))
            .await;

        let started = Instant::now();
        let result = async {
            self.drop_database(&branch.database_name).await?;
            self.provision_branch(&branch, &parent).await
        }
        .await;

        match result {
            Ok(()) => {
                self.storage
                    .update_branch_status(id, BranchStatus::Ready, None)
                    .await?;
                self.storage
                    .append_activity(
                        NewActivity::success(id, ActivityAction::Reset)
                            .duration_ms(started.elapsed().as_millis() as i64),
                    )
                    .await;
                log::info!("reset branch {} from {}", branch.slug, parent.slug);
                self.storage.get_branch(id).await
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(status_err) = self
                    .storage
                    .update_branch_status(id, BranchStatus::Error, Some(&message))
                    .await
                {
                    log::warn!(
                        "failed to record reset failure for branch {}: {status_err}",
                        branch.slug
                    );
                }
                self.storage
                    .append_activity(NewActivity::failed(
                        id,
                        ActivityAction::Reset,
                        message.clone(),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    // ---- expiry sweep ----

    /// Deletes every expired, ready preview branch, oldest first. Individual
    /// failures are collected and logged; the sweep itself never aborts.
    pub async fn cleanup_expired_branches(&self) -> Result<CleanupReport> {
        self.ensure_enabled()?;
        let expired = self
            .storage
            .list_expired_preview_branches(Utc::now())
            .await?;
        if expired.is_empty() {
            return Ok(CleanupReport::default());
        }

        log::info!("expiry sweep found {} branch(es)", expired.len());
        let mut report = CleanupReport::default();
        for branch in expired {
            match self.delete_branch(branch.id).await {
                Ok(()) => report.deleted.push(branch.slug),
                Err(e) => {
                    log::warn!("failed to delete expired branch {}: {e}", branch.slug);
                    report.failed.push(CleanupFailure {
                        slug: branch.slug,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    // ---- GitHub PR integration ----

    pub async fn create_branch_for_pr(
        &self,
        repo: &str,
        pr_number: u64,
        pr_url: &str,
        requested_by: Option<String>,
    ) -> Result<Option<Branch>> {
        self.ensure_enabled()?;
        let Some(config) = self.storage.get_github_config(repo).await? else {
            return Ok(None);
        };
        if !config.auto_create_on_pr {
            return Ok(None);
        }

        let request = CreateBranchRequest {
            name: format!("PR #{pr_number}"),
            slug: Some(generate_pr_slug(pr_number)),
            data_clone_mode: Some(config.default_data_clone_mode),
            branch_type: Some(BranchType::Preview),
            github: Some(GitHubPrRef {
                number: pr_number as i32,
                url: pr_url.to_string(),
                repo: repo.to_string(),
            }),
            created_by: requested_by,
            ..Default::default()
        };
        self.create_branch(request).await.map(Some)
    }

    pub async fn delete_branch_for_pr(&self, repo: &str, pr_number: u64) -> Result<bool> {
        self.ensure_enabled()?;
        let Some(config) = self.storage.get_github_config(repo).await? else {
            return Ok(false);
        };
        if !config.auto_delete_on_merge {
            return Ok(false);
        }

        let slug = generate_pr_slug(pr_number);
        match self.storage.get_branch_by_slug(&slug).await {
            Ok(branch) => {
                if branch.github_repo.as_deref() != Some(repo) {
                    log::warn!(
                        "branch {slug} belongs to a different repository, skipping auto-delete"
                    );
                    return Ok(false);
                }
                self.delete_branch(branch.id).await?;
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ---- access ----

    pub async fn grant_access(
        &self,
        branch_id: Uuid,
        user_id: &str,
        level: AccessLevel,
        granted_by: Option<&str>,
    ) -> Result<()> {
        self.ensure_enabled()?;
        self.storage.grant_access(branch_id, user_id, level).await?;
        self.storage
            .append_activity(
                NewActivity::success(branch_id, ActivityAction::AccessGranted)
                    .details(serde_json::json!({ "user": user_id, "level": level.as_str() }))
                    .executed_by(granted_by),
            )
            .await;
        Ok(())
    }

    pub async fn revoke_access(
        &self,
        branch_id: Uuid,
        user_id: &str,
        revoked_by: Option<&str>,
    ) -> Result<bool> {
        self.ensure_enabled()?;
        let removed = self.storage.revoke_access(branch_id, user_id).await?;
        if removed {
            self.storage
                .append_activity(
                    NewActivity::success(branch_id, ActivityAction::AccessRevoked)
                        .details(serde_json::json!({ "user": user_id }))
                        .executed_by(revoked_by),
                )
                .await;
        }
        Ok(removed)
    }

    // ---- lookups & plumbing ----

    pub async fn get_branch(&self, id: Uuid) -> Result<Branch> {
        self.storage.get_branch(id).await
    }

    pub async fn get_branch_by_slug(&self, slug: &str) -> Result<Branch> {
        self.storage.get_branch_by_slug(slug).await
    }

    pub async fn list_branches(&self, filter: &BranchFilter) -> Result<Vec<Branch>> {
        self.storage.list_branches(filter).await
    }

    pub async fn list_activity(&self, branch_id: Uuid, limit: i64) -> Result<Vec<ActivityLogEntry>> {
        self.storage.list_activity(branch_id, limit).await
    }

    /// Updates the mutable metadata of a branch: name, seeds path, PR
    /// attachment. Everything else changes only through lifecycle
    /// transitions.
    pub async fn update_branch(&self, id: Uuid, update: crate::model::UpdateBranch) -> Result<()> {
        self.ensure_enabled()?;
        self.storage.update_branch(id, update).await
    }

    /// Writes or clears a branch's expiry. The scheduler only ever looks at
    /// preview branches, so setting this on other types is inert.
    pub async fn set_branch_expiration(
        &self,
        id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.ensure_enabled()?;
        self.storage.set_branch_expires_at(id, expires_at).await
    }

    /// The main connection URL with the path swapped for the branch's
    /// database. Credentials, host, port, and TLS parameters are inherited.
    pub fn get_branch_connection_url(&self, branch: &Branch) -> Result<String> {
        Ok(self.database.branch_url(&branch.database_name)?.to_string())
    }

    /// Runs `f` inside one control-plane transaction; see
    /// [`Storage::with_transaction`].
    pub async fn run_in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(
            &'t deadpool_postgres::Transaction<'t>,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 't>>,
    {
        self.storage.with_transaction(f).await
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    async fn main_branch(&self) -> Result<Branch> {
        self.storage
            .get_main_branch()
            .await?
            .ok_or_else(|| BranchError::BranchNotFound("main".to_string()))
    }

    async fn check_limits(&self, created_by: Option<&str>) -> Result<()> {
        let max_total = self.branching.max_total_branches;
        if max_total > 0 {
            let total = self.storage.count_branches(&BranchFilter::default()).await?;
            if total >= i64::from(max_total) {
                return Err(BranchError::MaxTotalReached(max_total));
            }
        }

        let per_user = self.branching.max_branches_per_user;
        if per_user > 0 {
            if let Some(user) = created_by {
                let filter = BranchFilter {
                    created_by: Some(user.to_string()),
                    ..Default::default()
                };
                let owned = self.storage.count_branches(&filter).await?;
                if owned >= i64::from(per_user) {
                    return Err(BranchError::UserQuotaExceeded {
                        user: user.to_string(),
                        limit: per_user,
                    });
                }
            }
        }
        Ok(())
    }

    // ---- physical DDL ----

    /// Takes the per-name DDL mutexes for `names` in sorted order, so
    /// overlapping lock sets cannot deadlock.
    async fn lock_databases(&self, names: &[&str]) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
        let mut sorted: Vec<&str> = names.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for name in sorted {
            let mutex = {
                let mut locks = self.ddl_locks.lock().unwrap();
                locks
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                    .clone()
            };
            guards.push(mutex.lock_owned().await);
        }
        guards
    }

    async fn clone_database(&self, target: &str, template: &str) -> Result<()> {
        let _guards = self.lock_databases(&[template, target]).await;
        let client = self.main_pool.get().await?;

        // Postgres refuses a TEMPLATE copy while other sessions touch the
        // template; idle ones are terminated, active ones surface ParentBusy.
        self.terminate_sessions(&client, template, true).await?;

        let mut ddl = format!(
            "CREATE DATABASE {} WITH TEMPLATE {}",
            sanitize_identifier(target),
            sanitize_identifier(template)
        );
        if !self.owner.is_empty() {
            ddl.push_str(&format!(" OWNER {}", sanitize_identifier(&self.owner)));
        }

        match tokio::time::timeout(DDL_TIMEOUT, client.execute(&ddl, &[])).await {
            Err(_) => Err(BranchError::PhysicalCreateFailed {
                database: target.to_string(),
                message: format!("timed out after {}s", DDL_TIMEOUT.as_secs()),
            }),
            Ok(Err(e)) if e.code() == Some(&SqlState::OBJECT_IN_USE) => {
                Err(BranchError::ParentBusy(template.to_string()))
            }
            Ok(Err(e)) => Err(BranchError::PhysicalCreateFailed {
                database: target.to_string(),
                message: e.to_string(),
            }),
            Ok(Ok(_)) => {
                log::debug!("created database {target} from template {template}");
                Ok(())
            }
        }
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        let _guards = self.lock_databases(&[database]).await;
        let client = self.main_pool.get().await?;

        // DROP DATABASE fails while anyone is connected; force everyone off.
        self.terminate_sessions(&client, database, false).await?;

        let ddl = format!("DROP DATABASE IF EXISTS {}", sanitize_identifier(database));
        match tokio::time::timeout(DDL_TIMEOUT, client.execute(&ddl, &[])).await {
            Err(_) => Err(BranchError::PhysicalDropFailed {
                database: database.to_string(),
                message: format!("timed out after {}s", DDL_TIMEOUT.as_secs()),
            }),
            Ok(Err(e)) => Err(BranchError::PhysicalDropFailed {
                database: database.to_string(),
                message: e.to_string(),
            }),
            Ok(Ok(_)) => {
                log::debug!("dropped database {database}");
                Ok(())
            }
        }
    }

    async fn terminate_sessions(
        &self,
        client: &deadpool_postgres::Client,
        database: &str,
        idle_only: bool,
    ) -> Result<()> {
        let sql = if idle_only {
            "SELECT pid FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid() AND state <> 'active'"
        } else {
            "SELECT pid FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()"
        };
        let rows = client.query(sql, &[&database]).await?;
        if rows.is_empty() {
            return Ok(());
        }

        log::info!(
            "terminating {} session(s) on database {database}",
            rows.len()
        );
        for row in rows {
            let pid: i32 = row.get(0);
            if let Err(e) = client
                .query("SELECT pg_terminate_backend($1)", &[&pid])
                .await
            {
                log::warn!("failed to terminate backend {pid}: {e}");
            }
        }
        Ok(())
    }
}

/// Expiry for a new branch: previews take the requested timestamp or the
/// configured horizon; main and persistent branches never expire.
fn compute_expiry(
    branch_type: BranchType,
    requested: Option<DateTime<Utc>>,
    auto_delete_after: Option<chrono::Duration>,
) -> Option<DateTime<Utc>> {
    match branch_type {
        BranchType::Preview => requested.or_else(|| auto_delete_after.map(|d| Utc::now() + d)),
        BranchType::Main | BranchType::Persistent => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager(enabled: bool) -> BranchManager {
        let mut config = Config::default();
        config.branching.enabled = enabled;
        let main_pool = config.database.create_main_pool().unwrap();
        let storage = Arc::new(Storage::new(main_pool.clone()));
        BranchManager::new(storage, &config, main_pool).unwrap()
    }

    #[test]
    fn construction_rejects_invalid_main_url() {
        let mut config = Config::default();
        config.database.url = "definitely not a url".into();
        let fallback = Config::default();
        let main_pool = fallback.database.create_main_pool().unwrap();
        let storage = Arc::new(Storage::new(main_pool.clone()));
        assert!(matches!(
            BranchManager::new(storage, &config, main_pool),
            Err(BranchError::UrlParseFailed(_))
        ));
    }

    #[tokio::test]
    async fn disabled_branching_gates_lifecycle_operations() {
        let manager = test_manager(false);
        let request = CreateBranchRequest {
            name: "Feature".into(),
            ..Default::default()
        };
        assert!(matches!(
            manager.create_branch(request).await,
            Err(BranchError::BranchingDisabled)
        ));
        assert!(matches!(
            manager.delete_branch(Uuid::new_v4()).await,
            Err(BranchError::BranchingDisabled)
        ));
        assert!(matches!(
            manager.reset_branch(Uuid::new_v4()).await,
            Err(BranchError::BranchingDisabled)
        ));
        assert!(matches!(
            manager.cleanup_expired_branches().await,
            Err(BranchError::BranchingDisabled)
        ));
    }

    #[test]
    fn branch_connection_url_swaps_database() {
        let manager = test_manager(true);
        let branch = Branch {
            id: Uuid::new_v4(),
            name: "Feature".into(),
            slug: "feature".into(),
            database_name: "branch_feature".into(),
            status: BranchStatus::Ready,
            branch_type: BranchType::Preview,
            parent_branch_id: None,
            data_clone_mode: DataCloneMode::SchemaOnly,
            created_by: None,
            expires_at: None,
            seeds_path: None,
            github_pr_number: None,
            github_pr_url: None,
            github_repo: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            access: Vec::new(),
        };
        let url = manager.get_branch_connection_url(&branch).unwrap();
        assert!(url.ends_with("/branch_feature"));
    }

    #[test]
    fn preview_expiry_prefers_request_then_config() {
        let requested = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(
            compute_expiry(BranchType::Preview, Some(requested), None),
            Some(requested)
        );

        let horizon = chrono::Duration::hours(24);
        let computed = compute_expiry(BranchType::Preview, None, Some(horizon)).unwrap();
        let delta = computed - Utc::now();
        assert!(delta > chrono::Duration::hours(23));
        assert!(delta <= chrono::Duration::hours(24));

        assert_eq!(compute_expiry(BranchType::Preview, None, None), None);
    }

    #[test]
    fn main_and_persistent_branches_never_expire() {
        let requested = Utc::now() + chrono::Duration::hours(2);
        let horizon = chrono::Duration::hours(24);
        for branch_type in [BranchType::Main, BranchType::Persistent] {
            assert_eq!(
                compute_expiry(branch_type, Some(requested), Some(horizon)),
                None
            );
        }
    }
}
