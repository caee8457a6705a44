use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use deadpool_postgres::{Pool, Transaction};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use crate::error::{BranchError, Result};
use crate::model::{
    ActivityLogEntry, Branch, BranchAccess, BranchFilter, BranchStatus, DataCloneMode,
    GitHubConfig, MigrationRecord, NewActivity, NewBranch,
};

/// Advisory lock key guarding control-plane schema migrations.
const MIGRATION_LOCK_KEY: i64 = 0x6462_666f_726b;

const BRANCH_COLUMNS: &str = "id, name, slug, database_name, status, branch_type, \
     parent_branch_id, data_clone_mode, created_by, expires_at, seeds_path, \
     github_pr_number, github_pr_url, github_repo, error_message, created_at, updated_at";

struct SchemaMigration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Schema and history table must exist before versions can be checked.
const BOOTSTRAP_SQL: &str = r"
    CREATE SCHEMA IF NOT EXISTS branching;
    CREATE TABLE IF NOT EXISTS branching.migration_history (
        id BIGSERIAL PRIMARY KEY,
        branch_id UUID,
        version BIGINT NOT NULL,
        name TEXT NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_migration_history_version
        ON branching.migration_history (COALESCE(branch_id, '00000000-0000-0000-0000-000000000000'::uuid), version);
";

/// Embedded control-plane migrations, applied in order at startup.
const SCHEMA_MIGRATIONS: &[SchemaMigration] = &[SchemaMigration {
    version: 1,
    name: "control-plane tables",
    sql: r"
        CREATE TABLE IF NOT EXISTS branching.branches (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            database_name TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            branch_type TEXT NOT NULL,
            parent_branch_id UUID REFERENCES branching.branches(id) ON DELETE SET NULL,
            data_clone_mode TEXT NOT NULL,
            created_by TEXT,
            expires_at TIMESTAMPTZ,
            seeds_path TEXT,
            github_pr_number INTEGER,
            github_pr_url TEXT,
            github_repo TEXT,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS idx_branches_expiry
            ON branching.branches (branch_type, status, expires_at);
        CREATE INDEX IF NOT EXISTS idx_branches_created_by
            ON branching.branches (created_by);
        CREATE TABLE IF NOT EXISTS branching.branch_access (
            branch_id UUID NOT NULL REFERENCES branching.branches(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            level TEXT NOT NULL,
            granted_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (branch_id, user_id)
        );
        CREATE TABLE IF NOT EXISTS branching.activity_log (
            id BIGSERIAL PRIMARY KEY,
            branch_id UUID NOT NULL,
            action TEXT NOT NULL,
            status TEXT NOT NULL,
            details JSONB,
            error_message TEXT,
            executed_by TEXT,
            duration_ms BIGINT,
            executed_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS idx_activity_log_branch
            ON branching.activity_log (branch_id, executed_at DESC);
        CREATE TABLE IF NOT EXISTS branching.github_config (
            repo TEXT PRIMARY KEY,
            auto_create_on_pr BOOLEAN NOT NULL DEFAULT false,
            auto_delete_on_merge BOOLEAN NOT NULL DEFAULT false,
            default_data_clone_mode TEXT NOT NULL DEFAULT 'schema_only',
            webhook_secret TEXT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
    ",
}];

/// Sole mediator between the control-plane tables and the rest of the core.
///
/// Holds the main pool; every metadata read or write goes through here,
/// regardless of which branch the caller is operating on. The pool is
/// replaceable for routing tests and disaster recovery, but immutable under
/// normal operation.
pub struct Storage {
    pool: RwLock<Pool>,
}

impl Storage {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool: RwLock::new(pool),
        }
    }

    pub fn set_pool(&self, pool: Pool) {
        *self.pool.write().unwrap() = pool;
    }

    pub fn pool(&self) -> Pool {
        self.pool.read().unwrap().clone()
    }

    async fn client(&self) -> Result<deadpool_postgres::Client> {
        Ok(self.pool().get().await?)
    }

    /// Applies any pending control-plane schema migrations, serialized across
    /// processes by an advisory lock.
    pub async fn migrate_schema(&self) -> Result<()> {
        let client = self.client().await?;
        client.batch_execute(BOOTSTRAP_SQL).await?;

        client
            .execute("SELECT pg_advisory_lock($1)", &[&MIGRATION_LOCK_KEY])
            .await?;
        let result = self.apply_pending_migrations(&client).await;
        if let Err(e) = client
            .execute("SELECT pg_advisory_unlock($1)", &[&MIGRATION_LOCK_KEY])
            .await
        {
            log::warn!("failed to release migration advisory lock: {e}");
        }
        result
    }

    async fn apply_pending_migrations(&self, client: &deadpool_postgres::Client) -> Result<()> {
        let row = client
            .query_one(
                "SELECT COALESCE(MAX(version), 0) FROM branching.migration_history \
                 WHERE branch_id IS NULL",
                &[],
            )
            .await?;
        let applied: i64 = row.get(0);

        for migration in SCHEMA_MIGRATIONS {
            if migration.version <= applied {
                continue;
            }
            log::info!(
                "applying control-plane migration v{}: {}",
                migration.version,
                migration.name
            );
            client.batch_execute(migration.sql).await?;
            client
                .execute(
                    "INSERT INTO branching.migration_history (branch_id, version, name) \
                     VALUES (NULL, $1, $2)",
                    &[&migration.version, &migration.name],
                )
                .await?;
        }
        Ok(())
    }

    /// Begins a transaction, runs `f`, commits on `Ok` and rolls back on
    /// `Err`. The callback's handle can be passed to any `*_in` method.
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(
            &'t Transaction<'t>,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 't>>,
    {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        match f(&tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    log::warn!("transaction rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    // ---- branches ----

    pub async fn create_branch(&self, new: NewBranch) -> Result<Branch> {
        let client = self.client().await?;
        self.create_branch_in(&**client, new).await
    }

    /// Persists a new branch with `status = creating`, assigning id and
    /// timestamps. A slug or database-name collision surfaces as
    /// `BranchExists`, which makes concurrent creates race safely.
    pub async fn create_branch_in<C>(&self, client: &C, new: NewBranch) -> Result<Branch>
    where
        C: GenericClient + Sync,
    {
        let now = Utc::now();
        let branch = Branch {
            id: Uuid::new_v4(),
            name: new.name,
            slug: new.slug,
            database_name: new.database_name,
            status: BranchStatus::Creating,
            branch_type: new.branch_type,
            parent_branch_id: new.parent_branch_id,
            data_clone_mode: new.data_clone_mode,
            created_by: new.created_by,
            expires_at: new.expires_at,
            seeds_path: new.seeds_path,
            github_pr_number: new.github.as_ref().map(|g| g.number),
            github_pr_url: new.github.as_ref().map(|g| g.url.clone()),
            github_repo: new.github.as_ref().map(|g| g.repo.clone()),
            error_message: None,
            created_at: now,
            updated_at: now,
            access: Vec::new(),
        };

        client
            .execute(
                "INSERT INTO branching.branches \
                 (id, name, slug, database_name, status, branch_type, parent_branch_id, \
                  data_clone_mode, created_by, expires_at, seeds_path, github_pr_number, \
                  github_pr_url, github_repo, error_message, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
                &[
                    &branch.id,
                    &branch.name,
                    &branch.slug,
                    &branch.database_name,
                    &branch.status.as_str(),
                    &branch.branch_type.as_str(),
                    &branch.parent_branch_id,
                    &branch.data_clone_mode.as_str(),
                    &branch.created_by,
                    &branch.expires_at,
                    &branch.seeds_path,
                    &branch.github_pr_number,
                    &branch.github_pr_url,
                    &branch.github_repo,
                    &branch.error_message,
                    &branch.created_at,
                    &branch.updated_at,
                ],
            )
            .await
            .map_err(|e| BranchError::on_insert(&branch.slug, e))?;

        Ok(branch)
    }

    pub async fn get_branch(&self, id: Uuid) -> Result<Branch> {
        let client = self.client().await?;
        let sql = format!("SELECT {BRANCH_COLUMNS} FROM branching.branches WHERE id = $1");
        let row = client
            .query_opt(&sql, &[&id])
            .await?
            .ok_or_else(|| BranchError::BranchNotFound(id.to_string()))?;
        let mut branch = row_to_branch(&row);
        branch.access = self.list_access(branch.id).await?;
        Ok(branch)
    }

    pub async fn get_branch_by_slug(&self, slug: &str) -> Result<Branch> {
        let client = self.client().await?;
        let sql = format!("SELECT {BRANCH_COLUMNS} FROM branching.branches WHERE slug = $1");
        let row = client
            .query_opt(&sql, &[&slug])
            .await?
            .ok_or_else(|| BranchError::BranchNotFound(slug.to_string()))?;
        let mut branch = row_to_branch(&row);
        branch.access = self.list_access(branch.id).await?;
        Ok(branch)
    }

    pub async fn get_main_branch(&self) -> Result<Option<Branch>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {BRANCH_COLUMNS} FROM branching.branches WHERE branch_type = 'main' LIMIT 1"
        );
        Ok(client
            .query_opt(&sql, &[])
            .await?
            .map(|row| row_to_branch(&row)))
    }

    /// Lists branches newest first. Access lists are not populated here; use
    /// `get_branch` for the full record.
    pub async fn list_branches(&self, filter: &BranchFilter) -> Result<Vec<Branch>> {
        let client = self.client().await?;
        let predicate = FilterPredicate::new(filter);
        let mut sql = format!(
            "SELECT {BRANCH_COLUMNS} FROM branching.branches{} ORDER BY created_at DESC",
            predicate.clause()
        );
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = filter.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        let rows = client.query(&sql, &predicate.params()).await?;
        Ok(rows.iter().map(row_to_branch).collect())
    }

    pub async fn count_branches(&self, filter: &BranchFilter) -> Result<i64> {
        let client = self.client().await?;
        let predicate = FilterPredicate::new(filter);
        let sql = format!(
            "SELECT COUNT(*) FROM branching.branches{}",
            predicate.clause()
        );
        let row = client.query_one(&sql, &predicate.params()).await?;
        Ok(row.get(0))
    }

    /// Preview branches that are ready and past their expiry, oldest first.
    pub async fn list_expired_preview_branches(&self, now: DateTime<Utc>) -> Result<Vec<Branch>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {BRANCH_COLUMNS} FROM branching.branches \
             WHERE branch_type = 'preview' AND status = 'ready' \
               AND expires_at IS NOT NULL AND expires_at <= $1 \
             ORDER BY expires_at ASC"
        );
        let rows = client.query(&sql, &[&now]).await?;
        Ok(rows.iter().map(row_to_branch).collect())
    }

    pub async fn update_branch_status(
        &self,
        id: Uuid,
        status: BranchStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let client = self.client().await?;
        self.update_branch_status_in(&**client, id, status, error_message)
            .await
    }

    /// Writes the status and keeps `error_message` consistent with it in the
    /// same statement: set only when the status is `error`, cleared otherwise.
    pub async fn update_branch_status_in<C>(
        &self,
        client: &C,
        id: Uuid,
        status: BranchStatus,
        error_message: Option<&str>,
    ) -> Result<()>
    where
        C: GenericClient + Sync,
    {
        let rows = client
            .execute(
                "UPDATE branching.branches \
                 SET status = $2, \
                     error_message = CASE WHEN $2 = 'error' THEN $3 ELSE NULL END, \
                     updated_at = now() \
                 WHERE id = $1",
                &[&id, &status.as_str(), &error_message],
            )
            .await?;
        if rows == 0 {
            return Err(BranchError::BranchNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn set_branch_expires_at(
        &self,
        id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute(
                "UPDATE branching.branches SET expires_at = $2, updated_at = now() WHERE id = $1",
                &[&id, &expires_at],
            )
            .await?;
        if rows == 0 {
            return Err(BranchError::BranchNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn update_branch(&self, id: Uuid, update: crate::model::UpdateBranch) -> Result<()> {
        let client = self.client().await?;
        let mut sets = vec!["updated_at = now()".to_string()];
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&id];

        if let Some(ref name) = update.name {
            params.push(name);
            sets.push(format!("name = ${}", params.len()));
        }
        if let Some(ref seeds_path) = update.seeds_path {
            params.push(seeds_path);
            sets.push(format!("seeds_path = ${}", params.len()));
        }
        let github = update.github.as_ref().map(|g| {
            (
                g.as_ref().map(|pr| pr.number),
                g.as_ref().map(|pr| pr.url.clone()),
                g.as_ref().map(|pr| pr.repo.clone()),
            )
        });
        if let Some((ref number, ref url, ref repo)) = github {
            params.push(number);
            sets.push(format!("github_pr_number = ${}", params.len()));
            params.push(url);
            sets.push(format!("github_pr_url = ${}", params.len()));
            params.push(repo);
            sets.push(format!("github_repo = ${}", params.len()));
        }

        let sql = format!(
            "UPDATE branching.branches SET {} WHERE id = $1",
            sets.join(", ")
        );
        let rows = client.execute(&sql, &params).await?;
        if rows == 0 {
            return Err(BranchError::BranchNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Removes a branch row together with its per-branch migration records;
    /// grants cascade, the activity log is retained as an audit trail.
    /// Returns whether a row existed, so idempotent teardown can call this
    /// without a prior lookup.
    pub async fn delete_branch(&self, id: Uuid) -> Result<bool> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM branching.migration_history WHERE branch_id = $1",
                &[&id],
            )
            .await?;
        let rows = client
            .execute("DELETE FROM branching.branches WHERE id = $1", &[&id])
            .await?;
        Ok(rows > 0)
    }

    // ---- access grants ----

    pub async fn grant_access(
        &self,
        branch_id: Uuid,
        user_id: &str,
        level: crate::model::AccessLevel,
    ) -> Result<()> {
        let client = self.client().await?;
        self.grant_access_in(&**client, branch_id, user_id, level)
            .await
    }

    pub async fn grant_access_in<C>(
        &self,
        client: &C,
        branch_id: Uuid,
        user_id: &str,
        level: crate::model::AccessLevel,
    ) -> Result<()>
    where
        C: GenericClient + Sync,
    {
        client
            .execute(
                "INSERT INTO branching.branch_access (branch_id, user_id, level) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (branch_id, user_id) DO UPDATE SET level = EXCLUDED.level",
                &[&branch_id, &user_id, &level.as_str()],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) {
                    BranchError::BranchNotFound(branch_id.to_string())
                } else {
                    BranchError::Database(e)
                }
            })?;
        Ok(())
    }

    pub async fn revoke_access(&self, branch_id: Uuid, user_id: &str) -> Result<bool> {
        let client = self.client().await?;
        let rows = client
            .execute(
                "DELETE FROM branching.branch_access WHERE branch_id = $1 AND user_id = $2",
                &[&branch_id, &user_id],
            )
            .await?;
        Ok(rows > 0)
    }

    pub async fn list_access(&self, branch_id: Uuid) -> Result<Vec<BranchAccess>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT branch_id, user_id, level, granted_at \
                 FROM branching.branch_access WHERE branch_id = $1 ORDER BY granted_at",
                &[&branch_id],
            )
            .await?;
        Ok(rows.iter().map(row_to_access).collect())
    }

    pub async fn list_access_for_user(&self, user_id: &str) -> Result<Vec<BranchAccess>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT branch_id, user_id, level, granted_at \
                 FROM branching.branch_access WHERE user_id = $1 ORDER BY granted_at",
                &[&user_id],
            )
            .await?;
        Ok(rows.iter().map(row_to_access).collect())
    }

    // ---- activity log ----

    /// Appends an audit entry. A failed write is logged and swallowed; the
    /// log must never mask the outcome of the operation it describes.
    pub async fn append_activity(&self, entry: NewActivity) {
        if let Err(e) = self.try_append_activity(&entry).await {
            log::warn!(
                "failed to record {} activity for branch {}: {e}",
                entry.action.as_str(),
                entry.branch_id
            );
        }
    }

    async fn try_append_activity(&self, entry: &NewActivity) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO branching.activity_log \
                 (branch_id, action, status, details, error_message, executed_by, duration_ms) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &entry.branch_id,
                    &entry.action.as_str(),
                    &entry.status.as_str(),
                    &entry.details,
                    &entry.error_message,
                    &entry.executed_by,
                    &entry.duration_ms,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn list_activity(&self, branch_id: Uuid, limit: i64) -> Result<Vec<ActivityLogEntry>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, branch_id, action, status, details, error_message, executed_by, \
                        duration_ms, executed_at \
                 FROM branching.activity_log WHERE branch_id = $1 \
                 ORDER BY executed_at DESC LIMIT $2",
                &[&branch_id, &limit],
            )
            .await?;
        Ok(rows.iter().map(row_to_activity).collect())
    }

    // ---- migration history ----

    pub async fn record_migration(
        &self,
        branch_id: Option<Uuid>,
        version: i64,
        name: &str,
    ) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO branching.migration_history (branch_id, version, name) \
                 VALUES ($1, $2, $3)",
                &[&branch_id, &version, &name],
            )
            .await?;
        Ok(())
    }

    pub async fn list_migrations(&self, branch_id: Option<Uuid>) -> Result<Vec<MigrationRecord>> {
        let client = self.client().await?;
        let rows = match branch_id {
            Some(id) => {
                client
                    .query(
                        "SELECT id, branch_id, version, name, applied_at \
                         FROM branching.migration_history WHERE branch_id = $1 ORDER BY version",
                        &[&id],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        "SELECT id, branch_id, version, name, applied_at \
                         FROM branching.migration_history WHERE branch_id IS NULL ORDER BY version",
                        &[],
                    )
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_migration).collect())
    }

    // ---- GitHub integration config ----

    pub async fn get_github_config(&self, repo: &str) -> Result<Option<GitHubConfig>> {
        let client = self.client().await?;
        Ok(client
            .query_opt(
                "SELECT repo, auto_create_on_pr, auto_delete_on_merge, \
                        default_data_clone_mode, webhook_secret, updated_at \
                 FROM branching.github_config WHERE repo = $1",
                &[&repo],
            )
            .await?
            .map(|row| row_to_github_config(&row)))
    }

    pub async fn upsert_github_config(&self, config: &GitHubConfig) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO branching.github_config \
                 (repo, auto_create_on_pr, auto_delete_on_merge, default_data_clone_mode, \
                  webhook_secret, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, now()) \
                 ON CONFLICT (repo) DO UPDATE SET \
                     auto_create_on_pr = EXCLUDED.auto_create_on_pr, \
                     auto_delete_on_merge = EXCLUDED.auto_delete_on_merge, \
                     default_data_clone_mode = EXCLUDED.default_data_clone_mode, \
                     webhook_secret = EXCLUDED.webhook_secret, \
                     updated_at = now()",
                &[
                    &config.repo,
                    &config.auto_create_on_pr,
                    &config.auto_delete_on_merge,
                    &config.default_data_clone_mode.as_str(),
                    &config.webhook_secret,
                ],
            )
            .await?;
        Ok(())
    }
}

/// Owned WHERE-clause state for branch filters, so parameter references stay
/// valid for the duration of the query.
struct FilterPredicate {
    created_by: Option<String>,
    branch_type: Option<&'static str>,
    status: Option<&'static str>,
}

impl FilterPredicate {
    fn new(filter: &BranchFilter) -> Self {
        Self {
            created_by: filter.created_by.clone(),
            branch_type: filter.branch_type.map(|t| t.as_str()),
            status: filter.status.map(|s| s.as_str()),
        }
    }

    fn clause(&self) -> String {
        let mut conds = Vec::new();
        let mut n = 0;
        if self.created_by.is_some() {
            n += 1;
            conds.push(format!("created_by = ${n}"));
        }
        if self.branch_type.is_some() {
            n += 1;
            conds.push(format!("branch_type = ${n}"));
        }
        if self.status.is_some() {
            n += 1;
            conds.push(format!("status = ${n}"));
        }
        if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        }
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(ref v) = self.created_by {
            params.push(v);
        }
        if let Some(ref v) = self.branch_type {
            params.push(v);
        }
        if let Some(ref v) = self.status {
            params.push(v);
        }
        params
    }
}

fn row_to_branch(row: &Row) -> Branch {
    let status: String = row.get("status");
    let branch_type: String = row.get("branch_type");
    let data_clone_mode: String = row.get("data_clone_mode");
    Branch {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        database_name: row.get("database_name"),
        status: BranchStatus::from_db(&status),
        branch_type: crate::model::BranchType::from_db(&branch_type),
        parent_branch_id: row.get("parent_branch_id"),
        data_clone_mode: DataCloneMode::from_db(&data_clone_mode),
        created_by: row.get("created_by"),
        expires_at: row.get("expires_at"),
        seeds_path: row.get("seeds_path"),
        github_pr_number: row.get("github_pr_number"),
        github_pr_url: row.get("github_pr_url"),
        github_repo: row.get("github_repo"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        access: Vec::new(),
    }
}

fn row_to_access(row: &Row) -> BranchAccess {
    let level: String = row.get("level");
    BranchAccess {
        branch_id: row.get("branch_id"),
        user_id: row.get("user_id"),
        level: crate::model::AccessLevel::from_db(&level),
        granted_at: row.get("granted_at"),
    }
}

fn row_to_activity(row: &Row) -> ActivityLogEntry {
    ActivityLogEntry {
        id: row.get("id"),
        branch_id: row.get("branch_id"),
        action: row.get("action"),
        status: row.get("status"),
        details: row.get("details"),
        error_message: row.get("error_message"),
        executed_by: row.get("executed_by"),
        duration_ms: row.get("duration_ms"),
        executed_at: row.get("executed_at"),
    }
}

fn row_to_migration(row: &Row) -> MigrationRecord {
    MigrationRecord {
        id: row.get("id"),
        branch_id: row.get("branch_id"),
        version: row.get("version"),
        name: row.get("name"),
        applied_at: row.get("applied_at"),
    }
}

fn row_to_github_config(row: &Row) -> GitHubConfig {
    let mode: String = row.get("default_data_clone_mode");
    GitHubConfig {
        repo: row.get("repo"),
        auto_create_on_pr: row.get("auto_create_on_pr"),
        auto_delete_on_merge: row.get("auto_delete_on_merge"),
        default_data_clone_mode: DataCloneMode::from_db(&mode),
        webhook_secret: row.get("webhook_secret"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_predicate_numbers_placeholders_in_order() {
        let filter = BranchFilter {
            created_by: Some("alice".into()),
            branch_type: Some(crate::model::BranchType::Preview),
            status: Some(BranchStatus::Ready),
            limit: None,
            offset: None,
        };
        let predicate = FilterPredicate::new(&filter);
        assert_eq!(
            predicate.clause(),
            " WHERE created_by = $1 AND branch_type = $2 AND status = $3"
        );
        assert_eq!(predicate.params().len(), 3);
    }

    #[test]
    fn filter_predicate_skips_absent_fields() {
        let filter = BranchFilter {
            status: Some(BranchStatus::Ready),
            ..Default::default()
        };
        let predicate = FilterPredicate::new(&filter);
        assert_eq!(predicate.clause(), " WHERE status = $1");
        assert_eq!(predicate.params().len(), 1);

        let empty = FilterPredicate::new(&BranchFilter::default());
        assert_eq!(empty.clause(), "");
        assert!(empty.params().is_empty());
    }

    #[test]
    fn schema_migrations_are_strictly_ordered() {
        let mut last = 0;
        for migration in SCHEMA_MIGRATIONS {
            assert!(migration.version > last, "versions must increase");
            last = migration.version;
        }
    }
}
