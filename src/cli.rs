use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Subcommand;

use dbfork::model::{AccessLevel, Branch, BranchFilter, BranchStatus, BranchType, DataCloneMode};
use dbfork::{BranchManager, Config, CreateBranchRequest, Router, Storage};

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the control-plane schema and register the main branch
    Init,
    /// Create a new database branch
    Create {
        /// Human-readable branch name; the slug is derived from it
        name: String,
        /// Parent branch slug (defaults to the main branch)
        #[arg(long)]
        parent: Option<String>,
        /// Data clone mode: schema_only, full_clone, or seed_data
        #[arg(long)]
        clone_mode: Option<DataCloneMode>,
        /// Branch type: preview or persistent
        #[arg(long)]
        branch_type: Option<BranchType>,
        /// Hours until the branch expires (preview branches only)
        #[arg(long)]
        expires_in_hours: Option<i64>,
        /// Directory of seed files, overriding the configured default
        #[arg(long)]
        seeds_path: Option<String>,
        /// User to record as the creator
        #[arg(long)]
        created_by: Option<String>,
    },
    /// List branches
    List {
        #[arg(long)]
        branch_type: Option<BranchType>,
        #[arg(long)]
        status: Option<BranchStatus>,
        #[arg(long)]
        created_by: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one branch in full
    Get { slug: String },
    /// Delete a branch and its database
    Delete { slug: String },
    /// Reset a branch to its parent's current state
    Reset { slug: String },
    /// Delete all expired preview branches now
    Cleanup,
    /// Show the connection URL for a branch
    Connection { slug: String },
    /// Manage branch access grants
    Access {
        #[command(subcommand)]
        command: AccessCommands,
    },
    /// Show recent activity for a branch
    Activity {
        slug: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show subsystem status
    Status,
}

#[derive(Subcommand)]
pub enum AccessCommands {
    /// Grant a user access to a branch
    Grant {
        slug: String,
        user: String,
        /// read, write, or admin
        #[arg(default_value = "read")]
        level: AccessLevel,
    },
    /// Revoke a user's access to a branch
    Revoke { slug: String, user: String },
    /// List grants on a branch
    List { slug: String },
}

struct Context {
    config: Config,
    storage: Arc<Storage>,
    manager: Arc<BranchManager>,
    router: Arc<Router>,
}

async fn build_context(config_path: Option<&Path>) -> Result<Context> {
    let config = Config::load(config_path)?;
    let main_pool = config
        .database
        .create_main_pool()
        .context("failed to build the main connection pool")?;

    let storage = Arc::new(Storage::new(main_pool.clone()));
    storage
        .migrate_schema()
        .await
        .context("failed to run control-plane migrations")?;

    let manager = Arc::new(BranchManager::new(
        storage.clone(),
        &config,
        main_pool.clone(),
    )?);
    manager.ensure_main_branch().await?;

    let router = Arc::new(Router::new(storage.clone(), &config, main_pool));
    let invalidation_target = router.clone();
    manager.set_pool_invalidator(Arc::new(move |slug| invalidation_target.close_pool(slug)));

    Ok(Context {
        config,
        storage,
        manager,
        router,
    })
}

pub async fn handle_command(
    command: Commands,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let ctx = build_context(config_path.as_deref()).await?;

    match command {
        Commands::Init => {
            // build_context already migrated and registered the main branch.
            let main = ctx
                .storage
                .get_main_branch()
                .await?
                .context("main branch missing after initialization")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&main)?);
            } else {
                println!(
                    "control plane ready; main branch '{}' backed by database '{}'",
                    main.slug, main.database_name
                );
            }
        }
        Commands::Create {
            name,
            parent,
            clone_mode,
            branch_type,
            expires_in_hours,
            seeds_path,
            created_by,
        } => {
            let parent_branch_id = match parent {
                Some(slug) => Some(ctx.manager.get_branch_by_slug(&slug).await?.id),
                None => None,
            };
            let request = CreateBranchRequest {
                name,
                parent_branch_id,
                data_clone_mode: clone_mode,
                branch_type,
                expires_at: expires_in_hours.map(|h| Utc::now() + chrono::Duration::hours(h)),
                seeds_path,
                created_by,
                ..Default::default()
            };
            let branch = ctx.manager.create_branch(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&branch)?);
            } else {
                println!(
                    "created branch '{}' (database: {}, status: {})",
                    branch.slug, branch.database_name, branch.status
                );
            }
        }
        Commands::List {
            branch_type,
            status,
            created_by,
            limit,
        } => {
            let filter = BranchFilter {
                created_by,
                branch_type,
                status,
                limit: Some(limit),
                offset: None,
            };
            let branches = ctx.manager.list_branches(&filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&branches)?);
            } else if branches.is_empty() {
                println!("no branches found");
            } else {
                println!(
                    "{:<30} {:<12} {:<12} {:<20} DATABASE",
                    "SLUG", "STATUS", "TYPE", "EXPIRES"
                );
                for branch in &branches {
                    println!(
                        "{:<30} {:<12} {:<12} {:<20} {}",
                        branch.slug,
                        branch.status.to_string(),
                        branch.branch_type.to_string(),
                        branch
                            .expires_at
                            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        branch.database_name
                    );
                }
            }
        }
        Commands::Get { slug } => {
            let branch = ctx.manager.get_branch_by_slug(&slug).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&branch)?);
            } else {
                print_branch(&branch);
            }
        }
        Commands::Delete { slug } => {
            ctx.manager.delete_branch_by_slug(&slug).await?;
            println!("deleted branch '{slug}'");
        }
        Commands::Reset { slug } => {
            let branch = ctx.manager.get_branch_by_slug(&slug).await?;
            let branch = ctx.manager.reset_branch(branch.id).await?;
            println!("reset branch '{}' (status: {})", branch.slug, branch.status);
        }
        Commands::Cleanup => {
            let report = ctx.manager.cleanup_expired_branches().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "deleted {} expired branch(es), {} failure(s)",
                    report.deleted.len(),
                    report.failed.len()
                );
                for slug in &report.deleted {
                    println!("  deleted {slug}");
                }
                for failure in &report.failed {
                    println!("  failed {}: {}", failure.slug, failure.error);
                }
            }
        }
        Commands::Connection { slug } => {
            let branch = ctx.manager.get_branch_by_slug(&slug).await?;
            println!("{}", ctx.manager.get_branch_connection_url(&branch)?);
        }
        Commands::Access { command } => handle_access(&ctx, command, json).await?,
        Commands::Activity { slug, limit } => {
            let branch = ctx.manager.get_branch_by_slug(&slug).await?;
            let entries = ctx.manager.list_activity(branch.id, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!(
                        "{}  {:<16} {:<8} {}",
                        entry.executed_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.action,
                        entry.status,
                        entry.error_message.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Status => {
            let total = ctx.storage.count_branches(&BranchFilter::default()).await?;
            let ready = ctx
                .storage
                .count_branches(&BranchFilter {
                    status: Some(BranchStatus::Ready),
                    ..Default::default()
                })
                .await?;
            let errored = ctx
                .storage
                .count_branches(&BranchFilter {
                    status: Some(BranchStatus::Error),
                    ..Default::default()
                })
                .await?;
            if json {
                let status = serde_json::json!({
                    "enabled": ctx.config.branching.enabled,
                    "default_branch": ctx.router.get_default_branch(),
                    "active_branch_source": ctx.router.active_branch_source(),
                    "branches": { "total": total, "ready": ready, "error": errored },
                    "pools": ctx.router.pool_stats(),
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!(
                    "branching: {}",
                    if ctx.config.branching.enabled {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
                println!(
                    "default branch: {} (source: {})",
                    ctx.router.get_default_branch(),
                    ctx.router.active_branch_source()
                );
                println!("branches: {total} total, {ready} ready, {errored} in error");
            }
        }
    }

    Ok(())
}

async fn handle_access(ctx: &Context, command: AccessCommands, json: bool) -> Result<()> {
    match command {
        AccessCommands::Grant { slug, user, level } => {
            let branch = ctx.manager.get_branch_by_slug(&slug).await?;
            ctx.manager
                .grant_access(branch.id, &user, level, None)
                .await?;
            println!("granted {level} on '{slug}' to {user}");
        }
        AccessCommands::Revoke { slug, user } => {
            let branch = ctx.manager.get_branch_by_slug(&slug).await?;
            if ctx.manager.revoke_access(branch.id, &user, None).await? {
                println!("revoked access on '{slug}' from {user}");
            } else {
                println!("{user} had no grant on '{slug}'");
            }
        }
        AccessCommands::List { slug } => {
            let branch = ctx.manager.get_branch_by_slug(&slug).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&branch.access)?);
            } else if branch.access.is_empty() {
                println!("no explicit grants on '{slug}'");
            } else {
                for grant in &branch.access {
                    println!("{:<24} {}", grant.user_id, grant.level);
                }
            }
        }
    }
    Ok(())
}

fn print_branch(branch: &Branch) {
    println!("slug:          {}", branch.slug);
    println!("name:          {}", branch.name);
    println!("id:            {}", branch.id);
    println!("database:      {}", branch.database_name);
    println!("status:        {}", branch.status);
    println!("type:          {}", branch.branch_type);
    println!("clone mode:    {}", branch.data_clone_mode);
    if let Some(parent) = branch.parent_branch_id {
        println!("parent id:     {parent}");
    }
    if let Some(ref created_by) = branch.created_by {
        println!("created by:    {created_by}");
    }
    if let Some(expires_at) = branch.expires_at {
        println!("expires at:    {expires_at}");
    }
    if let Some(pr) = branch.github_pr() {
        println!("pull request:  {} #{} ({})", pr.repo, pr.number, pr.url);
    }
    if let Some(ref error) = branch.error_message {
        println!("error:         {error}");
    }
    println!("created at:    {}", branch.created_at);
    println!("updated at:    {}", branch.updated_at);
}
