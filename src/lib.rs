//! Branching subsystem for a Postgres-backed platform.
//!
//! Turns a single physical server into a tree of logically isolated, named
//! branches. Each branch is a distinct database cloned from its parent with
//! `CREATE DATABASE ... TEMPLATE`, reached through a lazily created,
//! per-branch connection pool.
//!
//! The pieces, leaves first: [`naming`] (pure slug and identifier helpers),
//! [`storage`] (control-plane metadata over the main pool), [`seeder`]
//! (ordered `.sql` files applied in one transaction), [`manager`] (lifecycle
//! orchestration and physical DDL), [`router`] (slug-to-pool resolution), and
//! [`scheduler`] (periodic expiry sweep). Host applications hold the main
//! pool, wire the router's `close_pool` into the manager as a pool
//! invalidator, and route queries with [`Router::get_pool`].

pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod naming;
pub mod router;
pub mod scheduler;
pub mod seeder;
pub mod storage;

pub use config::{BranchingConfig, Config, DatabaseConfig};
pub use error::{BranchError, Result};
pub use manager::{BranchManager, CleanupReport, CreateBranchRequest};
pub use model::{
    AccessLevel, ActivityAction, ActivityStatus, Branch, BranchFilter, BranchStatus, BranchType,
    DataCloneMode,
};
pub use router::{is_main_branch, PoolStats, Router};
pub use scheduler::CleanupScheduler;
pub use seeder::Seeder;
pub use storage::Storage;
