use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a branch.
///
/// Stored as text. Unknown values read back from the database are decoded as
/// `Error` rather than rejected, so a corrupted row stays inspectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Creating,
    Ready,
    Migrating,
    Error,
    Deleting,
    Deleted,
}

impl BranchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Migrating => "migrating",
            Self::Error => "error",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        value.parse().unwrap_or(Self::Error)
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BranchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "ready" => Ok(Self::Ready),
            "migrating" => Ok(Self::Migrating),
            "error" => Ok(Self::Error),
            "deleting" => Ok(Self::Deleting),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("unknown branch status: {s}")),
        }
    }
}

/// Kind of branch. `Main` is singular and immutable; `Preview` branches are
/// subject to auto-expiry; `Persistent` branches are managed manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchType {
    Main,
    Preview,
    Persistent,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Preview => "preview",
            Self::Persistent => "persistent",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        value.parse().unwrap_or(Self::Preview)
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BranchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Self::Main),
            "preview" => Ok(Self::Preview),
            "persistent" => Ok(Self::Persistent),
            _ => Err(format!("unknown branch type: {s}")),
        }
    }
}

/// What a new branch copies from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCloneMode {
    /// Schema only; tables come up empty.
    #[default]
    SchemaOnly,
    /// Schema and data, as the template copy leaves them.
    FullClone,
    /// Schema only, then seed files applied on top.
    SeedData,
}

impl DataCloneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaOnly => "schema_only",
            Self::FullClone => "full_clone",
            Self::SeedData => "seed_data",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        value.parse().unwrap_or(Self::SchemaOnly)
    }
}

impl fmt::Display for DataCloneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataCloneMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema_only" => Ok(Self::SchemaOnly),
            "full_clone" => Ok(Self::FullClone),
            "seed_data" => Ok(Self::SeedData),
            _ => Err(format!("unknown data clone mode: {s}")),
        }
    }
}

/// Access level on a branch. Totally ordered: admin dominates write dominates
/// read, which the derived `Ord` encodes through variant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        value.parse().unwrap_or(Self::Read)
    }

    /// Whether this granted level satisfies `required`.
    pub fn is_sufficient(self, required: AccessLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("unknown access level: {s}")),
        }
    }
}

/// Reference to the pull request a branch is attached to. The three fields
/// travel together; a branch either has all of them or none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubPrRef {
    pub number: i32,
    pub url: String,
    pub repo: String,
}

/// A named, logically isolated branch backed by its own physical database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub database_name: String,
    pub status: BranchStatus,
    pub branch_type: BranchType,
    pub parent_branch_id: Option<Uuid>,
    pub data_clone_mode: DataCloneMode,
    pub created_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seeds_path: Option<String>,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub github_repo: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access: Vec<BranchAccess>,
}

impl Branch {
    pub fn is_main(&self) -> bool {
        self.branch_type == BranchType::Main
    }

    pub fn github_pr(&self) -> Option<GitHubPrRef> {
        match (&self.github_pr_number, &self.github_pr_url, &self.github_repo) {
            (Some(number), Some(url), Some(repo)) => Some(GitHubPrRef {
                number: *number,
                url: url.clone(),
                repo: repo.clone(),
            }),
            _ => None,
        }
    }

    /// Effective access level for a user. The creator holds implicit admin;
    /// everyone else is looked up in the grant list.
    pub fn access_level_for(&self, user_id: &str) -> Option<AccessLevel> {
        if self.created_by.as_deref() == Some(user_id) {
            return Some(AccessLevel::Admin);
        }
        self.access
            .iter()
            .find(|a| a.user_id == user_id)
            .map(|a| a.level)
    }

    pub fn can_access(&self, user_id: &str, required: AccessLevel) -> bool {
        self.access_level_for(user_id)
            .is_some_and(|granted| granted.is_sufficient(required))
    }
}

/// Input for persisting a new branch record.
#[derive(Debug, Clone)]
pub struct NewBranch {
    pub name: String,
    pub slug: String,
    pub database_name: String,
    pub branch_type: BranchType,
    pub parent_branch_id: Option<Uuid>,
    pub data_clone_mode: DataCloneMode,
    pub created_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seeds_path: Option<String>,
    pub github: Option<GitHubPrRef>,
}

/// Mutable metadata on an existing branch. `None` leaves a field untouched;
/// status, expiry, and error transitions have their own dedicated operations.
#[derive(Debug, Clone, Default)]
pub struct UpdateBranch {
    pub name: Option<String>,
    pub seeds_path: Option<Option<String>>,
    pub github: Option<Option<GitHubPrRef>>,
}

/// One access grant. The `(branch_id, user_id)` pair is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchAccess {
    pub branch_id: Uuid,
    pub user_id: String,
    pub level: AccessLevel,
    pub granted_at: DateTime<Utc>,
}

/// Lifecycle actions recorded in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Cloned,
    Migrated,
    Reset,
    Deleted,
    StatusChanged,
    AccessGranted,
    AccessRevoked,
    Seeding,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Cloned => "cloned",
            Self::Migrated => "migrated",
            Self::Reset => "reset",
            Self::Deleted => "deleted",
            Self::StatusChanged => "status_changed",
            Self::AccessGranted => "access_granted",
            Self::AccessRevoked => "access_revoked",
            Self::Seeding => "seeding",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Started,
    Success,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// One row of the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub branch_id: Uuid,
    pub action: String,
    pub status: String,
    pub details: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub executed_by: Option<String>,
    pub duration_ms: Option<i64>,
    pub executed_at: DateTime<Utc>,
}

/// Input for appending an activity record.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub branch_id: Uuid,
    pub action: ActivityAction,
    pub status: ActivityStatus,
    pub details: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub executed_by: Option<String>,
    pub duration_ms: Option<i64>,
}

impl NewActivity {
    pub fn new(branch_id: Uuid, action: ActivityAction, status: ActivityStatus) -> Self {
        Self {
            branch_id,
            action,
            status,
            details: None,
            error_message: None,
            executed_by: None,
            duration_ms: None,
        }
    }

    pub fn started(branch_id: Uuid, action: ActivityAction) -> Self {
        Self::new(branch_id, action, ActivityStatus::Started)
    }

    pub fn success(branch_id: Uuid, action: ActivityAction) -> Self {
        Self::new(branch_id, action, ActivityStatus::Success)
    }

    pub fn failed(branch_id: Uuid, action: ActivityAction, message: impl Into<String>) -> Self {
        let mut entry = Self::new(branch_id, action, ActivityStatus::Failed);
        entry.error_message = Some(message.into());
        entry
    }

    pub fn executed_by(mut self, user: Option<&str>) -> Self {
        self.executed_by = user.map(str::to_string);
        self
    }

    pub fn duration_ms(mut self, millis: i64) -> Self {
        self.duration_ms = Some(millis);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A migration applied to a branch database. Control-plane schema migrations
/// are recorded with `branch_id = None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub branch_id: Option<Uuid>,
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Per-repository GitHub integration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub repo: String,
    pub auto_create_on_pr: bool,
    pub auto_delete_on_merge: bool,
    pub default_data_clone_mode: DataCloneMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for branch listings and counts. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct BranchFilter {
    pub created_by: Option<String>,
    pub branch_type: Option<BranchType>,
    pub status: Option<BranchStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_levels_are_totally_ordered() {
        use AccessLevel::*;
        let levels = [Read, Write, Admin];
        for granted in levels {
            for required in levels {
                let expected = match (granted, required) {
                    (Admin, _) => true,
                    (Write, Admin) => false,
                    (Write, _) => true,
                    (Read, Read) => true,
                    (Read, _) => false,
                };
                assert_eq!(
                    granted.is_sufficient(required),
                    expected,
                    "{granted} vs {required}"
                );
            }
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            BranchStatus::Creating,
            BranchStatus::Ready,
            BranchStatus::Migrating,
            BranchStatus::Error,
            BranchStatus::Deleting,
            BranchStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<BranchStatus>(), Ok(status));
        }
        assert!("bogus".parse::<BranchStatus>().is_err());
        assert_eq!(BranchStatus::from_db("bogus"), BranchStatus::Error);
    }

    #[test]
    fn clone_mode_defaults_to_schema_only() {
        assert_eq!(DataCloneMode::default(), DataCloneMode::SchemaOnly);
        assert_eq!(DataCloneMode::from_db("nonsense"), DataCloneMode::SchemaOnly);
    }

    fn branch_fixture() -> Branch {
        Branch {
            id: Uuid::new_v4(),
            name: "Feature X".into(),
            slug: "feature-x".into(),
            database_name: "branch_feature_x".into(),
            status: BranchStatus::Ready,
            branch_type: BranchType::Preview,
            parent_branch_id: None,
            data_clone_mode: DataCloneMode::SchemaOnly,
            created_by: Some("alice".into()),
            expires_at: None,
            seeds_path: None,
            github_pr_number: None,
            github_pr_url: None,
            github_repo: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            access: vec![BranchAccess {
                branch_id: Uuid::nil(),
                user_id: "bob".into(),
                level: AccessLevel::Write,
                granted_at: Utc::now(),
            }],
        }
    }

    #[test]
    fn creator_has_implicit_admin() {
        let branch = branch_fixture();
        assert_eq!(branch.access_level_for("alice"), Some(AccessLevel::Admin));
        assert!(branch.can_access("alice", AccessLevel::Admin));
    }

    #[test]
    fn grants_resolve_for_non_creators() {
        let branch = branch_fixture();
        assert_eq!(branch.access_level_for("bob"), Some(AccessLevel::Write));
        assert!(branch.can_access("bob", AccessLevel::Read));
        assert!(!branch.can_access("bob", AccessLevel::Admin));
        assert_eq!(branch.access_level_for("mallory"), None);
    }

    #[test]
    fn github_triple_is_all_or_nothing() {
        let mut branch = branch_fixture();
        assert!(branch.github_pr().is_none());

        branch.github_pr_number = Some(12);
        branch.github_pr_url = Some("https://github.com/acme/app/pull/12".into());
        assert!(branch.github_pr().is_none());

        branch.github_repo = Some("acme/app".into());
        let pr = branch.github_pr().unwrap();
        assert_eq!(pr.number, 12);
        assert_eq!(pr.repo, "acme/app");
    }
}
