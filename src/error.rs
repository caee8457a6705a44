use thiserror::Error;

pub type Result<T, E = BranchError> = std::result::Result<T, E>;

/// Failure modes of the branching subsystem.
///
/// Every externally reachable operation returns one of these in-band; panics
/// are never used for control flow.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error("branching is disabled")]
    BranchingDisabled,

    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    #[error("branch '{slug}' is not ready (status: {status})")]
    BranchNotReady { slug: String, status: String },

    #[error("branch '{0}' already exists")]
    BranchExists(String),

    #[error("invalid branch slug '{0}'")]
    InvalidSlug(String),

    #[error("branch slug '{0}' is reserved")]
    ReservedSlug(String),

    #[error("branch slug '{0}' exceeds the maximum length")]
    SlugTooLong(String),

    #[error("total branch limit of {0} reached")]
    MaxTotalReached(u32),

    #[error("branch quota of {limit} reached for user '{user}'")]
    UserQuotaExceeded { user: String, limit: u32 },

    #[error("the main branch cannot be deleted")]
    CannotDeleteMain,

    #[error("parent database '{0}' has active sessions")]
    ParentBusy(String),

    #[error("seeding branch '{slug}' failed: {message}")]
    SeedFailed { slug: String, message: String },

    #[error("creating database '{database}' failed: {message}")]
    PhysicalCreateFailed { database: String, message: String },

    #[error("dropping database '{database}' failed: {message}")]
    PhysicalDropFailed { database: String, message: String },

    #[error("invalid connection URL: {0}")]
    UrlParseFailed(String),

    #[error("failed to build connection pool: {0}")]
    PoolCreationFailed(String),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
}

impl BranchError {
    /// Maps a unique-constraint violation on an insert to `BranchExists`;
    /// every other database error passes through unchanged.
    pub(crate) fn on_insert(slug: &str, err: tokio_postgres::Error) -> Self {
        if err.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION) {
            Self::BranchExists(slug.to_string())
        } else {
            Self::Database(err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BranchNotFound(_))
    }
}
