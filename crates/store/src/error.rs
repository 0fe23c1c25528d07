/// Errors from the aggregate/alert store.
///
/// Every variant is a storage failure from the job's point of view: the
/// transaction it happened in is rolled back and the job is retried later.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A uniqueness or reference constraint would be violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Savepoint misuse (release/rollback without an open savepoint).
    #[error("no open savepoint")]
    NoSavepoint,
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
