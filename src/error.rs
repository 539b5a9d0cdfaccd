use thiserror::Error;

/// Errors produced by the chore and ledger core.
#[derive(Error, Debug)]
pub enum ChoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChoreError>;

impl ChoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ChoreError::InvalidInput(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ChoreError::StateConflict(message.into())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        ChoreError::PermissionDenied(message.into())
    }
}
