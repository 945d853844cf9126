use thiserror::Error;

/// Failures reported by the remote store, the auth collaborator and the
/// local key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No {table} row matched {filters}")]
    NotFound { table: String, filters: String },

    #[error("Expected a single {table} row, found {count}")]
    MultipleRows { table: String, count: usize },

    #[error("Unknown column '{column}' on {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Remote read failed: {0}")]
    Read(String),

    #[error("Remote write failed: {0}")]
    Write(String),

    #[error("Auth lookup failed: {0}")]
    Auth(String),

    #[error("Local store failed: {0}")]
    Persistent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// The store answered, and the answer was "no such row".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn read(err: anyhow::Error) -> Self {
        StoreError::Read(format!("{err:#}"))
    }

    pub(crate) fn write(err: anyhow::Error) -> Self {
        StoreError::Write(format!("{err:#}"))
    }

    pub(crate) fn persistent(err: anyhow::Error) -> Self {
        StoreError::Persistent(format!("{err:#}"))
    }
}
