use thiserror::Error;

use crate::domain::EntityKind;
use crate::storage::StoreError;

/// Why a coordinator call failed. An absent session is not an error and
/// never shows up here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Auth lookup failed: {0}")]
    AuthLookup(String),

    #[error("Remote write failed for {kind} {id}: {message}")]
    RemoteWrite {
        kind: EntityKind,
        id: String,
        message: String,
    },

    #[error("Remote read failed for {kind} {id}: {message}")]
    RemoteRead {
        kind: EntityKind,
        id: String,
        message: String,
    },

    #[error("Write of {kind} {id} could not be verified: {message}")]
    Verification {
        kind: EntityKind,
        id: String,
        message: String,
    },

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

/// A reset that could not complete. Always surfaced to the caller.
#[derive(Error, Debug)]
pub enum ResetError {
    #[error("Failed to clear local store: {0}")]
    Persistent(#[source] StoreError),

    #[error("Failed to rewrite {kind} collection: {source}")]
    Collection {
        kind: EntityKind,
        #[source]
        source: StoreError,
    },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reset(#[from] ResetError),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
