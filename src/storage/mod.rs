mod auth;
mod error;
mod key_value;
mod remote;
mod repository;

pub use auth::*;
pub use error::*;
pub use key_value::*;
pub use remote::*;
pub use repository::*;

/// SQL migration for the remote entity tables
pub const MIGRATION_001_REMOTE_SCHEMA: &str = include_str!("migrations/001_remote_schema.sql");

/// SQL migration for the local key-value store
pub const MIGRATION_002_KEY_VALUE: &str = include_str!("migrations/002_key_value.sql");
