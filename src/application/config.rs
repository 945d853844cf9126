/// Where the two SQLite databases live and who is signed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Database playing the role of the remote relational store.
    pub remote_database: String,
    /// Database backing the local key-value store.
    pub local_database: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

pub const DEFAULT_REMOTE_DATABASE: &str = "finsync-remote.db";
pub const DEFAULT_LOCAL_DATABASE: &str = "finsync-local.db";

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_database: DEFAULT_REMOTE_DATABASE.to_string(),
            local_database: DEFAULT_LOCAL_DATABASE.to_string(),
            user_id: None,
            email: None,
        }
    }
}

impl SyncConfig {
    pub fn remote_url(&self) -> String {
        sqlite_url(&self.remote_database)
    }

    pub fn local_url(&self) -> String {
        sqlite_url(&self.local_database)
    }
}

// Files are created on first use.
fn sqlite_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite:{}?mode=rwc", path)
    }
}
