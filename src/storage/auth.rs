use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// Resolves the acting user. `None` means nobody is signed in.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<AuthUser>, StoreError>;
}

/// In-process session holder.
#[derive(Debug, Default)]
pub struct SessionAuth {
    user: RwLock<Option<AuthUser>>,
}

impl SessionAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(id: impl Into<String>, email: Option<String>) -> Self {
        let auth = Self::new();
        auth.sign_in(AuthUser {
            id: id.into(),
            email,
        });
        auth
    }

    pub fn sign_in(&self, user: AuthUser) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl AuthProvider for SessionAuth {
    async fn current_user(&self) -> Result<Option<AuthUser>, StoreError> {
        Ok(self.user.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
