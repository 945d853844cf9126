use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::domain::EntityKind;
use crate::storage::{
    AuthProvider, KeyValueStore, RemoteStore, SessionAuth, SqliteKeyValueStore,
    SqliteRemoteStore,
};

use super::entity_service::{DomainService, EntityService};
use super::events::EventBus;
use super::reset::ResetService;
use super::sync::SyncCoordinator;
use super::verification::VerificationService;
use super::{AppError, SyncConfig};

/// Counts shown by `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub local_counts: Vec<(EntityKind, usize)>,
    pub has_default_data: bool,
}

/// Every sync service, explicitly constructed and wired.
/// This is the primary interface for any client (CLI, UI bindings, tests).
pub struct FinanceSync {
    pub bus: Arc<EventBus>,
    pub coordinator: Arc<SyncCoordinator>,
    pub reset: ResetService,
    pub transactions: Arc<EntityService>,
    pub accounts: Arc<EntityService>,
    pub assets: Arc<EntityService>,
    pub liabilities: Arc<EntityService>,
    pools: Vec<SqlitePool>,
}

impl FinanceSync {
    /// Wire the services around the given collaborators.
    pub fn from_parts(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn KeyValueStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let verifier = VerificationService::new(remote.clone());
        let coordinator = Arc::new(SyncCoordinator::new(remote, auth, verifier, bus.clone()));

        let service = |kind| Arc::new(EntityService::new(kind, local.clone(), coordinator.clone()));
        let transactions = service(EntityKind::Transaction);
        let accounts = service(EntityKind::Account);
        let assets = service(EntityKind::Asset);
        let liabilities = service(EntityKind::Liability);

        let domain_services: Vec<Arc<dyn DomainService>> = vec![
            transactions.clone(),
            accounts.clone(),
            assets.clone(),
            liabilities.clone(),
        ];
        let reset = ResetService::new(domain_services, local, bus.clone());

        Self {
            bus,
            coordinator,
            reset,
            transactions,
            accounts,
            assets,
            liabilities,
            pools: Vec::new(),
        }
    }

    /// Open (creating if needed) both SQLite databases, migrate them and
    /// load the local collections.
    pub async fn open(config: &SyncConfig) -> Result<Self, AppError> {
        let remote_pool = SqlitePool::connect(&config.remote_url())
            .await
            .map_err(anyhow::Error::from)?;
        let remote = SqliteRemoteStore::new(remote_pool.clone());
        remote.migrate().await?;

        let local_pool = SqlitePool::connect(&config.local_url())
            .await
            .map_err(anyhow::Error::from)?;
        let local = SqliteKeyValueStore::new(local_pool.clone());
        local.migrate().await?;

        let auth = match &config.user_id {
            Some(id) => SessionAuth::signed_in(id.clone(), config.email.clone()),
            None => SessionAuth::new(),
        };

        let mut app = Self::from_parts(Arc::new(remote), Arc::new(local), Arc::new(auth));
        app.pools = vec![remote_pool, local_pool];
        app.load_local().await?;
        Ok(app)
    }

    pub fn service(&self, kind: EntityKind) -> &Arc<EntityService> {
        match kind {
            EntityKind::Transaction => &self.transactions,
            EntityKind::Account => &self.accounts,
            EntityKind::Asset => &self.assets,
            EntityKind::Liability => &self.liabilities,
        }
    }

    /// Load every collection from the local store. Returns the total count.
    pub async fn load_local(&self) -> Result<usize, AppError> {
        let mut total = 0;
        for kind in EntityKind::ALL {
            total += self.service(kind).load().await?;
        }
        info!(entities = total, "local collections loaded");
        Ok(total)
    }

    pub async fn status(&self) -> StatusReport {
        StatusReport {
            local_counts: EntityKind::ALL
                .iter()
                .map(|kind| (*kind, self.service(*kind).len()))
                .collect(),
            has_default_data: self.reset.has_default_data_remaining().await,
        }
    }

    /// Drop all listeners and close the database pools.
    pub async fn shutdown(self) {
        self.bus.clear(None);
        for pool in &self.pools {
            pool.close().await;
        }
    }
}
