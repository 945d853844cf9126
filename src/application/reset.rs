use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{EntityKind, seed};
use crate::storage::KeyValueStore;

use super::ResetError;
use super::entity_service::DomainService;
use super::events::{BusEvent, DATA_PRUNED, DATA_RESET, EventBus};

/// Key prefixes owned by the platform (auth sessions, system settings).
pub const RESERVED_KEY_PREFIXES: &[&str] = &["sb-", "supabase.auth.", "system:", "platform:"];

/// Exact keys owned by the platform.
pub const RESERVED_KEYS: &[&str] = &["device_id", "app_settings", "onboarding_complete"];

/// Substrings identifying keys that hold financial data.
pub const DOMAIN_KEY_MARKERS: &[&str] = &["transaction", "asset", "liability", "account"];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key) || RESERVED_KEY_PREFIXES.iter().any(|p| key.starts_with(p))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResetReport {
    pub removed_keys: usize,
    pub cleared_collections: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PruneCount {
    pub kind: EntityKind,
    pub before: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub counts: Vec<PruneCount>,
    pub failures: Vec<String>,
}

impl PruneReport {
    pub fn total_removed(&self) -> usize {
        self.counts.iter().map(|c| c.removed).sum()
    }

    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ResetService {
    services: Vec<Arc<dyn DomainService>>,
    local: Arc<dyn KeyValueStore>,
    bus: Arc<EventBus>,
}

impl ResetService {
    pub fn new(
        services: Vec<Arc<dyn DomainService>>,
        local: Arc<dyn KeyValueStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            services,
            local,
            bus,
        }
    }

    /// Wipe every domain collection and every non-reserved local key.
    ///
    /// The local store is cleared first, in one atomic removal; collections
    /// are only dropped once that succeeded. Failures are returned, never
    /// swallowed.
    pub async fn reset_all(&self) -> Result<ResetReport, ResetError> {
        let keys = self.local.list_keys().await.map_err(ResetError::Persistent)?;
        let removable: Vec<String> = keys.into_iter().filter(|k| !is_reserved_key(k)).collect();

        self.local
            .remove_many(&removable)
            .await
            .map_err(ResetError::Persistent)?;

        for service in &self.services {
            service.clear_cache();
        }

        let report = ResetReport {
            removed_keys: removable.len(),
            cleared_collections: self.services.len(),
        };
        info!(
            removed_keys = report.removed_keys,
            collections = report.cleared_collections,
            "local state reset"
        );

        self.bus.publish(
            DATA_RESET,
            &BusEvent::DataReset {
                removed_keys: report.removed_keys,
                timestamp: Utc::now(),
            },
        );
        Ok(report)
    }

    /// Cheap probe: does any key name look like financial data? Reserved
    /// keys count too.
    pub async fn has_default_data_remaining(&self) -> bool {
        match self.local.list_keys().await {
            Ok(keys) => keys
                .iter()
                .any(|key| DOMAIN_KEY_MARKERS.iter().any(|m| key.contains(m))),
            Err(e) => {
                warn!("could not list local keys: {e}");
                false
            }
        }
    }

    /// Remove entities classified as seed data from every collection and
    /// write the survivors back. User data that collides with a seed
    /// fixture's text and amount is removed too; see [`seed`].
    pub async fn prune_defaults_only(&self) -> PruneReport {
        let mut report = PruneReport::default();

        for service in &self.services {
            let kind = service.kind();
            let all = service.get_all();
            let before = all.len();
            let kept: Vec<_> = all
                .into_iter()
                .filter(|entity| !seed::is_default_data(entity))
                .collect();
            let removed = before - kept.len();

            if removed > 0 {
                if let Err(e) = service.bulk_set(kept).await {
                    let failure = ResetError::Collection { kind, source: e };
                    warn!("{failure}");
                    report.failures.push(failure.to_string());
                    continue;
                }
            }

            report.counts.push(PruneCount {
                kind,
                before,
                removed,
            });
        }

        let total = report.total_removed();
        info!(removed = total, failures = report.failures.len(), "default data pruned");
        self.bus.publish(
            DATA_PRUNED,
            &BusEvent::DefaultsPruned {
                removed: total,
                timestamp: Utc::now(),
            },
        );
        report
    }
}
