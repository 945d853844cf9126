use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{DeleteMode, EntityKind, FinancialEntity, NormalizedId, Record, identifier};
use crate::storage::{AuthProvider, AuthUser, RemoteQuery, RemoteStore};

use super::events::{BusEvent, EventBus, SYNC_ERROR, SYNC_SUCCESS, SyncOperation};
use super::verification::{Verdict, VerdictCause, VerificationService};
use super::SyncError;

/// Whether an upsert records a new entity or changes an existing one.
/// Both issue the same idempotent write; the intent is reported in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncIntent {
    Create,
    Update,
}

impl From<SyncIntent> for SyncOperation {
    fn from(intent: SyncIntent) -> Self {
        match intent {
            SyncIntent::Create => SyncOperation::Create,
            SyncIntent::Update => SyncOperation::Update,
        }
    }
}

/// Result of one coordinator call. Never mutated once returned.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    pub payload: Option<Record>,
    pub error: Option<SyncError>,
}

impl SyncOutcome {
    fn ok(message: impl Into<String>, payload: Option<Record>) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload,
            error: None,
        }
    }

    fn not_logged_in(kind: EntityKind, operation: SyncOperation) -> Self {
        Self::ok(
            format!("Not logged in; {operation} of {kind} kept local only"),
            None,
        )
    }

    fn failed(error: SyncError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            payload: None,
            error: Some(error),
        }
    }

    /// True when the call returned early because nobody is signed in.
    pub fn skipped_unauthenticated(&self) -> bool {
        self.success && self.payload.is_none() && self.message.starts_with("Not logged in")
    }
}

/// Per-item tally of a batch. `success_count + failed_count` always equals
/// the number of items submitted, and `errors.len() == failed_count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub success_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

/// The coordinator surface domain services depend on.
#[async_trait]
pub trait EntitySync: Send + Sync {
    /// Normalize the identifier (rewriting `entity.id` in place if it
    /// changes), write, verify, notify.
    async fn upsert_entity(&self, entity: &mut FinancialEntity, intent: SyncIntent)
    -> SyncOutcome;

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> SyncOutcome;

    /// Sequential; one item's failure never aborts the rest.
    async fn upsert_batch(&self, entities: &mut [FinancialEntity], intent: SyncIntent)
    -> BatchResult;
}

pub struct SyncCoordinator {
    store: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    verifier: VerificationService,
    bus: Arc<EventBus>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        verifier: VerificationService,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            auth,
            verifier,
            bus,
        }
    }

    pub fn verifier(&self) -> &VerificationService {
        &self.verifier
    }

    /// Explicit read-after-delete for an entity of the signed-in user.
    pub async fn verify_deletion(&self, kind: EntityKind, id: &str) -> Verdict {
        match self.current_user().await {
            Ok(Some(user)) => self.verifier.confirm_absent(kind, id, &user.id).await,
            Ok(None) => Verdict::failed(VerdictCause::NoSession, "Not logged in"),
            Err(e) => Verdict::failed(VerdictCause::QueryFailed, e.to_string()),
        }
    }

    /// Read-after-write for an entity of the signed-in user.
    pub async fn verify_presence(&self, kind: EntityKind, id: &str) -> Verdict {
        match self.current_user().await {
            Ok(Some(user)) => self.verifier.confirm_exists(kind, id, &user.id).await,
            Ok(None) => Verdict::failed(VerdictCause::NoSession, "Not logged in"),
            Err(e) => Verdict::failed(VerdictCause::QueryFailed, e.to_string()),
        }
    }

    async fn current_user(&self) -> Result<Option<AuthUser>, SyncError> {
        self.auth
            .current_user()
            .await
            .map_err(|e| SyncError::AuthLookup(e.to_string()))
    }

    /// `Ok(None)` means no session: nothing was sent.
    async fn try_upsert(&self, entity: &mut FinancialEntity) -> Result<Option<Record>, SyncError> {
        let Some(user) = self.current_user().await? else {
            return Ok(None);
        };

        if let NormalizedId::Replaced {
            original,
            replacement,
        } = identifier::normalize(&entity.id)
        {
            warn!(
                kind = %entity.kind,
                %original,
                %replacement,
                "replacing non-conformant identifier"
            );
            entity.id = replacement;
        }
        entity.owner_id = Some(user.id.clone());

        let kind = entity.kind;
        let record = entity.to_remote_record(&user.id);

        let written = self
            .store
            .upsert(kind, &record)
            .await
            .map_err(|e| SyncError::RemoteWrite {
                kind,
                id: entity.id.clone(),
                message: e.to_string(),
            })?;
        debug!(%kind, id = %entity.id, "remote write accepted, verifying");

        let verdict = self.verifier.confirm_written(kind, &entity.id, &user.id).await;
        if !verdict.success {
            return Err(SyncError::Verification {
                kind,
                id: entity.id.clone(),
                message: verdict.message,
            });
        }

        Ok(Some(written))
    }

    /// `Ok(None)` means no session: nothing was sent.
    async fn try_delete(&self, kind: EntityKind, id: &str) -> Result<Option<String>, SyncError> {
        let Some(user) = self.current_user().await? else {
            return Ok(None);
        };
        let query = RemoteQuery::by_id(kind, id, &user.id);

        match kind.delete_mode() {
            DeleteMode::Hard => {
                let removed = self.store.delete(&query).await.map_err(|e| {
                    SyncError::RemoteWrite {
                        kind,
                        id: id.to_string(),
                        message: e.to_string(),
                    }
                })?;
                Ok(Some(format!("Deleted {kind} {id} ({removed} row(s))")))
            }
            DeleteMode::Soft => {
                let mut record = match self.store.select_single(&query).await {
                    Ok(record) => record,
                    Err(e) if e.is_not_found() => {
                        return Ok(Some(format!("{kind} {id} already absent")));
                    }
                    Err(e) => {
                        return Err(SyncError::RemoteRead {
                            kind,
                            id: id.to_string(),
                            message: e.to_string(),
                        });
                    }
                };

                record.insert("is_active".into(), Value::Bool(false));
                record.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
                self.store
                    .upsert(kind, &record)
                    .await
                    .map_err(|e| SyncError::RemoteWrite {
                        kind,
                        id: id.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Some(format!("Deactivated {kind} {id}")))
            }
        }
    }

    fn publish_success(&self, kind: EntityKind, operation: SyncOperation, id: &str) {
        self.bus.publish(
            SYNC_SUCCESS,
            &BusEvent::SyncSuccess {
                entity_kind: kind,
                operation,
                identifier: id.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    fn publish_error(&self, kind: EntityKind, operation: SyncOperation, error: &SyncError) {
        self.bus.publish(
            SYNC_ERROR,
            &BusEvent::SyncError {
                entity_kind: kind,
                operation,
                error_message: error.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    fn fail(&self, kind: EntityKind, operation: SyncOperation, error: SyncError) -> SyncOutcome {
        warn!(%kind, %operation, "sync failed: {error}");
        self.publish_error(kind, operation, &error);
        SyncOutcome::failed(error)
    }
}

#[async_trait]
impl EntitySync for SyncCoordinator {
    async fn upsert_entity(
        &self,
        entity: &mut FinancialEntity,
        intent: SyncIntent,
    ) -> SyncOutcome {
        let kind = entity.kind;
        let operation = SyncOperation::from(intent);

        let attempt = AssertUnwindSafe(self.try_upsert(entity))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok(Some(record))) => {
                info!(%kind, %operation, id = %entity.id, "synced and verified");
                self.publish_success(kind, operation, &entity.id);
                SyncOutcome::ok(format!("{kind} {} synced", entity.id), Some(record))
            }
            Ok(Ok(None)) => {
                debug!(%kind, %operation, "no session, skipping remote write");
                SyncOutcome::not_logged_in(kind, operation)
            }
            Ok(Err(error)) => self.fail(kind, operation, error),
            Err(panic) => self.fail(kind, operation, SyncError::Unexpected(panic_message(panic))),
        }
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> SyncOutcome {
        let operation = SyncOperation::Delete;

        let attempt = AssertUnwindSafe(self.try_delete(kind, id))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok(Some(message))) => {
                info!(%kind, id, "{message}");
                self.publish_success(kind, operation, id);
                SyncOutcome::ok(message, None)
            }
            Ok(Ok(None)) => SyncOutcome::not_logged_in(kind, operation),
            Ok(Err(error)) => self.fail(kind, operation, error),
            Err(panic) => self.fail(kind, operation, SyncError::Unexpected(panic_message(panic))),
        }
    }

    async fn upsert_batch(
        &self,
        entities: &mut [FinancialEntity],
        intent: SyncIntent,
    ) -> BatchResult {
        let mut result = BatchResult::default();

        for entity in entities.iter_mut() {
            let outcome = self.upsert_entity(entity, intent).await;
            if outcome.success {
                result.success_count += 1;
            } else {
                result.failed_count += 1;
                result.errors.push(outcome.message);
            }
        }

        info!(
            submitted = entities.len(),
            succeeded = result.success_count,
            failed = result.failed_count,
            "batch sync finished"
        );
        result
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
