//! Read-after-write and read-after-delete checks.
//!
//! A write call reporting success is not taken at its word: the row is read
//! back independently. The same "no matching row" answer from the store is
//! a failure when checking existence and a success when checking deletion;
//! [`Expectation::judge`] is the one place that inversion lives.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::domain::{EntityKind, Record};
use crate::storage::{RemoteQuery, RemoteStore, StoreError};

/// What a check expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Present,
    Absent,
}

/// Raw result of a point read.
#[derive(Debug)]
pub enum Lookup {
    Found(Record),
    Missing,
    Failed(StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictCause {
    /// Expected present, found.
    Found,
    /// Expected absent, store reported no matching row.
    Absent,
    /// Expected present, store reported no matching row.
    NotFound,
    /// Expected absent, row still there.
    StillPresent,
    /// The read itself failed; nothing is known about the row.
    QueryFailed,
    /// No signed-in user to scope the read to.
    NoSession,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub success: bool,
    pub message: String,
    pub cause: VerdictCause,
    /// The row as read back, when one was found.
    pub payload: Option<Record>,
}

impl Verdict {
    pub fn failed(cause: VerdictCause, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            cause,
            payload: None,
        }
    }
}

impl Expectation {
    pub fn judge(self, kind: EntityKind, id: &str, lookup: Lookup) -> Verdict {
        match (self, lookup) {
            (Expectation::Present, Lookup::Found(record)) => Verdict {
                success: true,
                message: format!("{kind} {id} exists in remote store"),
                cause: VerdictCause::Found,
                payload: Some(record),
            },
            (Expectation::Present, Lookup::Missing) => Verdict::failed(
                VerdictCause::NotFound,
                format!("{kind} {id} not found in remote store"),
            ),
            (Expectation::Absent, Lookup::Missing) => Verdict {
                success: true,
                message: format!("{kind} {id} confirmed absent from remote store"),
                cause: VerdictCause::Absent,
                payload: None,
            },
            (Expectation::Absent, Lookup::Found(record)) => Verdict {
                success: false,
                message: format!("{kind} {id} is still present in remote store"),
                cause: VerdictCause::StillPresent,
                payload: Some(record),
            },
            (_, Lookup::Failed(e)) => Verdict::failed(
                VerdictCause::QueryFailed,
                format!("Verification query for {kind} {id} failed: {e}"),
            ),
        }
    }
}

/// A labelled check for [`VerificationService::batch_verify`].
pub struct VerificationCheck<'a> {
    pub label: String,
    pub check: BoxFuture<'a, anyhow::Result<Verdict>>,
}

impl<'a> VerificationCheck<'a> {
    pub fn new<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Future<Output = anyhow::Result<Verdict>> + Send + 'a,
    {
        Self {
            label: label.into(),
            check: Box::pin(check),
        }
    }

    pub fn exists(
        service: &'a VerificationService,
        kind: EntityKind,
        id: &'a str,
        owner_id: &'a str,
    ) -> Self {
        Self::new(format!("{kind} {id} exists"), async move {
            Ok(service.confirm_exists(kind, id, owner_id).await)
        })
    }

    pub fn absent(
        service: &'a VerificationService,
        kind: EntityKind,
        id: &'a str,
        owner_id: &'a str,
    ) -> Self {
        Self::new(format!("{kind} {id} absent"), async move {
            Ok(service.confirm_absent(kind, id, owner_id).await)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledVerdict {
    pub label: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchVerification {
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<LabeledVerdict>,
}

#[derive(Clone)]
pub struct VerificationService {
    store: Arc<dyn RemoteStore>,
}

impl VerificationService {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Point read scoped to owner. Accounts only match while active, so a
    /// soft-deleted account reads as missing.
    pub async fn lookup(&self, kind: EntityKind, id: &str, owner_id: &str) -> Lookup {
        let mut query = RemoteQuery::by_id(kind, id, owner_id);
        if kind == EntityKind::Account {
            query = query.eq("is_active", true);
        }
        self.point_read(&query).await
    }

    /// Point read scoped to owner, matching the row in any state.
    pub async fn lookup_row(&self, kind: EntityKind, id: &str, owner_id: &str) -> Lookup {
        self.point_read(&RemoteQuery::by_id(kind, id, owner_id)).await
    }

    async fn point_read(&self, query: &RemoteQuery) -> Lookup {
        match self.store.select_single(query).await {
            Ok(record) => Lookup::Found(record),
            Err(e) if e.is_not_found() => Lookup::Missing,
            Err(e) => Lookup::Failed(e),
        }
    }

    pub async fn confirm_exists(&self, kind: EntityKind, id: &str, owner_id: &str) -> Verdict {
        let lookup = self.lookup(kind, id, owner_id).await;
        let verdict = Expectation::Present.judge(kind, id, lookup);
        log_verdict(&verdict);
        verdict
    }

    /// Read-after-write: the row just written must be there, whatever its
    /// `is_active` flag says.
    pub async fn confirm_written(&self, kind: EntityKind, id: &str, owner_id: &str) -> Verdict {
        let lookup = self.lookup_row(kind, id, owner_id).await;
        let verdict = Expectation::Present.judge(kind, id, lookup);
        log_verdict(&verdict);
        verdict
    }

    pub async fn confirm_absent(&self, kind: EntityKind, id: &str, owner_id: &str) -> Verdict {
        let lookup = self.lookup(kind, id, owner_id).await;
        let verdict = Expectation::Absent.judge(kind, id, lookup);
        log_verdict(&verdict);
        verdict
    }

    /// Run checks one after another. A check that errors or panics yields a
    /// failed verdict for that item only.
    pub async fn batch_verify(&self, checks: Vec<VerificationCheck<'_>>) -> BatchVerification {
        let mut batch = BatchVerification::default();

        for VerificationCheck { label, check } in checks {
            let verdict = match AssertUnwindSafe(check).catch_unwind().await {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(e)) => Verdict::failed(
                    VerdictCause::QueryFailed,
                    format!("Check '{label}' failed: {e:#}"),
                ),
                Err(_) => Verdict::failed(
                    VerdictCause::QueryFailed,
                    format!("Check '{label}' panicked"),
                ),
            };

            if verdict.success {
                batch.successful += 1;
                info!(check = %label, "verified: {}", verdict.message);
            } else {
                batch.failed += 1;
                warn!(check = %label, "verification failed: {}", verdict.message);
            }
            batch.results.push(LabeledVerdict { label, verdict });
        }

        info!(
            successful = batch.successful,
            failed = batch.failed,
            "batch verification finished"
        );
        batch
    }
}

fn log_verdict(verdict: &Verdict) {
    if verdict.success {
        info!(cause = ?verdict.cause, "{}", verdict.message);
    } else {
        warn!(cause = ?verdict.cause, "{}", verdict.message);
    }
}
