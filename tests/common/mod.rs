// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use finsync::application::{BusEvent, FinanceSync};
use finsync::domain::{EntityKind, FinancialEntity, Record};
use finsync::storage::{
    KeyValueStore, RemoteQuery, RemoteStore, SessionAuth, SqliteKeyValueStore, SqliteRemoteStore,
    StoreError,
};
use tempfile::TempDir;

pub const USER_ID: &str = "user-1";

/// Remote store wrapper that counts calls and injects failures.
pub struct SpyStore {
    inner: SqliteRemoteStore,
    upsert_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    failing_names: Mutex<HashSet<String>>,
    drop_writes: AtomicBool,
    fail_reads: AtomicBool,
    panic_on_upsert: AtomicBool,
}

impl SpyStore {
    pub fn new(inner: SqliteRemoteStore) -> Self {
        Self {
            inner,
            upsert_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            failing_names: Mutex::new(HashSet::new()),
            drop_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            panic_on_upsert: AtomicBool::new(false),
        }
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Reject writes of entities with this display name.
    pub fn fail_writes_for(&self, name: &str) {
        self.failing_names.lock().unwrap().insert(name.to_string());
    }

    /// Report writes as successful without storing anything.
    pub fn drop_writes(&self, enabled: bool) {
        self.drop_writes.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, enabled: bool) {
        self.fail_reads.store(enabled, Ordering::SeqCst);
    }

    pub fn panic_on_upsert(&self, enabled: bool) {
        self.panic_on_upsert.store(enabled, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::Read("connection reset by peer".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for SpyStore {
    async fn select(&self, query: &RemoteQuery) -> Result<Vec<Record>, StoreError> {
        self.check_read()?;
        self.inner.select(query).await
    }

    async fn count(&self, query: &RemoteQuery) -> Result<u64, StoreError> {
        self.check_read()?;
        self.inner.count(query).await
    }

    async fn upsert(&self, kind: EntityKind, record: &Record) -> Result<Record, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        if self.panic_on_upsert.load(Ordering::SeqCst) {
            panic!("remote client crashed");
        }

        let name = record
            .get(kind.name_column())
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if self.failing_names.lock().unwrap().contains(&name) {
            return Err(StoreError::Write(format!("rejected write of '{name}'")));
        }

        if self.drop_writes.load(Ordering::SeqCst) {
            return Ok(record.clone());
        }
        self.inner.upsert(kind, record).await
    }

    async fn delete(&self, query: &RemoteQuery) -> Result<u64, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(query).await
    }
}

pub struct TestApp {
    pub app: FinanceSync,
    pub auth: Arc<SessionAuth>,
    pub remote: Arc<SpyStore>,
    pub local: Arc<SqliteKeyValueStore>,
    pub events: Arc<Mutex<Vec<(String, BusEvent)>>>,
    _temp: TempDir,
}

impl TestApp {
    pub fn events(&self) -> Vec<(String, BusEvent)> {
        self.events.lock().unwrap().clone()
    }

    /// Remote row count for a kind, bypassing fault injection.
    pub async fn remote_count(&self, kind: EntityKind) -> Result<u64> {
        Ok(self.remote.inner.count(&RemoteQuery::new(kind)).await?)
    }

    pub async fn remote_rows(&self, kind: EntityKind) -> Result<Vec<Record>> {
        Ok(self.remote.inner.select(&RemoteQuery::new(kind)).await?)
    }
}

/// Helper to create a signed-in app over temporary databases, recording
/// every sync event.
pub async fn test_app() -> Result<TestApp> {
    let temp_dir = TempDir::new()?;
    let remote_path = temp_dir.path().join("remote.db");
    let local_path = temp_dir.path().join("local.db");

    let remote = SqliteRemoteStore::init(&format!("sqlite:{}?mode=rwc", remote_path.display())).await?;
    let local =
        Arc::new(SqliteKeyValueStore::init(&format!("sqlite:{}?mode=rwc", local_path.display())).await?);
    let remote = Arc::new(SpyStore::new(remote));
    let auth = Arc::new(SessionAuth::signed_in(USER_ID, Some("me@example.com".into())));

    let app = FinanceSync::from_parts(remote.clone(), local.clone(), auth.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    for channel in [
        finsync::application::events::SYNC_SUCCESS,
        finsync::application::events::SYNC_ERROR,
        finsync::application::events::DATA_RESET,
        finsync::application::events::DATA_PRUNED,
    ] {
        let sink = events.clone();
        app.bus.subscribe(channel, move |event| {
            sink.lock().unwrap().push((channel.to_string(), event.clone()));
            Ok(())
        });
    }

    Ok(TestApp {
        app,
        auth,
        remote,
        local,
        events,
        _temp: temp_dir,
    })
}

pub fn cash(value: i64) -> FinancialEntity {
    FinancialEntity::new(EntityKind::Asset, "Cash", "cash").with_field("current_value", value)
}

pub fn transaction(description: &str, amount: i64) -> FinancialEntity {
    FinancialEntity::new(EntityKind::Transaction, description, "expense")
        .with_field("amount", amount)
        .with_field("date", "2024-03-01")
}

/// Write a raw key into the local store.
pub async fn put_key(local: &dyn KeyValueStore, key: &str, value: &str) -> Result<()> {
    local.set(key, value).await?;
    Ok(())
}
