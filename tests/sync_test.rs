mod common;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use common::{USER_ID, cash, test_app, transaction};
use finsync::application::{
    BusEvent, DomainService, EntitySync, FinanceSync, SyncError, SyncIntent, SyncOperation,
    VerdictCause, events,
};
use finsync::domain::{EntityKind, FinancialEntity, identifier};
use finsync::storage::{
    AuthProvider, AuthUser, SqliteKeyValueStore, SqliteRemoteStore, StoreError,
};
use tempfile::TempDir;

/// Auth collaborator whose session lookup always fails.
struct BrokenAuth;

#[async_trait]
impl AuthProvider for BrokenAuth {
    async fn current_user(&self) -> Result<Option<AuthUser>, StoreError> {
        Err(StoreError::Auth("session token expired".into()))
    }
}

#[tokio::test]
async fn test_upsert_replaces_invalid_identifier_and_verifies() -> Result<()> {
    let t = test_app().await?;

    let mut entity = cash(50000).with_id("not-a-uuid");
    let outcome = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Create)
        .await;

    assert!(outcome.success, "{}", outcome.message);
    assert_ne!(entity.id, "not-a-uuid");
    assert!(identifier::is_valid(&entity.id));

    let payload = outcome.payload.expect("written record");
    assert_eq!(payload["id"].as_str(), Some(entity.id.as_str()));
    assert_eq!(payload["current_value"].as_f64(), Some(50000.0));

    let verdict = t
        .app
        .coordinator
        .verifier()
        .confirm_exists(EntityKind::Asset, &entity.id, USER_ID)
        .await;
    assert!(verdict.success);
    assert_eq!(verdict.cause, VerdictCause::Found);

    Ok(())
}

#[tokio::test]
async fn test_valid_identifier_is_kept() -> Result<()> {
    let t = test_app().await?;

    let id = identifier::generate();
    let mut entity = cash(100).with_id(id.clone());
    let outcome = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Create)
        .await;

    assert!(outcome.success);
    assert_eq!(entity.id, id);
    Ok(())
}

#[tokio::test]
async fn test_repeated_upsert_is_idempotent() -> Result<()> {
    let t = test_app().await?;

    let mut entity = transaction("Groceries", 1200);
    let first = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Create)
        .await;
    let second = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Update)
        .await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(t.remote_count(EntityKind::Transaction).await?, 1);

    let rows = t.remote_rows(EntityKind::Transaction).await?;
    assert_eq!(rows[0]["description"].as_str(), Some("Groceries"));
    assert_eq!(rows[0]["amount"].as_f64(), Some(1200.0));
    Ok(())
}

#[tokio::test]
async fn test_unauthenticated_upsert_skips_remote_write() -> Result<()> {
    let t = test_app().await?;
    t.auth.sign_out();

    let mut entity = cash(50000);
    let outcome = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Create)
        .await;

    assert!(outcome.success);
    assert!(outcome.message.contains("Not logged in"));
    assert!(outcome.skipped_unauthenticated());
    assert_eq!(t.remote.upsert_calls(), 0);
    assert!(t.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unauthenticated_delete_skips_remote_call() -> Result<()> {
    let t = test_app().await?;
    t.auth.sign_out();

    let outcome = t
        .app
        .coordinator
        .delete_entity(EntityKind::Asset, &identifier::generate())
        .await;

    assert!(outcome.success);
    assert_eq!(t.remote.delete_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_batch_continues_past_failed_item() -> Result<()> {
    let t = test_app().await?;
    t.remote.fail_writes_for("Rent");

    let mut batch = vec![
        transaction("Salary", 80000),
        transaction("Rent", 15000),
        transaction("Coffee", 120),
    ];
    let result = t
        .app
        .coordinator
        .upsert_batch(&mut batch, SyncIntent::Create)
        .await;

    assert_eq!(result.success_count, 2);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("rejected write of 'Rent'"));
    assert_eq!(t.remote_count(EntityKind::Transaction).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_batch_counts_always_add_up() -> Result<()> {
    let t = test_app().await?;
    t.remote.fail_writes_for("bad");

    for names in [
        vec![],
        vec!["ok"],
        vec!["bad"],
        vec!["ok", "bad", "ok", "bad", "bad"],
    ] {
        let mut batch: Vec<_> = names.iter().map(|n| transaction(n, 10)).collect();
        let result = t
            .app
            .coordinator
            .upsert_batch(&mut batch, SyncIntent::Create)
            .await;

        assert_eq!(result.success_count + result.failed_count, names.len());
        assert_eq!(result.errors.len(), result.failed_count);
        assert_eq!(
            result.failed_count,
            names.iter().filter(|n| **n == "bad").count()
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_write_failure_reports_and_emits_error_event() -> Result<()> {
    let t = test_app().await?;
    t.remote.fail_writes_for("Cash");

    let mut entity = cash(10);
    let outcome = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Create)
        .await;

    assert!(!outcome.success);
    assert!(matches!(outcome.error, Some(SyncError::RemoteWrite { .. })));
    // No retry
    assert_eq!(t.remote.upsert_calls(), 1);

    let events = t.events();
    assert_eq!(events.len(), 1);
    match &events[0].1 {
        BusEvent::SyncError {
            entity_kind,
            operation,
            error_message,
            ..
        } => {
            assert_eq!(*entity_kind, EntityKind::Asset);
            assert_eq!(*operation, SyncOperation::Create);
            assert!(error_message.contains("rejected"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_unverified_write_is_reported_as_failure() -> Result<()> {
    let t = test_app().await?;
    t.remote.drop_writes(true);

    let mut entity = cash(10);
    let outcome = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Create)
        .await;

    assert!(!outcome.success);
    match outcome.error {
        Some(SyncError::Verification { kind, id, .. }) => {
            assert_eq!(kind, EntityKind::Asset);
            assert_eq!(id, entity.id);
        }
        other => panic!("expected verification failure, got {other:?}"),
    }
    assert!(matches!(t.events()[0].1, BusEvent::SyncError { .. }));
    Ok(())
}

#[tokio::test]
async fn test_panicking_store_becomes_unexpected_failure() -> Result<()> {
    let t = test_app().await?;
    t.remote.panic_on_upsert(true);

    let mut entity = cash(10);
    let outcome = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Create)
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.error,
        Some(SyncError::Unexpected("remote client crashed".into()))
    );
    Ok(())
}

#[tokio::test]
async fn test_success_event_carries_identifier() -> Result<()> {
    let t = test_app().await?;

    let mut entity = FinancialEntity::new(EntityKind::Liability, "Car loan", "auto")
        .with_field("balance", 420000);
    let outcome = t
        .app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Update)
        .await;
    assert!(outcome.success);

    let events = t.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "sync:success");
    match &events[0].1 {
        BusEvent::SyncSuccess {
            entity_kind,
            operation,
            identifier,
            ..
        } => {
            assert_eq!(*entity_kind, EntityKind::Liability);
            assert_eq!(*operation, SyncOperation::Update);
            assert_eq!(identifier, &entity.id);
        }
        other => panic!("unexpected event {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_then_confirm_absent() -> Result<()> {
    let t = test_app().await?;

    let mut entity = cash(500);
    assert!(
        t.app
            .coordinator
            .upsert_entity(&mut entity, SyncIntent::Create)
            .await
            .success
    );

    let outcome = t
        .app
        .coordinator
        .delete_entity(EntityKind::Asset, &entity.id)
        .await;
    assert!(outcome.success);

    let verdict = t
        .app
        .coordinator
        .verifier()
        .confirm_absent(EntityKind::Asset, &entity.id, USER_ID)
        .await;
    assert!(verdict.success);
    assert_eq!(verdict.cause, VerdictCause::Absent);
    assert_eq!(t.remote_count(EntityKind::Asset).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_delete_is_scoped_to_owner() -> Result<()> {
    let t = test_app().await?;

    let mut entity = cash(500);
    t.app
        .coordinator
        .upsert_entity(&mut entity, SyncIntent::Create)
        .await;

    t.auth.sign_in(AuthUser {
        id: "someone-else".into(),
        email: None,
    });
    let outcome = t
        .app
        .coordinator
        .delete_entity(EntityKind::Asset, &entity.id)
        .await;

    assert!(outcome.success);
    assert_eq!(t.remote_count(EntityKind::Asset).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_account_delete_is_soft() -> Result<()> {
    let t = test_app().await?;

    let mut account = FinancialEntity::new(EntityKind::Account, "Checking", "bank")
        .with_field("balance", 30000)
        .with_field("currency", "TWD");
    assert!(
        t.app
            .coordinator
            .upsert_entity(&mut account, SyncIntent::Create)
            .await
            .success
    );

    let outcome = t
        .app
        .coordinator
        .delete_entity(EntityKind::Account, &account.id)
        .await;
    assert!(outcome.success, "{}", outcome.message);

    let rows = t.remote_rows(EntityKind::Account).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["is_active"].as_bool(), Some(false));
    assert_eq!(rows[0]["balance"].as_f64(), Some(30000.0));

    let verdict = t
        .app
        .coordinator
        .verify_deletion(EntityKind::Account, &account.id)
        .await;
    assert!(verdict.success);
    Ok(())
}

#[tokio::test]
async fn test_service_cache_follows_verified_outcomes() -> Result<()> {
    let t = test_app().await?;
    let assets = &t.app.assets;

    let outcome = assets.add(cash(1000).with_id("legacy-1")).await;
    assert!(outcome.success);
    let cached = assets.get_all();
    assert_eq!(cached.len(), 1);
    assert!(identifier::is_valid(&cached[0].id));
    assert_eq!(cached[0].owner_id.as_deref(), Some(USER_ID));

    t.remote.fail_writes_for("Broken");
    let failed = assets
        .add(FinancialEntity::new(EntityKind::Asset, "Broken", "other"))
        .await;
    assert!(!failed.success);
    assert_eq!(assets.len(), 1);

    let id = cached[0].id.clone();
    let mut changed = cached[0].clone();
    changed.fields.insert("current_value".into(), 2500.into());
    assert!(assets.update(changed).await.success);
    assert_eq!(assets.len(), 1);
    assert_eq!(assets.get(&id).unwrap().primary_amount(), 2500.0);

    assert!(assets.remove(&id).await.success);
    assert!(assets.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_service_persists_and_reloads() -> Result<()> {
    let t = test_app().await?;

    t.app.transactions.add(transaction("Lunch", 180)).await;
    t.app.transactions.add(transaction("Dinner", 420)).await;

    t.app.transactions.clear_cache();
    assert!(t.app.transactions.is_empty());

    let loaded = t.app.load_local().await?;
    assert_eq!(loaded, 2);
    assert_eq!(t.app.transactions.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_push_all_normalizes_cached_identifiers() -> Result<()> {
    let t = test_app().await?;
    t.app
        .liabilities
        .bulk_set(vec![
            FinancialEntity::new(EntityKind::Liability, "Loan", "personal")
                .with_id("liability_1700000000")
                .with_field("amount", 5000),
        ])
        .await?;

    let result = t.app.liabilities.push_all().await;
    assert_eq!(result.success_count, 1);

    let cached = t.app.liabilities.get_all();
    assert!(identifier::is_valid(&cached[0].id));
    let rows = t.remote_rows(EntityKind::Liability).await?;
    assert_eq!(rows[0]["id"].as_str(), Some(cached[0].id.as_str()));
    assert_eq!(rows[0]["balance"].as_f64(), Some(5000.0));
    assert_eq!(rows[0]["original_amount"].as_f64(), Some(5000.0));
    Ok(())
}

#[tokio::test]
async fn test_inactive_account_write_verifies() -> Result<()> {
    let t = test_app().await?;

    let mut account = FinancialEntity::new(EntityKind::Account, "Old card", "credit")
        .with_field("is_active", false);
    let outcome = t
        .app
        .coordinator
        .upsert_entity(&mut account, SyncIntent::Update)
        .await;

    assert!(outcome.success, "{}", outcome.message);
    assert!(matches!(t.events()[0].1, BusEvent::SyncSuccess { .. }));

    let rows = t.remote_rows(EntityKind::Account).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["is_active"].as_bool(), Some(false));

    // Inactive accounts still read as absent to existence checks
    let verdict = t.app.coordinator.verify_deletion(EntityKind::Account, &account.id).await;
    assert!(verdict.success);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listeners_observe_verified_writes() -> Result<()> {
    let t = test_app().await?;

    let verifier = t.app.coordinator.verifier().clone();
    let handle = tokio::runtime::Handle::current();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    // Listeners are synchronous: read the remote store from a helper thread
    t.app.bus.subscribe(events::SYNC_SUCCESS, move |event| {
        if let BusEvent::SyncSuccess {
            entity_kind,
            identifier,
            ..
        } = event
        {
            let verdict = std::thread::scope(|s| {
                s.spawn(|| {
                    handle.block_on(verifier.confirm_exists(*entity_kind, identifier, USER_ID))
                })
                .join()
                .unwrap()
            });
            sink.lock().unwrap().push(verdict.success);
        }
        Ok(())
    });

    let mut batch = vec![cash(10), cash(20), cash(30)];
    let result = t
        .app
        .coordinator
        .upsert_batch(&mut batch, SyncIntent::Create)
        .await;

    assert_eq!(result.success_count, 3);
    assert_eq!(*seen.lock().unwrap(), vec![true, true, true]);
    Ok(())
}

#[tokio::test]
async fn test_auth_lookup_failure_is_reported() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let remote = SqliteRemoteStore::init(&format!(
        "sqlite:{}?mode=rwc",
        temp_dir.path().join("remote.db").display()
    ))
    .await?;
    let local = SqliteKeyValueStore::init(&format!(
        "sqlite:{}?mode=rwc",
        temp_dir.path().join("local.db").display()
    ))
    .await?;
    let app = FinanceSync::from_parts(Arc::new(remote), Arc::new(local), Arc::new(BrokenAuth));

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    app.bus.subscribe(events::SYNC_ERROR, move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });

    let outcome = app.assets.add(cash(10)).await;

    assert!(!outcome.success);
    match &outcome.error {
        Some(SyncError::AuthLookup(message)) => assert!(message.contains("session token expired")),
        other => panic!("expected auth failure, got {other:?}"),
    }
    assert!(app.assets.is_empty());
    assert_eq!(errors.lock().unwrap().len(), 1);

    let verdict = app.coordinator.verify_deletion(EntityKind::Asset, &identifier::generate()).await;
    assert_eq!(verdict.cause, VerdictCause::QueryFailed);
    Ok(())
}
