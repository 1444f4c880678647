//! Driver registry and per-ID lock tests.

use std::time::Duration;

use super::*;
use crate::error::ErrorKind;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};

#[fixture]
fn deps() -> DriverDeps {
    DriverDeps::with_runner(Arc::new(ScriptedRunner::new()))
}

#[rstest]
fn builtin_registry_knows_mock_and_rbd() {
    assert_eq!(DriverRegistry::builtin().names(), vec!["mock", "rbd"]);
}

#[rstest]
fn duplicate_registration_is_rejected() {
    let mut registry = DriverRegistry::new();
    registry
        .register(mock::registration())
        .expect("first registration");
    let err = registry
        .register(mock::registration())
        .expect_err("second registration");
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[rstest]
fn unknown_driver_is_a_config_error(deps: DriverDeps) {
    let service = ServiceConfig::new("tape", "tape");
    let registry = DriverRegistry::builtin();
    assert_eq!(
        registry.create_driver(&service, &deps).err().map(|e| e.kind()),
        Some(ErrorKind::Config)
    );
    assert_eq!(
        registry.create_executor(&service, &deps).err().map(|e| e.kind()),
        Some(ErrorKind::Config)
    );
}

#[rstest]
#[tokio::test]
async fn registry_builds_working_drivers(deps: DriverDeps) {
    let registry = DriverRegistry::builtin();
    let driver = registry
        .create_driver(&ServiceConfig::new("mock", "mock"), &deps)
        .expect("mock driver builds");
    assert_eq!(driver.name(), "mock");
    let volumes = driver
        .volumes(VolumeAttachments::None)
        .await
        .expect("volumes list");
    assert_eq!(volumes.len(), 3);

    let executor = registry
        .create_executor(&ServiceConfig::new("mock", "mock"), &deps)
        .expect("mock executor builds");
    assert_eq!(executor.supported(), ExecutorOps::ALL);
}

#[rstest]
#[tokio::test]
async fn lock_table_keeps_insertion_order_and_rejects_duplicates() {
    let table = LockTable::new("volume");
    assert!(table.insert("vol-b", 2_u32));
    assert!(table.insert("vol-a", 1_u32));
    assert!(!table.insert("vol-b", 9_u32));

    assert_eq!(table.values().await, vec![2, 1]);
    assert_eq!(table.len(), 2);
}

#[rstest]
#[tokio::test]
async fn vetoed_removal_keeps_the_record() {
    let table = LockTable::new("snapshot");
    table.insert("snap-000", String::from("nightly"));

    let vetoed = table
        .remove_if("snap-000", |_| {
            Err(StorageError::Conflict(String::from("in use")))
        })
        .await;
    assert_eq!(vetoed.map_err(|err| err.kind()), Err(ErrorKind::Conflict));
    assert_eq!(table.get("snap-000").await.ok().as_deref(), Some("nightly"));

    let removed = table.remove_if("snap-000", |_| Ok(())).await;
    assert_eq!(removed.ok().as_deref(), Some("nightly"));
    let gone = table.get("snap-000").await.expect_err("removed");
    assert_eq!(gone.kind(), ErrorKind::NotFound);
    assert!(table.is_empty());
}

#[rstest]
#[tokio::test]
async fn id_locks_block_only_the_same_id() {
    let locks = IdLocks::new();
    let held = locks.lock("rbd.data").await;

    let same = tokio::time::timeout(Duration::from_millis(50), locks.lock("rbd.data")).await;
    assert!(same.is_err(), "second lock on the same ID must wait");
    let other = tokio::time::timeout(Duration::from_millis(50), locks.lock("rbd.logs")).await;
    assert!(other.is_ok(), "other IDs proceed");

    drop(held);
    let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.lock("rbd.data")).await;
    assert!(reacquired.is_ok());
}

#[rstest]
#[tokio::test]
async fn id_locks_forget_released_ids() {
    let locks = IdLocks::new();
    let first = locks.lock("rbd.data").await;
    let second = locks.lock("rbd.logs").await;
    assert_eq!(locks.len(), 2);

    drop(first);
    assert_eq!(locks.len(), 1);
    drop(second);
    assert!(locks.is_empty());
}

#[rstest]
#[tokio::test]
async fn id_locks_keep_ids_with_waiters() {
    let locks = Arc::new(IdLocks::new());
    let held = locks.lock("rbd.data").await;
    let shared = Arc::clone(&locks);
    let waiter = tokio::spawn(async move {
        let _guard = shared.lock("rbd.data").await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(held);
    assert_eq!(locks.len(), 1, "the waiter still needs the slot");
    waiter.await.expect("waiter finishes");
    assert!(locks.is_empty());
}
