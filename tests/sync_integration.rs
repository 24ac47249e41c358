use std::sync::Arc;

mod common;

use chrono::{Duration, Utc};
use convsync::error::SyncError;
use convsync::storage::{ConversationRecord, ConversationStore, MemoryStore, Message};
use convsync::sync::{verify_checksum, CallerContext, WriteOptions};

async fn run_lifecycle(store: Arc<dyn ConversationStore>) {
    let service = common::service_over(store.clone());
    let ctx = CallerContext::new("u1");

    let mut first = ConversationRecord::new("c1", "u1", "First boss");
    first.messages.push(Message::user("How do I dodge the charge?"));
    service
        .save(&ctx, first, WriteOptions::default())
        .await
        .expect("insert");

    let loaded = service.load_fresh(&ctx, "c1").await.expect("read");
    assert_eq!(loaded.version, 1);

    let mut update = loaded.clone();
    update.messages.push(Message::assistant("Sidestep at the last moment."));
    let receipt = service
        .save(&ctx, update, WriteOptions::default())
        .await
        .expect("update");
    assert_eq!(receipt.version, 2);

    let mut stale = loaded.clone();
    stale.title = "Edited on another device".into();
    let err = service
        .save(&ctx, stale, WriteOptions::default())
        .await
        .unwrap_err();
    match err {
        SyncError::Conflict { current } => assert_eq!(current.version, 2),
        other => panic!("expected conflict, got {:?}", other),
    }

    service.delete(&ctx, "c1").await.expect("delete");
    assert!(store.fetch_by_key("c1", "u1").await.unwrap().is_empty());
    assert!(store.list_by_owner("u1").await.unwrap().is_empty());
    assert!(matches!(
        service.load_fresh(&ctx, "c1").await,
        Err(SyncError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_lifecycle_on_memory_store() {
    run_lifecycle(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_lifecycle_on_sqlite_store() {
    let (store, _tmp) = common::create_temp_store();
    run_lifecycle(Arc::new(store)).await;
}

#[tokio::test]
async fn test_write_then_remote_read_returns_written_version_and_checksum() {
    let (store, _tmp) = common::create_temp_store();
    let store = Arc::new(store);
    let service = common::service_over(store.clone());
    let ctx = CallerContext::new("u1");

    let receipt = service
        .create(&ctx, "c1", "Checksums", Some(Message::user("é ✓")))
        .await
        .expect("create");

    let fetched = store.fetch_one("c1", "u1").await.unwrap().expect("row");
    assert_eq!(fetched.version, receipt.version);
    assert_eq!(fetched.checksum, receipt.record.checksum);
    assert!(verify_checksum(&fetched));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_exactly_one_wins() {
    let (store, _tmp) = common::create_temp_store();
    let service = Arc::new(common::service_over(Arc::new(store)));
    let ctx = CallerContext::new("u1");

    let base = service
        .create(&ctx, "c1", "Race", Some(Message::user("start")))
        .await
        .expect("create")
        .record;

    let mut handles = Vec::new();
    for n in 0..2 {
        let service = service.clone();
        let ctx = ctx.clone();
        let mut candidate = base.clone();
        candidate.messages.push(Message::user(format!("writer {}", n)));
        handles.push(tokio::spawn(async move {
            service.save(&ctx, candidate, WriteOptions::default()).await
        }));
    }

    let mut wins = Vec::new();
    let mut conflicts = Vec::new();
    for handle in handles {
        match handle.await.expect("task") {
            Ok(receipt) => wins.push(receipt),
            Err(SyncError::Conflict { current }) => conflicts.push(current),
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(wins.len(), 1);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].version, wins[0].version);
    assert_eq!(conflicts[0].messages, wins[0].record.messages);
}

#[tokio::test]
async fn test_duplicate_rows_resolve_to_newest_and_converge_on_write() {
    let (store, _tmp) = common::create_temp_store();
    let store = Arc::new(store);

    let mut older = ConversationRecord::new("c1", "u1", "older");
    older.version = 5;
    older.last_modified = Utc::now() - Duration::minutes(10);
    let mut newer = ConversationRecord::new("c1", "u1", "newer");
    newer.version = 4;
    newer.last_modified = Utc::now() - Duration::minutes(1);
    store.insert_raw(older).await.unwrap();
    store.insert_raw(newer).await.unwrap();

    let service = common::service_over(store.clone());
    let ctx = CallerContext::new("u1");

    let loaded = service.load(&ctx, "c1").await.expect("load");
    assert_eq!(loaded.title, "newer");

    let listed = service.list(&ctx).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "newer");

    let receipt = service
        .rename(&ctx, "c1", "merged")
        .await
        .expect("rename");
    assert_eq!(receipt.version, 5);
    assert_eq!(store.fetch_by_key("c1", "u1").await.unwrap().len(), 1);
    assert!(store.fetch_one("c1", "u1").await.is_ok());
}

#[tokio::test]
async fn test_deleted_id_can_start_a_new_lineage() {
    let store = Arc::new(MemoryStore::new());
    let service = common::service_over(store.clone());
    let ctx = CallerContext::new("u1");

    service.create(&ctx, "c1", "Old", None).await.expect("create");
    service.delete(&ctx, "c1").await.expect("delete");

    let reborn = service.create(&ctx, "c1", "New", None).await.expect("recreate");
    assert_eq!(reborn.version, 1);
    assert_eq!(service.load(&ctx, "c1").await.unwrap().title, "New");
}

#[tokio::test]
async fn test_owners_are_isolated() {
    let store = Arc::new(MemoryStore::new());
    let service = common::service_over(store);

    service
        .create(&CallerContext::new("alice"), "shared-id", "Alice's", None)
        .await
        .expect("alice");
    service
        .create(&CallerContext::new("bob"), "shared-id", "Bob's", None)
        .await
        .expect("bob");

    let alice = service
        .load(&CallerContext::new("alice"), "shared-id")
        .await
        .unwrap();
    assert_eq!(alice.title, "Alice's");

    let err = service
        .save(
            &CallerContext::new("alice"),
            ConversationRecord::new("x", "bob", "spoofed"),
            WriteOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::OwnerMismatch { .. }));
}
