//! 文件 Context Store 集成测试：往返、幂等、清除、重启持久化与并发写入

use std::sync::Arc;

use serde_json::json;
use waggle::context::{ContextHandle, ContextRecord, ContextStore, ContextStoreError, FileContextStore, QueryId};

fn record(query: &str, payload: &str) -> ContextRecord {
    ContextRecord::new(
        QueryId::from_query(query),
        "search",
        json!({"q": "rust async"}),
        payload,
    )
    .with_task("task_1_0")
    .with_source_urls(vec!["https://tokio.rs".to_string()])
}

#[tokio::test]
async fn test_roundtrip_preserves_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileContextStore::new(dir.path());
    let rec = record("what is tokio", &"x".repeat(5000));

    let handle = store.put(rec.clone()).await.unwrap();
    assert_eq!(handle, rec.handle());
    assert!(handle.as_str().starts_with(QueryId::from_query("what is tokio").as_str()));

    let back = store.get(&handle).await.unwrap();
    assert_eq!(back, rec);
    assert_eq!(back.task_id.as_deref(), Some("task_1_0"));
    assert_eq!(back.source_urls, vec!["https://tokio.rs"]);
}

#[tokio::test]
async fn test_put_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileContextStore::new(dir.path());
    let rec = record("q", "same payload");

    let first = store.put(rec.clone()).await.unwrap();
    let second = store.put(rec.clone()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.list(&rec.query_id).await.unwrap(), vec![first]);

    let other = store.put(record("q", "different payload")).await.unwrap();
    assert_ne!(other, second);
    assert_eq!(store.list(&rec.query_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_purge_then_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileContextStore::new(dir.path());
    let handle = store.put(record("q", "payload")).await.unwrap();

    assert!(store.purge(&handle).await.unwrap());
    assert!(!store.purge(&handle).await.unwrap());
    assert!(matches!(
        store.get(&handle).await,
        Err(ContextStoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let rec = record("persist me", "long output");
    let handle = {
        let store = FileContextStore::new(dir.path());
        store.put(rec.clone()).await.unwrap()
    };

    let reopened = FileContextStore::new(dir.path());
    assert_eq!(reopened.get(&handle).await.unwrap(), rec);
    assert_eq!(reopened.list(&rec.query_id).await.unwrap(), vec![handle]);
}

#[tokio::test]
async fn test_concurrent_puts_same_handle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileContextStore::new(dir.path()));
    let rec = record("race", &"y".repeat(20_000));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let rec = rec.clone();
        tasks.push(tokio::spawn(async move { store.put(rec).await }));
    }
    let mut handles = Vec::new();
    for t in tasks {
        handles.push(t.await.unwrap().unwrap());
    }
    assert!(handles.windows(2).all(|w| w[0] == w[1]));

    assert_eq!(store.get(&handles[0]).await.unwrap(), rec);
    assert_eq!(store.list(&rec.query_id).await.unwrap().len(), 1);

    // 没有残留的临时文件
    let query_dir = dir.path().join(rec.query_id.as_str());
    let mut entries = tokio::fs::read_dir(&query_dir).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with(".json"));
}

#[tokio::test]
async fn test_purge_query_leaves_other_queries() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileContextStore::new(dir.path());
    store.put(record("first", "a")).await.unwrap();
    store.put(record("first", "b")).await.unwrap();
    let kept = store.put(record("second", "c")).await.unwrap();

    let removed = store.purge_query(&QueryId::from_query("first")).await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.list(&QueryId::from_query("first")).await.unwrap().is_empty());
    assert_eq!(store.list(&QueryId::from_query("second")).await.unwrap(), vec![kept]);
}

#[tokio::test]
async fn test_escaping_handles_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileContextStore::new(dir.path());
    for raw in ["../etc/passwd", "q/../../x", "no-slash"] {
        match ContextHandle::parse(raw) {
            Err(ContextStoreError::InvalidHandle(_)) => {}
            Ok(handle) => assert!(matches!(
                store.get(&handle).await,
                Err(ContextStoreError::InvalidHandle(_))
            )),
            Err(e) => panic!("unexpected error for {}: {}", raw, e),
        }
    }
}
