//! 文件 Context Store
//!
//! 目录结构：`<root>/<query_id>/<key>.json`，每个文件是一个 JSON 信封（记录 + 存储时间 + 工具描述）。
//! 写入走临时文件 + rename；同一 Handle 的并发写入由按键异步锁串行化，已存在则直接返回。
//! 按键锁在最后一个持有者释放后从表中移除；写入失败时临时文件随之删除。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::context::{ContextHandle, ContextRecord, ContextStore, ContextStoreError, QueryId};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    handle: ContextHandle,
    stored_at: DateTime<Utc>,
    /// 便于人工排查的描述，如 `search(q=rust) -> 5321 chars`
    description: String,
    record: ContextRecord,
}

type KeyLocks = StdMutex<HashMap<ContextHandle, Arc<Mutex<()>>>>;

/// 按键写锁的租约；最后一个租约释放时从表中移除该键
struct KeyLease<'a> {
    locks: &'a KeyLocks,
    handle: ContextHandle,
    lock: Option<Arc<Mutex<()>>>,
}

impl KeyLease<'_> {
    async fn acquire(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = self.lock.take() {
            // 表中一份 + 本租约一份
            if Arc::strong_count(&lock) == 2 {
                locks.remove(&self.handle);
            }
        }
    }
}

/// rename 之前被丢弃（出错或取消）时删除临时文件
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// 持久化 Context Store，跨进程重启可读
pub struct FileContextStore {
    root: PathBuf,
    write_locks: KeyLocks,
}

impl FileContextStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, handle: &ContextHandle) -> Result<PathBuf, ContextStoreError> {
        let (query_id, key) = handle.split()?;
        Ok(self.root.join(query_id.as_str()).join(format!("{}.json", key)))
    }

    fn lease(&self, handle: &ContextHandle) -> KeyLease<'_> {
        let mut locks = self.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks
            .entry(handle.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyLease {
            locks: &self.write_locks,
            handle: handle.clone(),
            lock: Some(lock),
        }
    }

    fn describe(record: &ContextRecord) -> String {
        let args = match &record.args {
            serde_json::Value::Object(map) if !map.is_empty() => map
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.as_str().map(String::from).unwrap_or_else(|| v.to_string())))
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        };
        format!("{}({}) -> {} chars", record.tool, args, record.payload.chars().count())
    }
}

#[async_trait]
impl ContextStore for FileContextStore {
    async fn put(&self, record: ContextRecord) -> Result<ContextHandle, ContextStoreError> {
        let handle = record.handle();
        let path = self.path_for(&handle)?;

        let lease = self.lease(&handle);
        let _guard = lease.acquire().await;

        if fs::try_exists(&path).await? {
            tracing::debug!(handle = %handle, "context payload already stored");
            return Ok(handle);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let envelope = Envelope {
            handle: handle.clone(),
            stored_at: Utc::now(),
            description: Self::describe(&record),
            record,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        let size = bytes.len();

        // 写入与 rename 在同一个阻塞任务中完成，调用方被取消时也不会停在两者之间
        let tmp_path = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let tmp = TempFile::new(tmp_path);
            std::fs::write(&tmp.path, &bytes)?;
            std::fs::rename(&tmp.path, &path)?;
            tmp.disarm();
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        tracing::debug!(handle = %handle, bytes = size, "context payload stored");
        Ok(handle)
    }

    async fn get(&self, handle: &ContextHandle) -> Result<ContextRecord, ContextStoreError> {
        let path = self.path_for(handle)?;
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContextStoreError::NotFound(handle.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        Ok(envelope.record)
    }

    async fn purge(&self, handle: &ContextHandle) -> Result<bool, ContextStoreError> {
        let path = self.path_for(handle)?;
        let lease = self.lease(handle);
        let _guard = lease.acquire().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, query_id: &QueryId) -> Result<Vec<ContextHandle>, ContextStoreError> {
        let dir = self.root.join(query_id.as_str());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut handles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(handle) = ContextHandle::parse(&format!("{}/{}", query_id, key)) {
                handles.push(handle);
            }
        }
        handles.sort();
        Ok(handles)
    }

    async fn purge_query(&self, query_id: &QueryId) -> Result<usize, ContextStoreError> {
        let mut removed = 0;
        for handle in self.list(query_id).await? {
            if self.purge(&handle).await? {
                removed += 1;
            }
        }
        let dir = self.root.join(query_id.as_str());
        // 目录中可能残留临时文件，删除失败不影响结果
        let _ = fs::remove_dir(&dir).await;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_envelope_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path());
        let record = ContextRecord::new(
            QueryId::from_query("weather"),
            "weather",
            json!({"city": "Paris"}),
            "sunny",
        );
        let handle = store.put(record).await.unwrap();

        let path = store.path_for(&handle).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["handle"], json!(handle.as_str()));
        assert_eq!(raw["description"], json!("weather(city=Paris) -> 5 chars"));
        assert!(raw["stored_at"].is_string());
    }

    fn lock_entries(store: &FileContextStore) -> usize {
        store.write_locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_write_locks_released_after_put_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path());
        for i in 0..500 {
            let record = ContextRecord::new(QueryId::from_query("churn"), "search", json!({}), format!("payload {}", i));
            let handle = store.put(record).await.unwrap();
            assert!(store.purge(&handle).await.unwrap());
        }
        assert_eq!(lock_entries(&store), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_locks_released_after_contention() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileContextStore::new(dir.path()));
        let record = ContextRecord::new(QueryId::from_query("race"), "search", json!({}), "same");

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let record = record.clone();
            tasks.push(tokio::spawn(async move { store.put(record).await }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(lock_entries(&store), 0);
    }

    #[test]
    fn test_temp_file_removed_unless_disarmed() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("a.json.tmp-1");
        let kept = dir.path().join("b.json.tmp-2");
        std::fs::write(&dropped, b"x").unwrap();
        std::fs::write(&kept, b"y").unwrap();

        drop(TempFile::new(dropped.clone()));
        TempFile::new(kept.clone()).disarm();

        assert!(!dropped.exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_interrupted_puts_release_write_locks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path());
        let query_id = QueryId::from_query("interrupted");
        for i in 0..40u64 {
            let record = ContextRecord::new(query_id.clone(), "search", json!({}), "z".repeat(50_000 + i as usize));
            let _ = tokio::time::timeout(std::time::Duration::from_micros(i * 25), store.put(record)).await;
        }
        assert_eq!(lock_entries(&store), 0);
    }

    #[tokio::test]
    async fn test_list_missing_query_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path());
        assert!(store
            .list(&QueryId::from_query("nothing"))
            .await
            .unwrap()
            .is_empty());
    }
}
