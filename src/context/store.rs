//! Context Store 抽象与内存实现

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::context::{ContextHandle, QueryId};

/// Context Store 错误
#[derive(Error, Debug)]
pub enum ContextStoreError {
    #[error("context handle not found: {0}")]
    NotFound(String),

    #[error("invalid context handle: {0}")]
    InvalidHandle(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 被卸载的大输出及其来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub query_id: QueryId,
    #[serde(default)]
    pub task_id: Option<String>,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub payload: String,
    #[serde(default)]
    pub source_urls: Vec<String>,
}

impl ContextRecord {
    pub fn new(
        query_id: QueryId,
        tool: impl Into<String>,
        args: serde_json::Value,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            query_id,
            task_id: None,
            tool: tool.into(),
            args,
            payload: payload.into(),
            source_urls: Vec::new(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_source_urls(mut self, urls: Vec<String>) -> Self {
        self.source_urls = urls;
        self
    }

    /// 由内容派生的 Handle（task_id / source_urls 不参与派生）
    pub fn handle(&self) -> ContextHandle {
        ContextHandle::derive(&self.query_id, &self.tool, &self.args, &self.payload)
    }
}

/// 大输出的持久化存储；多个查询并发共享，需支持并发写入
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// 写入并返回确定性 Handle；相同内容重复写入是幂等的
    async fn put(&self, record: ContextRecord) -> Result<ContextHandle, ContextStoreError>;

    /// 读取；未知或已清除的 Handle 返回 NotFound
    async fn get(&self, handle: &ContextHandle) -> Result<ContextRecord, ContextStoreError>;

    /// 清除单个 Handle，返回是否确实删除了内容
    async fn purge(&self, handle: &ContextHandle) -> Result<bool, ContextStoreError>;

    /// 列出某个查询下的全部 Handle（按字典序）
    async fn list(&self, query_id: &QueryId) -> Result<Vec<ContextHandle>, ContextStoreError>;

    /// 清除某个查询的全部内容，返回删除数量
    async fn purge_query(&self, query_id: &QueryId) -> Result<usize, ContextStoreError>;
}

/// 进程内存储：测试与临时运行使用，契约与文件存储一致（不跨重启）
#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    records: RwLock<BTreeMap<ContextHandle, ContextRecord>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn put(&self, record: ContextRecord) -> Result<ContextHandle, ContextStoreError> {
        let handle = record.handle();
        self.records
            .write()
            .await
            .entry(handle.clone())
            .or_insert(record);
        Ok(handle)
    }

    async fn get(&self, handle: &ContextHandle) -> Result<ContextRecord, ContextStoreError> {
        self.records
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| ContextStoreError::NotFound(handle.to_string()))
    }

    async fn purge(&self, handle: &ContextHandle) -> Result<bool, ContextStoreError> {
        Ok(self.records.write().await.remove(handle).is_some())
    }

    async fn list(&self, query_id: &QueryId) -> Result<Vec<ContextHandle>, ContextStoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(_, r)| &r.query_id == query_id)
            .map(|(h, _)| h.clone())
            .collect())
    }

    async fn purge_query(&self, query_id: &QueryId) -> Result<usize, ContextStoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| &r.query_id != query_id);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(payload: &str) -> ContextRecord {
        ContextRecord::new(QueryId::from_query("q"), "search", json!({"q": "rust"}), payload)
    }

    #[tokio::test]
    async fn test_roundtrip_and_idempotent_put() {
        let store = InMemoryContextStore::new();
        let rec = record("a long payload");
        let h1 = store.put(rec.clone()).await.unwrap();
        let h2 = store.put(rec.clone()).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.get(&h1).await.unwrap(), rec);
        assert_eq!(store.list(&rec.query_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_then_not_found() {
        let store = InMemoryContextStore::new();
        let h = store.put(record("x")).await.unwrap();
        assert!(store.purge(&h).await.unwrap());
        assert!(!store.purge(&h).await.unwrap());
        assert!(matches!(
            store.get(&h).await,
            Err(ContextStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_query_scoped() {
        let store = InMemoryContextStore::new();
        store.put(record("1")).await.unwrap();
        store.put(record("2")).await.unwrap();
        let other = ContextRecord::new(QueryId::from_query("other"), "search", json!({}), "3");
        store.put(other.clone()).await.unwrap();

        assert_eq!(store.purge_query(&QueryId::from_query("q")).await.unwrap(), 2);
        assert_eq!(store.list(&other.query_id).await.unwrap().len(), 1);
    }
}
