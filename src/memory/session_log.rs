//! 会话日志：查询完成时追加问答摘要与消息历史，核心只写不读
//!
//! JsonlSessionLog 每个查询一行 JSON，追加写入；NoopSessionLog 用于测试或关闭日志。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::memory::{Message, ToolCallRecord};

/// 一次查询的最终记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: String,
    pub query: String,
    pub answer: String,
    /// 一句话问答摘要
    pub summary: String,
    pub final_phase: String,
    pub iterations: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub messages: Vec<Message>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 追加式会话日志
#[async_trait]
pub trait SessionLog: Send + Sync {
    async fn append(&self, record: &QueryRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct NoopSessionLog;

#[async_trait]
impl SessionLog for NoopSessionLog {
    async fn append(&self, _record: &QueryRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// JSONL 文件日志；同一进程内的并发追加串行化，保证每行完整
#[derive(Debug)]
pub struct JsonlSessionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSessionLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionLog for JsonlSessionLog {
    async fn append(&self, record: &QueryRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
