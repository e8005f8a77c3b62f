//! Context Handle 与查询 ID
//!
//! Handle 形如 `{query_id}/{tool}-{digest}`，digest 为 (query_id, tool, 规范化 args, payload) 的 SHA-256 前缀，
//! 相同内容重复写入得到相同 Handle。

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::ContextStoreError;

/// 查询 ID：查询文本 SHA-256 的前 12 个十六进制字符（同一查询重复执行得到同一 ID）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    pub fn from_query(query: &str) -> Self {
        let digest = Sha256::digest(query.trim().as_bytes());
        Self(hex::encode(digest)[..12].to_string())
    }

    /// 从已有字符串恢复（用于解析 Handle 或目录名），只接受安全字符
    pub fn parse(raw: &str) -> Result<Self, ContextStoreError> {
        if is_safe_segment(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ContextStoreError::InvalidHandle(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 大输出的轻量引用；Scratchpad 中保存 Handle 而非原始 payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextHandle(String);

const DIGEST_LEN: usize = 16;

impl ContextHandle {
    pub fn derive(query_id: &QueryId, tool: &str, args: &serde_json::Value, payload: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(query_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(tool.as_bytes());
        hasher.update([0u8]);
        // serde_json::Map 默认按键排序，to_string 即规范形式
        hasher.update(args.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(payload.as_bytes());
        let digest = hex::encode(hasher.finalize());

        Self(format!(
            "{}/{}-{}",
            query_id,
            sanitize_tool(tool),
            &digest[..DIGEST_LEN]
        ))
    }

    /// 解析外部传入的 Handle 字符串；拒绝任何可能逃逸存储根目录的形状
    pub fn parse(raw: &str) -> Result<Self, ContextStoreError> {
        let handle = Self(raw.trim().to_string());
        handle.split()?;
        Ok(handle)
    }

    /// 拆分为 (query_id, key)
    pub fn split(&self) -> Result<(QueryId, &str), ContextStoreError> {
        let (query, key) = self
            .0
            .split_once('/')
            .ok_or_else(|| ContextStoreError::InvalidHandle(self.0.clone()))?;
        if !is_safe_segment(key) {
            return Err(ContextStoreError::InvalidHandle(self.0.clone()));
        }
        Ok((QueryId::parse(query).map_err(|_| ContextStoreError::InvalidHandle(self.0.clone()))?, key))
    }

    pub fn query_id(&self) -> Result<QueryId, ContextStoreError> {
        self.split().map(|(q, _)| q)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_safe_segment(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 128
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn sanitize_tool(tool: &str) -> String {
    let cleaned: String = tool
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(48)
        .collect();
    if cleaned.is_empty() {
        "tool".to_string()
    } else {
        cleaned
    }
}
