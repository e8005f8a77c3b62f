//! 长期记忆：跨查询检索历史问答
//!
//! 查询开始时只读检索（search），查询结束时写入新的问答对及标签（add）。
//! 当前实现为 InMemoryLongTerm（关键词重叠打分），后续可接真实向量库。

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// 长期记忆 trait：写入与检索
pub trait LongTermMemory: Send + Sync {
    /// 存入一段文本与标签（如 `qa`、`tool:weather`）
    fn add(&self, text: &str, tags: &[String]);

    /// 按查询检索最相关的 k 条，按相关度降序
    fn search(&self, query: &str, k: usize) -> Vec<String>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopLongTerm;

impl LongTermMemory for NoopLongTerm {
    fn add(&self, _text: &str, _tags: &[String]) {}

    fn search(&self, _query: &str, _k: usize) -> Vec<String> {
        Vec::new()
    }

    fn enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    tags: Vec<String>,
    tokens: HashSet<String>,
}

/// 简单内存实现：按关键词重叠检索
#[derive(Clone)]
pub struct InMemoryLongTerm {
    store: Arc<RwLock<Vec<Entry>>>,
    max_entries: usize,
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

impl InMemoryLongTerm {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 带某个标签的全部条目
    pub fn tagged(&self, tag: &str) -> Vec<String> {
        let store = match self.store.read() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        store
            .iter()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .map(|e| e.text.clone())
            .collect()
    }
}

impl LongTermMemory for InMemoryLongTerm {
    fn add(&self, text: &str, tags: &[String]) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let entry = Entry {
            text: text.to_string(),
            tags: tags.to_vec(),
            tokens: tokenize_lower(text),
        };
        let mut store = match self.store.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.push(entry);
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() || k == 0 {
            return Vec::new();
        }
        let store = match self.store.read() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut scored: Vec<(usize, usize, &str)> = store
            .iter()
            .enumerate()
            .map(|(i, e)| (query_tokens.intersection(&e.tokens).count(), i, e.text.as_str()))
            .filter(|(s, _, _)| *s > 0)
            .collect();
        // 同分时较新的优先
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        scored.into_iter().take(k).map(|(_, _, t)| t.to_string()).collect()
    }
}

impl Default for InMemoryLongTerm {
    fn default() -> Self {
        Self::new(1000)
    }
}
