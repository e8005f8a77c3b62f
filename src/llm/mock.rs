//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! - MockLlmClient：按步骤给出固定形状的回复，能跑通完整的 Understand → Answer 流程（echo 工具）
//! - FnLlmClient：由闭包决定回复，测试中按 PromptKind 编排模型行为

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::{last_user_content, Message};
use crate::phases::prompts::PromptKind;

/// 取 user prompt 中某个 `## 标题` 下的内容（到下一个标题为止）
fn section<'a>(text: &'a str, title: &str) -> Option<&'a str> {
    let marker = format!("## {}\n", title);
    let start = text.find(&marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find("\n## ").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Mock 客户端：无网络，按步骤回放固定形状的回复
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn reply(messages: &[Message]) -> String {
        let user = last_user_content(messages).unwrap_or("(no input)");
        let query = user
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("Query: "))
            .unwrap_or(user);

        match PromptKind::of(messages) {
            PromptKind::Understand => serde_json::json!({ "intent": query, "entities": [] }).to_string(),
            PromptKind::Plan => {
                let has_tools = section(user, "Available tools")
                    .map(|t| t.starts_with("- "))
                    .unwrap_or(false);
                let first_pass = section(user, "Prior work").is_none();
                let tasks = if has_tools && first_pass {
                    serde_json::json!([{ "description": format!("Gather data for: {}", query), "task_type": "use_tools" }])
                } else {
                    serde_json::json!([])
                };
                serde_json::json!({ "summary": "Mock plan", "tasks": tasks }).to_string()
            }
            PromptKind::SelectTools => {
                let task = section(user, "Current task").unwrap_or(query);
                let echo_available = messages.iter().any(|m| m.content.contains("\n- echo: "));
                if echo_available {
                    serde_json::json!({ "tool_calls": [{ "tool": "echo", "args": { "text": task } }] }).to_string()
                } else {
                    r#"{"tool_calls": []}"#.to_string()
                }
            }
            PromptKind::Reason => format!(
                "Reasoned about: {}",
                section(user, "Current task").unwrap_or(query)
            ),
            PromptKind::Reflect => {
                r#"{"is_complete": true, "reasoning": "Mock reflection: data is sufficient"}"#.to_string()
            }
            PromptKind::Answer => format!(
                "Mock answer to \"{}\" based on: {}",
                query,
                section(user, "Gathered data").unwrap_or("(none)")
            ),
            PromptKind::SelectContext => "[0]".to_string(),
            PromptKind::Summarize | PromptKind::Compact => {
                user.chars().filter(|c| *c != '\n').take(120).collect()
            }
            PromptKind::Other => format!(
                r#"{{"tool": "echo", "args": {{"text": "Echo from Mock: {}"}}}}"#,
                user
            ),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        Ok(Self::reply(messages))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = Self::reply(messages);
        let chunks: Vec<Result<String, LlmError>> = content
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

type Handler = dyn Fn(&[Message]) -> Result<String, LlmError> + Send + Sync;

/// 闭包驱动的客户端：测试用
pub struct FnLlmClient {
    handler: Box<Handler>,
    calls: AtomicUsize,
    chunk_size: Option<usize>,
}

impl FnLlmClient {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            chunk_size: None,
        }
    }

    /// 流式输出时按字符数切片
    pub fn with_chunk_size(mut self, chars: usize) -> Self {
        self.chunk_size = Some(chars.max(1));
        self
    }

    /// 累计调用次数（complete 与 complete_stream 都计数）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for FnLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(messages)
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.complete(messages).await?;
        let chunks: Vec<Result<String, LlmError>> = match self.chunk_size {
            Some(n) => content
                .chars()
                .collect::<Vec<_>>()
                .chunks(n)
                .map(|c| Ok(c.iter().collect::<String>()))
                .collect(),
            None => vec![Ok(content)],
        };
        Ok(Box::pin(stream::iter(chunks)))
    }
}
