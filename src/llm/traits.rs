//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）、
//! complete_with_tools（工具选择：显式区分「不调用工具」与「提议工具调用」两种响应）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use thiserror::Error;

use crate::llm::tool_protocol;
use crate::memory::Message;
use crate::plan::ToolCall;
use crate::tools::ToolDescriptor;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("empty response")]
    EmptyResponse,

    #[error("stream error: {0}")]
    Stream(String),
}

/// 流式 Token
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 工具选择调用的响应
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// 不调用工具，直接给出文本
    Text(String),
    /// 提议的工具调用（可附带一句思考说明）
    ToolCalls {
        thinking: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成；默认把非流式结果作为单个分片返回
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }

    /// 带工具的完成：把工具列表与调用 schema 注入 system prompt，再解析 JSON 调用协议
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, LlmError> {
        let prompt = tool_protocol::with_tool_schema(messages, tools);
        let raw = self.complete(&prompt).await?;
        Ok(tool_protocol::parse_response(&raw))
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
