//! reason 类型任务：不调用工具，基于已收集的数据直接推理

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError};
use crate::phases::prompts::{build_reason_user, messages, REASON_SYSTEM};

pub struct Reasoner {
    llm: Arc<dyn LlmClient>,
}

impl Reasoner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn run(&self, query: &str, task: &str, gathered: &str) -> Result<String, AgentError> {
        let output = self
            .llm
            .complete(&messages(REASON_SYSTEM, build_reason_user(query, task, gathered)))
            .await?;
        let output = output.trim();
        if output.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }
        Ok(output.to_string())
    }
}
