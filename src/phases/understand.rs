//! Understand 阶段：从查询中提取意图与实体

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::phases::parse::parse_json;
use crate::phases::prompts::{build_understand_user, messages, UNDERSTAND_SYSTEM};
use crate::plan::Understanding;

pub struct Understander {
    llm: Arc<dyn LlmClient>,
}

impl Understander {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 单次尝试；重试由编排器通过 RecoveryEngine 决定
    pub async fn run(&self, query: &str, memory: &[String]) -> Result<Understanding, AgentError> {
        let prompt = messages(UNDERSTAND_SYSTEM, build_understand_user(query, memory));
        let raw = self.llm.complete(&prompt).await?;
        let mut understanding: Understanding = parse_json(&raw)?;
        if understanding.intent.trim().is_empty() {
            understanding.intent = query.trim().to_string();
        }
        tracing::info!(
            intent = %understanding.intent,
            entities = understanding.entities.len(),
            "understanding done"
        );
        Ok(understanding)
    }
}
