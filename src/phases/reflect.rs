//! Reflect 阶段：判断已收集的数据是否足以回答
//!
//! 模型调用失败或输出无法解析时按「未完成」处理，是否再规划仍由硬上限决定。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::phases::parse::parse_json;
use crate::phases::prompts::{build_reflect_user, messages, REFLECT_SYSTEM};
use crate::plan::Understanding;

/// 反思结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(alias = "isComplete")]
    pub is_complete: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(alias = "missingInfo", default)]
    pub missing_info: Vec<String>,
    #[serde(alias = "suggestedNextSteps", default)]
    pub suggested_next_steps: String,
}

impl Reflection {
    fn unavailable(reason: &AgentError) -> Self {
        Self {
            is_complete: false,
            reasoning: format!("Unable to evaluate progress: {}", reason),
            missing_info: Vec::new(),
            suggested_next_steps: String::new(),
        }
    }

    /// 传给下一轮 Plan 的指导
    pub fn guidance(&self) -> String {
        let mut s = self.reasoning.trim().to_string();
        if !self.missing_info.is_empty() {
            s.push_str(&format!("\nMissing: {}", self.missing_info.join("; ")));
        }
        if !self.suggested_next_steps.trim().is_empty() {
            s.push_str(&format!("\nNext steps: {}", self.suggested_next_steps.trim()));
        }
        s
    }
}

pub struct ReflectInput<'a> {
    pub query: &'a str,
    pub understanding: &'a Understanding,
    pub plans: &'a str,
    pub gathered: &'a str,
    /// 最近的软限制告警
    pub warnings: &'a [String],
    pub iteration: usize,
    pub max_iterations: usize,
}

pub struct Reflector {
    llm: Arc<dyn LlmClient>,
}

impl Reflector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn run(&self, input: &ReflectInput<'_>) -> Reflection {
        let prompt = messages(
            REFLECT_SYSTEM,
            build_reflect_user(
                input.query,
                input.understanding,
                input.plans,
                input.gathered,
                input.warnings,
                input.iteration,
                input.max_iterations,
            ),
        );
        let result = match self.llm.complete(&prompt).await {
            Ok(raw) => parse_json::<Reflection>(&raw),
            Err(e) => Err(AgentError::from(e)),
        };
        let reflection = result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "reflection failed, treating plan as incomplete");
            Reflection::unavailable(&e)
        });
        tracing::info!(
            iteration = input.iteration,
            complete = reflection.is_complete,
            reasoning = %reflection.reasoning,
            "reflection done"
        );
        reflection
    }
}
