//! LLM 层：客户端抽象、工具调用协议与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod tool_protocol;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use mock::{FnLlmClient, MockLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, ModelResponse, TokenStream};

use crate::config::LlmSection;
use crate::core::AgentError;

/// 按配置创建主模型与快速模型（快速模型用于摘要与压缩；未配置时与主模型相同）
pub fn create_llm_from_config(
    cfg: &LlmSection,
) -> Result<(Arc<dyn LlmClient>, Arc<dyn LlmClient>), AgentError> {
    match cfg.provider.as_str() {
        "mock" => {
            let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient);
            Ok((llm.clone(), llm))
        }
        "openai" | "deepseek" => {
            let timeout = Duration::from_secs(cfg.timeouts.request);
            let build = |model: &str| -> Arc<dyn LlmClient> {
                Arc::new(
                    OpenAiClient::new(cfg.base_url.as_deref(), model, cfg.api_key.as_deref())
                        .with_request_timeout(timeout),
                )
            };
            let main = build(&cfg.model);
            let fast = match cfg.fast_model.as_deref() {
                Some(m) if m != cfg.model => build(m),
                _ => main.clone(),
            };
            Ok((main, fast))
        }
        other => Err(AgentError::Config(format!("unknown llm provider '{}'", other))),
    }
}
