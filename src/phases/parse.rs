//! 从模型文本输出中解析结构化 JSON

use serde::de::DeserializeOwned;

use crate::core::AgentError;
use crate::llm::tool_protocol::extract_json;

/// 提取 JSON 片段并反序列化；失败时返回 ModelOutput（可重试的模型错误）
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, AgentError> {
    let json = extract_json(raw).ok_or_else(|| AgentError::ModelOutput(preview(raw)))?;
    serde_json::from_str(json).map_err(|e| AgentError::ModelOutput(format!("{}: {}", e, preview(json))))
}

pub fn preview(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > 200 {
        format!("{}...", text.chars().take(200).collect::<String>())
    } else {
        text.to_string()
    }
}
