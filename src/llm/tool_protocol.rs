//! 基于文本的工具调用协议
//!
//! 请求侧：在 system prompt 末尾追加 Available tools 与响应 schema。
//! 响应侧：`{"tool_calls": [{"tool", "args"}]}`、调用数组或单个 `{"tool", "args"}` 都视为工具调用，
//! 其余输出（含无法解析的 JSON）视为不调用工具的文本。

use serde::Deserialize;

use crate::llm::ModelResponse;
use crate::memory::{Message, Role};
use crate::plan::ToolCall;
use crate::tools::{tool_calls_schema_json, ToolDescriptor};

/// 工具段落的起始标记
pub const TOOLS_HEADER: &str = "## Available tools";

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    thinking: Option<String>,
    #[serde(alias = "calls")]
    tool_calls: Vec<ToolCall>,
}

/// 从模型输出中截取 JSON 片段：优先 ```json 代码块，其次第一个 `{`/`[` 到最后一个 `}`/`]`
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') || inner.starts_with('[') {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find(|c: char| c == '{' || c == '[')?;
    let end = trimmed.rfind(|c: char| c == '}' || c == ']')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 复制消息并在第一条 system 消息后追加工具段落（没有 system 消息时新建一条）
pub fn with_tool_schema(messages: &[Message], tools: &[ToolDescriptor]) -> Vec<Message> {
    let section = tools_section(tools);
    let mut out = messages.to_vec();
    match out.iter_mut().find(|m| m.role == Role::System) {
        Some(system) => {
            system.content.push_str("\n\n");
            system.content.push_str(&section);
        }
        None => out.insert(0, Message::system(section)),
    }
    out
}

fn tools_section(tools: &[ToolDescriptor]) -> String {
    let list = if tools.is_empty() {
        "(no tools available)".to_string()
    } else {
        tools
            .iter()
            .map(|t| t.format_for_prompt())
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "{}\n\n{}\n\n## Response format\n\nRespond with a single JSON object matching this schema. \
         Use an empty \"tool_calls\" array when no tool is needed.\n\n{}",
        TOOLS_HEADER,
        list,
        tool_calls_schema_json()
    )
}

/// 解析工具选择响应
pub fn parse_response(raw: &str) -> ModelResponse {
    let text = raw.trim();
    let Some(json) = extract_json(text) else {
        return ModelResponse::Text(text.to_string());
    };

    if let Ok(env) = serde_json::from_str::<Envelope>(json) {
        return ModelResponse::ToolCalls {
            thinking: env.thinking.filter(|t| !t.trim().is_empty()),
            calls: env.tool_calls.into_iter().filter(|c| !c.tool.is_empty()).collect(),
        };
    }
    if let Ok(calls) = serde_json::from_str::<Vec<ToolCall>>(json) {
        return ModelResponse::ToolCalls {
            thinking: None,
            calls: calls.into_iter().filter(|c| !c.tool.is_empty()).collect(),
        };
    }
    match serde_json::from_str::<ToolCall>(json) {
        Ok(call) if !call.tool.is_empty() => ModelResponse::ToolCalls {
            thinking: None,
            calls: vec![call],
        },
        _ => ModelResponse::Text(text.to_string()),
    }
}
