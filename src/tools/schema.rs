//! 工具调用 JSON Schema 生成（schemars 自动生成）
//!
//! 将「合法 tool call 响应」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 单个工具调用：`{"tool": "...", "args": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是 Available tools 中的一个
    pub tool: String,
    /// 工具参数，依工具的 Parameters schema 而定
    pub args: HashMap<String, serde_json::Value>,
}

/// 工具选择响应：可选的思考说明 + 调用列表；不需要工具时 tool_calls 为空数组
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallsFormat {
    /// 为什么选择这些调用（可选，一句话）
    pub thinking: Option<String>,
    /// 要并发执行的调用
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回工具选择响应的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_calls_schema_json() -> String {
    let schema = schema_for!(ToolCallsFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
