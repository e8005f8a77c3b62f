//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），启动时注册到 ToolRegistry，
//! 之后按名解析为 ToolDescriptor（用于 prompt 与调用前校验）。核心内不做运行时加载。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 为工具自身报告的失败
    async fn execute(&self, args: Value) -> Result<String, String>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// 工具描述符：prompt 展示与调用前参数校验共用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    /// 按 schema 做轻量校验：args 必须是对象，required 字段必须存在，已声明字段的基本类型必须匹配
    pub fn validate_args(&self, args: &Value) -> Result<(), String> {
        let obj = args
            .as_object()
            .ok_or_else(|| format!("arguments for '{}' must be a JSON object", self.name))?;

        if let Some(required) = self.parameters.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !obj.contains_key(field) {
                    return Err(format!("missing required argument '{}' for '{}'", field, self.name));
                }
            }
        }

        if let Some(props) = self.parameters.get("properties").and_then(|p| p.as_object()) {
            for (key, value) in obj {
                let Some(expected) = props.get(key).and_then(|p| p.get("type")).and_then(|t| t.as_str())
                else {
                    continue;
                };
                let ok = match expected {
                    "string" => value.is_string(),
                    "number" => value.is_number(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !ok {
                    return Err(format!(
                        "argument '{}' for '{}' must be of type {}",
                        key, self.name, expected
                    ));
                }
            }
        }
        Ok(())
    }

    /// prompt 中的一段工具说明
    pub fn format_for_prompt(&self) -> String {
        format!(
            "- {}: {}\n  Parameters: {}",
            self.name,
            self.description,
            self.parameters
        )
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>（BTreeMap 保证描述顺序稳定）
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    /// Available tools 段落
    pub fn format_descriptions(&self) -> String {
        if self.tools.is_empty() {
            return "(no tools available)".to_string();
        }
        self.descriptors()
            .iter()
            .map(|d| d.format_for_prompt())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
