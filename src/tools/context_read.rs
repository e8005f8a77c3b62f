//! context_read：按 Context Handle 读取此前卸载的完整工具输出

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{ContextHandle, ContextStore};
use crate::tools::Tool;

const DEFAULT_MAX_CHARS: usize = 4000;

pub struct ContextReadTool {
    store: Arc<dyn ContextStore>,
}

impl ContextReadTool {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ContextReadTool {
    fn name(&self) -> &str {
        "context_read"
    }

    fn description(&self) -> &str {
        "Read the full output of an earlier tool call by its context handle (shown as 'context: <handle>')."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "handle": { "type": "string", "description": "Context handle, e.g. 1a2b3c4d5e6f/search-0123456789abcdef" },
                "max_chars": { "type": "integer", "description": "Maximum characters to return (default 4000)" }
            },
            "required": ["handle"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let raw = args
            .get("handle")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing 'handle'".to_string())?;
        let max_chars = args
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        let handle = ContextHandle::parse(raw).map_err(|e| e.to_string())?;
        let record = self.store.get(&handle).await.map_err(|e| e.to_string())?;

        let total = record.payload.chars().count();
        let mut text: String = record.payload.chars().take(max_chars).collect();
        if total > max_chars {
            text.push_str(&format!("\n...[{} more chars]", total - max_chars));
        }
        Ok(text)
    }
}
