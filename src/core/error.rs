//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 与所在阶段决定 Retry / MarkTaskFailed / Abort / Cancel。

use thiserror::Error;

use crate::context::ContextStoreError;
use crate::llm::LlmError;

/// 查询执行过程中可能出现的错误（模型、工具、上下文存储、校验、取消）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型调用失败（网络、限流、空响应）
    #[error("LLM error: {0}")]
    Model(#[from] LlmError),

    /// 模型返回了无法解析的输出
    #[error("Unparseable model output: {0}")]
    ModelOutput(String),

    /// 工具主动报错或返回显式失败；只影响单个调用
    #[error("Tool {tool} failed: {message}")]
    ToolFault { tool: String, message: String },

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Context store error: {0}")]
    ContextStore(#[from] ContextStoreError),

    /// Task / Plan / ToolCall 形状不合法（环、超过上限、未知依赖、参数缺失）
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 终止事件 `error{kind}` 中使用的错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Model(_) | AgentError::ModelOutput(_) => "model",
            AgentError::ToolFault { .. } => "tool_fault",
            AgentError::ToolTimeout(_) => "tool_timeout",
            AgentError::ContextStore(_) => "context_store",
            AgentError::Validation(_) => "validation",
            AgentError::Cancelled => "cancelled",
            AgentError::Config(_) => "config",
        }
    }

    /// 是否属于模型侧错误（允许在 Understand / Plan 重试一次）
    pub fn is_model_error(&self) -> bool {
        matches!(self, AgentError::Model(_) | AgentError::ModelOutput(_))
    }
}

/// 恢复引擎根据错误类型与阶段给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 重新发起同一次模型调用（仅一次）
    Retry,
    /// Execute 阶段：把当前任务标记为 failed，交给 Reflect 决定
    MarkTaskFailed,
    /// 终止当前阶段，向调用方发出终止 error 事件
    Abort,
    /// 协作式取消已被观察到
    Cancel,
}
