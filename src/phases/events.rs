//! 查询过程事件：按顺序交给调用方（CLI 打印 JSON 行、测试断言序列）
//!
//! 事件通过有界 mpsc 通道发送；消费者落后时生产者在 send 处挂起（背压）。

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::Phase;
use crate::memory::ToolCallRecord;
use crate::plan::{Plan, TaskStatus, TaskType, Understanding};

/// 单个过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Understand 阶段完成
    UnderstandingDone { understanding: Understanding },
    /// 新计划已生成（可能为空）
    PlanReady { iteration: usize, plan: Plan },
    TaskStart {
        task_id: String,
        description: String,
        task_type: TaskType,
    },
    TaskEnd { task_id: String, status: TaskStatus },
    ToolStart {
        task_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具成功返回（摘要，避免过长）
    ToolEnd {
        task_id: String,
        tool: String,
        summary: String,
        duration_ms: u64,
    },
    /// 工具失败、超时或被取消
    ToolError {
        task_id: String,
        tool: String,
        error: String,
    },
    /// 软限制告警（调用照常执行）
    ToolLimit { tool: String, warning: String },
    /// 模型的思考说明或执行备注
    Thinking { text: String },
    ReflectionDone {
        iteration: usize,
        is_complete: bool,
        reasoning: String,
    },
    /// 最终回复的一小段（流式输出）
    AnswerChunk { text: String },
    Done {
        answer: String,
        tool_calls: Vec<ToolCallRecord>,
        iterations: usize,
    },
    Cancelled { phase: Phase },
    Error { kind: String, message: String },
}

impl AgentEvent {
    /// 终止事件：done / cancelled / error
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Done { .. } | AgentEvent::Cancelled { .. } | AgentEvent::Error { .. }
        )
    }

    /// 事件类型名（与 JSON 中的 type 字段一致）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::UnderstandingDone { .. } => "understanding_done",
            AgentEvent::PlanReady { .. } => "plan_ready",
            AgentEvent::TaskStart { .. } => "task_start",
            AgentEvent::TaskEnd { .. } => "task_end",
            AgentEvent::ToolStart { .. } => "tool_start",
            AgentEvent::ToolEnd { .. } => "tool_end",
            AgentEvent::ToolError { .. } => "tool_error",
            AgentEvent::ToolLimit { .. } => "tool_limit",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::ReflectionDone { .. } => "reflection_done",
            AgentEvent::AnswerChunk { .. } => "answer_chunk",
            AgentEvent::Done { .. } => "done",
            AgentEvent::Cancelled { .. } => "cancelled",
            AgentEvent::Error { .. } => "error",
        }
    }
}

/// 事件出口：包装有界 Sender；接收端已关闭时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<AgentEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// 不输出事件（直接调用 Orchestrator::execute 时使用）
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                tracing::debug!("event receiver dropped");
            }
        }
    }
}
