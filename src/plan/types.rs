//! 计划类型定义
//!
//! Task / ToolCall / ToolCallOutcome / Understanding 等核心数据类型

use serde::{Deserialize, Serialize};

use crate::context::ContextHandle;

pub type TaskId = String;

/// 单个计划最多包含的任务数
pub const MAX_PLAN_TASKS: usize = 5;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// 需要调用工具收集数据
    UseTools,
    /// 基于已收集数据进行推理
    Reason,
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// 模型为某个任务提议的工具调用（{"tool": "calculator", "args": {...}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }

    /// 人类可读的调用描述，如 `weather(city=Paris)`
    pub fn describe(&self) -> String {
        let args = match &self.args {
            serde_json::Value::Object(map) => map
                .iter()
                .take(2)
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => format!("{}={}", k, s),
                    other => format!("{}={}", k, other),
                })
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        };
        if args.is_empty() {
            self.tool.clone()
        } else {
            format!("{}({})", self.tool, args)
        }
    }
}

/// 工具调用结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl OutcomeStatus {
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            OutcomeStatus::Succeeded | OutcomeStatus::Failed | OutcomeStatus::Cancelled
        )
    }
}

/// 工具输出：小结果直接内联，大结果只保留 Context Handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OutcomePayload {
    Inline(String),
    Handle(ContextHandle),
}

/// 工具调用结果。状态离开 Running 后不可变：settle 系列方法消费 self 并返回终态值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    call: ToolCall,
    status: OutcomeStatus,
    output: Option<OutcomePayload>,
    /// 简短摘要，用于后续 prompt
    summary: Option<String>,
    error: Option<String>,
    duration_ms: u64,
}

impl ToolCallOutcome {
    pub fn pending(call: ToolCall) -> Self {
        Self {
            call,
            status: OutcomeStatus::Pending,
            output: None,
            summary: None,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn running(mut self) -> Self {
        if !self.status.is_settled() {
            self.status = OutcomeStatus::Running;
        }
        self
    }

    pub fn succeed(mut self, output: OutcomePayload, summary: Option<String>, duration_ms: u64) -> Self {
        if self.status.is_settled() {
            return self;
        }
        self.status = OutcomeStatus::Succeeded;
        self.output = Some(output);
        self.summary = summary;
        self.duration_ms = duration_ms;
        self
    }

    pub fn fail(mut self, error: impl Into<String>, duration_ms: u64) -> Self {
        if self.status.is_settled() {
            return self;
        }
        let error = error.into();
        self.status = OutcomeStatus::Failed;
        self.summary = Some(format!("{} [FAILED]: {}", self.call.describe(), error));
        self.error = Some(error);
        self.duration_ms = duration_ms;
        self
    }

    pub fn cancel(mut self, reason: impl Into<String>) -> Self {
        if self.status.is_settled() {
            return self;
        }
        self.status = OutcomeStatus::Cancelled;
        self.error = Some(reason.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    pub fn call(&self) -> &ToolCall {
        &self.call
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn output(&self) -> Option<&OutcomePayload> {
        self.output.as_ref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

/// 计划中的一个任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub depends_on: Vec<TaskId>,
    pub outcomes: Vec<ToolCallOutcome>,
    /// reason 任务的推理输出，或失败原因
    pub output: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            task_type,
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
            outcomes: Vec::new(),
            output: None,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<TaskId>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Understand 阶段提取的实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// person / organization / location / date / time / money / ...
    pub kind: String,
    pub value: String,
}

/// 用户查询的结构化理解：意图 + 实体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Understanding {
    pub intent: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Understanding {
    pub fn to_prompt_section(&self) -> String {
        let mut s = format!("Intent: {}\n", self.intent);
        if !self.entities.is_empty() {
            s.push_str("Entities:\n");
            for e in &self.entities {
                s.push_str(&format!("- {}: {}\n", e.kind, e.value));
            }
        }
        s
    }
}
