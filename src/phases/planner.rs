//! Plan 阶段：把查询拆成至多 5 个带依赖的任务（不在这里选择工具）
//!
//! 模型按位置引用依赖（`task_0` / `0`），这里映射为查询内唯一的 `task_{iteration}_{idx}`，
//! 再交给 Plan::new 做形状校验（环、上限、未知依赖）。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::phases::parse::parse_json;
use crate::phases::prompts::{build_plan_user, messages, PlanPrompt, PLAN_SYSTEM};
use crate::plan::{Plan, Task, TaskType};

#[derive(Debug, Deserialize)]
struct TaskSchema {
    description: String,
    #[serde(alias = "taskType", default = "default_task_type")]
    task_type: String,
    #[serde(alias = "dependsOn", default)]
    depends_on: Vec<String>,
}

fn default_task_type() -> String {
    "use_tools".to_string()
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    tasks: Vec<TaskSchema>,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 单次尝试；解析失败为 ModelOutput（可重试），形状不合法为 Validation（不重试）
    pub async fn run(&self, prompt: &PlanPrompt<'_>, iteration: usize) -> Result<Plan, AgentError> {
        let raw = self
            .llm
            .complete(&messages(PLAN_SYSTEM, build_plan_user(prompt)))
            .await?;
        let response: PlanResponse = parse_json(&raw)?;
        let plan = build_plan(response, iteration)?;
        tracing::info!(
            iteration,
            tasks = plan.len(),
            summary = %plan.summary,
            "plan ready"
        );
        Ok(plan)
    }
}

pub fn task_id(iteration: usize, idx: usize) -> String {
    format!("task_{}_{}", iteration, idx)
}

/// 将模型写的依赖引用映射为本轮任务 ID；无法识别的原样保留（由 Plan::new 拒绝）
fn resolve_dep(dep: &str, iteration: usize, count: usize) -> String {
    let dep = dep.trim();
    let idx = dep
        .strip_prefix("task_")
        .unwrap_or(dep)
        .parse::<usize>()
        .ok()
        .filter(|i| *i < count);
    match idx {
        Some(i) => task_id(iteration, i),
        None => dep.to_string(),
    }
}

fn build_plan(response: PlanResponse, iteration: usize) -> Result<Plan, AgentError> {
    let count = response.tasks.len();
    let tasks = response
        .tasks
        .into_iter()
        .enumerate()
        .map(|(idx, t)| {
            let task_type = match t.task_type.trim().to_ascii_lowercase().as_str() {
                "reason" | "reasoning" => TaskType::Reason,
                _ => TaskType::UseTools,
            };
            Task::new(task_id(iteration, idx), t.description, task_type).depends_on(
                t.depends_on
                    .iter()
                    .map(|d| resolve_dep(d, iteration, count))
                    .collect::<Vec<_>>(),
            )
        })
        .collect();
    Plan::new(response.summary, iteration, tasks)
}
