//! 工具执行器
//!
//! 一个 use_tools 任务分四步：Selection（模型提议调用）→ Dispatch（并发扇出，单个调用失败互不影响）
//! → Persistence（大输出写入 Context Store，可选模型摘要）→ Aggregation（按策略判定任务状态，
//! 按调用顺序写入 Scratchpad）。
//!
//! 取消检查点：选择前、选择后派发前、派发中（未结束的调用立即转为 cancelled）。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextRecord, ContextStore, QueryId};
use crate::core::session_supervisor::cancel_after;
use crate::core::{AgentError, TaskScheduler};
use crate::llm::{LlmClient, ModelResponse};
use crate::memory::Scratchpad;
use crate::phases::events::{AgentEvent, EventSink};
use crate::phases::parse::preview;
use crate::phases::prompts::{build_select_user, build_summary_user, messages, SELECT_SYSTEM, SUMMARIZE_SYSTEM};
use crate::plan::{OutcomePayload, Task, TaskStatus, ToolCall, ToolCallOutcome, Understanding};
use crate::tools::{Tool, ToolRegistry};

/// 输出超过该长度时才请求模型摘要
const SUMMARIZE_MIN_CHARS: usize = 500;

/// 选择提示中展示的最近 warning 条数
pub const RECENT_WARNINGS: usize = 5;

/// 任务成功判定策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessPolicy {
    /// 至少一个调用成功
    #[default]
    Any,
    /// 全部调用成功
    All,
}

impl SuccessPolicy {
    /// 没有提议任何调用时视为满足
    pub fn satisfied(self, succeeded: usize, total: usize) -> bool {
        if total == 0 {
            return true;
        }
        match self {
            SuccessPolicy::Any => succeeded >= 1,
            SuccessPolicy::All => succeeded == total,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// 单个调用超时
    pub call_timeout: Duration,
    /// 整个派发的截止时间；到期后未结束的调用转为 cancelled，查询继续
    pub task_timeout: Option<Duration>,
    pub offload_threshold_chars: usize,
    pub summarize_results: bool,
    pub success_policy: SuccessPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            task_timeout: None,
            offload_threshold_chars: 2000,
            summarize_results: true,
            success_policy: SuccessPolicy::Any,
        }
    }
}

/// 执行一个任务所需的查询上下文
///
/// Scratchpad 由同一轮中并发执行的任务共享；锁只在同步片段中持有，不跨 await。
pub struct TaskContext<'a> {
    pub query: &'a str,
    pub understanding: &'a Understanding,
    pub scratchpad: &'a Mutex<Scratchpad>,
    pub events: &'a EventSink,
    pub cancel: &'a CancellationToken,
}

/// 单个任务的执行结果
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub status: TaskStatus,
    /// 与提议的调用一一对应（调用顺序）
    pub outcomes: Vec<ToolCallOutcome>,
    /// 查询级取消已被观察到
    pub cancelled: bool,
}

impl TaskExecution {
    fn cancelled(outcomes: Vec<ToolCallOutcome>) -> Self {
        Self {
            status: TaskStatus::Failed,
            outcomes,
            cancelled: true,
        }
    }
}

/// 工具执行器：对每次调用施加超时与并发限制，并将结果映射为 ToolCallOutcome
pub struct ToolExecutor {
    llm: Arc<dyn LlmClient>,
    summarizer: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn ContextStore>,
    scheduler: TaskScheduler,
    settings: ExecutorSettings,
}

impl ToolExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn ContextStore>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            summarizer: llm.clone(),
            llm,
            registry,
            store,
            scheduler: TaskScheduler::default(),
            settings,
        }
    }

    /// 摘要使用的模型（通常是更快的小模型）
    pub fn with_summarizer(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.summarizer = llm;
        self
    }

    /// 共享的并发池
    pub fn with_scheduler(mut self, scheduler: TaskScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// 执行一个 use_tools 任务
    pub async fn run_task(&self, task: &Task, ctx: TaskContext<'_>) -> Result<TaskExecution, AgentError> {
        let TaskContext {
            query,
            understanding,
            scratchpad,
            events,
            cancel,
        } = ctx;

        // (a) 选择前
        if cancel.is_cancelled() {
            return Ok(TaskExecution::cancelled(Vec::new()));
        }

        let calls = match self.select(query, understanding, task, scratchpad, cancel).await? {
            Selection::Cancelled => return Ok(TaskExecution::cancelled(Vec::new())),
            Selection::Calls { thinking, calls } => {
                if let Some(text) = thinking.filter(|t| !t.trim().is_empty()) {
                    scratchpad.lock().await.add_thinking(text.clone());
                    events.emit(AgentEvent::Thinking { text }).await;
                }
                calls
            }
            Selection::Text(text) => {
                let note = format!("No tool calls proposed for '{}': {}", task.description, preview(&text));
                scratchpad.lock().await.add_thinking(note.clone());
                events.emit(AgentEvent::Thinking { text: note }).await;
                Vec::new()
            }
        };

        if calls.is_empty() {
            tracing::info!(task_id = %task.id, "no tool calls proposed, task completed");
            return Ok(TaskExecution {
                status: TaskStatus::Completed,
                outcomes: Vec::new(),
                cancelled: false,
            });
        }

        // (b) 选择后、派发前
        if cancel.is_cancelled() {
            let outcomes: Vec<ToolCallOutcome> = calls
                .into_iter()
                .map(|c| ToolCallOutcome::pending(c).cancel("cancelled before dispatch"))
                .collect();
            {
                let mut pad = scratchpad.lock().await;
                for o in &outcomes {
                    pad.record_outcome(&task.id, o.clone());
                }
            }
            tracing::info!(task_id = %task.id, calls = outcomes.len(), "cancelled before dispatch");
            return Ok(TaskExecution::cancelled(outcomes));
        }

        let outcomes = self.dispatch(task, calls, scratchpad, events, cancel).await;

        {
            let mut pad = scratchpad.lock().await;
            for o in &outcomes {
                pad.record_outcome(&task.id, o.clone());
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let status = if self.settings.success_policy.satisfied(succeeded, outcomes.len()) {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        tracing::info!(
            task_id = %task.id,
            succeeded,
            total = outcomes.len(),
            status = ?status,
            "task dispatch settled"
        );
        Ok(TaskExecution {
            status,
            outcomes,
            cancelled: cancel.is_cancelled(),
        })
    }

    async fn select(
        &self,
        query: &str,
        understanding: &Understanding,
        task: &Task,
        scratchpad: &Mutex<Scratchpad>,
        cancel: &CancellationToken,
    ) -> Result<Selection, AgentError> {
        let user = {
            let pad = scratchpad.lock().await;
            build_select_user(
                query,
                understanding,
                &task.description,
                &pad.tool_summaries(),
                pad.usage_section().as_deref(),
                &pad.recent_warnings(RECENT_WARNINGS),
            )
        };
        let prompt = messages(SELECT_SYSTEM, user);
        let descriptors = self.registry.descriptors();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Selection::Cancelled),
            r = self.llm.complete_with_tools(&prompt, &descriptors) => r?,
        };
        Ok(match response {
            ModelResponse::Text(text) => Selection::Text(text),
            ModelResponse::ToolCalls { thinking, calls } => Selection::Calls { thinking, calls },
        })
    }

    /// 并发执行全部调用；返回值与 `calls` 顺序一致且全部已结束
    async fn dispatch(
        &self,
        task: &Task,
        calls: Vec<ToolCall>,
        scratchpad: &Mutex<Scratchpad>,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Vec<ToolCallOutcome> {
        let mut settled: Vec<Option<ToolCallOutcome>> = vec![None; calls.len()];
        let mut runnable = Vec::new();

        for (idx, call) in calls.iter().enumerate() {
            let tool = match self.registry.get(&call.tool) {
                Some(tool) => tool,
                None => {
                    let outcome = ToolCallOutcome::pending(call.clone())
                        .fail(format!("unknown tool '{}'", call.tool), 0);
                    self.emit_settled(&task.id, &outcome, events).await;
                    settled[idx] = Some(outcome);
                    continue;
                }
            };
            if let Err(e) = tool.descriptor().validate_args(&call.args) {
                let outcome = ToolCallOutcome::pending(call.clone()).fail(e, 0);
                self.emit_settled(&task.id, &outcome, events).await;
                settled[idx] = Some(outcome);
                continue;
            }

            let warnings = scratchpad.lock().await.register_call(call);
            for warning in warnings {
                events
                    .emit(AgentEvent::ToolLimit {
                        tool: call.tool.clone(),
                        warning,
                    })
                    .await;
            }
            events
                .emit(AgentEvent::ToolStart {
                    task_id: task.id.clone(),
                    tool: call.tool.clone(),
                    args: call.args.clone(),
                })
                .await;
            runnable.push((idx, tool));
        }

        let dispatch_token = cancel.child_token();
        if let Some(deadline) = self.settings.task_timeout {
            cancel_after(dispatch_token.clone(), deadline);
        }

        let (query_id, query) = {
            let pad = scratchpad.lock().await;
            (pad.query_id().clone(), pad.query().to_string())
        };
        let mut pending: FuturesUnordered<_> = runnable
            .into_iter()
            .map(|(idx, tool)| {
                let call = calls[idx].clone();
                let query_id = query_id.clone();
                let query = query.as_str();
                let task_id = task.id.as_str();
                async move {
                    let outcome = self.invoke(tool, call, &query_id, query, task_id).await;
                    (idx, outcome)
                }
            })
            .collect();

        loop {
            tokio::select! {
                biased;
                _ = dispatch_token.cancelled() => break,
                next = pending.next() => match next {
                    Some((idx, outcome)) => {
                        self.emit_settled(&task.id, &outcome, events).await;
                        settled[idx] = Some(outcome);
                    }
                    None => break,
                },
            }
        }
        drop(pending);
        dispatch_token.cancel();

        let reason = if cancel.is_cancelled() {
            "cancelled"
        } else {
            "task deadline exceeded"
        };
        let mut outcomes = Vec::with_capacity(calls.len());
        for (slot, call) in settled.into_iter().zip(calls) {
            match slot {
                Some(outcome) => outcomes.push(outcome),
                None => {
                    let outcome = ToolCallOutcome::pending(call).running().cancel(reason);
                    self.emit_settled(&task.id, &outcome, events).await;
                    outcomes.push(outcome);
                }
            }
        }
        outcomes
    }

    /// 单个调用：并发许可 → 超时内执行 → 大输出卸载 → 摘要
    async fn invoke(
        &self,
        tool: Arc<dyn Tool>,
        call: ToolCall,
        query_id: &QueryId,
        query: &str,
        task_id: &str,
    ) -> ToolCallOutcome {
        let running = ToolCallOutcome::pending(call.clone()).running();
        let _permit = match self.scheduler.acquire_tool().await {
            Ok(p) => p,
            Err(e) => return running.cancel(e.to_string()),
        };

        let start = Instant::now();
        let result = timeout(self.settings.call_timeout, tool.execute(call.args.clone())).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.tool,
            "task_id": task_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": preview(&call.args.to_string()),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(message)) => {
                let err = AgentError::ToolFault {
                    tool: call.tool.clone(),
                    message,
                };
                return running.fail(err.to_string(), duration_ms);
            }
            Err(_) => {
                let err = AgentError::ToolTimeout(format!(
                    "{} did not finish within {}ms",
                    call.tool,
                    self.settings.call_timeout.as_millis()
                ));
                return running.fail(err.to_string(), duration_ms);
            }
        };

        let summary = self.summarize(&call, query, &output).await;
        let payload = if output.chars().count() > self.settings.offload_threshold_chars {
            let urls = extract_urls(&output);
            let record = ContextRecord::new(query_id.clone(), call.tool.clone(), call.args.clone(), output)
                .with_task(task_id)
                .with_source_urls(urls);
            match self.store.put(record).await {
                Ok(handle) => OutcomePayload::Handle(handle),
                Err(e) => {
                    let err = AgentError::from(e);
                    tracing::warn!(tool = %call.tool, error = %err, "failed to offload tool output");
                    return running.fail(err.to_string(), duration_ms);
                }
            }
        } else {
            OutcomePayload::Inline(output)
        };

        running.succeed(payload, Some(summary), duration_ms)
    }

    /// 模型摘要（可选）；失败或关闭时退回到截断预览
    async fn summarize(&self, call: &ToolCall, query: &str, output: &str) -> String {
        let fallback = format!("{}: {}", call.describe(), preview(output));
        if !self.settings.summarize_results || output.chars().count() <= SUMMARIZE_MIN_CHARS {
            return fallback;
        }
        let prompt = messages(SUMMARIZE_SYSTEM, build_summary_user(query, &call.tool, output));
        match self.summarizer.complete(&prompt).await {
            Ok(digest) if !digest.trim().is_empty() => format!("{}: {}", call.describe(), digest.trim()),
            Ok(_) => fallback,
            Err(e) => {
                tracing::warn!(tool = %call.tool, error = %e, "tool result summarization failed");
                fallback
            }
        }
    }

    async fn emit_settled(&self, task_id: &str, outcome: &ToolCallOutcome, events: &EventSink) {
        let event = if outcome.is_success() {
            AgentEvent::ToolEnd {
                task_id: task_id.to_string(),
                tool: outcome.call().tool.clone(),
                summary: outcome.summary().unwrap_or_default().to_string(),
                duration_ms: outcome.duration_ms(),
            }
        } else {
            AgentEvent::ToolError {
                task_id: task_id.to_string(),
                tool: outcome.call().tool.clone(),
                error: outcome.error().unwrap_or("unknown error").to_string(),
            }
        };
        events.emit(event).await;
    }
}

enum Selection {
    Cancelled,
    Text(String),
    Calls {
        thinking: Option<String>,
        calls: Vec<ToolCall>,
    },
}

static URL_RE: OnceLock<Regex> = OnceLock::new();

/// 工具输出中出现的来源链接（去重，保持出现顺序）
pub fn extract_urls(text: &str) -> Vec<String> {
    let re = URL_RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>()\[\]]+"#).unwrap());
    let mut urls: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let url = m.as_str().trim_end_matches(|c: char| c == '.' || c == ',');
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
    urls
}
