//! 阶段编排器：主控循环
//!
//! Understand → Plan → Execute → Reflect →（Plan …）→ Answer → Complete。
//! 每个查询在后台任务中运行，过程事件经有界通道按顺序送出；最终的 QueryReport
//! （回复、各轮计划、Scratchpad、终止阶段）在取消或出错后同样可取。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::context::{ContextStore, QueryId};
use crate::core::{AgentError, IterationCap, Phase, PhaseMachine, RecoveryAction, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::{
    LongTermMemory, Message, NoopLongTerm, NoopSessionLog, QueryRecord, Scratchpad, SessionLog,
    SoftLimits, TokenEstimator,
};
use crate::phases::parse::preview;
use crate::phases::prompts::{build_compact_user, messages, PlanPrompt, COMPACT_SYSTEM};
use crate::phases::{
    AgentEvent, Answerer, EventSink, Planner, Reasoner, ReflectInput, Reflector, Understander,
};
use crate::plan::{Plan, Task, TaskId, TaskStatus, TaskType, ToolCallOutcome, Understanding};
use crate::tools::{TaskContext, ToolExecutor, RECENT_WARNINGS};

/// 写入长期记忆的最短回复长度
const MEMORY_MIN_ANSWER_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub iteration_cap: IterationCap,
    pub soft_limits: SoftLimits,
    pub token_budget: usize,
    pub compact_keep_recent: usize,
    pub event_buffer: usize,
    pub memory_results: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            iteration_cap: IterationCap::default(),
            soft_limits: SoftLimits::default(),
            token_budget: 8000,
            compact_keep_recent: 4,
            event_buffer: 32,
            memory_results: 3,
        }
    }
}

/// 终止错误（对应 `error{kind, message}` 事件）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryFailure {
    pub kind: String,
    pub message: String,
}

/// 查询结束后的完整结果
#[derive(Debug, Clone)]
pub struct QueryReport {
    pub query_id: QueryId,
    pub query: String,
    pub answer: Option<String>,
    pub final_phase: Phase,
    /// 经过的阶段（含 Execute → Execute）
    pub phases: Vec<Phase>,
    pub understanding: Option<Understanding>,
    pub plans: Vec<Plan>,
    pub scratchpad: Scratchpad,
    pub iterations: usize,
    pub error: Option<QueryFailure>,
}

/// 运行中的查询：事件流 + 最终报告
pub struct QueryRun {
    events: mpsc::Receiver<AgentEvent>,
    handle: JoinHandle<QueryReport>,
}

impl QueryRun {
    /// 放弃剩余事件并等待最终报告
    pub async fn report(self) -> Result<QueryReport, JoinError> {
        drop(self.events);
        self.handle.await
    }

    /// 读完全部事件后返回（事件, 报告）
    pub async fn collect(mut self) -> Result<(Vec<AgentEvent>, QueryReport), JoinError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let report = self.handle.await?;
        Ok((events, report))
    }
}

impl Stream for QueryRun {
    type Item = AgentEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AgentEvent>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// 单个查询的可变状态
struct QueryState {
    machine: PhaseMachine,
    /// Execute 阶段由并发任务共享
    scratchpad: Mutex<Scratchpad>,
    understanding: Option<Understanding>,
    plans: Vec<Plan>,
    answer: Option<String>,
}

/// 一个任务执行完毕后的结果
struct TaskRun {
    task_id: TaskId,
    status: TaskStatus,
    outcomes: Vec<ToolCallOutcome>,
    output: Option<String>,
    cancelled: bool,
}

/// 阶段编排器：注入模型、执行器与存储，多个查询可并发共享
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    fast_llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    store: Arc<dyn ContextStore>,
    long_term: Arc<dyn LongTermMemory>,
    session_log: Arc<dyn SessionLog>,
    recovery: RecoveryEngine,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, executor: ToolExecutor, store: Arc<dyn ContextStore>) -> Self {
        Self {
            fast_llm: llm.clone(),
            llm,
            executor,
            store,
            long_term: Arc::new(NoopLongTerm),
            session_log: Arc::new(NoopSessionLog),
            recovery: RecoveryEngine::new(),
            settings: OrchestratorSettings::default(),
        }
    }

    /// Scratchpad 压缩与回填挑选使用的模型
    pub fn with_fast_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.fast_llm = llm;
        self
    }

    pub fn with_long_term(mut self, long_term: Arc<dyn LongTermMemory>) -> Self {
        self.long_term = long_term;
        self
    }

    pub fn with_session_log(mut self, log: Arc<dyn SessionLog>) -> Self {
        self.session_log = log;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// 在后台任务中运行查询，返回事件流与报告句柄
    pub fn run(self: &Arc<Self>, query: impl Into<String>, cancel: CancellationToken) -> QueryRun {
        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let this = Arc::clone(self);
        let query = query.into();
        let handle = tokio::spawn(async move { this.execute(&query, cancel, EventSink::new(tx)).await });
        QueryRun { events: rx, handle }
    }

    /// 在当前任务中运行查询直到终止；事件写入 `events`
    pub async fn execute(&self, query: &str, cancel: CancellationToken, events: EventSink) -> QueryReport {
        let started_at = Utc::now();
        let mut st = QueryState {
            machine: PhaseMachine::new(),
            scratchpad: Mutex::new(Scratchpad::new(query, self.settings.soft_limits.clone())),
            understanding: None,
            plans: Vec::new(),
            answer: None,
        };
        let query_id = st.scratchpad.get_mut().query_id().clone();
        tracing::info!(query_id = %query_id, "query started");

        let result = self.drive(&mut st, &cancel, &events).await;

        let terminal = match result {
            Ok(answer) => {
                let pad = st.scratchpad.get_mut();
                pad.push_message(Message::assistant(answer.clone()));
                let (tool_calls, iterations) = (pad.tool_call_records(), pad.iterations());
                st.answer = Some(answer.clone());
                self.advance_terminal(&mut st, Phase::Complete);
                AgentEvent::Done {
                    answer,
                    tool_calls,
                    iterations,
                }
            }
            Err(AgentError::Cancelled) => {
                let phase = st.machine.current();
                tracing::info!(phase = %phase, "query cancelled");
                self.advance_terminal(&mut st, Phase::Cancelled);
                AgentEvent::Cancelled { phase }
            }
            Err(e) => {
                tracing::error!(phase = %st.machine.current(), error = %e, "query failed");
                self.advance_terminal(&mut st, Phase::Failed);
                AgentEvent::Error {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };

        self.finalize(&mut st, started_at).await;

        let error = match &terminal {
            AgentEvent::Error { kind, message } => Some(QueryFailure {
                kind: kind.clone(),
                message: message.clone(),
            }),
            _ => None,
        };
        events.emit(terminal).await;

        let scratchpad = st.scratchpad.into_inner();
        QueryReport {
            query_id,
            query: query.to_string(),
            answer: st.answer,
            final_phase: st.machine.current(),
            phases: st.machine.trail().to_vec(),
            understanding: st.understanding,
            plans: st.plans,
            iterations: scratchpad.iterations(),
            scratchpad,
            error,
        }
    }

    fn advance_terminal(&self, st: &mut QueryState, phase: Phase) {
        if let Err(e) = st.machine.advance(phase) {
            tracing::warn!(error = %e, "terminal transition rejected");
        }
    }

    async fn drive(
        &self,
        st: &mut QueryState,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<String, AgentError> {
        let query = st.scratchpad.get_mut().query().to_string();
        let memory = if self.long_term.enabled() {
            self.long_term.search(&query, self.settings.memory_results)
        } else {
            Vec::new()
        };

        // Understand
        checkpoint(cancel)?;
        let understander = Understander::new(self.llm.clone());
        let understanding = self
            .attempt(Phase::Understand, cancel, || understander.run(&query, &memory))
            .await?;
        st.understanding = Some(understanding.clone());
        events
            .emit(AgentEvent::UnderstandingDone {
                understanding: understanding.clone(),
            })
            .await;

        let cap = self.settings.iteration_cap;
        let tools = self.executor.registry().format_descriptions();
        let planner = Planner::new(self.llm.clone());
        let reflector = Reflector::new(self.llm.clone());
        let mut guidance: Option<String> = None;

        loop {
            // Plan
            checkpoint(cancel)?;
            st.machine.advance(Phase::Plan)?;
            let iteration = st.scratchpad.get_mut().next_iteration();
            self.maybe_compact(st.scratchpad.get_mut(), cancel).await;

            let prior_text = prior_work(&st.plans);
            let view = st.scratchpad.get_mut().budgeted_view(self.settings.token_budget / 2);
            let prompt = PlanPrompt {
                query: &query,
                understanding: &understanding,
                memory: &memory,
                tools: &tools,
                prior_work: &prior_text,
                guidance: guidance.as_deref(),
                scratchpad: &view,
            };
            let plan = self
                .attempt(Phase::Plan, cancel, || planner.run(&prompt, iteration))
                .await?;
            events
                .emit(AgentEvent::PlanReady {
                    iteration,
                    plan: plan.clone(),
                })
                .await;
            st.plans.push(plan);

            // Execute
            checkpoint(cancel)?;
            st.machine.advance(Phase::Execute)?;
            self.execute_plan(st, &query, &understanding, cancel, events).await?;

            // Reflect
            checkpoint(cancel)?;
            st.machine.advance(Phase::Reflect)?;
            let plans_text = prior_work(&st.plans);
            let pad = st.scratchpad.get_mut();
            let gathered = self.gathered(pad, &st.plans);
            let warnings = pad.recent_warnings(RECENT_WARNINGS);
            let input = ReflectInput {
                query: &query,
                understanding: &understanding,
                plans: &plans_text,
                gathered: &gathered,
                warnings: &warnings,
                iteration,
                max_iterations: cap.max(),
            };
            let reflection = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                r = reflector.run(&input) => r,
            };
            events
                .emit(AgentEvent::ReflectionDone {
                    iteration,
                    is_complete: reflection.is_complete,
                    reasoning: reflection.reasoning.clone(),
                })
                .await;

            if reflection.is_complete {
                break;
            }
            if !cap.allows_replan(iteration) {
                tracing::info!(iteration, cap = cap.max(), "iteration cap reached, answering with gathered data");
                break;
            }
            guidance = Some(reflection.guidance());
        }

        // Answer
        checkpoint(cancel)?;
        st.machine.advance(Phase::Answer)?;
        self.maybe_compact(st.scratchpad.get_mut(), cancel).await;
        let scratchpad = &*st.scratchpad.get_mut();
        let gathered = self.gathered(scratchpad, &st.plans);
        let answerer = Answerer::new(self.llm.clone(), self.store.clone()).with_selector(self.fast_llm.clone());
        let budget = self.settings.token_budget;
        self.attempt(Phase::Answer, cancel, || answerer.run(scratchpad, &gathered, budget, events))
            .await
    }

    /// 并发执行全部就绪任务；每个任务结束后重新计算就绪集合，直到没有可执行的任务
    ///
    /// 观察到取消后不再启动新任务，等待已启动的任务结束后返回 Cancelled。
    async fn execute_plan(
        &self,
        st: &mut QueryState,
        query: &str,
        understanding: &Understanding,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<(), AgentError> {
        let Some(plan_idx) = st.plans.len().checked_sub(1) else {
            return Ok(());
        };
        let scratchpad = &st.scratchpad;
        let mut running = FuturesUnordered::new();
        let mut first = true;
        let mut cancelled = false;

        loop {
            for task_id in st.plans[plan_idx].fail_blocked() {
                tracing::warn!(task_id = %task_id, "dependency failed, task skipped");
                events
                    .emit(AgentEvent::TaskEnd {
                        task_id,
                        status: TaskStatus::Failed,
                    })
                    .await;
            }

            if !cancelled && !cancel.is_cancelled() {
                for task_id in st.plans[plan_idx].ready_tasks() {
                    if !first {
                        st.machine.advance(Phase::Execute)?;
                    }
                    first = false;

                    let task = st.plans[plan_idx].start_task(&task_id)?.clone();
                    let gathered = match task.task_type {
                        TaskType::Reason => self.gathered(&*scratchpad.lock().await, &st.plans),
                        TaskType::UseTools => String::new(),
                    };
                    tracing::info!(task_id = %task.id, task_type = ?task.task_type, "task started");
                    events
                        .emit(AgentEvent::TaskStart {
                            task_id: task.id.clone(),
                            description: task.description.clone(),
                            task_type: task.task_type,
                        })
                        .await;
                    let ctx = TaskContext {
                        query,
                        understanding,
                        scratchpad,
                        events,
                        cancel,
                    };
                    running.push(self.run_one(task, gathered, ctx));
                }
            }

            let Some(run) = running.next().await else {
                break;
            };
            let TaskRun {
                task_id,
                status,
                outcomes,
                output,
                cancelled: observed,
            } = run;
            let task = st.plans[plan_idx].running_task_mut(&task_id)?;
            task.outcomes = outcomes;
            task.output = output;
            st.plans[plan_idx].finish_task(&task_id, status)?;
            tracing::info!(task_id = %task_id, status = ?status, "task finished");
            events.emit(AgentEvent::TaskEnd { task_id, status }).await;
            cancelled |= observed;
        }

        if cancelled {
            return Err(AgentError::Cancelled);
        }
        checkpoint(cancel)?;
        if !st.plans[plan_idx].is_settled() {
            tracing::warn!(progress = %st.plans[plan_idx].format_progress(), "plan left unsettled tasks");
        }
        Ok(())
    }

    /// 执行单个任务；Scratchpad 锁只在同步片段中持有
    async fn run_one(&self, task: Task, gathered: String, ctx: TaskContext<'_>) -> TaskRun {
        let mut cancelled = false;
        let (status, outcomes, output) = match task.task_type {
            TaskType::UseTools => {
                match self.executor.run_task(&task, ctx).await {
                    Ok(exec) => {
                        cancelled = exec.cancelled;
                        let output = cancelled.then(|| "cancelled".to_string());
                        let status = if cancelled { TaskStatus::Failed } else { exec.status };
                        (status, exec.outcomes, output)
                    }
                    Err(e) => self.task_failure(&task.id, e, &mut cancelled),
                }
            }
            TaskType::Reason => {
                let reasoner = Reasoner::new(self.llm.clone());
                let result = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Err(AgentError::Cancelled),
                    r = reasoner.run(ctx.query, &task.description, &gathered) => r,
                };
                match result {
                    Ok(text) => {
                        ctx.scratchpad
                            .lock()
                            .await
                            .add_thinking(format!("{}: {}", task.description, text));
                        (TaskStatus::Completed, Vec::new(), Some(text))
                    }
                    Err(e) => self.task_failure(&task.id, e, &mut cancelled),
                }
            }
        };
        TaskRun {
            task_id: task.id,
            status,
            outcomes,
            output,
            cancelled,
        }
    }

    fn task_failure(
        &self,
        task_id: &str,
        err: AgentError,
        cancelled: &mut bool,
    ) -> (TaskStatus, Vec<ToolCallOutcome>, Option<String>) {
        match self.recovery.handle(&err, Phase::Execute, 0) {
            RecoveryAction::Cancel => {
                *cancelled = true;
                (TaskStatus::Failed, Vec::new(), Some("cancelled".to_string()))
            }
            _ => {
                tracing::warn!(task_id = %task_id, error = %err, "task failed");
                (TaskStatus::Failed, Vec::new(), Some(err.to_string()))
            }
        }
    }

    /// 单个阶段的模型调用：与取消竞速，按 RecoveryEngine 的建议重试
    async fn attempt<T, F, Fut>(&self, phase: Phase, cancel: &CancellationToken, mut call: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                r = call() => r,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            match self.recovery.handle(&err, phase, attempt) {
                RecoveryAction::Retry => {
                    tracing::warn!(phase = %phase, attempt, error = %err, "model call failed, retrying");
                    attempt += 1;
                }
                RecoveryAction::Cancel => return Err(AgentError::Cancelled),
                RecoveryAction::MarkTaskFailed | RecoveryAction::Abort => return Err(err),
            }
        }
    }

    /// Scratchpad 超出预算时压缩较早的条目；摘要失败只记录告警
    async fn maybe_compact(&self, scratchpad: &mut Scratchpad, cancel: &CancellationToken) {
        let budget = self.settings.token_budget;
        if !scratchpad.exceeds_budget(budget) {
            return;
        }
        let candidates = scratchpad.compaction_candidates(self.settings.compact_keep_recent);
        tracing::info!(
            tokens = scratchpad.effective_tokens(),
            budget,
            candidates = candidates.len(),
            "compacting scratchpad"
        );
        for idx in candidates {
            if cancel.is_cancelled() || !scratchpad.exceeds_budget(budget) {
                break;
            }
            let Some(entry) = scratchpad.entries().get(idx) else {
                continue;
            };
            let prompt = messages(COMPACT_SYSTEM, build_compact_user(&entry.content));
            match self.fast_llm.complete(&prompt).await {
                Ok(summary) if !summary.trim().is_empty() => {
                    scratchpad.compact(idx, summary.trim());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "compaction failed, keeping full entries");
                    break;
                }
            }
        }
    }

    /// 已收集数据：工具结果摘要 + reason 任务输出，截断到预算的一半
    fn gathered(&self, scratchpad: &Scratchpad, plans: &[Plan]) -> String {
        let mut lines: Vec<String> = scratchpad
            .tool_summaries()
            .into_iter()
            .map(|s| format!("- {}", s))
            .collect();
        for task in plans.iter().flat_map(|p| p.tasks()) {
            if task.task_type == TaskType::Reason && task.status == TaskStatus::Completed {
                if let Some(output) = &task.output {
                    lines.push(format!("- {}: {}", task.description, output));
                }
            }
        }
        TokenEstimator::truncate(&lines.join("\n"), self.settings.token_budget / 2)
    }

    /// 会话日志总是写入；长期记忆只在完成、用过工具且回复足够长时写入
    async fn finalize(&self, st: &mut QueryState, started_at: chrono::DateTime<Utc>) {
        let pad = st.scratchpad.get_mut();
        let answer = st.answer.clone().unwrap_or_default();
        let record = QueryRecord {
            query_id: pad.query_id().to_string(),
            query: pad.query().to_string(),
            summary: format!("Q: {} | A: {}", preview(pad.query()), preview(&answer)),
            answer: answer.clone(),
            final_phase: st.machine.current().to_string(),
            iterations: pad.iterations(),
            tool_calls: pad.tool_call_records(),
            messages: pad.messages().to_vec(),
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.session_log.append(&record).await {
            tracing::warn!(error = %e, "failed to append session log");
        }

        if st.machine.current() == Phase::Complete
            && pad.has_tool_results()
            && answer.chars().count() > MEMORY_MIN_ANSWER_CHARS
            && self.long_term.enabled()
        {
            let mut tags = vec!["qa".to_string()];
            for call in pad.tool_call_records() {
                let tag = format!("tool:{}", call.tool);
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            self.long_term
                .add(&format!("Q: {}\nA: {}", pad.query(), answer), &tags);
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), AgentError> {
    if cancel.is_cancelled() {
        Err(AgentError::Cancelled)
    } else {
        Ok(())
    }
}

/// 之前各轮计划的 ✓ / ✗ 摘要
fn prior_work(plans: &[Plan]) -> String {
    plans
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| format!("Pass {}: {}\n    {}", p.iteration, p.summary, p.format_progress()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryContextStore;
    use crate::llm::{FnLlmClient, LlmError, MockLlmClient};
    use crate::memory::InMemoryLongTerm;
    use crate::phases::PromptKind;
    use crate::tools::{EchoTool, ExecutorSettings, ToolRegistry};

    fn orchestrator(llm: Arc<dyn LlmClient>) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let store: Arc<dyn ContextStore> = Arc::new(InMemoryContextStore::new());
        let executor = ToolExecutor::new(llm.clone(), Arc::new(registry), store.clone(), ExecutorSettings::default());
        Orchestrator::new(llm, executor, store)
    }

    #[tokio::test]
    async fn test_mock_run_reaches_done() {
        let orch = Arc::new(orchestrator(Arc::new(MockLlmClient)));
        let (events, report) = orch
            .run("say hello", CancellationToken::new())
            .collect()
            .await
            .unwrap();

        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.first(), Some(&"understanding_done"));
        assert_eq!(kinds.last(), Some(&"done"));
        assert!(kinds.contains(&"tool_start"));
        assert!(kinds.contains(&"answer_chunk"));
        assert_eq!(report.final_phase, Phase::Complete);
        assert_eq!(report.iterations, 1);
        assert!(report.answer.unwrap().contains("say hello"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_reports_understand() {
        let orch = Arc::new(orchestrator(Arc::new(MockLlmClient)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (events, report) = orch.run("q", cancel).collect().await.unwrap();
        assert!(matches!(
            events.as_slice(),
            [AgentEvent::Cancelled {
                phase: Phase::Understand
            }]
        ));
        assert_eq!(report.final_phase, Phase::Cancelled);
    }

    #[tokio::test]
    async fn test_invalid_plan_aborts_without_retry() {
        let llm = Arc::new(FnLlmClient::new(|m| match PromptKind::of(m) {
            PromptKind::Understand => Ok(r#"{"intent": "x", "entities": []}"#.into()),
            PromptKind::Plan => Ok(r#"{"summary": "loop", "tasks": [
                {"description": "a", "depends_on": ["task_1"]},
                {"description": "b", "depends_on": ["task_0"]}
            ]}"#
            .into()),
            _ => Err(LlmError::Request("unexpected".into())),
        }));
        let orch = orchestrator(llm.clone());
        let report = orch.execute("q", CancellationToken::new(), EventSink::none()).await;
        assert_eq!(report.final_phase, Phase::Failed);
        assert_eq!(report.error.unwrap().kind, "validation");
        assert_eq!(llm.calls(), 2);
        assert!(report.plans.is_empty());
    }

    #[tokio::test]
    async fn test_long_term_written_after_tool_use() {
        let long_term = Arc::new(InMemoryLongTerm::new(10));
        let orch = orchestrator(Arc::new(MockLlmClient)).with_long_term(long_term.clone());
        let report = orch
            .execute("describe the echo tool output", CancellationToken::new(), EventSink::none())
            .await;
        assert_eq!(report.final_phase, Phase::Complete);
        assert_eq!(long_term.tagged("tool:echo").len(), 1);
    }
}
