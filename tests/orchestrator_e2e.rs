//! 编排器端到端测试：脚本化模型 + 测试工具，覆盖完整阶段流程、失败重规划、取消与软限制

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use waggle::context::{ContextStore, InMemoryContextStore};
use waggle::core::{IterationCap, Orchestrator, OrchestratorSettings, Phase, QueryReport};
use waggle::llm::{FnLlmClient, LlmClient, LlmError};
use waggle::memory::{last_user_content, JsonlSessionLog, Message, QueryRecord};
use waggle::phases::{AgentEvent, PromptKind};
use waggle::plan::{OutcomeStatus, TaskStatus};
use waggle::tools::{CalculatorTool, ExecutorSettings, Tool, ToolExecutor, ToolRegistry};

/// 等待所有同伴到达后再执行内部工具，串行执行会卡住
struct Rendezvous<T> {
    inner: T,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl<T: Tool> Tool for Rendezvous<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> Value {
        self.inner.parameters_schema()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.barrier.wait().await;
        self.inner.execute(args).await
    }
}

struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Current weather for a city"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let city = args["city"].as_str().unwrap_or("?");
        Ok(format!("{}: Sunny, 21C", city))
    }
}

struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "stock_price"
    }

    fn description(&self) -> &str {
        "Latest stock price"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Err("upstream down".into())
    }
}

/// 取消查询后一直挂起，模拟进行中的慢调用
struct HangingTool(CancellationToken);

#[async_trait]
impl Tool for HangingTool {
    fn name(&self) -> &str {
        "crawl"
    }

    fn description(&self) -> &str {
        "Crawl a site"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        self.0.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("never".into())
    }
}

/// 只计数的工具
struct CountingTool(Arc<AtomicUsize>);

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Look something up"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(format!("found {}", args))
    }
}

fn orchestrator(
    llm: Arc<dyn LlmClient>,
    tools: Vec<Arc<dyn Tool>>,
    settings: OrchestratorSettings,
) -> Arc<Orchestrator> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register_arc(tool);
    }
    let store: Arc<dyn ContextStore> = Arc::new(InMemoryContextStore::new());
    let executor = ToolExecutor::new(llm.clone(), Arc::new(registry), store.clone(), ExecutorSettings::default());
    Arc::new(Orchestrator::new(llm, executor, store).with_settings(settings))
}

async fn run(orch: &Arc<Orchestrator>, query: &str, cancel: CancellationToken) -> (Vec<AgentEvent>, QueryReport) {
    tokio::time::timeout(Duration::from_secs(10), orch.run(query, cancel).collect())
        .await
        .expect("query did not finish")
        .unwrap()
}

fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

const ONE_TASK_PLAN: &str = r#"{"summary": "gather", "tasks": [{"description": "Gather the data", "task_type": "use_tools"}]}"#;

#[tokio::test]
async fn test_calculator_and_weather_run_concurrently() {
    let llm = Arc::new(FnLlmClient::new(|m: &[Message]| {
        let user = last_user_content(m).unwrap_or_default().to_string();
        match PromptKind::of(m) {
            PromptKind::Understand => Ok(
                r#"{"intent": "compute and check weather", "entities": [{"kind": "location", "value": "Paris"}]}"#.into(),
            ),
            PromptKind::Plan => Ok(ONE_TASK_PLAN.into()),
            PromptKind::SelectTools => Ok(r#"{"thinking": "need both", "tool_calls": [
                {"tool": "calculator", "args": {"expression": "6 * 7"}},
                {"tool": "weather", "args": {"city": "Paris"}}
            ]}"#
            .into()),
            PromptKind::Reflect => Ok(r#"{"is_complete": true, "reasoning": "have both"}"#.into()),
            PromptKind::Answer => {
                assert!(user.contains("6 * 7 = 42"), "answer prompt: {}", user);
                assert!(user.contains("Paris: Sunny, 21C"), "answer prompt: {}", user);
                Ok("6 * 7 is 42, and Paris is sunny at 21C.".into())
            }
            other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
        }
    }));

    let barrier = Arc::new(Barrier::new(2));
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(Rendezvous {
            inner: CalculatorTool,
            barrier: barrier.clone(),
        }),
        Arc::new(Rendezvous {
            inner: WeatherTool,
            barrier,
        }),
    ];
    let orch = orchestrator(llm, tools, OrchestratorSettings::default());
    let (events, report) = run(&orch, "What is 6*7 and the weather in Paris?", CancellationToken::new()).await;

    let kinds = kinds(&events);
    assert_eq!(kinds.first(), Some(&"understanding_done"));
    assert_eq!(kinds.iter().filter(|k| **k == "tool_start").count(), 2);
    assert_eq!(kinds.iter().filter(|k| **k == "tool_end").count(), 2);
    assert!(!kinds.contains(&"tool_error"));

    let Some(AgentEvent::Done {
        answer,
        tool_calls,
        iterations,
    }) = events.last()
    else {
        panic!("expected done, got {:?}", events.last());
    };
    assert!(answer.contains("42") && answer.contains("sunny"));
    assert_eq!(tool_calls.len(), 2);
    assert!(tool_calls.iter().all(|c| c.status == OutcomeStatus::Succeeded));
    assert_eq!(*iterations, 1);

    assert_eq!(report.final_phase, Phase::Complete);
    assert_eq!(report.plans[0].tasks()[0].status, TaskStatus::Completed);
    assert_eq!(
        report.phases,
        vec![
            Phase::Understand,
            Phase::Plan,
            Phase::Execute,
            Phase::Reflect,
            Phase::Answer,
            Phase::Complete
        ]
    );
}

#[tokio::test]
async fn test_failing_tool_replans_once_then_answers() {
    let plan_prompts = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = plan_prompts.clone();
    let llm = Arc::new(FnLlmClient::new(move |m: &[Message]| match PromptKind::of(m) {
        PromptKind::Understand => Ok(r#"{"intent": "stock price", "entities": []}"#.into()),
        PromptKind::Plan => {
            seen.lock().unwrap().push(last_user_content(m).unwrap_or_default().to_string());
            Ok(ONE_TASK_PLAN.into())
        }
        PromptKind::SelectTools => Ok(r#"{"tool_calls": [{"tool": "stock_price", "args": {"symbol": "ACME"}}]}"#.into()),
        PromptKind::Reflect => Ok(
            r#"{"is_complete": false, "reasoning": "price missing", "missing_info": ["price"], "suggested_next_steps": "try again"}"#.into(),
        ),
        PromptKind::Answer => Ok("I could not retrieve the ACME price: the data source is down.".into()),
        other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
    }));

    let settings = OrchestratorSettings {
        iteration_cap: IterationCap::new(2),
        ..Default::default()
    };
    let orch = orchestrator(llm, vec![Arc::new(BrokenTool)], settings);
    let (events, report) = run(&orch, "What is ACME trading at?", CancellationToken::new()).await;

    let kinds = kinds(&events);
    assert_eq!(kinds.iter().filter(|k| **k == "plan_ready").count(), 2);
    assert_eq!(kinds.iter().filter(|k| **k == "reflection_done").count(), 2);
    assert_eq!(kinds.last(), Some(&"done"));

    let tool_errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolError { error, .. } => Some(error.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(tool_errors.len(), 2);
    assert!(tool_errors[0].contains("upstream down"));

    assert_eq!(report.iterations, 2);
    assert_eq!(report.final_phase, Phase::Complete);
    for plan in &report.plans {
        let task = &plan.tasks()[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.outcomes[0].status(), OutcomeStatus::Failed);
    }
    assert!(report.answer.unwrap().contains("could not retrieve"));

    let prompts = plan_prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("## Prior work"));
    assert!(prompts[1].contains("## Prior work"));
    assert!(prompts[1].contains("✗ Gather the data"));
    assert!(prompts[1].contains("price missing"));
}

#[tokio::test]
async fn test_cancel_after_selection_cancels_all_calls() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let invoked = Arc::new(AtomicUsize::new(0));
    let llm = Arc::new(FnLlmClient::new(move |m: &[Message]| match PromptKind::of(m) {
        PromptKind::Understand => Ok(r#"{"intent": "lookups", "entities": []}"#.into()),
        PromptKind::Plan => Ok(ONE_TASK_PLAN.into()),
        PromptKind::SelectTools => {
            trigger.cancel();
            Ok(r#"{"tool_calls": [
                {"tool": "lookup", "args": {"q": "a"}},
                {"tool": "lookup", "args": {"q": "b"}},
                {"tool": "lookup", "args": {"q": "c"}}
            ]}"#
            .into())
        }
        other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
    }));

    let orch = orchestrator(
        llm,
        vec![Arc::new(CountingTool(invoked.clone()))],
        OrchestratorSettings::default(),
    );
    let (events, report) = run(&orch, "look up a, b and c", cancel).await;

    assert!(matches!(
        events.last(),
        Some(AgentEvent::Cancelled { phase: Phase::Execute })
    ));
    assert!(!kinds(&events).contains(&"tool_start"));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(report.final_phase, Phase::Cancelled);

    let outcomes = &report.plans[0].tasks()[0].outcomes;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.status() == OutcomeStatus::Cancelled));
}

#[tokio::test]
async fn test_understand_failure_retried_once_then_error() {
    let llm = Arc::new(FnLlmClient::new(|_m: &[Message]| Err(LlmError::Request("connection refused".into()))));
    let orch = orchestrator(llm.clone(), Vec::new(), OrchestratorSettings::default());
    let (events, report) = run(&orch, "anything", CancellationToken::new()).await;

    assert_eq!(llm.calls(), 2);
    let Some(AgentEvent::Error { kind, message }) = events.last() else {
        panic!("expected error, got {:?}", events.last());
    };
    assert_eq!(kind, "model");
    assert!(message.contains("connection refused"));
    assert_eq!(report.final_phase, Phase::Failed);
    assert!(report.understanding.is_none());
}

#[tokio::test]
async fn test_understand_recovers_on_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let llm = Arc::new(FnLlmClient::new(move |m: &[Message]| match PromptKind::of(m) {
        PromptKind::Understand if counter.fetch_add(1, Ordering::SeqCst) == 0 => Ok("not json at all".into()),
        PromptKind::Understand => Ok(r#"{"intent": "greet", "entities": []}"#.into()),
        PromptKind::Plan => Ok(r#"{"summary": "no tools needed", "tasks": []}"#.into()),
        PromptKind::Reflect => Ok(r#"{"is_complete": true, "reasoning": "trivial"}"#.into()),
        PromptKind::Answer => Ok("Hello!".into()),
        other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
    }));
    let orch = orchestrator(llm, Vec::new(), OrchestratorSettings::default());
    let (events, report) = run(&orch, "hi", CancellationToken::new()).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(kinds(&events).last(), Some(&"done"));
    assert_eq!(report.answer.as_deref(), Some("Hello!"));
    assert!(report.plans[0].is_empty());
}

#[tokio::test]
async fn test_eleventh_call_runs_with_warning() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let llm = Arc::new(FnLlmClient::new(|m: &[Message]| match PromptKind::of(m) {
        PromptKind::Understand => Ok(r#"{"intent": "many lookups", "entities": []}"#.into()),
        PromptKind::Plan => Ok(ONE_TASK_PLAN.into()),
        PromptKind::SelectTools => {
            let calls: Vec<Value> = (0..11)
                .map(|i| serde_json::json!({"tool": "lookup", "args": {"q": format!("item number {}", i)}}))
                .collect();
            Ok(serde_json::json!({ "tool_calls": calls }).to_string())
        }
        PromptKind::Reflect => Ok(r#"{"is_complete": true, "reasoning": "enough"}"#.into()),
        PromptKind::Answer => Ok("Looked up eleven items.".into()),
        other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
    }));
    let orch = orchestrator(
        llm,
        vec![Arc::new(CountingTool(invoked.clone()))],
        OrchestratorSettings::default(),
    );
    let (events, report) = run(&orch, "look up eleven items", CancellationToken::new()).await;

    assert_eq!(invoked.load(Ordering::SeqCst), 11);
    assert_eq!(kinds(&events).iter().filter(|k| **k == "tool_end").count(), 11);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolLimit { warning, .. } if warning.starts_with("Tool call 11 exceeds")
    )));
    assert!(report
        .scratchpad
        .warnings()
        .iter()
        .any(|w| w.starts_with("Tool call 11 exceeds")));
    assert_eq!(report.scratchpad.tool_calls(), 11);
    assert_eq!(kinds(&events).last(), Some(&"done"));
}

#[tokio::test]
async fn test_dependent_tasks_run_in_order_and_failures_cascade() {
    let llm = Arc::new(FnLlmClient::new(|m: &[Message]| {
        let user = last_user_content(m).unwrap_or_default().to_string();
        match PromptKind::of(m) {
            PromptKind::Understand => Ok(r#"{"intent": "compare", "entities": []}"#.into()),
            PromptKind::Plan => Ok(r#"{"summary": "fetch then compare", "tasks": [
                {"description": "Fetch weather", "task_type": "use_tools"},
                {"description": "Fetch price", "task_type": "use_tools"},
                {"description": "Compare weather", "task_type": "reason", "depends_on": ["task_0"]},
                {"description": "Compare price", "task_type": "reason", "depends_on": ["task_1"]}
            ]}"#
            .into()),
            PromptKind::SelectTools if user.contains("Fetch weather") => {
                Ok(r#"{"tool_calls": [{"tool": "weather", "args": {"city": "Oslo"}}]}"#.into())
            }
            PromptKind::SelectTools => Ok(r#"{"tool_calls": [{"tool": "stock_price", "args": {}}]}"#.into()),
            PromptKind::Reason => {
                assert!(user.contains("Oslo: Sunny, 21C"));
                Ok("Oslo is pleasant.".into())
            }
            PromptKind::Reflect => Ok(r#"{"is_complete": true, "reasoning": "ok"}"#.into()),
            PromptKind::Answer => Ok("Oslo is pleasant; price unavailable.".into()),
            other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
        }
    }));
    let orch = orchestrator(
        llm,
        vec![Arc::new(WeatherTool), Arc::new(BrokenTool)],
        OrchestratorSettings::default(),
    );
    let (events, report) = run(&orch, "compare", CancellationToken::new()).await;

    let started: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::TaskStart { task_id, .. } => Some(task_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["task_1_0", "task_1_1", "task_1_2"]);

    let plan = &report.plans[0];
    assert_eq!(plan.task("task_1_2").unwrap().status, TaskStatus::Completed);
    let blocked = plan.task("task_1_3").unwrap();
    assert_eq!(blocked.status, TaskStatus::Failed);
    assert_eq!(blocked.output.as_deref(), Some("dependency failed"));
    assert_eq!(kinds(&events).last(), Some(&"done"));
}

#[tokio::test]
async fn test_session_log_written_on_completion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.jsonl");
    let llm = Arc::new(FnLlmClient::new(|m: &[Message]| match PromptKind::of(m) {
        PromptKind::Understand => Ok(r#"{"intent": "greet", "entities": []}"#.into()),
        PromptKind::Plan => Ok(r#"{"summary": "none", "tasks": []}"#.into()),
        PromptKind::Reflect => Ok(r#"{"is_complete": true, "reasoning": "trivial"}"#.into()),
        PromptKind::Answer => Ok("Hello there.".into()),
        other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
    }));
    let store: Arc<dyn ContextStore> = Arc::new(InMemoryContextStore::new());
    let executor = ToolExecutor::new(llm.clone(), Arc::new(ToolRegistry::new()), store.clone(), ExecutorSettings::default());
    let orch = Arc::new(
        Orchestrator::new(llm, executor, store).with_session_log(Arc::new(JsonlSessionLog::new(&path))),
    );
    let (_, report) = run(&orch, "hello", CancellationToken::new()).await;
    assert_eq!(report.final_phase, Phase::Complete);

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: QueryRecord = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record.query, "hello");
    assert_eq!(record.answer, "Hello there.");
    assert_eq!(record.final_phase, "complete");
    assert_eq!(record.messages.len(), 2);
}

fn started_tasks(events: &[AgentEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::TaskStart { task_id, .. } => Some(task_id.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_warnings_reach_next_selection_and_reflection() {
    let prompts = Arc::new(Mutex::new(Vec::<(PromptKind, String)>::new()));
    let seen = prompts.clone();
    let llm = Arc::new(FnLlmClient::new(move |m: &[Message]| {
        let kind = PromptKind::of(m);
        let user = last_user_content(m).unwrap_or_default().to_string();
        seen.lock().unwrap().push((kind, user.clone()));
        match kind {
            PromptKind::Understand => Ok(r#"{"intent": "research", "entities": []}"#.into()),
            PromptKind::Plan => Ok(r#"{"summary": "look up then follow up", "tasks": [
                {"description": "Look up the runtime", "task_type": "use_tools"},
                {"description": "Follow up on the runtime", "task_type": "use_tools", "depends_on": ["task_0"]}
            ]}"#
            .into()),
            PromptKind::SelectTools if user.contains("Look up the runtime") => Ok(r#"{"tool_calls": [
                {"tool": "lookup", "args": {"q": "rust async runtime benchmarks"}},
                {"tool": "lookup", "args": {"q": "rust async runtime benchmarks 2024"}}
            ]}"#
            .into()),
            PromptKind::SelectTools => Ok(r#"{"tool_calls": []}"#.into()),
            PromptKind::Reflect => Ok(r#"{"is_complete": true, "reasoning": "enough"}"#.into()),
            PromptKind::Answer => Ok("Tokio is the common choice.".into()),
            other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
        }
    }));
    let orch = orchestrator(
        llm,
        vec![Arc::new(CountingTool(Arc::new(AtomicUsize::new(0))))],
        OrchestratorSettings::default(),
    );
    let (events, _) = run(&orch, "which async runtime", CancellationToken::new()).await;
    assert_eq!(kinds(&events).last(), Some(&"done"));
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolLimit { warning, .. } if warning.contains("very similar")
    )));

    let prompts = prompts.lock().unwrap();
    let selects: Vec<&String> = prompts
        .iter()
        .filter(|(k, _)| *k == PromptKind::SelectTools)
        .map(|(_, u)| u)
        .collect();
    assert_eq!(selects.len(), 2);
    assert!(!selects[0].contains("very similar"));
    assert!(selects[1].contains("Follow up on the runtime"));
    assert!(selects[1].contains("## Warnings"));
    assert!(selects[1].contains("very similar"));

    let reflect = prompts
        .iter()
        .find(|(k, _)| *k == PromptKind::Reflect)
        .map(|(_, u)| u)
        .unwrap();
    assert!(reflect.contains("very similar"));
}

#[tokio::test]
async fn test_independent_tasks_run_concurrently() {
    let llm = Arc::new(FnLlmClient::new(|m: &[Message]| {
        let user = last_user_content(m).unwrap_or_default().to_string();
        match PromptKind::of(m) {
            PromptKind::Understand => Ok(r#"{"intent": "two facts", "entities": []}"#.into()),
            PromptKind::Plan => Ok(r#"{"summary": "two independent lookups", "tasks": [
                {"description": "Compute the product", "task_type": "use_tools"},
                {"description": "Check the weather", "task_type": "use_tools"}
            ]}"#
            .into()),
            PromptKind::SelectTools if user.contains("Compute the product") => {
                Ok(r#"{"tool_calls": [{"tool": "calculator", "args": {"expression": "6 * 7"}}]}"#.into())
            }
            PromptKind::SelectTools => Ok(r#"{"tool_calls": [{"tool": "weather", "args": {"city": "Lima"}}]}"#.into()),
            PromptKind::Reflect => Ok(r#"{"is_complete": true, "reasoning": "both done"}"#.into()),
            PromptKind::Answer => Ok("42, and Lima is sunny.".into()),
            other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
        }
    }));
    let barrier = Arc::new(Barrier::new(2));
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(Rendezvous {
            inner: CalculatorTool,
            barrier: barrier.clone(),
        }),
        Arc::new(Rendezvous {
            inner: WeatherTool,
            barrier,
        }),
    ];
    let orch = orchestrator(llm, tools, OrchestratorSettings::default());
    let (events, report) = tokio::time::timeout(
        Duration::from_secs(5),
        orch.run("product and weather", CancellationToken::new()).collect(),
    )
    .await
    .expect("tasks did not run concurrently")
    .unwrap();

    assert_eq!(started_tasks(&events), vec!["task_1_0", "task_1_1"]);
    assert!(report.plans[0]
        .tasks()
        .iter()
        .all(|t| t.status == TaskStatus::Completed));
    assert_eq!(
        report.phases,
        vec![
            Phase::Understand,
            Phase::Plan,
            Phase::Execute,
            Phase::Execute,
            Phase::Reflect,
            Phase::Answer,
            Phase::Complete
        ]
    );
    assert_eq!(kinds(&events).last(), Some(&"done"));
}

#[tokio::test]
async fn test_cancel_during_slow_tool_settles_call_and_stops() {
    let cancel = CancellationToken::new();
    let llm = Arc::new(FnLlmClient::new(|m: &[Message]| match PromptKind::of(m) {
        PromptKind::Understand => Ok(r#"{"intent": "crawl", "entities": []}"#.into()),
        PromptKind::Plan => Ok(r#"{"summary": "crawl then read", "tasks": [
            {"description": "Crawl the site", "task_type": "use_tools"},
            {"description": "Read the pages", "task_type": "use_tools", "depends_on": ["task_0"]}
        ]}"#
        .into()),
        PromptKind::SelectTools => Ok(r#"{"tool_calls": [{"tool": "crawl", "args": {}}]}"#.into()),
        other => Err(LlmError::Request(format!("unexpected step {:?}", other))),
    }));
    let orch = orchestrator(
        llm,
        vec![Arc::new(HangingTool(cancel.clone()))],
        OrchestratorSettings::default(),
    );
    let (events, report) = run(&orch, "crawl the site", cancel).await;

    assert_eq!(started_tasks(&events), vec!["task_1_0"]);
    assert!(matches!(
        events.last(),
        Some(AgentEvent::Cancelled { phase: Phase::Execute })
    ));
    assert_eq!(report.final_phase, Phase::Cancelled);

    let plan = &report.plans[0];
    let crawled = plan.task("task_1_0").unwrap();
    assert_eq!(crawled.status, TaskStatus::Failed);
    assert_eq!(crawled.outcomes.len(), 1);
    assert_eq!(crawled.outcomes[0].status(), OutcomeStatus::Cancelled);
    assert_eq!(crawled.outcomes[0].error(), Some("cancelled"));
    assert_eq!(plan.task("task_1_1").unwrap().status, TaskStatus::Pending);
}
