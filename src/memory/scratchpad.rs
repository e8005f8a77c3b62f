//! Scratchpad：单个查询的工作记忆（唯一事实来源）
//!
//! 只追加的条目（init / thinking / tool_result / warning），消息历史，工具调用计数。
//! 软限制（SoftLimits）只产生 warning 条目，从不阻止追加；硬上限见 `core::state::IterationCap`。
//! 压缩由编排器显式触发：`compaction_candidates` + `compact`，对已压缩条目再次压缩是空操作。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::{ContextHandle, QueryId};
use crate::memory::{Message, TokenEstimator};
use crate::plan::{OutcomePayload, OutcomeStatus, ToolCall, ToolCallOutcome};

/// 软限制：超出时追加 warning，不阻塞
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftLimits {
    pub max_tool_calls: usize,
    pub max_iterations: usize,
    pub max_calls_per_tool: usize,
    /// 同一工具两次查询的词重叠（Jaccard）达到该值即视为重复
    pub similarity_threshold: f64,
}

impl Default for SoftLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            max_iterations: 5,
            max_calls_per_tool: 3,
            similarity_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Init,
    Thinking,
    ToolResult,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    pub kind: EntryKind,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<ContextHandle>,
    /// 压缩后的摘要；Some 之后条目以摘要形式出现在 budgeted view 中
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compacted: Option<String>,
}

impl ScratchpadEntry {
    fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            content: content.into(),
            tool: None,
            task_id: None,
            handle: None,
            compacted: None,
        }
    }

    /// 当前生效的文本（压缩后为摘要）
    pub fn effective_text(&self) -> &str {
        self.compacted.as_deref().unwrap_or(&self.content)
    }

    fn render(&self) -> String {
        match self.kind {
            EntryKind::Init => format!("[query] {}", self.effective_text()),
            EntryKind::Thinking => format!("[thinking] {}", self.effective_text()),
            EntryKind::ToolResult => match &self.handle {
                Some(h) => format!("[tool] {} (context: {})", self.effective_text(), h),
                None => format!("[tool] {}", self.effective_text()),
            },
            EntryKind::Warning => format!("[warning] {}", self.effective_text()),
        }
    }
}

/// `done` 事件与会话日志中的工具调用记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub task_id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 单个查询的工作记忆
#[derive(Debug, Clone)]
pub struct Scratchpad {
    query: String,
    query_id: QueryId,
    limits: SoftLimits,
    entries: Vec<ScratchpadEntry>,
    messages: Vec<Message>,
    outcomes: Vec<(String, ToolCallOutcome)>,
    tool_calls: usize,
    iterations: usize,
    calls_per_tool: BTreeMap<String, usize>,
    queries_per_tool: HashMap<String, Vec<String>>,
}

impl Scratchpad {
    pub fn new(query: impl Into<String>, limits: SoftLimits) -> Self {
        let query = query.into();
        let query_id = QueryId::from_query(&query);
        Self {
            entries: vec![ScratchpadEntry::new(EntryKind::Init, query.clone())],
            messages: vec![Message::user(query.clone())],
            query,
            query_id,
            limits,
            outcomes: Vec::new(),
            tool_calls: 0,
            iterations: 0,
            calls_per_tool: BTreeMap::new(),
            queries_per_tool: HashMap::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    pub fn limits(&self) -> &SoftLimits {
        &self.limits
    }

    pub fn entries(&self) -> &[ScratchpadEntry] {
        &self.entries
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn calls_for(&self, tool: &str) -> usize {
        self.calls_per_tool.get(tool).copied().unwrap_or(0)
    }

    /// 已记录的全部工具调用结果（调用顺序）
    pub fn outcomes(&self) -> impl Iterator<Item = &ToolCallOutcome> {
        self.outcomes.iter().map(|(_, o)| o)
    }

    pub fn has_tool_results(&self) -> bool {
        !self.outcomes.is_empty()
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_thinking(&mut self, thought: impl Into<String>) {
        let thought = thought.into();
        if thought.trim().is_empty() {
            return;
        }
        self.entries.push(ScratchpadEntry::new(EntryKind::Thinking, thought));
    }

    fn add_warning(&mut self, warning: String) {
        tracing::warn!(warning = %warning, "soft limit exceeded");
        self.entries.push(ScratchpadEntry::new(EntryKind::Warning, warning));
    }

    /// 开始新一轮规划；超过软限制只产生 warning
    pub fn next_iteration(&mut self) -> usize {
        self.iterations += 1;
        if self.iterations > self.limits.max_iterations {
            self.add_warning(format!(
                "Iteration {} exceeds the suggested limit of {}. Prefer answering with the data already gathered.",
                self.iterations, self.limits.max_iterations
            ));
        }
        self.iterations
    }

    /// 登记一次即将执行的工具调用：计数递增并检查软限制，返回新追加的 warning（调用照常执行）
    pub fn register_call(&mut self, call: &ToolCall) -> Vec<String> {
        let query_text = call_query_text(call);
        let previous = self
            .queries_per_tool
            .get(&call.tool)
            .cloned()
            .unwrap_or_default();

        self.tool_calls += 1;
        let per_tool = {
            let count = self.calls_per_tool.entry(call.tool.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.queries_per_tool
            .entry(call.tool.clone())
            .or_default()
            .push(query_text.clone());

        let mut warnings = Vec::new();
        if self.tool_calls > self.limits.max_tool_calls {
            warnings.push(format!(
                "Tool call {} exceeds the suggested limit of {} calls for this query. Work with the data you already have.",
                self.tool_calls, self.limits.max_tool_calls
            ));
        }
        if per_tool > self.limits.max_calls_per_tool {
            warnings.push(format!(
                "Tool '{}' has been called {} times (suggested limit: {}). Consider a different tool or proceed with what you have.",
                call.tool, per_tool, self.limits.max_calls_per_tool
            ));
        } else if !query_text.is_empty()
            && previous
                .iter()
                .any(|p| p == &query_text || similarity(p, &query_text) >= self.limits.similarity_threshold)
        {
            warnings.push(format!(
                "This query is very similar to a previous '{}' call. You have {} attempt(s) before reaching the suggested limit. Try different terms or acknowledge the data limitation.",
                call.tool,
                self.limits.max_calls_per_tool - per_tool
            ));
        } else if per_tool == self.limits.max_calls_per_tool {
            warnings.push(format!(
                "You are approaching the suggested limit for '{}' ({}/{}). If this doesn't return the needed data, consider a different approach.",
                call.tool, per_tool, self.limits.max_calls_per_tool
            ));
        }

        for w in &warnings {
            self.add_warning(w.clone());
        }
        warnings
    }

    /// 追加一个已结束的工具调用结果；tool_result 条目保存摘要，大输出只保存 Handle
    pub fn record_outcome(&mut self, task_id: &str, outcome: ToolCallOutcome) {
        let describe = outcome.call().describe();
        let (content, handle) = match (outcome.status(), outcome.output()) {
            (OutcomeStatus::Succeeded, Some(OutcomePayload::Handle(h))) => (
                outcome
                    .summary()
                    .map(String::from)
                    .unwrap_or_else(|| format!("{}: output stored", describe)),
                Some(h.clone()),
            ),
            (OutcomeStatus::Succeeded, Some(OutcomePayload::Inline(text))) => (
                match outcome.summary() {
                    Some(s) => s.to_string(),
                    None => format!("{}: {}", describe, text),
                },
                None,
            ),
            (OutcomeStatus::Cancelled, _) => (
                format!(
                    "{} [CANCELLED]: {}",
                    describe,
                    outcome.error().unwrap_or("cancelled")
                ),
                None,
            ),
            _ => (
                outcome.summary().map(String::from).unwrap_or_else(|| {
                    format!(
                        "{} [FAILED]: {}",
                        describe,
                        outcome.error().unwrap_or("unknown error")
                    )
                }),
                None,
            ),
        };

        let mut entry = ScratchpadEntry::new(EntryKind::ToolResult, content);
        entry.tool = Some(outcome.call().tool.clone());
        entry.task_id = Some(task_id.to_string());
        entry.handle = handle;
        self.entries.push(entry);
        self.outcomes.push((task_id.to_string(), outcome));
    }

    /// 供后续 prompt 使用的工具结果摘要（压缩后取摘要）
    pub fn tool_summaries(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::ToolResult)
            .map(|e| e.effective_text().to_string())
            .collect()
    }

    /// 全部 warning 文本（按追加顺序）
    pub fn warnings(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Warning)
            .map(|e| e.content.as_str())
            .collect()
    }

    /// 最近的 n 条 warning（供下一次模型调用）
    pub fn recent_warnings(&self, n: usize) -> Vec<String> {
        let all = self.warnings();
        let skip = all.len().saturating_sub(n);
        all.into_iter().skip(skip).map(String::from).collect()
    }

    pub fn tool_call_records(&self) -> Vec<ToolCallRecord> {
        self.outcomes
            .iter()
            .map(|(task_id, o)| ToolCallRecord {
                task_id: task_id.clone(),
                tool: o.call().tool.clone(),
                args: o.call().args.clone(),
                status: o.status(),
                summary: o.summary().map(String::from),
                error: o.error().map(String::from),
            })
            .collect()
    }

    /// 已卸载到 Context Store 的 Handle（调用顺序）
    pub fn handles(&self) -> Vec<ContextHandle> {
        self.entries.iter().filter_map(|e| e.handle.clone()).collect()
    }

    /// 各工具调用计数（不含标题）；尚无调用时为 None
    pub fn usage_section(&self) -> Option<String> {
        if self.calls_per_tool.is_empty() {
            return None;
        }
        let max = self.limits.max_calls_per_tool;
        let lines: Vec<String> = self
            .calls_per_tool
            .iter()
            .map(|(tool, &count)| {
                if count >= max {
                    format!("- {}: {} calls (over suggested limit of {})", tool, count, max)
                } else {
                    format!("- {}: {}/{} calls", tool, count, max)
                }
            })
            .collect();
        Some(format!(
            "{}\n\nTotal: {}/{} calls.",
            lines.join("\n"),
            self.tool_calls,
            self.limits.max_tool_calls
        ))
    }

    /// 全量视图：全部条目按追加顺序（压缩条目以摘要出现）
    pub fn full_view(&self) -> String {
        self.entries.iter().map(|e| e.render()).collect::<Vec<_>>().join("\n")
    }

    /// 预算视图：从最新条目往前取，压缩条目以摘要出现；放不下的更早条目以一行标记代替。
    /// init 条目（查询原文）始终保留；全部放得下时与全量视图相同。
    pub fn budgeted_view(&self, budget_tokens: usize) -> String {
        if !self.exceeds_budget(budget_tokens) {
            return self.full_view();
        }
        let mut remaining = budget_tokens.saturating_sub(TokenEstimator::estimate(&self.entries[0].render()));
        let mut kept: Vec<String> = Vec::new();
        let mut omitted = 0;

        for entry in self.entries.iter().skip(1).rev() {
            if omitted > 0 {
                omitted += 1;
                continue;
            }
            let line = entry.render();
            let cost = TokenEstimator::estimate(&line);
            if cost <= remaining {
                remaining -= cost;
                kept.push(line);
            } else {
                omitted += 1;
            }
        }

        let mut lines = vec![self.entries[0].render()];
        if omitted > 0 {
            lines.push(format!("[{} earlier entries omitted]", omitted));
        }
        lines.extend(kept.into_iter().rev());
        lines.join("\n")
    }

    /// 当前生效内容（含压缩摘要）的估算 token 数
    pub fn effective_tokens(&self) -> usize {
        self.entries
            .iter()
            .map(|e| TokenEstimator::estimate(&e.render()))
            .sum()
    }

    pub fn exceeds_budget(&self, budget_tokens: usize) -> bool {
        self.effective_tokens() > budget_tokens
    }

    /// 可压缩条目：未压缩的 thinking / tool_result，且不在最近 keep_recent 条之内
    pub fn compaction_candidates(&self, keep_recent: usize) -> Vec<usize> {
        let cutoff = self.entries.len().saturating_sub(keep_recent);
        self.entries
            .iter()
            .enumerate()
            .take(cutoff)
            .filter(|(_, e)| {
                matches!(e.kind, EntryKind::Thinking | EntryKind::ToolResult) && e.compacted.is_none()
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// 用摘要替换条目；越界或已压缩时返回 false（幂等）
    pub fn compact(&mut self, index: usize, summary: impl Into<String>) -> bool {
        match self.entries.get_mut(index) {
            Some(entry)
                if entry.compacted.is_none()
                    && matches!(entry.kind, EntryKind::Thinking | EntryKind::ToolResult) =>
            {
                entry.compacted = Some(summary.into());
                true
            }
            _ => false,
        }
    }
}

/// 工具调用中用于相似度比较的文本：所有字符串参数值拼接
fn call_query_text(call: &ToolCall) -> String {
    match &call.args {
        serde_json::Value::Object(map) => map
            .values()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

static WORD_RE: OnceLock<Regex> = OnceLock::new();

fn word_set(text: &str) -> HashSet<String> {
    let re = WORD_RE.get_or_init(|| Regex::new(r"\w+").unwrap());
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

/// 词重叠相似度（Jaccard）
pub fn similarity(a: &str, b: &str) -> f64 {
    let (wa, wb) = (word_set(a), word_set(b));
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    inter as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(tool: &str, q: &str) -> ToolCall {
        ToolCall::new(tool, json!({ "q": q }))
    }

    fn succeeded(tool: &str, q: &str, out: &str) -> ToolCallOutcome {
        ToolCallOutcome::pending(call(tool, q))
            .running()
            .succeed(OutcomePayload::Inline(out.into()), None, 1)
    }

    #[test]
    fn test_soft_limit_warns_but_counts() {
        let limits = SoftLimits {
            max_tool_calls: 10,
            max_calls_per_tool: 100,
            ..Default::default()
        };
        let mut pad = Scratchpad::new("q", limits);
        for i in 0..10 {
            let warnings = pad.register_call(&call("calc", &format!("{} unique{}", i, i * 7919)));
            assert!(warnings.is_empty(), "call {} warned: {:?}", i, warnings);
        }
        let warnings = pad.register_call(&call("calc", "eleventh distinct"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Tool call 11"));
        assert_eq!(pad.tool_calls(), 11);
        assert_eq!(pad.warnings().len(), 1);
    }

    #[test]
    fn test_similar_query_warning() {
        let mut pad = Scratchpad::new("q", SoftLimits::default());
        assert!(pad.register_call(&call("search", "weather in Paris today")).is_empty());
        let w = pad.register_call(&call("search", "weather in paris today"));
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("very similar"));
        assert!(w[0].contains("1 attempt(s)"));
    }

    #[test]
    fn test_per_tool_limit_warning() {
        let mut pad = Scratchpad::new("q", SoftLimits::default());
        for q in ["alpha", "beta"] {
            assert!(pad.register_call(&call("search", q)).is_empty());
        }
        let w = pad.register_call(&call("search", "gamma"));
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("approaching the suggested limit for 'search' (3/3)"));
        let w = pad.register_call(&call("search", "delta"));
        assert!(w[0].contains("called 4 times"));
        assert_eq!(pad.calls_for("search"), 4);

        let recent = pad.recent_warnings(1);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].contains("called 4 times"));
        assert_eq!(pad.recent_warnings(10).len(), 2);
    }

    #[test]
    fn test_iteration_counter_is_soft() {
        let limits = SoftLimits {
            max_iterations: 1,
            ..Default::default()
        };
        let mut pad = Scratchpad::new("q", limits);
        assert_eq!(pad.next_iteration(), 1);
        assert!(pad.warnings().is_empty());
        assert_eq!(pad.next_iteration(), 2);
        assert_eq!(pad.warnings().len(), 1);
    }

    #[test]
    fn test_record_outcome_in_order() {
        let mut pad = Scratchpad::new("q", SoftLimits::default());
        pad.record_outcome("t1", succeeded("calculator", "2+2", "4"));
        pad.record_outcome(
            "t1",
            ToolCallOutcome::pending(call("weather", "Paris")).running().fail("down", 3),
        );
        let summaries = pad.tool_summaries();
        assert_eq!(summaries[0], "calculator(q=2+2): 4");
        assert_eq!(summaries[1], "weather(q=Paris) [FAILED]: down");
        assert_eq!(pad.tool_call_records()[1].status, OutcomeStatus::Failed);
    }

    #[test]
    fn test_compaction_idempotent() {
        let mut pad = Scratchpad::new("q", SoftLimits::default());
        pad.add_thinking("first long thought");
        pad.add_thinking("second thought");
        pad.add_thinking("third thought");

        let candidates = pad.compaction_candidates(1);
        assert_eq!(candidates, vec![1, 2]);
        assert!(pad.compact(1, "short"));
        assert!(!pad.compact(1, "again"));
        assert_eq!(pad.entries()[1].effective_text(), "short");
        assert_eq!(pad.compaction_candidates(1), vec![2]);
        // init 条目不可压缩
        assert!(!pad.compact(0, "x"));
    }

    #[test]
    fn test_budgeted_view_keeps_newest() {
        let mut pad = Scratchpad::new("question", SoftLimits::default());
        for i in 0..50 {
            pad.add_thinking(format!("thought number {} {}", i, "padding ".repeat(10)));
        }
        let view = pad.budgeted_view(200);
        assert!(view.starts_with("[query] question"));
        assert!(view.contains("earlier entries omitted"));
        assert!(view.contains("thought number 49"));
        assert!(!view.contains("thought number 0 "));
        assert!(pad.full_view().contains("thought number 0 "));
        assert_eq!(pad.budgeted_view(usize::MAX / 2), pad.full_view());
        assert!(pad.exceeds_budget(200));
    }

    #[test]
    fn test_similarity() {
        assert!(similarity("weather in Paris", "Paris weather") > 0.6);
        assert_eq!(similarity("", "x"), 0.0);
        assert!(similarity("apple pie", "quantum physics") < 0.1);
    }
}
