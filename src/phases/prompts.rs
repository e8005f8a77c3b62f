//! 各阶段 Prompt
//!
//! 每个阶段的 system prompt 以固定的首句开头，`PromptKind::of` 据此识别调用来自哪一步
//! （Mock 客户端与测试脚本依赖这一点）。

use crate::memory::{system_content, Message};
use crate::plan::Understanding;

pub const UNDERSTAND_SYSTEM: &str = "You are the query understanding step of a research assistant.
Extract what the user wants to accomplish and the key entities in the query.

Respond with JSON only:
{\"intent\": \"<one sentence>\", \"entities\": [{\"kind\": \"location|date|person|organization|quantity|other\", \"value\": \"...\"}]}";

pub const PLAN_SYSTEM: &str = "You are the planning step of a research assistant.
Break the query into at most 5 tasks. Use task_type \"use_tools\" for tasks that must gather data with tools
and \"reason\" for tasks that only combine data already gathered. Do not choose tools here.
Return an empty task list when the query can be answered without tools.

Respond with JSON only:
{\"summary\": \"<one sentence>\", \"tasks\": [{\"description\": \"...\", \"task_type\": \"use_tools|reason\", \"depends_on\": [\"task_0\"]}]}
Dependencies refer to earlier tasks of the same plan by position: task_0, task_1, ...";

pub const SELECT_SYSTEM: &str = "You are the tool selection step of a research assistant.
Choose the tool calls needed to complete the current task. Calls you return run concurrently.

## Tool usage guidelines

1. Call tools only when you need information you don't have
2. Do not repeat a call that was already made with the same arguments
3. When you see a warning about tool usage limits, stop calling that tool";

pub const REASON_SYSTEM: &str = "You are the reasoning step of a research assistant.
Complete the current task using only the data already gathered. Be concise and concrete.";

pub const REFLECT_SYSTEM: &str = "You are the reflection step of a research assistant.
Decide whether the data gathered so far is enough to answer the query.

Respond with JSON only:
{\"is_complete\": true|false, \"reasoning\": \"...\", \"missing_info\": [\"...\"], \"suggested_next_steps\": \"...\"}";

pub const ANSWER_SYSTEM: &str = "You are the answer step of a research assistant.
Write the final answer from the gathered data. Answer with what you have and note any gaps.
Do not invent data that is not in the context.";

pub const CONTEXT_SELECT_SYSTEM: &str = "You are the context selection step of a research assistant.
The full tool results do not all fit in the answer context. Pick the results whose full data is needed
to answer the query; the rest are passed as summaries.

Respond with a JSON array of result indices only, e.g. [0, 2]";

pub const SUMMARIZE_SYSTEM: &str = "You are the tool result summarization step of a research assistant.
Summarize the tool result in 1-2 sentences, keeping the facts relevant to the query.";

pub const COMPACT_SYSTEM: &str = "You are the scratchpad compaction step of a research assistant.
Rewrite the entry as one short sentence that keeps every number, name and conclusion.";

/// 一次模型调用所属的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Understand,
    Plan,
    SelectTools,
    Reason,
    Reflect,
    Answer,
    SelectContext,
    Summarize,
    Compact,
    Other,
}

impl PromptKind {
    pub fn of(messages: &[Message]) -> Self {
        let Some(system) = system_content(messages) else {
            return PromptKind::Other;
        };
        let first_line = system.lines().next().unwrap_or_default();
        [
            (UNDERSTAND_SYSTEM, PromptKind::Understand),
            (PLAN_SYSTEM, PromptKind::Plan),
            (SELECT_SYSTEM, PromptKind::SelectTools),
            (REASON_SYSTEM, PromptKind::Reason),
            (REFLECT_SYSTEM, PromptKind::Reflect),
            (ANSWER_SYSTEM, PromptKind::Answer),
            (CONTEXT_SELECT_SYSTEM, PromptKind::SelectContext),
            (SUMMARIZE_SYSTEM, PromptKind::Summarize),
            (COMPACT_SYSTEM, PromptKind::Compact),
        ]
        .into_iter()
        .find(|(prompt, _)| prompt.lines().next() == Some(first_line))
        .map(|(_, kind)| kind)
        .unwrap_or(PromptKind::Other)
    }
}

fn bullet_section(title: &str, items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    format!(
        "\n\n## {}\n{}",
        title,
        items.iter().map(|s| format!("- {}", s)).collect::<Vec<_>>().join("\n")
    )
}

fn optional_section(title: &str, body: Option<&str>) -> String {
    match body {
        Some(b) if !b.trim().is_empty() => format!("\n\n## {}\n{}", title, b.trim()),
        _ => String::new(),
    }
}

pub fn build_understand_user(query: &str, memory: &[String]) -> String {
    format!(
        "Query: {}{}",
        query,
        bullet_section("Relevant past answers", memory)
    )
}

/// Plan 阶段的输入
pub struct PlanPrompt<'a> {
    pub query: &'a str,
    pub understanding: &'a Understanding,
    pub memory: &'a [String],
    pub tools: &'a str,
    /// 之前各轮计划的 ✓/✗ 摘要
    pub prior_work: &'a str,
    pub guidance: Option<&'a str>,
    pub scratchpad: &'a str,
}

pub fn build_plan_user(p: &PlanPrompt<'_>) -> String {
    format!(
        "Query: {}\n\n## Understanding\n{}{}\n\n## Available tools\n{}{}{}{}",
        p.query,
        p.understanding.to_prompt_section().trim_end(),
        bullet_section("Relevant past answers", p.memory),
        p.tools,
        optional_section("Prior work", Some(p.prior_work)),
        optional_section("Guidance from reflection", p.guidance),
        optional_section("Scratchpad", Some(p.scratchpad)),
    )
}

pub fn build_select_user(
    query: &str,
    understanding: &Understanding,
    task: &str,
    tool_summaries: &[String],
    usage: Option<&str>,
    warnings: &[String],
) -> String {
    format!(
        "Query: {}\n\n## Understanding\n{}\n## Current task\n{}{}{}{}",
        query,
        understanding.to_prompt_section(),
        task,
        bullet_section("Data gathered", tool_summaries),
        optional_section("Tool usage this query", usage),
        bullet_section("Warnings", warnings),
    )
}

pub fn build_reason_user(query: &str, task: &str, gathered: &str) -> String {
    format!(
        "Query: {}\n\n## Current task\n{}{}",
        query,
        task,
        optional_section("Gathered data", Some(gathered)),
    )
}

pub fn build_reflect_user(
    query: &str,
    understanding: &Understanding,
    plans: &str,
    gathered: &str,
    warnings: &[String],
    iteration: usize,
    max_iterations: usize,
) -> String {
    format!(
        "Query: {}\n\n## Understanding\n{}\n## Plans so far\n{}{}{}\n\nThis is planning pass {} of at most {}.",
        query,
        understanding.to_prompt_section(),
        plans,
        optional_section("Gathered data", Some(gathered)),
        bullet_section("Warnings", warnings),
        iteration,
        max_iterations
    )
}

pub fn build_answer_user(query: &str, context: &str) -> String {
    format!(
        "Query: {}\n\n## Gathered data\n{}\n\nProvide a comprehensive answer based on the data above.",
        query,
        if context.trim().is_empty() { "(none)" } else { context }
    )
}

/// 供上下文选择的一条候选：序号、调用描述、摘要、估算 token
pub struct ContextCandidate<'a> {
    pub index: usize,
    pub call: &'a str,
    pub summary: &'a str,
    pub tokens: usize,
}

pub fn build_context_select_user(query: &str, candidates: &[ContextCandidate<'_>], budget_tokens: usize) -> String {
    let list = candidates
        .iter()
        .map(|c| format!("[{}] {} (~{} tokens): {}", c.index, c.call, c.tokens, c.summary))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Query: {}\n\n## Tool results\n{}\n\nToken budget for full data: {}",
        query, list, budget_tokens
    )
}

pub fn build_summary_user(query: &str, tool: &str, result: &str) -> String {
    let clipped: String = result.chars().take(3000).collect();
    format!(
        "Focus on information relevant to: {}\n\nTool: {}\nResult: {}\n\nSummary:",
        query, tool, clipped
    )
}

pub fn build_compact_user(entry: &str) -> String {
    format!("Entry:\n{}\n\nShort version:", entry)
}

/// system + user 两条消息
pub fn messages(system: &str, user: String) -> Vec<Message> {
    vec![Message::system(system), Message::user(user)]
}
