//! Answer 阶段：基于 Scratchpad 合成最终回复（流式输出 answer_chunk）
//!
//! 回填 Context Handle 对应的原始输出：全部放得下时直接回填，超出预算时由 selector 模型
//! 根据摘要挑选需要完整数据的结果，其余只保留摘要。

use std::sync::Arc;

use futures_util::StreamExt;

use crate::context::{ContextRecord, ContextStore};
use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Scratchpad, TokenEstimator};
use crate::phases::events::{AgentEvent, EventSink};
use crate::phases::parse::parse_json;
use crate::phases::prompts::{
    build_answer_user, build_context_select_user, messages, ContextCandidate, ANSWER_SYSTEM, CONTEXT_SELECT_SYSTEM,
};
use crate::plan::{OutcomePayload, OutcomeStatus};

/// 可回填的一条工具结果
struct Rehydratable {
    call: String,
    summary: String,
    record: ContextRecord,
    tokens: usize,
}

pub struct Answerer {
    llm: Arc<dyn LlmClient>,
    selector: Arc<dyn LlmClient>,
    store: Arc<dyn ContextStore>,
}

impl Answerer {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn ContextStore>) -> Self {
        Self {
            selector: llm.clone(),
            llm,
            store,
        }
    }

    /// 挑选回填内容使用的模型（通常是更快的小模型）
    pub fn with_selector(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.selector = llm;
        self
    }

    /// 成功调用的大输出；读取失败只记录告警
    async fn candidates(&self, scratchpad: &Scratchpad) -> Vec<Rehydratable> {
        let mut out: Vec<Rehydratable> = Vec::new();
        for outcome in scratchpad.outcomes() {
            if outcome.status() != OutcomeStatus::Succeeded {
                continue;
            }
            let Some(OutcomePayload::Handle(handle)) = outcome.output() else {
                continue;
            };
            if out.iter().any(|c| &c.record.handle() == handle) {
                continue;
            }
            match self.store.get(handle).await {
                Ok(record) => out.push(Rehydratable {
                    call: outcome.call().describe(),
                    summary: outcome.summary().unwrap_or("(no summary)").to_string(),
                    tokens: TokenEstimator::estimate(&record.payload),
                    record,
                }),
                Err(e) => tracing::warn!(handle = %handle, error = %e, "failed to rehydrate context"),
            }
        }
        out
    }

    /// selector 模型返回的下标；失败时为空（只用摘要）
    async fn select(&self, query: &str, candidates: &[Rehydratable], budget_tokens: usize) -> Vec<usize> {
        let list: Vec<ContextCandidate<'_>> = candidates
            .iter()
            .enumerate()
            .map(|(index, c)| ContextCandidate {
                index,
                call: &c.call,
                summary: &c.summary,
                tokens: c.tokens,
            })
            .collect();
        let prompt = messages(CONTEXT_SELECT_SYSTEM, build_context_select_user(query, &list, budget_tokens));
        let reply = match self.selector.complete(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "context selection failed, using summaries only");
                return Vec::new();
            }
        };
        match parse_json::<Vec<usize>>(&reply) {
            Ok(indices) => indices,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable context selection, using summaries only");
                Vec::new()
            }
        }
    }

    /// 在预算内回填完整输出
    pub async fn rehydrate(&self, scratchpad: &Scratchpad, budget_tokens: usize) -> Vec<String> {
        let candidates = self.candidates(scratchpad).await;
        if candidates.is_empty() {
            return Vec::new();
        }
        let total: usize = candidates.iter().map(|c| c.tokens).sum();
        let chosen: Vec<usize> = if total <= budget_tokens {
            (0..candidates.len()).collect()
        } else {
            tracing::info!(total, budget_tokens, candidates = candidates.len(), "selecting context to rehydrate");
            self.select(scratchpad.query(), &candidates, budget_tokens).await
        };

        let mut remaining = budget_tokens;
        let mut used = vec![false; candidates.len()];
        let mut sections = Vec::new();
        for idx in chosen {
            let Some(c) = candidates.get(idx) else {
                continue;
            };
            if used[idx] {
                continue;
            }
            if c.tokens > remaining {
                tracing::debug!(handle = %c.record.handle(), cost = c.tokens, remaining, "context too large to rehydrate");
                continue;
            }
            used[idx] = true;
            remaining -= c.tokens;
            sections.push(format!("### {} ({})\n{}", c.record.tool, c.record.handle(), c.record.payload));
        }
        sections
    }

    /// 单次尝试：流式生成并逐段发出 answer_chunk；已输出部分内容后流中断则保留已得内容
    pub async fn run(
        &self,
        scratchpad: &Scratchpad,
        gathered: &str,
        budget_tokens: usize,
        events: &EventSink,
    ) -> Result<String, AgentError> {
        let context_budget = budget_tokens / 2;
        let mut context = gathered.to_string();
        let rehydrated = self
            .rehydrate(scratchpad, context_budget.saturating_sub(TokenEstimator::estimate(gathered)))
            .await;
        if !rehydrated.is_empty() {
            context.push_str("\n\n## Full tool outputs\n");
            context.push_str(&rehydrated.join("\n\n"));
        }

        let prompt = messages(ANSWER_SYSTEM, build_answer_user(scratchpad.query(), &context));
        let mut stream = self.llm.complete_stream(&prompt).await?;

        let mut answer = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) if text.is_empty() => {}
                Ok(text) => {
                    answer.push_str(&text);
                    events.emit(AgentEvent::AnswerChunk { text }).await;
                }
                Err(e) if answer.is_empty() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(error = %e, "answer stream interrupted, keeping partial answer");
                    break;
                }
            }
        }

        if answer.trim().is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }
        tracing::info!(chars = answer.chars().count(), "answer generated");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextRecord, InMemoryContextStore};
    use crate::llm::FnLlmClient;
    use crate::memory::SoftLimits;
    use crate::plan::{OutcomePayload, ToolCall, ToolCallOutcome};
    use crate::phases::prompts::PromptKind;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_answer_streams_chunks_with_rehydrated_context() {
        let store = Arc::new(InMemoryContextStore::new());
        let mut pad = Scratchpad::new("big question", SoftLimits::default());
        let call = ToolCall::new("search", serde_json::json!({"q": "rust"}));
        let handle = store
            .put(ContextRecord::new(pad.query_id().clone(), "search", call.args.clone(), "FULL PAYLOAD"))
            .await
            .unwrap();
        pad.record_outcome(
            "task_1_0",
            ToolCallOutcome::pending(call)
                .running()
                .succeed(OutcomePayload::Handle(handle), Some("search: found".into()), 1),
        );

        let llm = Arc::new(
            FnLlmClient::new(|messages| {
                assert_eq!(PromptKind::of(messages), PromptKind::Answer);
                assert!(messages[1].content.contains("FULL PAYLOAD"));
                Ok("Rust is a language.".into())
            })
            .with_chunk_size(5),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let answer = Answerer::new(llm, store)
            .run(&pad, "- search: found", 4000, &EventSink::new(tx))
            .await
            .unwrap();
        assert_eq!(answer, "Rust is a language.");

        let mut streamed = String::new();
        let mut chunks = 0;
        while let Ok(AgentEvent::AnswerChunk { text }) = rx.try_recv() {
            streamed.push_str(&text);
            chunks += 1;
        }
        assert_eq!(streamed, answer);
        assert!(chunks > 1);
    }

    async fn offloaded(store: &InMemoryContextStore, pad: &mut Scratchpad, tool: &str, payload: String) {
        let call = ToolCall::new(tool, serde_json::json!({"q": tool}));
        let handle = store
            .put(ContextRecord::new(pad.query_id().clone(), tool, call.args.clone(), payload))
            .await
            .unwrap();
        pad.register_call(&call);
        pad.record_outcome(
            "task_1_0",
            ToolCallOutcome::pending(call)
                .running()
                .succeed(OutcomePayload::Handle(handle), Some(format!("{} summary", tool)), 1),
        );
    }

    #[tokio::test]
    async fn test_over_budget_context_is_chosen_by_selector() {
        let store = Arc::new(InMemoryContextStore::new());
        let mut pad = Scratchpad::new("compare", SoftLimits::default());
        offloaded(&store, &mut pad, "alpha", format!("ALPHA {}", "a".repeat(2000))).await;
        offloaded(&store, &mut pad, "bravo", format!("BRAVO {}", "b".repeat(2000))).await;
        pad.record_outcome(
            "task_1_0",
            ToolCallOutcome::pending(ToolCall::new("charlie", serde_json::json!({}))).fail("boom", 1),
        );

        let llm = Arc::new(FnLlmClient::new(|messages| match PromptKind::of(messages) {
            PromptKind::SelectContext => {
                let user = &messages[1].content;
                assert!(user.contains("[0] alpha"));
                assert!(user.contains("[1] bravo"));
                assert!(user.contains("bravo summary"));
                assert!(!user.contains("charlie"));
                Ok("[1]".into())
            }
            PromptKind::Answer => {
                let user = &messages[1].content;
                assert!(user.contains("BRAVO"));
                assert!(!user.contains("ALPHA"));
                Ok("Bravo wins.".into())
            }
            other => panic!("unexpected prompt {:?}", other),
        }));
        let answer = Answerer::new(llm.clone(), store)
            .with_selector(llm.clone())
            .run(&pad, "- alpha summary\n- bravo summary", 1600, &EventSink::none())
            .await
            .unwrap();
        assert_eq!(answer, "Bravo wins.");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_selection_keeps_summaries_only() {
        let store = Arc::new(InMemoryContextStore::new());
        let mut pad = Scratchpad::new("compare", SoftLimits::default());
        offloaded(&store, &mut pad, "alpha", format!("ALPHA {}", "a".repeat(4000))).await;

        let selector = Arc::new(FnLlmClient::new(|_| Ok("all of them".into())));
        let llm = Arc::new(FnLlmClient::new(|messages| {
            assert!(!messages[1].content.contains("ALPHA"));
            Ok("From summaries.".into())
        }));
        let answer = Answerer::new(llm, store)
            .with_selector(selector.clone())
            .run(&pad, "- alpha summary", 1000, &EventSink::none())
            .await
            .unwrap();
        assert_eq!(answer, "From summaries.");
        assert_eq!(selector.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_answer_is_error() {
        let llm = Arc::new(FnLlmClient::new(|_| Ok("   ".into())));
        let pad = Scratchpad::new("q", SoftLimits::default());
        let err = Answerer::new(llm, Arc::new(InMemoryContextStore::new()))
            .run(&pad, "", 1000, &EventSink::none())
            .await
            .unwrap_err();
        assert!(err.is_model_error());
    }
}
