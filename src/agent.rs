//! 启动装配：按配置构建 LLM、工具注册表、Context Store、长期记忆与会话日志，得到 Orchestrator

use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::context::{ContextStore, FileContextStore};
use crate::core::{Orchestrator, TaskScheduler};
use crate::llm::create_llm_from_config;
use crate::memory::{InMemoryLongTerm, JsonlSessionLog};
use crate::tools::{CalculatorTool, ContextReadTool, EchoTool, ToolExecutor, ToolRegistry};

/// 长期记忆保留的问答条数
const LONG_TERM_CAPACITY: usize = 2000;

/// 内置工具：calculator / echo / context_read
pub fn default_registry(store: Arc<dyn ContextStore>) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(CalculatorTool);
    tools.register(EchoTool);
    tools.register(ContextReadTool::new(store));
    tools
}

/// 构建可在多个查询间共享的编排器
pub fn build_orchestrator(cfg: &AppConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let (llm, fast_llm) = create_llm_from_config(&cfg.llm).context("Failed to create LLM client")?;
    tracing::info!(provider = %cfg.llm.provider, model = %cfg.llm.model, "llm ready");

    std::fs::create_dir_all(&cfg.app.data_dir)
        .with_context(|| format!("Failed to create data dir {}", cfg.app.data_dir.display()))?;
    let store: Arc<dyn ContextStore> = Arc::new(FileContextStore::new(cfg.context_dir()));

    let registry = default_registry(store.clone());
    tracing::info!(tools = ?registry.tool_names(), "tools registered");

    let executor = ToolExecutor::new(llm.clone(), Arc::new(registry), store.clone(), cfg.executor_settings())
        .with_summarizer(fast_llm.clone())
        .with_scheduler(TaskScheduler::new(cfg.tools.max_concurrent_tools));

    let orchestrator = Orchestrator::new(llm, executor, store)
        .with_fast_llm(fast_llm)
        .with_long_term(Arc::new(InMemoryLongTerm::new(LONG_TERM_CAPACITY)))
        .with_session_log(Arc::new(JsonlSessionLog::new(cfg.session_log_path())))
        .with_settings(cfg.orchestrator_settings());
    Ok(Arc::new(orchestrator))
}
