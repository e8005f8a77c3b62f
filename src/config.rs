//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAGGLE__*` 覆盖（双下划线表示嵌套，如 `WAGGLE__LLM__PROVIDER=mock`）。
//! 所有键都有代码内默认值，缺少配置文件时仍可运行。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{IterationCap, OrchestratorSettings};
use crate::memory::SoftLimits;
use crate::tools::{ExecutorSettings, SuccessPolicy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub limits: SoftLimits,
    pub tools: ToolsSection,
    pub context: ContextSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 会话日志与 Context Store 的根目录
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "waggle".to_string(),
            data_dir: PathBuf::from(".waggle"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    pub provider: String,
    pub model: String,
    /// 摘要与压缩使用的小模型；未设置时用 model
    pub fast_model: Option<String>,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            fast_model: None,
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [agent] 段：硬上限与预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 规划轮数硬上限
    pub max_iterations: usize,
    /// Scratchpad 视图与 Answer 回填的 token 预算
    pub token_budget: usize,
    /// 压缩时保留的最新条目数
    pub compact_keep_recent: usize,
    /// 事件通道容量
    pub event_buffer: usize,
    /// 从长期记忆检索的条数
    pub memory_results: usize,
    /// 单个查询的整体超时（秒）；未设置时不限
    pub query_timeout_secs: Option<u64>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            token_budget: 8000,
            compact_keep_recent: 4,
            event_buffer: 32,
            memory_results: 3,
            query_timeout_secs: None,
        }
    }
}

/// [tools] 段：超时、并发与成功策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 单个任务全部调用的截止时间（秒）
    pub task_timeout_secs: Option<u64>,
    pub max_concurrent_tools: usize,
    pub success_policy: SuccessPolicy,
    /// 大输出是否请求模型摘要
    pub summarize_results: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            task_timeout_secs: None,
            max_concurrent_tools: 3,
            success_policy: SuccessPolicy::Any,
            summarize_results: true,
        }
    }
}

/// [context] 段：Context Store 位置与卸载阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 未设置时为 `<data_dir>/context`
    pub dir: Option<PathBuf>,
    pub offload_threshold_chars: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            dir: None,
            offload_threshold_chars: 2000,
        }
    }
}

impl AppConfig {
    pub fn context_dir(&self) -> PathBuf {
        self.context
            .dir
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("context"))
    }

    pub fn session_log_path(&self) -> PathBuf {
        self.app.data_dir.join("sessions.jsonl")
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            call_timeout: Duration::from_secs(self.tools.tool_timeout_secs.max(1)),
            task_timeout: self.tools.task_timeout_secs.map(Duration::from_secs),
            offload_threshold_chars: self.context.offload_threshold_chars,
            summarize_results: self.tools.summarize_results,
            success_policy: self.tools.success_policy,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            iteration_cap: IterationCap::new(self.agent.max_iterations),
            soft_limits: self.limits.clone(),
            token_budget: self.agent.token_budget,
            compact_keep_recent: self.agent.compact_keep_recent,
            event_buffer: self.agent.event_buffer.max(1),
            memory_results: self.agent.memory_results,
        }
    }
}

/// 从 config 目录加载配置，环境变量 WAGGLE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 WAGGLE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WAGGLE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
