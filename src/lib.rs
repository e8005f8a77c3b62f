//! waggle - 阶段式智能体编排内核
//!
//! 模块划分：
//! - **agent**: 启动装配（按配置构建 Orchestrator）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: Context Store（大输出卸载，Handle 寻址）
//! - **core**: 错误与恢复、阶段状态机、会话监管、工具并发池、编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）与工具调用协议
//! - **memory**: Scratchpad、长期记忆、会话日志、Token 估算
//! - **phases**: Understand / Plan / Reflect / Answer 各阶段、事件与 Prompt
//! - **plan**: Task / Plan 数据模型与依赖图校验
//! - **tools**: 工具注册表、执行器与内置工具

pub mod agent;
pub mod config;
pub mod context;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod phases;
pub mod plan;
pub mod tools;

pub use crate::core::{Orchestrator, QueryReport, QueryRun};
pub use crate::phases::AgentEvent;
