//! 各阶段实现：Understand / Plan / reason 任务 / Reflect / Answer，以及事件与 Prompt
//!
//! 每个阶段只做一次模型调用尝试；重试、取消与阶段迁移由 `core::orchestrator` 负责。

pub mod answer;
pub mod events;
pub mod parse;
pub mod planner;
pub mod prompts;
pub mod reason;
pub mod reflect;
pub mod understand;

pub use answer::Answerer;
pub use events::{AgentEvent, EventSink};
pub use planner::Planner;
pub use prompts::PromptKind;
pub use reason::Reasoner;
pub use reflect::{ReflectInput, Reflection, Reflector};
pub use understand::Understander;
