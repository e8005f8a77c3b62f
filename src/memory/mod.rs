//! 记忆层：消息、单查询工作记忆（Scratchpad）、长期记忆、会话日志、Token 估算

pub mod long_term;
pub mod message;
pub mod scratchpad;
pub mod session_log;
pub mod token_budget;

pub use long_term::{InMemoryLongTerm, LongTermMemory, NoopLongTerm};
pub use message::{last_user_content, system_content, Message, Role};
pub use scratchpad::{
    similarity, EntryKind, Scratchpad, ScratchpadEntry, SoftLimits, ToolCallRecord,
};
pub use session_log::{JsonlSessionLog, NoopSessionLog, QueryRecord, SessionLog};
pub use token_budget::TokenEstimator;
