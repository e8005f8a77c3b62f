//! Context Store：把大块工具输出移出模型上下文，只在 Scratchpad 中保留 Handle
//!
//! - `handle`：QueryId 与内容派生的 ContextHandle
//! - `store`：ContextStore trait、ContextRecord、内存实现
//! - `file_store`：磁盘实现（跨重启持久）

pub mod file_store;
pub mod handle;
pub mod store;

pub use file_store::FileContextStore;
pub use handle::{ContextHandle, QueryId};
pub use store::{ContextRecord, ContextStore, ContextStoreError, InMemoryContextStore};
