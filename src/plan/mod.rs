//! 计划模型：Task / Plan / 依赖图

pub mod graph;
pub mod types;

pub use graph::{Plan, PlanGraph};
pub use types::*;
