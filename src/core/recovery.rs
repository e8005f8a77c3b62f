//! 错误恢复引擎
//!
//! 根据 AgentError、所在阶段与已尝试次数返回 RecoveryAction：
//! Understand / Plan / Answer 的模型错误重试一次后终止；Execute 阶段的错误只让当前任务失败。

use crate::core::{AgentError, Phase, RecoveryAction};

/// 模型调用最多重试次数（核心内唯一的自动重试）
pub const MODEL_RETRY_LIMIT: u32 = 1;

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// `attempt` 从 0 开始，表示已经失败的次数减一
    pub fn handle(&self, err: &AgentError, phase: Phase, attempt: u32) -> RecoveryAction {
        if matches!(err, AgentError::Cancelled) {
            return RecoveryAction::Cancel;
        }
        match phase {
            Phase::Execute => RecoveryAction::MarkTaskFailed,
            Phase::Understand | Phase::Plan | Phase::Answer => {
                if err.is_model_error() && attempt < MODEL_RETRY_LIMIT {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::Abort
                }
            }
            _ => RecoveryAction::Abort,
        }
    }
}
