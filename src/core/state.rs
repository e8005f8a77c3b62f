//! 阶段状态机：Understand → Plan → Execute → Reflect → Answer → Complete
//!
//! Cancelled 可从任意非终止阶段进入；Failed 表示 Understand / Plan 等阶段本身失败后的终止状态。

use serde::Serialize;

use crate::core::AgentError;

/// 查询所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Understand,
    Plan,
    Execute,
    Reflect,
    Answer,
    Complete,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Cancelled | Phase::Failed)
    }

    /// 合法迁移表
    pub fn can_transition_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Phase::Cancelled | Phase::Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Phase::Understand, Phase::Plan)
                | (Phase::Plan, Phase::Execute)
                | (Phase::Execute, Phase::Execute)
                | (Phase::Execute, Phase::Reflect)
                | (Phase::Reflect, Phase::Plan)
                | (Phase::Reflect, Phase::Answer)
                | (Phase::Answer, Phase::Complete)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Understand => "understand",
            Phase::Plan => "plan",
            Phase::Execute => "execute",
            Phase::Reflect => "reflect",
            Phase::Answer => "answer",
            Phase::Complete => "complete",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 单次查询的阶段机：只允许合法迁移，并记录经过的阶段
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: Phase,
    trail: Vec<Phase>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: Phase::Understand,
            trail: vec![Phase::Understand],
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn trail(&self) -> &[Phase] {
        &self.trail
    }

    pub fn advance(&mut self, next: Phase) -> Result<(), AgentError> {
        if !self.current.can_transition_to(next) {
            return Err(AgentError::Validation(format!(
                "illegal phase transition {} -> {}",
                self.current, next
            )));
        }
        tracing::debug!(from = %self.current, to = %next, "phase transition");
        self.current = next;
        self.trail.push(next);
        Ok(())
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 规划轮数硬上限：到达后 Reflect 必须进入 Answer（与 Scratchpad 的软限制相互独立）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationCap(usize);

impl IterationCap {
    pub fn new(max_iterations: usize) -> Self {
        Self(max_iterations.max(1))
    }

    pub fn max(self) -> usize {
        self.0
    }

    /// 已完成 `iteration` 轮后是否还允许再规划一轮
    pub fn allows_replan(self, iteration: usize) -> bool {
        iteration < self.0
    }
}

impl Default for IterationCap {
    fn default() -> Self {
        Self(3)
    }
}
