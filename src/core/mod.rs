//! 核心编排层：错误与恢复、阶段状态机、会话监管、工具并发池、主控编排器

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{Orchestrator, OrchestratorSettings, QueryReport, QueryRun};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{IterationCap, Phase, PhaseMachine};
pub use task_scheduler::TaskScheduler;
