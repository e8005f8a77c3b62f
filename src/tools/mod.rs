pub mod calculator;
pub mod context_read;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use calculator::CalculatorTool;
pub use context_read::ContextReadTool;
pub use echo::EchoTool;
pub use executor::{ExecutorSettings, SuccessPolicy, TaskContext, TaskExecution, ToolExecutor, RECENT_WARNINGS};
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use schema::tool_calls_schema_json;
