pub mod approval;
pub mod audit;
pub mod autonomy;
pub mod budget;
pub mod builder;
pub mod classifier;
pub mod error;
pub mod events;
pub mod executor;
pub mod kill_switch;
pub mod llm;
pub mod mcp;
pub mod planner;
pub mod sandbox;
pub mod session;
pub mod storage;
pub mod tools;
pub mod types;

// Convenience re-exports at crate root
pub use builder::AgentBuilder;
pub use error::AgentError;
pub use events::{AgentEvent, EventBus, EventPayload};
pub use executor::{Executor, ExecutorConfig};
pub use llm::{ChatModel, ChatResponse};
pub use session::Session;
pub use tools::{Tool, ToolRegistry};
pub use types::{
    ActionClassification, AutonomyLevel, Message, Plan, PlanStep, RiskTier, ToolCall, ToolResult,
};
