// src/lib.rs

// Import the top-level `queryflow` module.
pub mod queryflow;

// Re-export the types most applications need so callers don't have to walk
// the full module hierarchy.
pub use queryflow::config::QueryFlowConfig;
pub use queryflow::gateway::{ChatMessage, ChatRole, Completion, LlmGateway, LlmProvider};
pub use queryflow::plan::{AgentType, DataSourceClass, Plan, Step};
pub use queryflow::registry::{ToolDescriptor, ToolRegistry};
pub use queryflow::session::SessionOrchestrator;
pub use queryflow::state::AgentState;
pub use queryflow::tool::{Tool, ToolResult};
pub use queryflow::workflow::WorkflowDriver;
