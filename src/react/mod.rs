//! 推理层：Planner（LLM 调用与输出解析）、有界推理循环、过程事件

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::AgentEvent;
pub use loop_::{run_agent_loop, ActionDispatcher, AgentOutcome, AgentRun, LoopSession};
pub use planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
