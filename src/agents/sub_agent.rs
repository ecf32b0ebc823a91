//! 子 Agent：固定角色 + 受限工具集 + 步数预算的推理循环

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::agents::{compose_prompt, AgentRole};
use crate::core::RecoveryEngine;
use crate::llm::LlmClient;
use crate::react::{run_agent_loop, AgentEvent, AgentRun, LoopSession, Planner};
use crate::tools::{ToolExecutor, ToolRegistry};

pub struct SubAgent {
    role: AgentRole,
    planner: Planner,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    max_steps: usize,
}

impl SubAgent {
    /// 从完整注册表中只取该角色的工具
    pub fn new(
        role: AgentRole,
        llm: Arc<dyn LlmClient>,
        tools: &ToolRegistry,
        additional_prompt: &str,
        max_steps: usize,
    ) -> Self {
        let registry = tools.restricted(role.toolset());
        let prompt = compose_prompt(&role.base_prompt(), additional_prompt);
        Self {
            role,
            planner: Planner::new(llm, prompt),
            executor: ToolExecutor::new(registry),
            recovery: RecoveryEngine::new(),
            max_steps: max_steps.max(1),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    /// 执行一个子任务；不会返回错误，未完成时为 Partial
    pub async fn run(&self, task: &str, event_tx: Option<&UnboundedSender<AgentEvent>>) -> AgentRun {
        let session = LoopSession::new(
            self.role.name(),
            &self.planner,
            &self.executor,
            &self.recovery,
            self.max_steps,
        )
        .with_event_tx(event_tx);
        run_agent_loop(&session, task).await
    }
}
