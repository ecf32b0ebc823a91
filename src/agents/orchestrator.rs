//! 编排器：把研究任务拆分并委派给子 Agent，最后综合成答案
//!
//! 编排器的推理循环与子 Agent 相同，但它的动作是 `delegate {agent, task}` 加上文档工具
//! （create_document / compile_document）。委派同步进行、只有一层；子 Agent 的未完成结果
//! 作为失败的观察交还编排器，由它重试或在答案中说明，任何内部错误都不会直接抛给用户。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;

use crate::agents::{compose_prompt, AgentRole, SubAgent};
use crate::core::RecoveryEngine;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::{
    run_agent_loop, ActionDispatcher, AgentEvent, AgentOutcome, AgentRun, LoopSession, Planner,
    ToolCall,
};
use crate::tools::{parameters_schema, parse_args, ToolExecutor, ToolKind, ToolRegistry, ToolResult};

/// 委派动作名
pub const DELEGATE_ACTION: &str = "delegate";

/// 编排器可直接使用的工具
const ORCHESTRATOR_TOOLS: [ToolKind; 2] = [ToolKind::CreateDocument, ToolKind::CompileDocument];

/// 三个子 Agent（固定两层结构的第二层）
pub struct SubAgents {
    pub web_search: SubAgent,
    pub web_page: SubAgent,
    pub writing: SubAgent,
}

impl SubAgents {
    pub fn get(&self, role: AgentRole) -> &SubAgent {
        match role {
            AgentRole::WebSearch => &self.web_search,
            AgentRole::WebPage => &self.web_page,
            AgentRole::Writing => &self.writing,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct DelegateArgs {
    /// 接收子任务的 Agent
    agent: AgentRole,
    /// 完整、自包含的子任务描述（包含所需的 URL、文件名等）
    task: String,
}

pub struct Orchestrator {
    planner: Planner,
    sub_agents: SubAgents,
    tools: ToolExecutor,
    recovery: RecoveryEngine,
    max_steps: usize,
    event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sub_agents: SubAgents,
        tools: &ToolRegistry,
        additional_prompt: &str,
        max_steps: usize,
    ) -> Self {
        let base = "You are the orchestrator of a research team. You do not search, fetch or write files yourself: \
                    delegate each subtask to one of your agents with the delegate tool, one subtask per call, \
                    and make sure pages are saved before asking for writing that depends on them. \
                    When the work is done, reply with the final answer for the user as plain text.";
        Self {
            planner: Planner::new(llm, compose_prompt(base, additional_prompt)),
            sub_agents,
            tools: ToolExecutor::new(tools.restricted(&ORCHESTRATOR_TOOLS)),
            recovery: RecoveryEngine::new(),
            max_steps: max_steps.max(1),
            event_tx: None,
        }
    }

    /// 进度事件发送端（CLI 渲染进度行）
    pub fn with_event_sender(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn sub_agents(&self) -> &SubAgents {
        &self.sub_agents
    }

    /// 同步委派一个子任务给指定子 Agent
    pub async fn delegate(&self, role: AgentRole, subtask: &str) -> AgentRun {
        tracing::info!(agent = %role, "delegating");
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(AgentEvent::Delegation {
                agent: role.name().to_string(),
                task: subtask.to_string(),
            });
        }
        self.sub_agents
            .get(role)
            .run(subtask, self.event_tx.as_ref())
            .await
    }

    /// 运行一次研究会话；总是返回可展示的文本（未完成时为降级说明）
    pub async fn run(&self, task: &str, history: &[Message]) -> String {
        let span = tracing::info_span!("session", id = %uuid::Uuid::new_v4());
        async {
            tracing::info!(history = history.len(), "research task started");
            let actions = OrchestratorActions { orchestrator: self };
            let session = LoopSession::new(
                "orchestrator",
                &self.planner,
                &actions,
                &self.recovery,
                self.max_steps,
            )
            .with_history(history)
            .with_event_tx(self.event_tx.as_ref());
            let run = run_agent_loop(&session, task).await;
            let (_, _, tokens) = self.planner.token_usage();
            tracing::info!(
                steps = run.steps,
                answered = run.is_answer(),
                tokens,
                "research task finished"
            );
            match run.outcome {
                AgentOutcome::Answer(answer) => answer,
                AgentOutcome::Partial { detail, .. } => {
                    format!("The research could not be completed.\n{detail}")
                }
            }
        }
        .instrument(span)
        .await
    }

    fn delegate_entry(&self) -> Value {
        let agents = AgentRole::ALL
            .iter()
            .map(|r| format!("- {}: {}", r.name(), r.description()))
            .collect::<Vec<_>>()
            .join("\n");
        serde_json::json!({
            "name": DELEGATE_ACTION,
            "description": format!("Hand a self-contained subtask to one of your agents and wait for its answer. Agents:\n{agents}"),
            "parameters": parameters_schema::<DelegateArgs>(),
        })
    }
}

/// 编排器的动作集合：委派 + 文档工具
struct OrchestratorActions<'a> {
    orchestrator: &'a Orchestrator,
}

#[async_trait]
impl ActionDispatcher for OrchestratorActions<'_> {
    fn catalog(&self) -> String {
        let mut entries = vec![self.orchestrator.delegate_entry()];
        entries.extend(self.orchestrator.tools.registry().schema_entries());
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        if call.tool.trim() != DELEGATE_ACTION {
            return self.orchestrator.tools.dispatch(call).await;
        }
        let args: DelegateArgs = match parse_args(call.args.clone()) {
            Ok(a) => a,
            Err(e) => return ToolResult::failure(DELEGATE_ACTION, e),
        };
        let run = self.orchestrator.delegate(args.agent, &args.task).await;
        match run.outcome {
            AgentOutcome::Answer(answer) => {
                ToolResult::success(DELEGATE_ACTION, format!("{} answered:\n{answer}", args.agent))
            }
            AgentOutcome::Partial { detail, .. } => ToolResult {
                tool: DELEGATE_ACTION.to_string(),
                ok: false,
                output: format!("{} did not finish: {detail}", args.agent),
                error: None,
            },
        }
    }
}
