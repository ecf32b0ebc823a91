//! Agent 推理循环
//!
//! Plan -> Act -> Observe，直到给出最终答案或耗尽步数预算（每次调用 LLM 计一步）。
//! 动作经 ActionDispatcher 执行：子 Agent 的分发器是受限的 ToolExecutor，编排器的分发器额外提供委派。
//! 工具失败作为 Observation 写回对话而不中断循环；步数耗尽与推理不可用以 Partial 结果返回，从不 panic。

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::Message;
use crate::react::{parse_llm_output, AgentEvent, Planner, PlannerOutput, ToolCall};
use crate::tools::{tool_call_schema_json, ToolExecutor, ToolResult};

/// 最终答案预览最大字符数
const ANSWER_PREVIEW_CHARS: usize = 200;

/// 循环可执行的动作集合
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// 动作清单（JSON），拼入 system prompt
    fn catalog(&self) -> String;

    /// 执行一次动作；失败以 ok=false 的 ToolResult 返回
    async fn dispatch(&self, call: &ToolCall) -> ToolResult;
}

#[async_trait]
impl ActionDispatcher for ToolExecutor {
    fn catalog(&self) -> String {
        self.registry().to_schema_json()
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        self.execute(&call.tool, call.args.clone()).await
    }
}

/// 循环结束方式
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// 正常给出最终答案
    Answer(String),
    /// 未能给出答案（步数耗尽 / 推理不可用等），detail 为可展示给上层的说明
    Partial { error: AgentError, detail: String },
}

/// 一次循环的结果
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub outcome: AgentOutcome,
    /// 实际调用 LLM 的次数
    pub steps: usize,
    pub tool_results: Vec<ToolResult>,
}

impl AgentRun {
    pub fn is_answer(&self) -> bool {
        matches!(self.outcome, AgentOutcome::Answer(_))
    }

    /// 答案文本；Partial 时返回说明
    pub fn text(&self) -> &str {
        match &self.outcome {
            AgentOutcome::Answer(a) => a,
            AgentOutcome::Partial { detail, .. } => detail,
        }
    }
}

/// 一次循环所需的协作者
pub struct LoopSession<'a> {
    pub agent: &'a str,
    pub planner: &'a Planner,
    pub dispatcher: &'a dyn ActionDispatcher,
    pub recovery: &'a RecoveryEngine,
    pub max_steps: usize,
    /// 放在任务之前的历史消息（多轮会话）
    pub history: &'a [Message],
    pub event_tx: Option<&'a UnboundedSender<AgentEvent>>,
}

impl<'a> LoopSession<'a> {
    pub fn new(
        agent: &'a str,
        planner: &'a Planner,
        dispatcher: &'a dyn ActionDispatcher,
        recovery: &'a RecoveryEngine,
        max_steps: usize,
    ) -> Self {
        Self {
            agent,
            planner,
            dispatcher,
            recovery,
            max_steps,
            history: &[],
            event_tx: None,
        }
    }

    pub fn with_history(mut self, history: &'a [Message]) -> Self {
        self.history = history;
        self
    }

    pub fn with_event_tx(mut self, tx: Option<&'a UnboundedSender<AgentEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    fn emit(&self, ev: AgentEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 基础 prompt + 动作清单 + 调用格式
    fn system_prompt(&self) -> String {
        format!(
            "{}\n\n## Available tools\n{}\n\n## Tool call format\n\
             To use a tool, reply with exactly one JSON object and nothing else, matching this schema:\n{}\n\
             Example: {{\"tool\": \"<tool name>\", \"args\": {{...}}}}\n\
             Call one tool per reply and wait for its observation. \
             When the task is complete, reply with your final answer as plain text (no JSON).",
            self.planner.base_system_prompt(),
            self.dispatcher.catalog(),
            tool_call_schema_json()
        )
    }

    fn partial(&self, error: AgentError, steps: usize, tool_results: Vec<ToolResult>) -> AgentRun {
        let detail = match self.recovery.handle(&error) {
            RecoveryAction::ReportPartial(d) => d,
            _ => error.to_string(),
        };
        tracing::warn!(agent = %self.agent, steps, error = %error, "agent stopped without an answer");
        self.emit(AgentEvent::Partial {
            agent: self.agent.to_string(),
            detail: detail.clone(),
        });
        AgentRun {
            outcome: AgentOutcome::Partial { error, detail },
            steps,
            tool_results,
        }
    }
}

/// 运行推理循环直到最终答案或步数预算耗尽
pub async fn run_agent_loop(session: &LoopSession<'_>, task: &str) -> AgentRun {
    let system = session.system_prompt();
    let mut messages: Vec<Message> = session.history.to_vec();
    messages.push(Message::user(task));

    let mut tool_results = Vec::new();
    let mut last_output = String::new();

    for step in 1..=session.max_steps {
        session.emit(AgentEvent::Step {
            agent: session.agent.to_string(),
            step,
            max_steps: session.max_steps,
        });
        tracing::debug!(agent = %session.agent, step, "planning");

        let output = match session.planner.plan_with_system(&messages, &system).await {
            Ok(o) => o,
            Err(e) => match session.recovery.handle(&e) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    messages.push(Message::user(prompt));
                    continue;
                }
                _ => return session.partial(e, step, tool_results),
            },
        };
        last_output = output.clone();

        match parse_llm_output(&output) {
            Ok(PlannerOutput::FinalAnswer(answer)) => {
                tracing::info!(agent = %session.agent, steps = step, "final answer");
                session.emit(AgentEvent::FinalAnswer {
                    agent: session.agent.to_string(),
                    preview: answer.chars().take(ANSWER_PREVIEW_CHARS).collect(),
                });
                return AgentRun {
                    outcome: AgentOutcome::Answer(answer),
                    steps: step,
                    tool_results,
                };
            }
            Ok(PlannerOutput::ToolCall(call)) => {
                session.emit(AgentEvent::ToolCall {
                    agent: session.agent.to_string(),
                    tool: call.tool.clone(),
                    args: call.args.clone(),
                });
                let result = session.dispatcher.dispatch(&call).await;
                if !result.ok {
                    session.emit(AgentEvent::ToolFailure {
                        agent: session.agent.to_string(),
                        tool: result.tool.clone(),
                        reason: result.output.clone(),
                    });
                }
                messages.push(Message::assistant(output));
                messages.push(Message::user(result.to_observation()));
                tool_results.push(result);
            }
            Err(e) => match session.recovery.handle(&e) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    session.emit(AgentEvent::Recovery {
                        agent: session.agent.to_string(),
                        detail: prompt.clone(),
                    });
                    messages.push(Message::assistant(output));
                    messages.push(Message::user(prompt));
                }
                _ => return session.partial(e, step, tool_results),
            },
        }
    }

    session.partial(
        AgentError::StepBudgetExceeded {
            steps: session.max_steps,
            last_output,
        },
        session.max_steps,
        tool_results,
    )
}
