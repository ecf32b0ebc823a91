//! Agent 过程事件：步数、工具调用、委派与最终答案，供 CLI 渲染进度

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 某个 Agent 开始第 step 步（step 从 1 开始）
    Step {
        agent: String,
        step: usize,
        max_steps: usize,
    },
    /// 调用工具
    ToolCall {
        agent: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具执行失败
    ToolFailure {
        agent: String,
        tool: String,
        reason: String,
    },
    /// 错误恢复动作
    Recovery { agent: String, detail: String },
    /// 编排器把子任务交给子 Agent
    Delegation { agent: String, task: String },
    /// 得到最终答案（预览）
    FinalAnswer { agent: String, preview: String },
    /// 以部分结果结束
    Partial { agent: String, detail: String },
}

impl AgentEvent {
    /// 单行进度文本
    pub fn to_progress_line(&self) -> String {
        match self {
            AgentEvent::Step {
                agent,
                step,
                max_steps,
            } => format!("[{agent}] step {step}/{max_steps}"),
            AgentEvent::ToolCall { agent, tool, .. } => format!("[{agent}] -> {tool}"),
            AgentEvent::ToolFailure {
                agent,
                tool,
                reason,
            } => format!("[{agent}] {tool} failed: {}", first_line(reason)),
            AgentEvent::Recovery { agent, detail } => {
                format!("[{agent}] retrying: {}", first_line(detail))
            }
            AgentEvent::Delegation { agent, task } => {
                format!("[orchestrator] delegating to {agent}: {}", first_line(task))
            }
            AgentEvent::FinalAnswer { agent, .. } => format!("[{agent}] done"),
            AgentEvent::Partial { agent, detail } => {
                format!("[{agent}] stopped: {}", first_line(detail))
            }
        }
    }
}

fn first_line(s: &str) -> String {
    let line = s.lines().next().unwrap_or_default();
    if line.chars().count() > 120 {
        format!("{}...", line.chars().take(120).collect::<String>())
    } else {
        line.to_string()
    }
}
