//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 Agent 循环决定是重试、以部分结果结束还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply was not valid JSON: {raw}. \
                 To call a tool, reply with exactly one JSON object and nothing else: \
                 {{\"tool\": \"<tool name>\", \"args\": {{...}}}}. \
                 To finish, reply with plain text that contains no JSON."
            )),
            AgentError::StepBudgetExceeded { steps, last_output } => {
                RecoveryAction::ReportPartial(format!(
                    "Stopped after {steps} step(s) without a final answer. Last output:\n{last_output}"
                ))
            }
            AgentError::LlmError(msg) => {
                RecoveryAction::ReportPartial(format!("Inference unavailable: {msg}"))
            }
            AgentError::Tool(_) | AgentError::ConfigError(_) => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolError;

    #[test]
    fn test_recovery_json_parse_error() {
        let engine = RecoveryEngine::new();
        let err = AgentError::JsonParseError("invalid json".to_string());
        match engine.handle(&err) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("JSON"));
                assert!(msg.contains("invalid json"));
            }
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_step_budget() {
        let engine = RecoveryEngine::new();
        let err = AgentError::StepBudgetExceeded {
            steps: 10,
            last_output: "still searching".to_string(),
        };
        match engine.handle(&err) {
            RecoveryAction::ReportPartial(msg) => {
                assert!(msg.contains("10"));
                assert!(msg.contains("still searching"));
            }
            other => panic!("Expected ReportPartial, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_llm_error() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LlmError("rate limited".to_string());
        assert!(matches!(engine.handle(&err), RecoveryAction::ReportPartial(_)));
    }

    #[test]
    fn test_recovery_tool_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Tool(ToolError::NotFound("a.md".to_string()));
        assert!(matches!(engine.handle(&err), RecoveryAction::Abort));
    }
}
