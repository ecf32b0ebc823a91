//! Planner：调用 LLM，并把回复解析为工具调用或最终答案
//!
//! 回复格式：一个 JSON 对象 `{"tool": "...", "args": {...}}` 表示调用工具，纯文本表示最终答案。
//! 只有能解析为带 `tool` 键的 JSON 对象才按工具调用处理，
//! 因此最终答案里出现 LaTeX 的花括号不会被误判。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// LLM 给出的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// Planner 输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 最终答案
    FinalAnswer(String),
    /// 需要执行的工具调用
    ToolCall(ToolCall),
}

/// ```json 代码块中的内容
fn fenced_json(trimmed: &str) -> Option<&str> {
    let start = trimmed.find("```json")?;
    let rest = &trimmed[start + 7..];
    Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()))
}

/// 第一个 `{` 到最后一个 `}` 之间的片段
fn braced_span(trimmed: &str) -> Option<&str> {
    let start = trimmed.find('{')?;
    match trimmed.rfind('}') {
        Some(end) if end > start => Some(&trimmed[start..=end]),
        _ => Some(&trimmed[start..]),
    }
}

/// 以 `{"tool"` 开头：明确要调用工具
fn opens_tool_call(trimmed: &str) -> bool {
    trimmed
        .strip_prefix('{')
        .is_some_and(|rest| rest.trim_start().starts_with("\"tool\""))
}

/// 把 JSON 片段转为工具调用；不是带字符串 `tool` 键的对象时返回 None
fn tool_call_from(json_str: &str) -> Result<Option<ToolCall>, AgentError> {
    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{e}: {json_str}")))?;
    let names_tool = matches!(value.get("tool"), Some(Value::String(name)) if !name.trim().is_empty());
    if !names_tool {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| AgentError::JsonParseError(format!("{e}: {json_str}")))
}

/// 解析 LLM 输出
///
/// 只有解析为带字符串 `tool` 键的 JSON 对象时才是工具调用，其余都是最终答案
/// （LaTeX 的花括号、普通 JSON 数据都按文本处理）。```json 代码块或以 `{"tool"` 开头的回复
/// 若不是合法 JSON，返回 JsonParseError（由恢复引擎提示重试）。
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(AgentError::JsonParseError("empty reply".to_string()));
    }
    let final_answer =
        || -> Result<PlannerOutput, AgentError> { Ok(PlannerOutput::FinalAnswer(trimmed.to_string())) };

    if let Some(fenced) = fenced_json(trimmed) {
        return match tool_call_from(fenced)? {
            Some(call) => Ok(PlannerOutput::ToolCall(call)),
            None => final_answer(),
        };
    }

    let Some(span) = braced_span(trimmed) else {
        return final_answer();
    };
    match tool_call_from(span) {
        Ok(Some(call)) => Ok(PlannerOutput::ToolCall(call)),
        Ok(None) => final_answer(),
        Err(e) if opens_tool_call(trimmed) => Err(e),
        Err(_) => final_answer(),
    }
}

/// Planner：持有 LLM 与基础 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// LLM 累计 token 使用（prompt, completion, total）
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 以给定 system 拼接消息后调用 LLM
    pub async fn plan_with_system(
        &self,
        messages: &[Message],
        system: &str,
    ) -> Result<String, AgentError> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.push(Message::system(system));
        full.extend_from_slice(messages);
        self.llm.complete(&full).await.map_err(AgentError::LlmError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_final_answer() {
        let out = parse_llm_output("  The summary is ready.  ").unwrap();
        assert_eq!(out, PlannerOutput::FinalAnswer("The summary is ready.".into()));
    }

    #[test]
    fn test_latex_braces_are_not_tool_calls() {
        let text = "Here is the section:\n\\section{Intro} see \\cite{knuth84}.";
        assert!(matches!(
            parse_llm_output(text).unwrap(),
            PlannerOutput::FinalAnswer(_)
        ));
    }

    #[test]
    fn test_tool_call_forms() {
        let expected = ToolCall::new("read_file", json!({"path": "a.md"}));
        for text in [
            r#"{"tool": "read_file", "args": {"path": "a.md"}}"#,
            "I'll read it.\n```json\n{\"tool\": \"read_file\", \"args\": {\"path\": \"a.md\"}}\n```",
            r#"Calling: {"tool": "read_file", "args": {"path": "a.md"}}"#,
        ] {
            assert_eq!(
                parse_llm_output(text).unwrap(),
                PlannerOutput::ToolCall(expected.clone()),
                "{text}"
            );
        }
        let no_args = parse_llm_output(r#"{"tool": "list_directory"}"#).unwrap();
        assert_eq!(
            no_args,
            PlannerOutput::ToolCall(ToolCall::new("list_directory", Value::Null))
        );
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        for text in [
            r#"{"tool": "read_file", "args": {"#,
            "```json\n{\"tool\": \"read_file\", \"args\": \n```",
            "   ",
        ] {
            assert!(matches!(
                parse_llm_output(text),
                Err(AgentError::JsonParseError(_))
            ));
        }
    }

    #[test]
    fn test_brace_led_prose_is_final_answer() {
        for text in [
            "{\\bf Summary}: widgets are small devices.",
            "{not json}",
            r#"The config key "tool" is documented in {section 2}."#,
            r#"{"title": "Widgets", "pages": 3}"#,
        ] {
            assert_eq!(
                parse_llm_output(text).unwrap(),
                PlannerOutput::FinalAnswer(text.to_string()),
                "{text}"
            );
        }
    }
}
