//! 错误类型与恢复动作
//!
//! - ToolError：工具层错误，在 Agent 循环边界被转换为失败的 ToolResult，不会中断循环
//! - AgentError：Agent 循环层错误，与 RecoveryEngine 配合决定 RetryWithPrompt / ReportPartial / Abort

use thiserror::Error;

/// 工具执行错误（消息会原样展示给模型，因此不得包含沙箱根的真实路径）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Path escapes sandbox: {0}")]
    PathEscape(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File already exists: {0}. Use overwrite=true to replace it.")]
    AlreadyExists(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// 模板缺少必需占位符，无法渲染
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Compilation failed after {passes} pass(es):\n{log_summary}")]
    CompilationFailed { passes: usize, log_summary: String },

    /// 参数不符合工具声明的 schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// 工具不在当前 Agent 的工具集中（或根本不存在）
    #[error("Tool not available: {0}")]
    ToolNotAvailable(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Step budget exceeded after {steps} step(s)")]
    StepBudgetExceeded { steps: usize, last_output: String },

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 以部分结果结束当前循环（步数耗尽、LLM 不可用），交由上层决定
    ReportPartial(String),
    /// 终止当前任务
    Abort,
}
