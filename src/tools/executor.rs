//! 工具执行器
//!
//! 持有某个 Agent 的（受限）ToolRegistry：按工具名解析出封闭集合中的 ToolKind，
//! 不在该 Agent 工具集内的调用直接返回 ToolNotAvailable，不会触达任何工具实现。
//! 工具错误被转为失败的 ToolResult，而不是中断 Agent 循环；每次调用输出结构化审计日志（JSON）。

use std::time::Instant;

use serde_json::Value;

use crate::core::ToolError;
use crate::tools::{ToolKind, ToolRegistry};

/// 一次工具调用的结果：成功标记 + 文本负载（回填到发起 Agent 的对话中）
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool: String,
    pub ok: bool,
    pub output: String,
    /// 失败时的错误（成功为 None）
    pub error: Option<ToolError>,
}

impl ToolResult {
    pub fn success(tool: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ok: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(tool: impl Into<String>, error: ToolError) -> Self {
        Self {
            tool: tool.into(),
            ok: false,
            output: error.to_string(),
            error: Some(error),
        }
    }

    /// 写回对话的 Observation 文本
    pub fn to_observation(&self) -> String {
        if self.ok {
            format!("Observation from {}:\n{}", self.tool, self.output)
        } else {
            format!("Observation from {} (error):\n{}", self.tool, self.output)
        }
    }
}

/// 工具执行器：对每次调用做可用性检查、执行并映射为 ToolResult
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// 执行指定工具；未知或不可用的工具名返回失败结果且不执行任何工具
    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolResult {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match ToolKind::from_name(tool_name).and_then(|k| self.registry.get(k)) {
            Some(tool) => tool.execute(args).await,
            None => Err(ToolError::ToolNotAvailable(format!(
                "'{}' is not in this agent's toolset (available: {})",
                tool_name,
                self.registry.tool_names().join(", ")
            ))),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::ToolNotAvailable(_)) => "unavailable",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(value) => ToolResult::success(tool_name, render_value(&value)),
            Err(e) => ToolResult::failure(tool_name, e),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn is_available(&self, tool_name: &str) -> bool {
        ToolKind::from_name(tool_name).is_some_and(|k| self.registry.contains(k))
    }
}

/// 字符串负载原样返回，结构化负载输出为缩进 JSON
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        kind: ToolKind,
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Counting {
        fn kind(&self) -> ToolKind {
            self.kind
        }

        fn description(&self) -> &str {
            "counts"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if args.get("fail").is_some() {
                return Err(ToolError::NotFound("x".to_string()));
            }
            Ok(serde_json::json!({"n": 1}))
        }
    }

    fn executor(hits: &Arc<AtomicUsize>) -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(Counting {
            kind: ToolKind::ReadFile,
            hits: hits.clone(),
        });
        ToolExecutor::new(reg)
    }

    #[tokio::test]
    async fn test_success_and_failure_results() {
        let hits = Arc::new(AtomicUsize::new(0));
        let exec = executor(&hits);

        let ok = exec.execute("read_file", serde_json::json!({})).await;
        assert!(ok.ok);
        assert!(ok.output.contains("\"n\": 1"));

        let err = exec
            .execute("read_file", serde_json::json!({"fail": true}))
            .await;
        assert!(!err.ok);
        assert_eq!(err.error, Some(ToolError::NotFound("x".to_string())));
        assert!(err.to_observation().contains("(error)"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unavailable_tool_is_never_executed() {
        let hits = Arc::new(AtomicUsize::new(0));
        let exec = executor(&hits);

        for name in ["fetch_page", "shell", ""] {
            let r = exec.execute(name, serde_json::json!({})).await;
            assert!(!r.ok);
            assert!(matches!(r.error, Some(ToolError::ToolNotAvailable(_))));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!exec.is_available("fetch_page"));
        assert!(exec.is_available("read_file"));
    }
}
