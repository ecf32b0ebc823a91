//! 工具注册表
//!
//! 工具名是封闭集合 ToolKind；每个工具实现 Tool trait（kind / description / 参数 schema / execute），
//! 由 ToolRegistry 按 ToolKind 有序存储，保证生成的工具清单与 schema 在多次运行间稳定。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;

/// 全部工具（声明顺序即 prompt 中的展示顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolKind {
    WebSearch,
    FetchPage,
    ReadFile,
    WriteFile,
    ListDirectory,
    CreateDocument,
    CompileDocument,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::WebSearch,
        ToolKind::FetchPage,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::ListDirectory,
        ToolKind::CreateDocument,
        ToolKind::CompileDocument,
    ];

    /// 工具名（用于 JSON 中的 "tool" 字段）
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "web_search",
            ToolKind::FetchPage => "fetch_page",
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteFile => "write_file",
            ToolKind::ListDirectory => "list_directory",
            ToolKind::CreateDocument => "create_document",
            ToolKind::CompileDocument => "compile_document",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name.trim())
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ToolError::ToolNotAvailable(s.to_string()))
    }
}

/// 工具 trait：类型、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn description(&self) -> &str;

    /// 参数 JSON Schema，由参数结构体派生（见 tools::schema）
    fn parameters_schema(&self) -> Value;

    /// 执行工具；参数先按 schema 反序列化校验，失败返回 InvalidArguments
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// 工具注册表：按 ToolKind 有序存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolKind, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.kind(), tool);
    }

    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ToolKind) -> bool {
        self.tools.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ToolKind> {
        self.tools.keys().copied().collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().map(|k| k.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 仅保留给定工具的子注册表（共享同一批工具实例）；缺失的工具被忽略
    pub fn restricted(&self, allowed: &[ToolKind]) -> ToolRegistry {
        let tools = allowed
            .iter()
            .filter_map(|k| self.tools.get(k).map(|t| (*k, t.clone())))
            .collect();
        ToolRegistry { tools }
    }

    /// 每个工具的清单项（name / description / parameters）
    pub fn schema_entries(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect()
    }

    /// 工具清单 JSON，用于拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.schema_entries()).unwrap_or_else(|_| "[]".to_string())
    }
}
