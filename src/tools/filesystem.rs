//! 沙箱文件系统工具
//!
//! read_file / write_file / list_directory 都先经 Sandbox::resolve，再做实际 I/O。
//! 通过可选的 `area` 参数选择沙箱区域：读取与列目录默认 pages，写入默认 documents；
//! templates 区域对 Agent 只读。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ListingSection;
use crate::core::ToolError;
use crate::sandbox::{SandboxArea, SandboxSet};
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolKind};

/// 创建父目录（写入与保存网页共用）
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ToolError::Io(e.to_string()))?;
    }
    Ok(())
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ReadFileArgs {
    /// 文件路径，相对于所选区域的根目录，例如 "notes/a.md"
    path: String,
    /// 区域：pages（默认，保存的网页）/ documents（章节与文档）/ templates
    #[serde(default)]
    area: Option<SandboxArea>,
}

/// read_file：读取沙箱内文本文件
pub struct ReadFileTool {
    sandboxes: Arc<SandboxSet>,
}

impl ReadFileTool {
    pub fn new(sandboxes: Arc<SandboxSet>) -> Self {
        Self { sandboxes }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ReadFile
    }

    fn description(&self) -> &str {
        "Read the full text of a file. Paths are relative to the chosen area (default: pages, where fetched web pages are saved)."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ReadFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: ReadFileArgs = parse_args(args)?;
        let area = args.area.unwrap_or(SandboxArea::Pages);
        let sandbox = self.sandboxes.get(area);
        let resolved = sandbox.resolve(&args.path)?;
        tracing::info!(path = %args.path, %area, "read_file");

        if !resolved.exists() {
            return Err(ToolError::NotFound(format!("{area}/{}", args.path.trim())));
        }
        if resolved.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{} is a directory; use list_directory",
                args.path.trim()
            )));
        }
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::Io(e.to_string()))?;
        Ok(Value::String(content))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct WriteFileArgs {
    /// 文件路径，相对于所选区域的根目录，例如 "intro.tex"；父目录会自动创建
    path: String,
    /// 完整文件内容
    content: String,
    /// 是否覆盖已存在的文件（默认 false）
    #[serde(default)]
    overwrite: bool,
    /// 区域：documents（默认）/ pages
    #[serde(default)]
    area: Option<SandboxArea>,
}

/// write_file 的返回负载
#[derive(Debug, Serialize)]
struct WriteOutcome {
    path: String,
    area: SandboxArea,
    byte_count: usize,
}

/// write_file：在沙箱内创建或覆盖文件
pub struct WriteFileTool {
    sandboxes: Arc<SandboxSet>,
}

impl WriteFileTool {
    pub fn new(sandboxes: Arc<SandboxSet>) -> Self {
        Self { sandboxes }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WriteFile
    }

    fn description(&self) -> &str {
        "Create a file with the given content (default area: documents). Fails if the file exists unless overwrite is true."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<WriteFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: WriteFileArgs = parse_args(args)?;
        let area = args.area.unwrap_or(SandboxArea::Documents);
        if area == SandboxArea::Templates {
            return Err(ToolError::InvalidArguments(
                "the templates area is read-only".to_string(),
            ));
        }
        let sandbox = self.sandboxes.get(area);
        let resolved = sandbox.resolve(&args.path)?;
        let shown_path = sandbox.display_path(&resolved);

        if resolved.is_dir() {
            return Err(ToolError::InvalidArguments(format!("{shown_path} is a directory")));
        }
        if resolved.exists() && !args.overwrite {
            return Err(ToolError::AlreadyExists(shown_path));
        }

        ensure_parent_dir(&resolved)?;
        tokio::fs::write(&resolved, args.content.as_bytes())
            .await
            .map_err(|e| ToolError::Io(e.to_string()))?;
        tracing::info!(path = %shown_path, %area, bytes = args.content.len(), "write_file");

        let outcome = WriteOutcome {
            path: shown_path,
            area,
            byte_count: args.content.len(),
        };
        serde_json::to_value(outcome).map_err(|e| ToolError::Io(e.to_string()))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ListDirectoryArgs {
    /// 目录路径，相对于所选区域的根目录；默认 "."（区域根）
    #[serde(default)]
    path: Option<String>,
    /// 区域：pages（默认）/ documents / templates
    #[serde(default)]
    area: Option<SandboxArea>,
}

/// 目录项
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

/// list_directory：按名称排序列出目录（隐藏文件不列出）
pub struct ListDirectoryTool {
    sandboxes: Arc<SandboxSet>,
    listing: ListingSection,
}

impl ListDirectoryTool {
    pub fn new(sandboxes: Arc<SandboxSet>, listing: ListingSection) -> Self {
        Self { sandboxes, listing }
    }

    fn entry(&self, e: &std::fs::DirEntry) -> Result<DirectoryEntry, ToolError> {
        let meta = e.metadata().map_err(|e| ToolError::Io(e.to_string()))?;
        let is_directory = meta.is_dir();
        let size = (self.listing.show_file_sizes && !is_directory).then(|| meta.len());
        let modified = if self.listing.show_modification_times {
            meta.modified()
                .ok()
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
        } else {
            None
        };
        Ok(DirectoryEntry {
            name: e.file_name().to_string_lossy().to_string(),
            is_directory,
            size,
            modified,
        })
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ListDirectory
    }

    fn description(&self) -> &str {
        "List a directory as entries of {name, is_directory}, sorted by name (default area: pages)."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ListDirectoryArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: ListDirectoryArgs = parse_args(args)?;
        let area = args.area.unwrap_or(SandboxArea::Pages);
        let path = args
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(".");
        let resolved = self.sandboxes.get(area).resolve(path)?;
        tracing::info!(path = %path, %area, "list_directory");

        if !resolved.exists() {
            return Err(ToolError::NotFound(format!("{area}/{path}")));
        }
        if !resolved.is_dir() {
            return Err(ToolError::InvalidArguments(format!("{path} is not a directory")));
        }

        let mut entries = Vec::new();
        for e in std::fs::read_dir(&resolved).map_err(|e| ToolError::Io(e.to_string()))? {
            let e = e.map_err(|e| ToolError::Io(e.to_string()))?;
            if e.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            entries.push(self.entry(&e)?);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        serde_json::to_value(entries).map_err(|e| ToolError::Io(e.to_string()))
    }
}
