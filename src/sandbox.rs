//! 沙箱：路径解析与包含校验
//!
//! 每个逻辑区域（网页资料 / 文档 / 模板）绑定一个根目录；所有文件类工具必须先经 resolve：
//! - 拒绝空白路径、绝对路径与任何 `..` 段
//! - 对最深的已存在祖先做 canonicalize（解析符号链接），结果必须是根或根的后代
//! - 错误消息只包含模型传入的相对路径，不泄露真实根目录

use std::fmt;
use std::path::{Component, Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::SandboxSection;
use crate::core::ToolError;

/// 沙箱区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SandboxArea {
    /// 保存的网页 / PDF 文本
    Pages,
    /// 章节文件、组装后的文档与编译产物
    Documents,
    /// 用户自定义模板（对 Agent 只读）
    Templates,
}

impl fmt::Display for SandboxArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxArea::Pages => "pages",
            SandboxArea::Documents => "documents",
            SandboxArea::Templates => "templates",
        };
        f.write_str(s)
    }
}

/// 单个沙箱根
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// 创建沙箱：根目录不存在时自动创建，并保存其规范化路径
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| ToolError::Io(e.to_string()))?;
        let root = root
            .canonicalize()
            .map_err(|e| ToolError::Io(e.to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 将相对路径解析为沙箱内的绝对路径（目标可以尚不存在）
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let trimmed = relative.trim();
        if trimmed.is_empty() {
            return Err(ToolError::PathEscape("<empty path>".to_string()));
        }
        let escape = || ToolError::PathEscape(trimmed.to_string());

        let mut normalized = PathBuf::new();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(escape());
                }
            }
        }

        // 找到最深的已存在祖先；symlink_metadata 不跟随链接，悬空链接也算「已存在」
        let mut existing = self.root.join(&normalized);
        let mut tail = Vec::new();
        while std::fs::symlink_metadata(&existing).is_err() {
            match existing.file_name() {
                Some(name) => tail.push(name.to_os_string()),
                None => return Err(escape()),
            }
            if !existing.pop() {
                return Err(escape());
            }
        }

        // 悬空链接 canonicalize 失败，一律视为逃逸（写入会穿透到链接目标）
        let canonical = existing.canonicalize().map_err(|_| escape())?;
        if !canonical.starts_with(&self.root) {
            tracing::warn!(path = %trimmed, "sandbox escape rejected");
            return Err(escape());
        }

        let mut resolved = canonical;
        for name in tail.into_iter().rev() {
            resolved.push(name);
        }
        Ok(resolved)
    }

    /// 沙箱内绝对路径转为对模型展示的相对路径（`/` 分隔）
    pub fn display_path(&self, absolute: &Path) -> String {
        match absolute.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => absolute
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }
}

/// 全部沙箱根（来自配置 [sandbox]）
#[derive(Debug, Clone)]
pub struct SandboxSet {
    pub pages: Sandbox,
    pub documents: Sandbox,
    pub templates: Sandbox,
}

impl SandboxSet {
    pub fn new(
        pages: impl AsRef<Path>,
        documents: impl AsRef<Path>,
        templates: impl AsRef<Path>,
    ) -> Result<Self, ToolError> {
        Ok(Self {
            pages: Sandbox::new(pages)?,
            documents: Sandbox::new(documents)?,
            templates: Sandbox::new(templates)?,
        })
    }

    /// 按配置创建（各根目录不存在时自动创建）
    pub fn from_config(section: &SandboxSection) -> Result<Self, ToolError> {
        let set = Self::new(
            &section.pages_root,
            &section.documents_root,
            &section.templates_root,
        )?;
        tracing::info!(
            pages = %set.pages.root().display(),
            documents = %set.documents.root().display(),
            templates = %set.templates.root().display(),
            "sandbox roots ready"
        );
        Ok(set)
    }

    pub fn get(&self, area: SandboxArea) -> &Sandbox {
        match area {
            SandboxArea::Pages => &self.pages,
            SandboxArea::Documents => &self.documents,
            SandboxArea::Templates => &self.templates,
        }
    }
}
