//! 文档组装：模板 + 有序章节文件 + 元数据 → documents 沙箱中的文档草稿
//!
//! 先确认模板存在，再逐个解析章节路径（越界 / 缺失立即失败），全部就绪后才写出文档，
//! 因此失败的组装不会留下半成品，也不会进入编译阶段。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::ToolError;
use crate::document::template::{SectionContent, TemplateStore, TemplateVars};
use crate::sandbox::SandboxSet;

/// create_document 的输入
#[derive(Debug, Clone, Default)]
pub struct DocumentRequest {
    pub template_name: String,
    /// 章节文件路径（documents 区域内），按此顺序拼接
    pub sections: Vec<String>,
    pub title: String,
    pub author: Option<String>,
    pub date: Option<String>,
    pub extra_vars: BTreeMap<String, String>,
    /// 输出路径（documents 区域内），缺省 main.tex
    pub output_path: Option<String>,
}

/// 组装结果
#[derive(Debug, Clone)]
pub struct DocumentDraft {
    /// 绝对路径（交给编译状态机）
    pub path: PathBuf,
    /// 相对 documents 根的展示路径
    pub display_path: String,
    pub template: String,
    pub sections: Vec<String>,
    pub byte_count: usize,
}

pub struct DocumentAssembler {
    sandboxes: Arc<SandboxSet>,
    templates: TemplateStore,
}

impl DocumentAssembler {
    pub fn new(sandboxes: Arc<SandboxSet>) -> Result<Self, ToolError> {
        let templates = TemplateStore::new(sandboxes.templates.clone())?;
        Ok(Self {
            sandboxes,
            templates,
        })
    }

    pub fn create_document(&self, request: &DocumentRequest) -> Result<DocumentDraft, ToolError> {
        if request.sections.is_empty() {
            return Err(ToolError::InvalidArguments(
                "sections must list at least one file".to_string(),
            ));
        }
        let template = self.templates.load(&request.template_name)?;
        let docs = &self.sandboxes.documents;

        let mut sections = Vec::with_capacity(request.sections.len());
        for path in &request.sections {
            let resolved = docs.resolve(path)?;
            if !resolved.is_file() {
                return Err(ToolError::NotFound(format!("section {}", path.trim())));
            }
            let content =
                std::fs::read_to_string(&resolved).map_err(|e| ToolError::Io(e.to_string()))?;
            sections.push(SectionContent {
                name: section_name(&resolved),
                content,
            });
        }

        let output = request
            .output_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("main.tex");
        let mut out_path = docs.resolve(output)?;
        if out_path.extension().is_none() {
            out_path.set_extension("tex");
        }
        let display_path = docs.display_path(&out_path);
        if request
            .sections
            .iter()
            .filter_map(|s| docs.resolve(s).ok())
            .any(|s| s == out_path)
        {
            return Err(ToolError::InvalidArguments(format!(
                "output_path {display_path} would overwrite one of its sections"
            )));
        }

        let vars = TemplateVars {
            title: request.title.clone(),
            author: request.author.clone(),
            date: request.date.clone(),
            extra: request.extra_vars.clone(),
        };
        let rendered = self.templates.render(&template, &vars, &sections)?;

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::Io(e.to_string()))?;
        }
        std::fs::write(&out_path, rendered.as_bytes()).map_err(|e| ToolError::Io(e.to_string()))?;
        tracing::info!(
            document = %display_path,
            template = %request.template_name,
            sections = sections.len(),
            "document assembled"
        );

        Ok(DocumentDraft {
            path: out_path,
            display_path,
            template: request.template_name.trim().to_string(),
            sections: request.sections.clone(),
            byte_count: rendered.len(),
        })
    }
}

fn section_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}
