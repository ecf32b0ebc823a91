//! 文档模板：内置 article / presentation，用户可在 templates 目录放置同名 `.tex` 覆盖
//!
//! 占位符：`{{title}}` `{{author}}` `{{date}}` `{{body}}`、任意额外变量 `{{key}}`，
//! 以及章节循环 `{{#sections}} ... {{name}} / {{content}} ... {{/sections}}`。
//! 替换只扫描模板本身一遍，插入的章节内容不会被再次解释。

use std::collections::BTreeMap;

use regex::{Captures, Regex};

use crate::core::ToolError;
use crate::sandbox::Sandbox;

const ARTICLE: &str = r"\documentclass[11pt]{article}
\usepackage[utf8]{inputenc}
\usepackage[T1]{fontenc}
\usepackage{lmodern}
\usepackage{graphicx}
\usepackage{hyperref}
{{extra_preamble}}
\title{{{title}}}
\author{{{author}}}
\date{{{date}}}

\begin{document}
\maketitle

{{body}}

\end{document}
";

const PRESENTATION: &str = r"\documentclass{beamer}
\usepackage[utf8]{inputenc}
\usepackage[T1]{fontenc}
\usepackage{hyperref}
\usetheme{{{theme}}}
{{extra_preamble}}
\title{{{title}}}
\author{{{author}}}
\date{{{date}}}

\begin{document}

\begin{frame}
\titlepage
\end{frame}

{{#sections}}
% --- section: {{name}} ---
{{content}}
{{/sections}}
\end{document}
";

/// 内置模板名
pub const BUILTIN_TEMPLATES: [&str; 2] = ["article", "presentation"];

/// 模板变量
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub title: String,
    pub author: Option<String>,
    pub date: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl TemplateVars {
    fn lookup(&self, key: &str) -> String {
        match key {
            "title" => self.title.clone(),
            "author" => self.author.clone().unwrap_or_default(),
            "date" => self.date.clone().unwrap_or_else(|| r"\today".to_string()),
            // beamer 主题缺省值
            "theme" => self
                .extra
                .get("theme")
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
            other => self.extra.get(other).cloned().unwrap_or_default(),
        }
    }
}

/// 章节：文件名（不含扩展名）与内容
#[derive(Debug, Clone)]
pub struct SectionContent {
    pub name: String,
    pub content: String,
}

/// 按名称查找模板：用户覆盖优先，其次内置
#[derive(Debug, Clone)]
pub struct TemplateStore {
    overrides: Sandbox,
    placeholder_re: Regex,
    name_re: Regex,
}

impl TemplateStore {
    pub fn new(overrides: Sandbox) -> Result<Self, ToolError> {
        let re = |p: &str| Regex::new(p).map_err(|e| ToolError::InvalidTemplate(e.to_string()));
        Ok(Self {
            overrides,
            placeholder_re: re(
                r"(?s)\{\{#sections\}\}(.*?)\{\{/sections\}\}|\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}",
            )?,
            name_re: re(r"^[A-Za-z0-9][A-Za-z0-9_-]*$")?,
        })
    }

    /// 可用模板名（内置 + 用户目录下的 `.tex`），排序去重
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_TEMPLATES.iter().map(|s| s.to_string()).collect();
        if let Ok(entries) = std::fs::read_dir(self.overrides.root()) {
            for e in entries.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|x| x == "tex") {
                    if let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) {
                        if self.name_re.is_match(&stem) {
                            names.push(stem);
                        }
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }

    /// 读取模板源码；未知名称返回 TemplateNotFound
    pub fn load(&self, name: &str) -> Result<String, ToolError> {
        let name = name.trim();
        if !self.name_re.is_match(name) {
            return Err(ToolError::TemplateNotFound(name.to_string()));
        }
        let user = self.overrides.resolve(&format!("{name}.tex"))?;
        if user.is_file() {
            tracing::debug!(template = %name, "using user template");
            return std::fs::read_to_string(&user).map_err(|e| ToolError::Io(e.to_string()));
        }
        match name {
            "article" => Ok(ARTICLE.to_string()),
            "presentation" => Ok(PRESENTATION.to_string()),
            _ => Err(ToolError::TemplateNotFound(format!(
                "{name} (available: {})",
                self.names().join(", ")
            ))),
        }
    }

    /// 渲染模板；缺少 `{{body}}` 与章节循环、或循环未闭合时返回 InvalidTemplate
    pub fn render(
        &self,
        template: &str,
        vars: &TemplateVars,
        sections: &[SectionContent],
    ) -> Result<String, ToolError> {
        let opens = template.matches("{{#sections}}").count();
        let closes = template.matches("{{/sections}}").count();
        if opens != closes {
            return Err(ToolError::InvalidTemplate(
                "unbalanced {{#sections}} / {{/sections}}".to_string(),
            ));
        }
        let has_body = self
            .placeholder_re
            .captures_iter(template)
            .any(|c| c.get(2).is_some_and(|m| m.as_str() == "body"));
        if !has_body && opens == 0 {
            return Err(ToolError::InvalidTemplate(
                "template needs a {{body}} placeholder or a {{#sections}} loop".to_string(),
            ));
        }

        let body = assemble_body(sections);
        let rendered = self.placeholder_re.replace_all(template, |caps: &Captures| {
            if let Some(inner) = caps.get(1) {
                sections
                    .iter()
                    .map(|s| self.render_section(inner.as_str(), vars, s))
                    .collect::<String>()
            } else {
                match &caps[2] {
                    "body" => body.clone(),
                    key => vars.lookup(key),
                }
            }
        });
        Ok(rendered.into_owned())
    }

    fn render_section(&self, inner: &str, vars: &TemplateVars, section: &SectionContent) -> String {
        self.placeholder_re
            .replace_all(inner, |caps: &Captures| match caps.get(2).map(|m| m.as_str()) {
                Some("name") => section.name.clone(),
                Some("content") => section.content.clone(),
                Some(key) => vars.lookup(key),
                None => String::new(),
            })
            .into_owned()
    }
}

/// `{{body}}` 的内容：按给定顺序拼接各章节，每段前加来源注释
pub fn assemble_body(sections: &[SectionContent]) -> String {
    let mut body = String::new();
    for s in sections {
        body.push_str(&format!("% --- section: {} ---\n", s.name));
        body.push_str(s.content.trim_end());
        body.push_str("\n\n");
    }
    body.trim_end().to_string()
}
