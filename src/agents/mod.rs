//! 两层 Agent 结构：一个编排器（Orchestrator）委派给三个固定的子 Agent
//!
//! 子 Agent 的角色是封闭集合 AgentRole，各自绑定固定工具集；子 Agent 没有委派能力。

pub mod orchestrator;
pub mod sub_agent;

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::ToolKind;

pub use orchestrator::{Orchestrator, SubAgents};
pub use sub_agent::SubAgent;

/// 子 Agent 角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AgentRole {
    /// 网络搜索：返回带 URL 的结果列表
    #[serde(rename = "web_search_agent")]
    WebSearch,
    /// 网页抓取：把网页 / PDF 保存为文件
    #[serde(rename = "web_page_agent")]
    WebPage,
    /// 写作：读写章节文件、组装并编译文档
    #[serde(rename = "writing_agent")]
    Writing,
}

impl AgentRole {
    pub const ALL: [AgentRole; 3] = [AgentRole::WebSearch, AgentRole::WebPage, AgentRole::Writing];

    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::WebSearch => "web_search_agent",
            AgentRole::WebPage => "web_page_agent",
            AgentRole::Writing => "writing_agent",
        }
    }

    /// 展示给编排器的能力说明
    pub fn description(&self) -> &'static str {
        match self {
            AgentRole::WebSearch => {
                "Searches the web and returns relevant results with titles, full URLs and snippets."
            }
            AgentRole::WebPage => {
                "Downloads web pages or PDFs and saves their text to files; can read and list saved pages."
            }
            AgentRole::Writing => {
                "Reads saved pages, writes section and bibliography files, assembles documents from templates and compiles them to PDF."
            }
        }
    }

    /// 该角色允许使用的工具（安全边界）
    pub fn toolset(&self) -> &'static [ToolKind] {
        match self {
            AgentRole::WebSearch => &[ToolKind::WebSearch],
            AgentRole::WebPage => &[ToolKind::FetchPage, ToolKind::ReadFile, ToolKind::ListDirectory],
            AgentRole::Writing => &[
                ToolKind::ReadFile,
                ToolKind::WriteFile,
                ToolKind::ListDirectory,
                ToolKind::CreateDocument,
                ToolKind::CompileDocument,
            ],
        }
    }

    /// 基础 system prompt（配置中的 additional_system_prompt 追加在其后）
    pub fn base_prompt(&self) -> String {
        format!(
            "You are the {}, a research assistant. {}\n\
             Work only with the tools listed below. Report failures honestly instead of inventing results.",
            self.name(),
            self.description()
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name.trim())
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 拼接基础提示词与追加提示词
pub(crate) fn compose_prompt(base: &str, additional: &str) -> String {
    if additional.trim().is_empty() {
        base.to_string()
    } else {
        format!("{}\n\n{}", base, additional.trim())
    }
}
