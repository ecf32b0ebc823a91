//! Cheap Research - 多智能体研究助手
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复引擎、研究团队构建器
//! - **sandbox**: 沙箱路径解析（网页资料 / 文档 / 模板三个根）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 消息与会话历史
//! - **tools**: 工具（搜索、抓取、文件读写、文档组装与编译）、注册表与执行器
//! - **document**: 模板、章节组装、多遍编译状态机
//! - **react**: Planner 与有界推理循环
//! - **agents**: 编排器与三个子 Agent

pub mod agents;
pub mod config;
pub mod core;
pub mod document;
pub mod llm;
pub mod memory;
pub mod react;
pub mod sandbox;
pub mod tools;

pub use crate::agents::{AgentRole, Orchestrator};
pub use crate::config::AppConfig;
pub use crate::core::{AgentError, ResearchBuilder, ToolError};
