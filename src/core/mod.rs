//! 核心层：错误类型、恢复引擎与组装入口

pub mod builder;
pub mod error;
pub mod recovery;

pub use builder::ResearchBuilder;
pub use error::{AgentError, RecoveryAction, ToolError};
pub use recovery::RecoveryEngine;
