//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use crate::config::{AgentSection, KeyLookup};
use crate::core::AgentError;

/// 按角色配置创建推理客户端；缺少 API Key 视为配置错误
pub fn create_llm_from_section(
    role: &str,
    section: &AgentSection,
    key_lookup: KeyLookup,
) -> Result<Arc<dyn LlmClient>, AgentError> {
    let api_key = section
        .resolve_api_key_with(key_lookup)
        .ok_or_else(|| AgentError::ConfigError(format!("missing api_key for [{role}]")))?;
    tracing::info!(role, model = %section.model, base_url = %section.base_url(), "using LLM");
    Ok(Arc::new(OpenAiClient::new(
        section.base_url(),
        &section.model,
        &api_key,
    )))
}
