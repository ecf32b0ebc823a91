//! 记忆层：消息类型与会话历史

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
