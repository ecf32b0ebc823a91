//! 会话历史
//!
//! Message / Role 是与推理端交互的基本单元；ConversationMemory 保留交互模式下最近 N 轮
//! （用户任务 + 最终回答），作为 Task 的「对话历史」部分交给编排器。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 最近 N 轮会话（每轮 user + assistant 两条消息）
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
        }
    }

    /// 记录一轮完成的会话
    pub fn push_turn(&mut self, task: &str, answer: &str) {
        self.messages.push(Message::user(task));
        self.messages.push(Message::assistant(answer));
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 超出 max_turns*2 时丢弃最旧的消息
    fn prune(&mut self) {
        let keep = self.max_turns * 2;
        if self.messages.len() > keep {
            self.messages.drain(..self.messages.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_latest_turns() {
        let mut mem = ConversationMemory::new(2);
        for i in 0..5 {
            mem.push_turn(&format!("task {i}"), &format!("answer {i}"));
        }
        assert_eq!(mem.len(), 4);
        assert_eq!(mem.messages()[0].content, "task 3");
        assert_eq!(mem.messages()[3].content, "answer 4");
        assert_eq!(mem.messages()[0].role, Role::User);
    }

    #[test]
    fn test_zero_turns_keeps_nothing() {
        let mut mem = ConversationMemory::new(0);
        mem.push_turn("t", "a");
        assert!(mem.is_empty());
    }
}
